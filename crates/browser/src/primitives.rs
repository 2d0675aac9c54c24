//! Element interactions built on scoped locator resolution.
//!
//! Every primitive resolves its locator, acts on the element inside the
//! frame the locator led to, and releases the scope before returning. The
//! session's "last hovered" locator is threaded through by `&mut` so scroll
//! can fall back to it.

use std::sync::Arc;

use {
    serde_json::Value,
    tracing::{debug, info},
};

use crate::{
    driver::{BrowserDriver, ElementHandle, InputAction, Key, ScriptArg},
    error::{BrowserError, DriverError},
    locator::{Locator, resolve},
    types::ScrollDirection,
};

/// Nearest ancestor of `arguments[0]` that scrolls, or `null`.
pub const SCROLLABLE_PARENT_JS: &str = r#"
const scrollable = (el) => {
    const style = getComputedStyle(el);
    const overflow = style.overflowY + " " + style.overflowX;
    return /(auto|scroll|overlay)/.test(overflow)
        && (el.scrollHeight > el.clientHeight || el.scrollWidth > el.clientWidth);
};
let node = arguments[0].parentElement;
while (node && node !== document.body && node !== document.documentElement) {
    if (scrollable(node)) return node;
    node = node.parentElement;
}
return null;
"#;

/// `[width, height]` of `arguments[0]`'s bounding box.
pub const ELEMENT_SIZE_JS: &str =
    "const r = arguments[0].getBoundingClientRect(); return [r.width, r.height];";

/// `[width, height]` of the viewport.
pub const VIEWPORT_SIZE_JS: &str = "return [window.innerWidth, window.innerHeight];";

/// Select the option of `arguments[0]` whose value is `arguments[1]`.
pub const SELECT_BY_VALUE_JS: &str = r#"
const select = arguments[0];
for (const option of select.options) {
    if (option.value === arguments[1]) {
        if (option.disabled) throw new Error("element not interactable: option is disabled");
        option.selected = true;
        select.dispatchEvent(new Event("input", { bubbles: true }));
        select.dispatchEvent(new Event("change", { bubbles: true }));
        return true;
    }
}
return false;
"#;

/// Select the option of `arguments[0]` whose visible text is `arguments[1]`.
pub const SELECT_BY_TEXT_JS: &str = r#"
const select = arguments[0];
const wanted = String(arguments[1]).replace(/\s+/g, " ").trim();
for (const option of select.options) {
    if (option.text.replace(/\s+/g, " ").trim() === wanted) {
        if (option.disabled) throw new Error("element not interactable: option is disabled");
        option.selected = true;
        select.dispatchEvent(new Event("input", { bubbles: true }));
        select.dispatchEvent(new Event("change", { bubbles: true }));
        return true;
    }
}
return false;
"#;

pub const DEFAULT_SCROLL_FACTOR: f64 = 0.75;

type Result<T> = std::result::Result<T, BrowserError>;

/// What `set_value` should do with a resolved element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Select,
    File,
    Text,
}

async fn field_kind(driver: &dyn BrowserDriver, element: &ElementHandle) -> Result<FieldKind> {
    let tag = driver.tag_name(element).await?;
    Ok(match tag.as_str() {
        "select" => FieldKind::Select,
        "input" if driver.attribute(element, "type").await?.as_deref() == Some("file") => {
            FieldKind::File
        },
        _ => FieldKind::Text,
    })
}

/// Native click, retried once as a pointer move + click when another
/// element intercepts it.
pub async fn click(
    driver: &Arc<dyn BrowserDriver>,
    last_hovered: &mut Option<Locator>,
    locator: &Locator,
) -> Result<()> {
    let scope = resolve(driver, locator).await?;
    *last_hovered = Some(locator.clone());
    let result = click_element(driver.as_ref(), scope.element(), locator).await;
    scope.finish(result).await
}

async fn click_element(
    driver: &dyn BrowserDriver,
    element: &ElementHandle,
    locator: &Locator,
) -> Result<()> {
    let failed = |err: DriverError| BrowserError::ClickFailed {
        locator: locator.to_string(),
        reason: err.to_string(),
    };

    match driver.click(element).await {
        Ok(()) => Ok(()),
        Err(DriverError::ClickIntercepted(by)) => {
            debug!(locator = %locator, intercepted_by = %by, "click intercepted, retrying at element position");
            driver
                .perform(&[InputAction::MoveToElement(element.clone()), InputAction::Click])
                .await
                .map_err(failed)
        },
        Err(err) => Err(failed(err)),
    }
}

/// Replace the value of a form field.
///
/// Selects are delegated to [`dropdown_select`] and file inputs to
/// [`upload_file`]. Anything else is cleared (best effort), focused with a
/// click and retyped as select-all, delete, value and optionally Enter.
pub async fn set_value(
    driver: &Arc<dyn BrowserDriver>,
    last_hovered: &mut Option<Locator>,
    locator: &Locator,
    value: &str,
    enter: bool,
) -> Result<()> {
    let scope = resolve(driver, locator).await?;
    *last_hovered = Some(locator.clone());

    let kind = match field_kind(driver.as_ref(), scope.element()).await {
        Ok(kind) => kind,
        Err(err) => {
            debug!(locator = %locator, error = %err, "could not inspect field, typing into it");
            FieldKind::Text
        },
    };

    match kind {
        FieldKind::Select => {
            scope.release().await?;
            return dropdown_select(driver, last_hovered, locator, value).await;
        },
        FieldKind::File => {
            scope.release().await?;
            return upload_file(driver, last_hovered, locator, value).await;
        },
        FieldKind::Text => {
            if let Err(err) = driver.clear(scope.element()).await {
                if !err.is_element_state() {
                    return scope.finish(Err(err.into())).await;
                }
                debug!(locator = %locator, error = %err, "element not clearable");
            }
            scope.release().await?;
        },
    }

    click(driver, last_hovered, locator).await?;

    let mut keys = vec![
        InputAction::KeyDown(Key::Control),
        InputAction::SendKeys("a".into()),
        InputAction::KeyUp(Key::Control),
        InputAction::Press(Key::Delete),
        InputAction::SendKeys(value.to_string()),
    ];
    if enter {
        keys.push(InputAction::Press(Key::Enter));
    }
    driver.perform(&keys).await?;
    Ok(())
}

/// Choose an option of a `<select>` by value, falling back to its visible
/// text. Other elements are simply clicked.
pub async fn dropdown_select(
    driver: &Arc<dyn BrowserDriver>,
    last_hovered: &mut Option<Locator>,
    locator: &Locator,
    value: &str,
) -> Result<()> {
    let scope = resolve(driver, locator).await?;
    *last_hovered = Some(locator.clone());

    let tag = match driver.tag_name(scope.element()).await {
        Ok(tag) => tag,
        Err(err) => {
            let err = BrowserError::retrieval(locator.as_str(), err);
            return scope.finish(Err(err)).await;
        },
    };

    if tag != "select" {
        info!(locator = %locator, tag = %tag, "not a select element, falling back to click");
        scope.release().await?;
        return click(driver, last_hovered, locator).await;
    }

    let result = select_option(driver.as_ref(), scope.element(), locator, value).await;
    scope.finish(result).await
}

async fn select_option(
    driver: &dyn BrowserDriver,
    select: &ElementHandle,
    locator: &Locator,
    value: &str,
) -> Result<()> {
    for script in [SELECT_BY_VALUE_JS, SELECT_BY_TEXT_JS] {
        let selected = driver
            .execute_script(script, vec![select.into(), value.into()])
            .await?;
        if selected == Value::Bool(true) {
            return Ok(());
        }
    }
    Err(BrowserError::SelectFailed {
        locator: locator.to_string(),
        value: value.to_string(),
    })
}

/// Move the pointer over an element.
pub async fn hover(
    driver: &Arc<dyn BrowserDriver>,
    last_hovered: &mut Option<Locator>,
    locator: &Locator,
) -> Result<()> {
    let scope = resolve(driver, locator).await?;
    *last_hovered = Some(locator.clone());
    let result = driver
        .perform(&[InputAction::MoveToElement(scope.element().clone())])
        .await
        .map_err(BrowserError::from);
    scope.finish(result).await
}

/// Send a local file path to a file input.
pub async fn upload_file(
    driver: &Arc<dyn BrowserDriver>,
    last_hovered: &mut Option<Locator>,
    locator: &Locator,
    path: &str,
) -> Result<()> {
    let scope = resolve(driver, locator).await?;
    *last_hovered = Some(locator.clone());
    let result = driver
        .send_keys(scope.element(), path)
        .await
        .map_err(BrowserError::from);
    scope.finish(result).await
}

/// Scroll relative to `anchor`, else the last hovered element, else the
/// page.
///
/// With an anchor, the nearest scrollable ancestor is wheel-scrolled by
/// `factor` of its extent; without one the viewport is wheel-scrolled. An
/// anchor that cannot be found degrades to a page scroll.
pub async fn scroll(
    driver: &Arc<dyn BrowserDriver>,
    last_hovered: &mut Option<Locator>,
    anchor: Option<&Locator>,
    direction: ScrollDirection,
    factor: f64,
) -> Result<()> {
    let Some(target) = anchor.or(last_hovered.as_ref()).cloned() else {
        return scroll_page(driver.as_ref(), direction).await;
    };

    let scope = match resolve(driver, &target).await {
        Ok(scope) => scope,
        Err(BrowserError::NoElement(_)) => {
            debug!(locator = %target, "scroll anchor not found, scrolling page");
            return scroll_page(driver.as_ref(), direction).await;
        },
        Err(err) => return Err(err),
    };

    let result = scroll_from(driver.as_ref(), scope.element(), direction, factor).await;
    scope.finish(result).await?;

    if let Some(anchor) = anchor {
        *last_hovered = Some(anchor.clone());
    }
    Ok(())
}

async fn scroll_from(
    driver: &dyn BrowserDriver,
    element: &ElementHandle,
    direction: ScrollDirection,
    factor: f64,
) -> Result<()> {
    let actions = match scrollable_parent(driver, element).await? {
        Some(container) => {
            let size = driver
                .execute_script(ELEMENT_SIZE_JS, vec![(&container).into()])
                .await?;
            let (width, height) = parse_size(&size)?;
            let (delta_x, delta_y) = direction.delta(width, height, factor);
            vec![
                InputAction::MoveToElement(container.clone()),
                InputAction::ScrollFromElement {
                    origin: container,
                    delta_x,
                    delta_y,
                },
            ]
        },
        None => {
            debug!("no scrollable container, scrolling viewport");
            let size = driver.execute_script(VIEWPORT_SIZE_JS, Vec::new()).await?;
            let (width, height) = parse_size(&size)?;
            let (delta_x, delta_y) = direction.delta(width, height, factor);
            vec![InputAction::ScrollBy { delta_x, delta_y }]
        },
    };
    driver.perform(&actions).await?;
    Ok(())
}

async fn scrollable_parent(
    driver: &dyn BrowserDriver,
    element: &ElementHandle,
) -> Result<Option<ElementHandle>> {
    let parent = driver
        .execute_script(SCROLLABLE_PARENT_JS, vec![element.into()])
        .await?;
    Ok(ElementHandle::from_value(&parent))
}

/// Page-level scroll by three quarters of the viewport.
pub async fn scroll_page(driver: &dyn BrowserDriver, direction: ScrollDirection) -> Result<()> {
    driver
        .execute_script(direction.page_script(), Vec::new())
        .await?;
    Ok(())
}

/// Whether the anchor's scroll container (or the page) can move further in
/// `direction`.
pub async fn can_scroll(
    driver: &Arc<dyn BrowserDriver>,
    last_hovered: Option<&Locator>,
    anchor: Option<&Locator>,
    direction: ScrollDirection,
) -> Result<bool> {
    if let Some(target) = anchor.or(last_hovered) {
        match resolve(driver, target).await {
            Ok(scope) => {
                let result = element_can_scroll(driver.as_ref(), scope.element(), direction).await;
                return scope.finish(result).await;
            },
            Err(BrowserError::NoElement(_)) => {},
            Err(err) => return Err(err),
        }
    }
    let scrollable = driver
        .execute_script(direction.page_scrollable_script(), Vec::new())
        .await?;
    Ok(scrollable.as_bool().unwrap_or(false))
}

async fn element_can_scroll(
    driver: &dyn BrowserDriver,
    element: &ElementHandle,
    direction: ScrollDirection,
) -> Result<bool> {
    let anchor = scrollable_parent(driver, element)
        .await?
        .unwrap_or_else(|| element.clone());
    let scrollable = driver
        .execute_script(direction.element_scrollable_script(), vec![
            ScriptArg::Element(anchor),
        ])
        .await?;
    Ok(scrollable.as_bool().unwrap_or(false))
}

fn parse_size(value: &Value) -> Result<(f64, f64)> {
    match value.as_array().map(Vec::as_slice) {
        Some([w, h]) => match (w.as_f64(), h.as_f64()) {
            (Some(w), Some(h)) => Ok((w, h)),
            _ => Err(DriverError::Script(format!("unexpected size {value}")).into()),
        },
        _ => Err(DriverError::Script(format!("unexpected size {value}")).into()),
    }
}

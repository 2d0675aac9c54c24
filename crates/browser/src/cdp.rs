//! [`BrowserDriver`] over the Chrome DevTools Protocol (chromiumoxide).
//!
//! Elements live in a page-global registry (`window.__yoinkRefs`) and are
//! addressed by id. The frame context is the chain of iframe ids descended
//! into; every evaluation walks that chain from the top-level window, which
//! works because the browser is launched with site isolation disabled.
//! DevTools events the idle detector needs are recorded as performance-log
//! entries.

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    chromiumoxide::{
        Browser, BrowserConfig as CdpBrowserConfig, Page,
        cdp::{
            IntoEventKind,
            browser_protocol::{
                browser::{
                    EventDownloadProgress, EventDownloadWillBegin, SetDownloadBehaviorBehavior,
                    SetDownloadBehaviorParams,
                },
                dom::SetFileInputFilesParams,
                emulation::SetDeviceMetricsOverrideParams,
                input::{
                    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
                    DispatchMouseEventType, InsertTextParams, MouseButton,
                },
                network::{
                    EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
                    EventRequestWillBeSent, SetUserAgentOverrideParams,
                },
                page::{
                    CaptureScreenshotFormat, EventFrameStartedLoading, EventFrameStoppedLoading,
                    SetBypassCspParams,
                },
            },
            js_protocol::runtime::{EvaluateParams, EventConsoleApiCalled, ExceptionDetails},
        },
        handler::{HandlerConfig, viewport::Viewport},
        listeners::EventStream,
        page::ScreenshotParams,
    },
    futures::StreamExt,
    serde::Serialize,
    serde_json::Value,
    tokio::{sync::Mutex, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    driver::{
        BrowserDriver, DriverResult, ElementHandle, InputAction, Key, LogCategory, LogEntry,
        ScriptArg,
    },
    error::{BrowserError, DriverError},
    types::{BrowserConfig, DEFAULT_USER_AGENT},
};

/// Shared by every evaluation: element registry, argument decoding and the
/// walk down the current frame chain. Expects `FRAMES` to be defined.
const PRELUDE_JS: &str = r#"
const KEY = "element-6066-11e4-a52e-4f735466cecf";
const R = window.__yoinkRefs || (window.__yoinkRefs = { next: 0, map: new Map(), ids: new WeakMap() });
const ref = (el) => {
    let id = R.ids.get(el);
    if (!id) { id = "e" + (++R.next); R.ids.set(el, id); R.map.set(id, el); }
    return id;
};
const deref = (id) => {
    const el = R.map.get(id);
    if (!el || !el.isConnected) throw new Error("stale element reference: " + id);
    return el;
};
const decode = (v) => Array.isArray(v) ? v.map(decode)
    : (v && typeof v === "object" && typeof v[KEY] === "string") ? deref(v[KEY]) : v;
const encode = (v) => Array.isArray(v) ? v.map(encode)
    : (v && typeof v === "object" && v.nodeType === 1) ? { [KEY]: ref(v) } : v;
let win = window;
for (const id of FRAMES) {
    const frame = R.map.get(id);
    if (!frame || !frame.isConnected || !frame.contentWindow) throw new Error("no such frame: " + id);
    win = frame.contentWindow;
}
const doc = win.document;
"#;

const FIND_ELEMENT_JS: &str = r#"
let node;
try {
    node = doc.evaluate(args[0], doc, null, 9, null).singleNodeValue;
} catch (e) {
    throw new Error("invalid selector: " + e.message);
}
if (!node || node.nodeType !== 1) throw new Error("no such element: " + args[0]);
return node;
"#;

const CHECK_FRAME_JS: &str = r#"
const el = args[0];
const tag = el.tagName.toLowerCase();
if ((tag !== "iframe" && tag !== "frame") || !el.contentDocument) {
    throw new Error("no such frame: <" + tag + "> is not an accessible frame");
}
return true;
"#;

/// Scroll `args[0]` into view and return its centre in top-level viewport
/// coordinates. With `args[1]` set, fail when another element would receive
/// a click there.
const ELEMENT_POINT_JS: &str = r#"
const el = args[0];
el.scrollIntoView({ block: "center", inline: "center" });
const r = el.getBoundingClientRect();
if (r.width === 0 || r.height === 0) throw new Error("element not interactable: element has no size");
let x = r.left + r.width / 2;
let y = r.top + r.height / 2;
if (args[1]) {
    const hit = doc.elementFromPoint(x, y);
    if (hit && hit !== el && !el.contains(hit)) {
        throw new Error("element click intercepted: " + hit.outerHTML.slice(0, 120));
    }
}
let w = win;
while (w !== window) {
    const fe = w.frameElement;
    const fr = fe.getBoundingClientRect();
    x += fr.left + fe.clientLeft;
    y += fr.top + fe.clientTop;
    w = w.parent;
}
return [x, y];
"#;

const CLEAR_JS: &str = r#"
const el = args[0];
if (el.isContentEditable) {
    el.innerHTML = "";
} else if ("value" in el && !el.readOnly && !el.disabled) {
    el.focus();
    el.value = "";
    el.dispatchEvent(new Event("input", { bubbles: true }));
    el.dispatchEvent(new Event("change", { bubbles: true }));
} else {
    throw new Error("element not interactable: element is not editable");
}
return true;
"#;

const FOCUS_JS: &str = "args[0].focus(); return true;";

const TAG_NAME_JS: &str = "return args[0].tagName.toLowerCase();";

/// Property value when the element exposes a scalar property of that name,
/// else the attribute.
const ATTRIBUTE_JS: &str = r#"
const el = args[0];
const name = args[1];
if (name in el && el[name] !== null && typeof el[name] !== "object" && typeof el[name] !== "function") {
    return String(el[name]);
}
return el.getAttribute(name);
"#;

const DISPLAYED_JS: &str = r#"
const el = args[0];
const s = win.getComputedStyle(el);
const r = el.getBoundingClientRect();
return s.display !== "none" && s.visibility !== "hidden" && parseFloat(s.opacity) > 0
    && r.width > 0 && r.height > 0;
"#;

const ENABLED_JS: &str = "return !args[0].disabled;";

const IS_FILE_INPUT_JS: &str =
    r#"return args[0].tagName.toLowerCase() === "input" && args[0].type === "file";"#;

const IDENTITY_JS: &str = "return args[0];";

/// CDP modifier bit for Control.
const MODIFIER_CONTROL: i64 = 2;

struct PageState {
    page: Page,
    frames: Vec<ElementHandle>,
    pointer: (f64, f64),
    modifiers: i64,
    listeners: Vec<JoinHandle<()>>,
}

/// Console messages kept between reads; older ones are dropped first.
const CONSOLE_LOG_CAPACITY: usize = 500;

type LogSink = Arc<Mutex<LogBuffer>>;

/// Recorded log entries, optionally bounded.
#[derive(Default)]
struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: Option<usize>,
}

impl LogBuffer {
    fn bounded(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: Some(capacity),
        }
    }

    fn push(&mut self, entry: LogEntry) {
        if let Some(capacity) = self.capacity {
            while self.entries.len() >= capacity.max(1) {
                self.entries.pop_front();
            }
        }
        self.entries.push_back(entry);
    }

    fn drain(&mut self) -> Vec<LogEntry> {
        self.entries.drain(..).collect()
    }
}

/// A Chromium instance driven over CDP, owning one focused tab at a time.
pub struct CdpDriver {
    browser: Mutex<Browser>,
    state: Mutex<PageState>,
    config: BrowserConfig,
    performance: LogSink,
    console: LogSink,
    handler: JoinHandle<()>,
    browser_listeners: Vec<JoinHandle<()>>,
}

impl CdpDriver {
    /// Launch a local browser, or connect to `config.remote_url` when set.
    pub async fn launch(config: &BrowserConfig) -> Result<Self, BrowserError> {
        let (browser, mut handler) = match config.remote_url.as_deref() {
            Some(ws_url) => connect_remote(config, ws_url).await?,
            None => launch_local(config).await?,
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler error");
                }
            }
            debug!("browser event handler exited");
        });

        let performance: LogSink = Arc::default();
        let console: LogSink = Arc::new(Mutex::new(LogBuffer::bounded(CONSOLE_LOG_CAPACITY)));

        let download_behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Default)
            .events_enabled(true)
            .build()
            .map_err(BrowserError::LaunchFailed)?;
        if let Err(e) = browser.execute(download_behavior).await {
            warn!(error = %e, "failed to enable download events");
        }

        let mut browser_listeners = Vec::new();
        match browser.event_listener::<EventDownloadWillBegin>().await {
            Ok(stream) => browser_listeners.push(spawn_recorder(
                stream,
                "Browser.downloadWillBegin",
                Arc::clone(&performance),
            )),
            Err(e) => warn!(error = %e, "failed to listen for downloads"),
        }
        match browser.event_listener::<EventDownloadProgress>().await {
            Ok(stream) => browser_listeners.push(spawn_recorder(
                stream,
                "Browser.downloadProgress",
                Arc::clone(&performance),
            )),
            Err(e) => warn!(error = %e, "failed to listen for download progress"),
        }

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        let listeners = prepare_page(&page, config, &performance, &console).await?;

        info!(
            viewport_width = config.viewport_width,
            viewport_height = config.viewport_height,
            headless = config.headless,
            remote = config.remote_url.is_some(),
            "browser session ready"
        );

        Ok(Self {
            browser: Mutex::new(browser),
            state: Mutex::new(PageState {
                page,
                frames: Vec::new(),
                pointer: (0.0, 0.0),
                modifiers: 0,
                listeners,
            }),
            config: config.clone(),
            performance,
            console,
            handler,
            browser_listeners,
        })
    }

    async fn current(&self) -> (Page, Vec<ElementHandle>) {
        let state = self.state.lock().await;
        (state.page.clone(), state.frames.clone())
    }

    /// Run `body` with `args` in the current frame. `body` sees `args`,
    /// `win` and `doc`; element arguments arrive as DOM nodes and returned
    /// nodes are registered.
    async fn run(&self, body: &str, args: Vec<Value>) -> DriverResult<Value> {
        let (page, frames) = self.current().await;
        let returns = evaluate(&page, &frames, body, args, true).await?;
        Ok(returns.unwrap_or(Value::Null))
    }

    async fn run_on(&self, body: &str, element: &ElementHandle) -> DriverResult<Value> {
        self.run(body, vec![element.to_value()]).await
    }

    async fn element_point(&self, element: &ElementHandle, hit_test: bool) -> DriverResult<(f64, f64)> {
        let point = self
            .run(ELEMENT_POINT_JS, vec![element.to_value(), Value::Bool(hit_test)])
            .await?;
        match point.as_array().map(Vec::as_slice) {
            Some([x, y]) => Ok((x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0))),
            _ => Err(DriverError::Script(format!("unexpected element position {point}"))),
        }
    }

    async fn mouse(
        &self,
        page: &Page,
        kind: DispatchMouseEventType,
        (x, y): (f64, f64),
        modifiers: i64,
    ) -> DriverResult<()> {
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind.clone())
            .x(x)
            .y(y)
            .modifiers(modifiers);
        if matches!(
            kind,
            DispatchMouseEventType::MousePressed | DispatchMouseEventType::MouseReleased
        ) {
            builder = builder.button(MouseButton::Left).click_count(1);
        }
        let cmd = builder.build().map_err(DriverError::Protocol)?;
        page.execute(cmd).await?;
        Ok(())
    }

    async fn wheel(&self, page: &Page, (x, y): (f64, f64), delta_x: i64, delta_y: i64) -> DriverResult<()> {
        let cmd = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(x)
            .y(y)
            .delta_x(delta_x as f64)
            .delta_y(delta_y as f64)
            .build()
            .map_err(DriverError::Protocol)?;
        page.execute(cmd).await?;
        Ok(())
    }

    async fn key(
        &self,
        page: &Page,
        kind: DispatchKeyEventType,
        key: KeyInfo,
        modifiers: i64,
        commands: Vec<String>,
    ) -> DriverResult<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.key)
            .code(key.code)
            .windows_virtual_key_code(key.virtual_code)
            .modifiers(modifiers);
        if matches!(kind, DispatchKeyEventType::KeyDown)
            && let Some(text) = key.text
        {
            builder = builder.text(text);
        }
        if !commands.is_empty() {
            builder = builder.commands(commands);
        }
        let cmd = builder.build().map_err(DriverError::Protocol)?;
        page.execute(cmd).await?;
        Ok(())
    }

    async fn press(&self, page: &Page, key: KeyInfo, modifiers: i64, commands: Vec<String>) -> DriverResult<()> {
        let down = if key.text.is_some() {
            DispatchKeyEventType::KeyDown
        } else {
            DispatchKeyEventType::RawKeyDown
        };
        self.key(page, down, key.clone(), modifiers, commands).await?;
        self.key(page, DispatchKeyEventType::KeyUp, key, modifiers, Vec::new())
            .await
    }

    async fn type_text(&self, page: &Page, text: &str, modifiers: i64) -> DriverResult<()> {
        if modifiers == 0 {
            page.execute(InsertTextParams::new(text)).await?;
            return Ok(());
        }
        for c in text.chars() {
            let commands = if modifiers & MODIFIER_CONTROL != 0 && c.eq_ignore_ascii_case(&'a') {
                vec!["selectAll".to_string()]
            } else {
                Vec::new()
            };
            self.press(page, KeyInfo::char(c), modifiers, commands).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let mut state = self.state.lock().await;
        state.frames.clear();
        state.page.goto(url).await?;
        debug!(url, "navigated");
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        let (page, _) = self.current().await;
        Ok(page.url().await?.unwrap_or_default())
    }

    async fn back(&self) -> DriverResult<()> {
        let mut state = self.state.lock().await;
        state.frames.clear();
        state.page.evaluate("history.back()").await?;
        if let Err(e) = state.page.wait_for_navigation().await {
            debug!(error = %e, "no navigation observed after history.back()");
        }
        Ok(())
    }

    async fn title(&self) -> DriverResult<String> {
        let (page, _) = self.current().await;
        Ok(page.get_title().await?.unwrap_or_default())
    }

    async fn page_source(&self) -> DriverResult<String> {
        let (page, _) = self.current().await;
        Ok(page.content().await?)
    }

    async fn screenshot(&self) -> DriverResult<Vec<u8>> {
        let (page, _) = self.current().await;
        let png = page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await?;
        debug!(bytes = png.len(), "took screenshot");
        Ok(png)
    }

    async fn execute_script(&self, script: &str, args: Vec<ScriptArg>) -> DriverResult<Value> {
        let literal = serde_json::to_string(script)
            .map_err(|e| DriverError::Script(format!("unencodable script: {e}")))?;
        let body = format!("return await new win.Function({literal}).apply(win, args);");
        self.run(&body, args.iter().map(ScriptArg::to_value).collect())
            .await
    }

    async fn find_element(&self, xpath: &str) -> DriverResult<ElementHandle> {
        let found = self.run(FIND_ELEMENT_JS, vec![Value::from(xpath)]).await?;
        ElementHandle::from_value(&found)
            .ok_or_else(|| DriverError::NoSuchElement(xpath.to_string()))
    }

    async fn switch_to_frame(&self, frame: &ElementHandle) -> DriverResult<()> {
        self.run_on(CHECK_FRAME_JS, frame).await?;
        self.state.lock().await.frames.push(frame.clone());
        Ok(())
    }

    async fn switch_to_default_frame(&self) -> DriverResult<()> {
        self.state.lock().await.frames.clear();
        Ok(())
    }

    async fn window_handles(&self) -> DriverResult<Vec<String>> {
        let pages = self.browser.lock().await.pages().await?;
        Ok(pages
            .iter()
            .map(|p| p.target_id().inner().clone())
            .collect())
    }

    async fn current_window_handle(&self) -> DriverResult<String> {
        let (page, _) = self.current().await;
        Ok(page.target_id().inner().clone())
    }

    async fn switch_to_window(&self, handle: &str) -> DriverResult<()> {
        let pages = self.browser.lock().await.pages().await?;
        let page = pages
            .into_iter()
            .find(|p| p.target_id().inner() == handle)
            .ok_or_else(|| DriverError::NoSuchWindow(handle.to_string()))?;

        let mut state = self.state.lock().await;
        if state.page.target_id() == page.target_id() {
            state.frames.clear();
            return Ok(());
        }

        page.bring_to_front().await?;
        let listeners = prepare_page(&page, &self.config, &self.performance, &self.console)
            .await
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        for old in std::mem::replace(&mut state.listeners, listeners) {
            old.abort();
        }
        state.page = page;
        state.frames.clear();
        state.pointer = (0.0, 0.0);
        debug!(handle, "switched tab");
        Ok(())
    }

    async fn set_window_size(&self, width: u32, height: u32) -> DriverResult<()> {
        let (page, _) = self.current().await;
        let cmd = SetDeviceMetricsOverrideParams::builder()
            .width(width)
            .height(height)
            .device_scale_factor(self.config.device_scale_factor)
            .mobile(false)
            .build()
            .map_err(DriverError::Protocol)?;
        page.execute(cmd).await?;
        Ok(())
    }

    async fn get_log(&self, category: LogCategory) -> DriverResult<Vec<LogEntry>> {
        let sink = match category {
            LogCategory::Performance => &self.performance,
            LogCategory::Browser => &self.console,
        };
        Ok(sink.lock().await.drain())
    }

    async fn click(&self, element: &ElementHandle) -> DriverResult<()> {
        let point = self.element_point(element, true).await?;
        let (page, modifiers) = {
            let mut state = self.state.lock().await;
            state.pointer = point;
            (state.page.clone(), state.modifiers)
        };
        self.mouse(&page, DispatchMouseEventType::MouseMoved, point, modifiers)
            .await?;
        self.mouse(&page, DispatchMouseEventType::MousePressed, point, modifiers)
            .await?;
        self.mouse(&page, DispatchMouseEventType::MouseReleased, point, modifiers)
            .await
    }

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()> {
        self.run_on(CLEAR_JS, element).await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> DriverResult<()> {
        let (page, frames) = self.current().await;
        let is_file = self.run_on(IS_FILE_INPUT_JS, element).await?;
        if is_file.as_bool().unwrap_or(false) {
            let object_id = remote_object_id(&page, &frames, element).await?;
            let cmd = SetFileInputFilesParams::builder()
                .files(text.lines().map(String::from).collect::<Vec<_>>())
                .object_id(object_id)
                .build()
                .map_err(DriverError::Protocol)?;
            page.execute(cmd).await?;
            debug!(files = text.lines().count(), "set file input");
            return Ok(());
        }
        self.run_on(FOCUS_JS, element).await?;
        page.execute(InsertTextParams::new(text)).await?;
        Ok(())
    }

    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String> {
        let tag = self.run_on(TAG_NAME_JS, element).await?;
        Ok(tag.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> DriverResult<Option<String>> {
        let value = self
            .run(ATTRIBUTE_JS, vec![element.to_value(), Value::from(name)])
            .await?;
        Ok(value.as_str().map(String::from))
    }

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool> {
        Ok(self.run_on(DISPLAYED_JS, element).await?.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool> {
        Ok(self.run_on(ENABLED_JS, element).await?.as_bool().unwrap_or(false))
    }

    async fn perform(&self, actions: &[InputAction]) -> DriverResult<()> {
        for action in actions {
            let (page, pointer, modifiers) = {
                let state = self.state.lock().await;
                (state.page.clone(), state.pointer, state.modifiers)
            };
            match action {
                InputAction::MoveToElement(element) => {
                    let point = self.element_point(element, false).await?;
                    self.mouse(&page, DispatchMouseEventType::MouseMoved, point, modifiers)
                        .await?;
                    self.state.lock().await.pointer = point;
                },
                InputAction::Click => {
                    self.mouse(&page, DispatchMouseEventType::MousePressed, pointer, modifiers)
                        .await?;
                    self.mouse(&page, DispatchMouseEventType::MouseReleased, pointer, modifiers)
                        .await?;
                },
                InputAction::KeyDown(key) => {
                    let info = KeyInfo::named(*key);
                    let modifiers = modifiers | modifier_bit(*key);
                    self.key(&page, DispatchKeyEventType::RawKeyDown, info, modifiers, Vec::new())
                        .await?;
                    self.state.lock().await.modifiers = modifiers;
                },
                InputAction::KeyUp(key) => {
                    let modifiers = modifiers & !modifier_bit(*key);
                    self.key(&page, DispatchKeyEventType::KeyUp, KeyInfo::named(*key), modifiers, Vec::new())
                        .await?;
                    self.state.lock().await.modifiers = modifiers;
                },
                InputAction::Press(key) => {
                    self.press(&page, KeyInfo::named(*key), modifiers, Vec::new())
                        .await?;
                },
                InputAction::SendKeys(text) => self.type_text(&page, text, modifiers).await?,
                InputAction::ScrollFromElement {
                    origin,
                    delta_x,
                    delta_y,
                } => {
                    let point = self.element_point(origin, false).await?;
                    self.wheel(&page, point, *delta_x, *delta_y).await?;
                },
                InputAction::ScrollBy { delta_x, delta_y } => {
                    self.wheel(&page, pointer, *delta_x, *delta_y).await?;
                },
            }
        }
        Ok(())
    }

    async fn quit(&self) -> DriverResult<()> {
        for listener in self.state.lock().await.listeners.drain(..) {
            listener.abort();
        }
        let mut browser = self.browser.lock().await;
        let closed = browser.close().await;
        if let Err(e) = browser.wait().await {
            debug!(error = %e, "browser process did not exit cleanly");
        }
        self.handler.abort();
        closed?;
        info!("browser closed");
        Ok(())
    }
}

impl Drop for CdpDriver {
    fn drop(&mut self) {
        self.handler.abort();
        for listener in &self.browser_listeners {
            listener.abort();
        }
    }
}

#[derive(Debug, Clone)]
struct KeyInfo {
    key: String,
    code: String,
    virtual_code: i64,
    text: Option<String>,
}

impl KeyInfo {
    fn named(key: Key) -> Self {
        let (name, code, virtual_code, text) = match key {
            Key::Control => ("Control", "ControlLeft", 17, None),
            Key::Delete => ("Delete", "Delete", 46, None),
            Key::Enter => ("Enter", "Enter", 13, Some("\r")),
        };
        Self {
            key: name.into(),
            code: code.into(),
            virtual_code,
            text: text.map(String::from),
        }
    }

    fn char(c: char) -> Self {
        let upper = c.to_ascii_uppercase();
        let code = if upper.is_ascii_alphabetic() {
            format!("Key{upper}")
        } else if c.is_ascii_digit() {
            format!("Digit{c}")
        } else {
            String::new()
        };
        Self {
            key: c.to_string(),
            code,
            virtual_code: if upper.is_ascii_alphanumeric() {
                i64::from(u32::from(upper))
            } else {
                0
            },
            text: Some(c.to_string()),
        }
    }
}

fn modifier_bit(key: Key) -> i64 {
    match key {
        Key::Control => MODIFIER_CONTROL,
        Key::Delete | Key::Enter => 0,
    }
}

async fn launch_local(
    config: &BrowserConfig,
) -> Result<(Browser, chromiumoxide::Handler), BrowserError> {
    let detection = crate::detect::detect_browser(config.chrome_path.as_deref());
    if !detection.found {
        warn!("{}", detection.install_hint);
        return Err(BrowserError::BrowserNotAvailable);
    }

    let mut builder = CdpBrowserConfig::builder();
    if !config.headless {
        builder = builder.with_head();
    }

    builder = builder
        .viewport(viewport(config))
        .request_timeout(Duration::from_millis(config.navigation_timeout_ms))
        .arg(format!(
            "--user-agent={}",
            config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT)
        ));

    if let Some(path) = detection.path.as_ref() {
        builder = builder.chrome_executable(path);
    }

    if config.disable_web_security {
        builder = builder
            .arg("--disable-web-security")
            .arg("--disable-site-isolation-trials");
    }

    builder = builder
        .arg("--disable-notifications")
        .arg("--disable-gpu")
        .arg("--disable-dev-shm-usage")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox");

    for arg in &config.chrome_args {
        builder = builder.arg(arg);
    }

    let cdp_config = builder.build().map_err(|e| {
        BrowserError::LaunchFailed(format!("failed to build browser config: {e}"))
    })?;

    Browser::launch(cdp_config).await.map_err(|e| {
        let install_hint = crate::detect::install_instructions();
        BrowserError::LaunchFailed(format!("browser launch failed: {e}\n\n{install_hint}"))
    })
}

async fn connect_remote(
    config: &BrowserConfig,
    ws_url: &str,
) -> Result<(Browser, chromiumoxide::Handler), BrowserError> {
    info!(ws_url, "connecting to remote browser");
    let handler_config = HandlerConfig {
        request_timeout: Duration::from_millis(config.navigation_timeout_ms),
        viewport: Some(viewport(config)),
        ..Default::default()
    };
    Browser::connect_with_config(ws_url, handler_config)
        .await
        .map_err(|e| {
            BrowserError::LaunchFailed(format!("failed to connect to browser at {ws_url}: {e}"))
        })
}

fn viewport(config: &BrowserConfig) -> Viewport {
    Viewport {
        width: config.viewport_width,
        height: config.viewport_height,
        device_scale_factor: Some(config.device_scale_factor),
        emulating_mobile: false,
        is_landscape: true,
        has_touch: false,
    }
}

/// Enable the domains the driver relies on and start recording events for
/// `page`.
async fn prepare_page(
    page: &Page,
    config: &BrowserConfig,
    performance: &LogSink,
    console: &LogSink,
) -> Result<Vec<JoinHandle<()>>, BrowserError> {
    let cdp = |e: chromiumoxide::error::CdpError| BrowserError::Driver(e.into());

    page.execute(NetworkEnableParams::default())
        .await
        .map_err(cdp)?;
    if let Err(e) = page.execute(SetBypassCspParams::new(true)).await {
        warn!(error = %e, "failed to bypass content security policy");
    }
    if let Some(ua) = config.user_agent.as_deref()
        && let Err(e) = page.execute(SetUserAgentOverrideParams::new(ua)).await
    {
        warn!(error = %e, "failed to set user agent");
    }

    let perf = || Arc::clone(performance);
    Ok(vec![
        spawn_recorder(
            page.event_listener::<EventRequestWillBeSent>()
                .await
                .map_err(cdp)?,
            "Network.requestWillBeSent",
            perf(),
        ),
        spawn_recorder(
            page.event_listener::<EventLoadingFinished>()
                .await
                .map_err(cdp)?,
            "Network.loadingFinished",
            perf(),
        ),
        spawn_recorder(
            page.event_listener::<EventLoadingFailed>()
                .await
                .map_err(cdp)?,
            "Network.loadingFailed",
            perf(),
        ),
        spawn_recorder(
            page.event_listener::<EventFrameStartedLoading>()
                .await
                .map_err(cdp)?,
            "Page.frameStartedLoading",
            perf(),
        ),
        spawn_recorder(
            page.event_listener::<EventFrameStoppedLoading>()
                .await
                .map_err(cdp)?,
            "Page.frameStoppedLoading",
            perf(),
        ),
        spawn_recorder(
            page.event_listener::<EventConsoleApiCalled>()
                .await
                .map_err(cdp)?,
            "Runtime.consoleAPICalled",
            Arc::clone(console),
        ),
    ])
}

/// Append every event of `stream` to `sink` in the performance-log format.
fn spawn_recorder<T>(mut stream: EventStream<T>, method: &'static str, sink: LogSink) -> JoinHandle<()>
where
    T: IntoEventKind + Serialize + Unpin + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            let params = serde_json::to_value(&*event).unwrap_or(Value::Null);
            sink.lock().await.push(log_entry(method, params));
        }
    })
}

fn log_entry(method: &str, params: Value) -> LogEntry {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    LogEntry {
        level: "INFO".into(),
        timestamp,
        message: serde_json::json!({ "message": { "method": method, "params": params } })
            .to_string(),
    }
}

fn evaluation_expression(
    frames: &[ElementHandle],
    body: &str,
    args: &[Value],
    encode: bool,
) -> String {
    let frames: Vec<&str> = frames.iter().map(ElementHandle::id).collect();
    let frames = Value::from(frames);
    let args = Value::from(args.to_vec());
    let output = if encode { "encode(result)" } else { "result" };
    format!(
        "(async () => {{\nconst FRAMES = {frames};\n{PRELUDE_JS}\nconst args = decode({args});\n\
         const result = await (async () => {{\n{body}\n}})();\nreturn {output};\n}})()"
    )
}

/// Evaluate `body` in the frame reached through `frames`. Returns the value
/// (`by_value`) or nothing when the result is not serializable.
async fn evaluate(
    page: &Page,
    frames: &[ElementHandle],
    body: &str,
    args: Vec<Value>,
    by_value: bool,
) -> DriverResult<Option<Value>> {
    let returns = evaluate_raw(page, frames, body, &args, by_value, by_value).await?;
    Ok(returns.result.value)
}

async fn evaluate_raw(
    page: &Page,
    frames: &[ElementHandle],
    body: &str,
    args: &[Value],
    encode: bool,
    by_value: bool,
) -> DriverResult<chromiumoxide::cdp::js_protocol::runtime::EvaluateReturns> {
    let params = EvaluateParams::builder()
        .expression(evaluation_expression(frames, body, args, encode))
        .await_promise(true)
        .return_by_value(by_value)
        .build()
        .map_err(DriverError::Protocol)?;
    let returns = page.execute(params).await?.result;
    if let Some(details) = returns.exception_details.as_ref() {
        return Err(DriverError::from_script_message(exception_message(details)));
    }
    Ok(returns)
}

async fn remote_object_id(
    page: &Page,
    frames: &[ElementHandle],
    element: &ElementHandle,
) -> DriverResult<chromiumoxide::cdp::js_protocol::runtime::RemoteObjectId> {
    let returns =
        evaluate_raw(page, frames, IDENTITY_JS, &[element.to_value()], false, false).await?;
    returns
        .result
        .object_id
        .ok_or_else(|| DriverError::StaleElement(element.id().to_string()))
}

/// First line of the thrown error, without the `Error: ` prefix.
fn exception_message(details: &ExceptionDetails) -> String {
    let description = details
        .exception
        .as_ref()
        .and_then(|e| e.description.clone())
        .unwrap_or_else(|| details.text.clone());
    let first = description.lines().next().unwrap_or_default();
    first.strip_prefix("Error: ").unwrap_or(first).to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expression_embeds_frames_and_arguments() {
        let frames = vec![ElementHandle::new("e1"), ElementHandle::new("e4")];
        let expr = evaluation_expression(
            &frames,
            FIND_ELEMENT_JS,
            &[Value::from("//a[@id=\"x\"]")],
            true,
        );
        assert!(expr.contains(r#"const FRAMES = ["e1","e4"];"#));
        assert!(expr.contains(r#"decode(["//a[@id=\"x\"]"])"#));
        assert!(expr.trim_end().ends_with("return encode(result);\n})()"));
    }

    #[test]
    fn raw_expression_skips_encoding() {
        let expr = evaluation_expression(&[], IDENTITY_JS, &[], false);
        assert!(expr.contains("const FRAMES = [];"));
        assert!(expr.contains("return result;"));
    }

    #[test]
    fn log_entries_use_performance_format() {
        let entry = log_entry("Network.loadingFinished", serde_json::json!({"requestId": "7"}));
        let parsed: Value = serde_json::from_str(&entry.message).unwrap();
        assert_eq!(parsed["message"]["method"], "Network.loadingFinished");
        assert_eq!(parsed["message"]["params"]["requestId"], "7");
    }

    #[test]
    fn bounded_log_drops_oldest_entries() {
        let mut buffer = LogBuffer::bounded(2);
        for n in 0..5 {
            buffer.push(log_entry("Runtime.consoleAPICalled", serde_json::json!({ "n": n })));
        }
        let kept: Vec<Value> = buffer
            .drain()
            .iter()
            .map(|e| serde_json::from_str::<Value>(&e.message).unwrap()["message"]["params"]["n"].clone())
            .collect();
        assert_eq!(kept, vec![Value::from(3), Value::from(4)]);
        assert!(buffer.drain().is_empty());

        let mut unbounded = LogBuffer::default();
        for n in 0..1000 {
            unbounded.push(log_entry("Network.loadingFinished", serde_json::json!({ "n": n })));
        }
        assert_eq!(unbounded.drain().len(), 1000);
    }

    #[test]
    fn key_info_for_characters() {
        let a = KeyInfo::char('a');
        assert_eq!(a.code, "KeyA");
        assert_eq!(a.virtual_code, 65);
        assert_eq!(KeyInfo::char('7').code, "Digit7");
        assert_eq!(KeyInfo::named(Key::Enter).text.as_deref(), Some("\r"));
        assert_eq!(modifier_bit(Key::Control), MODIFIER_CONTROL);
        assert_eq!(modifier_bit(Key::Delete), 0);
    }
}

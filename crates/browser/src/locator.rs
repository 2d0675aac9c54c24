//! XPath locators that may cross iframe boundaries, and scoped resolution.
//!
//! A locator such as `/html/body/iframe[2]/html/body//button` is split into
//! frame segments (`/html/body/iframe[2]`) and a terminal segment
//! (`/html/body//button`) evaluated inside the innermost frame. Resolving
//! one switches the session's frame context, so the result is handed out as
//! a [`ScopedElement`] whose release puts the session back on the top-level
//! document.

use std::{fmt, sync::Arc};

use {
    serde::{Deserialize, Serialize},
    tracing::{debug, warn},
};

use crate::{
    driver::{BrowserDriver, ElementHandle},
    error::BrowserError,
};

const IFRAME_STEP: &str = "iframe";

/// Path-like element locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

/// A locator split into the frames to descend through and the element to
/// select in the innermost one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorPath<'a> {
    pub frames: Vec<&'a str>,
    pub target: &'a str,
}

impl Locator {
    pub fn new(xpath: impl Into<String>) -> Self {
        Self(xpath.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Split into frame segments and the terminal segment.
    ///
    /// Every frame segment ends with an `iframe` step (including its
    /// predicates); the terminal segment is the rest. An empty locator, an
    /// empty prefix before a frame step, or a missing terminal segment is
    /// rejected.
    pub fn path(&self) -> Result<LocatorPath<'_>, BrowserError> {
        let mut frames = Vec::new();
        let mut rest = self.0.as_str();

        loop {
            if rest.trim().is_empty() {
                return Err(BrowserError::NoElement(format!(
                    "locator missing in '{}'",
                    self.0
                )));
            }
            match find_iframe_step(rest) {
                None => {
                    return Ok(LocatorPath {
                        frames,
                        target: rest,
                    });
                },
                Some((0, _)) => {
                    return Err(BrowserError::NoElement(format!(
                        "locator missing before iframe step in '{}'",
                        self.0
                    )));
                },
                Some((_, end)) => {
                    frames.push(&rest[..end]);
                    rest = &rest[end..];
                },
            }
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(xpath: &str) -> Self {
        Self::new(xpath)
    }
}

impl From<String> for Locator {
    fn from(xpath: String) -> Self {
        Self(xpath)
    }
}

/// Find the first `iframe` location step outside predicates and string
/// literals. Returns the byte offset where the step's name starts and the
/// offset just past the step (after any predicates).
fn find_iframe_step(xpath: &str) -> Option<(usize, usize)> {
    let bytes = xpath.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {},
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                _ if depth == 0 && bytes[i..].starts_with(IFRAME_STEP.as_bytes()) => {
                    let starts_step = i == 0 || matches!(bytes[i - 1], b'/' | b':');
                    let after = i + IFRAME_STEP.len();
                    let ends_name = after == bytes.len() || matches!(bytes[after], b'/' | b'[');
                    if starts_step && ends_name {
                        return Some((i, step_end(xpath, after)));
                    }
                },
                _ => {},
            },
        }
        i += 1;
    }
    None
}

/// Offset of the first `/` at predicate depth zero at or after `from`.
fn step_end(xpath: &str, from: usize) -> usize {
    let bytes = xpath.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {},
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'/' if depth == 0 => return i,
                _ => {},
            },
        }
    }
    bytes.len()
}

/// Resolve `locator`, descending through its frame segments.
///
/// On failure the frame context has already been reset. On success the
/// returned [`ScopedElement`] owns that reset.
pub async fn resolve(
    driver: &Arc<dyn BrowserDriver>,
    locator: &Locator,
) -> Result<ScopedElement, BrowserError> {
    match descend(driver.as_ref(), locator).await {
        Ok(element) => Ok(ScopedElement {
            driver: Arc::clone(driver),
            locator: locator.clone(),
            element,
            released: false,
        }),
        Err(err) => {
            if let Err(reset) = driver.switch_to_default_frame().await {
                warn!(locator = %locator, error = %reset, "failed to reset frame context");
            }
            Err(err)
        },
    }
}

async fn descend(
    driver: &dyn BrowserDriver,
    locator: &Locator,
) -> Result<ElementHandle, BrowserError> {
    let path = locator.path()?;

    for frame in &path.frames {
        let iframe = driver
            .find_element(frame)
            .await
            .map_err(|e| BrowserError::retrieval(locator.as_str(), e))?;
        driver
            .switch_to_frame(&iframe)
            .await
            .map_err(|e| BrowserError::retrieval(locator.as_str(), e))?;
        debug!(frame, "switched into frame");
    }

    driver
        .find_element(path.target)
        .await
        .map_err(|e| BrowserError::retrieval(locator.as_str(), e))
}

/// An element resolved inside whatever frame its locator led to.
///
/// Call [`release`](Self::release) (or [`finish`](Self::finish)) once the
/// interaction is over; it resets the session to the top-level frame. A
/// handle dropped without release schedules the reset on the runtime.
pub struct ScopedElement {
    driver: Arc<dyn BrowserDriver>,
    locator: Locator,
    element: ElementHandle,
    released: bool,
}

impl ScopedElement {
    pub fn element(&self) -> &ElementHandle {
        &self.element
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Reset the frame context to the top-level document.
    pub async fn release(mut self) -> Result<(), BrowserError> {
        self.driver.switch_to_default_frame().await?;
        self.released = true;
        Ok(())
    }

    /// Release, then hand back `result`. An interaction error takes
    /// precedence over a release error.
    pub async fn finish<T>(self, result: Result<T, BrowserError>) -> Result<T, BrowserError> {
        let released = self.release().await;
        let value = result?;
        released?;
        Ok(value)
    }
}

impl Drop for ScopedElement {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(locator = %self.locator, "scoped element dropped without release");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let driver = Arc::clone(&self.driver);
            runtime.spawn(async move {
                let _ = driver.switch_to_default_frame().await;
            });
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::testing::FakeDriver, rstest::rstest};

    #[rstest]
    #[case("//button", &[], "//button")]
    #[case("/html/body/iframe/html/body/div", &["/html/body/iframe"], "/html/body/div")]
    #[case(
        "/html/body/iframe[2]/html/body/div/iframe[@id='x/y']/html/body/a",
        &["/html/body/iframe[2]", "/html/body/div/iframe[@id='x/y']"],
        "/html/body/a"
    )]
    #[case("//div[@class='iframe-wrapper']/a", &[], "//div[@class='iframe-wrapper']/a")]
    #[case("//iframes/a", &[], "//iframes/a")]
    fn splits_frame_segments(
        #[case] locator: &str,
        #[case] frames: &[&str],
        #[case] target: &str,
    ) {
        let locator = Locator::new(locator);
        let path = locator.path().unwrap();
        assert_eq!(path.frames, frames);
        assert_eq!(path.target, target);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("iframe/html/body")]
    #[case("/html/body/iframe")]
    #[case("/html/body/iframe[1]/html/iframe")]
    fn rejects_incomplete_locators(#[case] locator: &str) {
        assert!(matches!(
            Locator::new(locator).path(),
            Err(BrowserError::NoElement(_))
        ));
    }

    #[tokio::test]
    async fn resolves_in_top_frame() {
        let fake = Arc::new(FakeDriver::new());
        fake.add_element(&[], "//button", "button");
        let driver: Arc<dyn BrowserDriver> = fake.clone();

        let scope = resolve(&driver, &Locator::new("//button")).await.unwrap();
        assert_eq!(fake.frame_depth(), 0);
        scope.release().await.unwrap();
        assert_eq!(fake.default_frame_resets(), 1);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(4)]
    #[tokio::test]
    async fn nested_frames_reset_exactly_once(#[case] depth: usize) {
        let fake = Arc::new(FakeDriver::new());
        let frames: Vec<String> = (0..depth).map(|i| format!("/html/body/iframe[{}]", i + 1)).collect();
        let mut prefix: Vec<&str> = Vec::new();
        for frame in &frames {
            fake.add_element(&prefix, frame, "iframe");
            prefix.push(frame);
        }
        fake.add_element(&prefix, "/html/body/input", "input");
        let driver: Arc<dyn BrowserDriver> = fake.clone();
        let locator = Locator::new(format!("{}/html/body/input", frames.concat()));

        let scope = resolve(&driver, &locator).await.unwrap();
        assert_eq!(fake.frame_depth(), depth);
        assert_eq!(fake.default_frame_resets(), 0);

        scope.release().await.unwrap();
        assert_eq!(fake.frame_depth(), 0);
        assert_eq!(fake.default_frame_resets(), 1);
    }

    #[tokio::test]
    async fn failure_inside_frame_resets_context() {
        let fake = Arc::new(FakeDriver::new());
        fake.add_element(&[], "/html/body/iframe", "iframe");
        let driver: Arc<dyn BrowserDriver> = fake.clone();

        let err = resolve(&driver, &Locator::new("/html/body/iframe/html/body/missing"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BrowserError::NoElement(_)));
        assert_eq!(fake.frame_depth(), 0);
        assert_eq!(fake.default_frame_resets(), 1);
    }

    #[tokio::test]
    async fn missing_frame_is_no_element() {
        let fake = Arc::new(FakeDriver::new());
        let driver: Arc<dyn BrowserDriver> = fake.clone();

        let err = resolve(&driver, &Locator::new("/html/body/iframe/html/body/a"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BrowserError::NoElement(_)));
        assert_eq!(fake.frame_depth(), 0);
    }

    #[tokio::test]
    async fn finish_prefers_interaction_error_and_still_resets() {
        let fake = Arc::new(FakeDriver::new());
        fake.add_element(&[], "/html/body/iframe", "iframe");
        fake.add_element(&["/html/body/iframe"], "/html/body/a", "a");
        let driver: Arc<dyn BrowserDriver> = fake.clone();

        let scope = resolve(&driver, &Locator::new("/html/body/iframe/html/body/a"))
            .await
            .unwrap();
        let result: Result<(), BrowserError> = scope
            .finish(Err(BrowserError::Ambiguous("two links".into())))
            .await;
        assert!(matches!(result, Err(BrowserError::Ambiguous(_))));
        assert_eq!(fake.frame_depth(), 0);
        assert_eq!(fake.default_frame_resets(), 1);
    }

    #[tokio::test]
    async fn dropped_scope_still_resets() {
        let fake = Arc::new(FakeDriver::new());
        fake.add_element(&[], "/html/body/iframe", "iframe");
        fake.add_element(&["/html/body/iframe"], "//p", "p");
        let driver: Arc<dyn BrowserDriver> = fake.clone();

        let scope = resolve(&driver, &Locator::new("/html/body/iframe//p"))
            .await
            .unwrap();
        drop(scope);
        tokio::task::yield_now().await;
        assert_eq!(fake.frame_depth(), 0);
    }

    #[tokio::test]
    async fn cancelled_release_still_resets() {
        let fake = Arc::new(FakeDriver::new());
        fake.add_element(&[], "/html/body/iframe", "iframe");
        fake.add_element(&["/html/body/iframe"], "//p", "p");
        let driver: Arc<dyn BrowserDriver> = fake.clone();

        let scope = resolve(&driver, &Locator::new("/html/body/iframe//p"))
            .await
            .unwrap();
        fake.set_reset_delay(std::time::Duration::from_secs(60));
        let released =
            tokio::time::timeout(std::time::Duration::from_millis(10), scope.release()).await;
        assert!(released.is_err());
        assert_eq!(fake.frame_depth(), 1);

        tokio::task::yield_now().await;
        assert_eq!(fake.frame_depth(), 0);
    }
}

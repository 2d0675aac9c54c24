//! Browser error types.

use thiserror::Error;

/// Failures reported by a [`BrowserDriver`](crate::driver::BrowserDriver)
/// implementation.
///
/// These mirror the error kinds a remote browser protocol can surface. The
/// interaction layer matches on them to decide between retry, fallback and
/// propagation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("no such frame: {0}")]
    NoSuchFrame(String),

    #[error("no such window: {0}")]
    NoSuchWindow(String),

    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("stale element reference: {0}")]
    StaleElement(String),

    #[error("element click intercepted: {0}")]
    ClickIntercepted(String),

    #[error("element not interactable: {0}")]
    NotInteractable(String),

    #[error("JavaScript evaluation failed: {0}")]
    Script(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("CDP error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Classify a message thrown by an in-page helper script.
    ///
    /// Helper scripts prefix their errors with the WebDriver error name so the
    /// kind survives the trip through `Runtime.evaluate`.
    pub fn from_script_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kinds: [(&str, fn(String) -> Self); 6] = [
            ("no such element", Self::NoSuchElement),
            ("no such frame", Self::NoSuchFrame),
            ("invalid selector", Self::InvalidSelector),
            ("stale element reference", Self::StaleElement),
            ("element click intercepted", Self::ClickIntercepted),
            ("element not interactable", Self::NotInteractable),
        ];
        for (prefix, build) in kinds {
            if let Some(rest) = message.strip_prefix(prefix) {
                return build(rest.trim_start_matches([':', ' ']).to_string());
            }
        }
        Self::Script(message)
    }

    /// Whether the failure concerns the state of a single element rather than
    /// the browser connection.
    pub fn is_element_state(&self) -> bool {
        matches!(
            self,
            Self::NoSuchElement(_)
                | Self::StaleElement(_)
                | Self::ClickIntercepted(_)
                | Self::NotInteractable(_)
                | Self::Script(_)
        )
    }
}

impl From<chromiumoxide::error::CdpError> for DriverError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        DriverError::Protocol(err.to_string())
    }
}

/// Errors raised by the interaction engine.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser not available: Chrome/Chromium not found")]
    BrowserNotAvailable,

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("history root reached, cannot go back")]
    CannotGoBack,

    #[error("no element found: {0}")]
    NoElement(String),

    #[error("multiple elements could match: {0}")]
    Ambiguous(String),

    #[error("element exists but was not in context: {locator}")]
    ElementOutOfContext { locator: String },

    #[error("failed to click on {locator}: {reason}")]
    ClickFailed { locator: String, reason: String },

    #[error("no option with value or visible text '{value}' in {locator}")]
    SelectFailed { locator: String, value: String },

    #[error("no tab with index {0}")]
    TabNotFound(usize),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid arguments for {action}: {reason}")]
    InvalidArguments { action: String, reason: String },

    #[error("failed to parse action script: {0}")]
    ScriptParse(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl BrowserError {
    /// Translate a driver failure that happened while retrieving `locator`.
    pub(crate) fn retrieval(locator: &str, err: DriverError) -> Self {
        match err {
            DriverError::NoSuchElement(_) | DriverError::NoSuchFrame(_) => {
                BrowserError::NoElement(locator.to_string())
            },
            DriverError::StaleElement(_) => BrowserError::ElementOutOfContext {
                locator: locator.to_string(),
            },
            other => BrowserError::Driver(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_messages_keep_their_kind() {
        assert_eq!(
            DriverError::from_script_message("stale element reference: e12"),
            DriverError::StaleElement("e12".into())
        );
        assert_eq!(
            DriverError::from_script_message("element click intercepted: <div class=\"modal\">"),
            DriverError::ClickIntercepted("<div class=\"modal\">".into())
        );
        assert_eq!(
            DriverError::from_script_message("TypeError: x is undefined"),
            DriverError::Script("TypeError: x is undefined".into())
        );
    }

    #[test]
    fn retrieval_maps_missing_and_stale() {
        assert!(matches!(
            BrowserError::retrieval("//a", DriverError::NoSuchElement("//a".into())),
            BrowserError::NoElement(l) if l == "//a"
        ));
        assert!(matches!(
            BrowserError::retrieval("//a", DriverError::StaleElement("e1".into())),
            BrowserError::ElementOutOfContext { .. }
        ));
        assert!(matches!(
            BrowserError::retrieval("//a", DriverError::Protocol("closed".into())),
            BrowserError::Driver(DriverError::Protocol(_))
        ));
    }

    #[test]
    fn element_state_errors_are_recoverable() {
        assert!(DriverError::NotInteractable("readonly".into()).is_element_state());
        assert!(!DriverError::Protocol("connection closed".into()).is_element_state());
        assert!(!DriverError::Timeout("10s".into()).is_element_state());
    }
}

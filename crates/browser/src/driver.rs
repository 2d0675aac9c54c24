//! Capability interface the interaction engine drives.
//!
//! A [`BrowserDriver`] wraps one already-running browser session. The
//! engine never launches or talks to a browser directly; it only issues the
//! commands below. [`CdpDriver`](crate::cdp::CdpDriver) is the production
//! implementation.

use std::fmt;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
};

use crate::error::DriverError;

pub type DriverResult<T> = Result<T, DriverError>;

/// Key under which element references travel through script arguments and
/// return values (the W3C WebDriver element identifier).
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Opaque token referencing an element held by the driver.
///
/// Handles are only meaningful to the driver that issued them and never
/// outlive the page they were found on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    /// Serialize as a script argument / return value.
    pub fn to_value(&self) -> Value {
        serde_json::json!({ ELEMENT_KEY: self.0 })
    }

    /// Recognize an element reference returned by a script.
    pub fn from_value(value: &Value) -> Option<Self> {
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|id| Self(id.to_string()))
    }
}

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Argument passed to [`BrowserDriver::execute_script`]; available to the
/// script as `arguments[i]`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Value(Value),
    Element(ElementHandle),
}

impl ScriptArg {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Element(e) => e.to_value(),
        }
    }
}

impl From<&ElementHandle> for ScriptArg {
    fn from(element: &ElementHandle) -> Self {
        Self::Element(element.clone())
    }
}

impl From<Value> for ScriptArg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for ScriptArg {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<u64> for ScriptArg {
    fn from(value: u64) -> Self {
        Self::Value(Value::from(value))
    }
}

/// Log buffer exposed by the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    /// DevTools protocol events (network, page lifecycle, downloads).
    Performance,
    /// Console output.
    Browser,
}

impl LogCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Browser => "browser",
        }
    }
}

/// One structured log record. For the performance log, `message` holds a
/// JSON document of the form `{"message": {"method": ..., "params": {...}}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub timestamp: i64,
    pub message: String,
}

/// Non-printable keys used by input sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Control,
    Delete,
    Enter,
}

/// One step of a pointer/keyboard/wheel input sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum InputAction {
    /// Move the pointer to the centre of an element.
    MoveToElement(ElementHandle),
    /// Press and release the primary button at the pointer position.
    Click,
    KeyDown(Key),
    KeyUp(Key),
    /// Press and release a single key.
    Press(Key),
    /// Type text into the focused element.
    SendKeys(String),
    /// Wheel-scroll with the element centre as origin.
    ScrollFromElement {
        origin: ElementHandle,
        delta_x: i64,
        delta_y: i64,
    },
    /// Wheel-scroll with the viewport as origin.
    ScrollBy { delta_x: i64, delta_y: i64 },
}

/// Commands the engine can issue against a live browser session.
///
/// Implementations keep the frame context as session state: after
/// [`switch_to_frame`](Self::switch_to_frame), element lookups and scripts
/// run against that frame's document until
/// [`switch_to_default_frame`](Self::switch_to_default_frame) is called.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    /// Go one step back in session history.
    async fn back(&self) -> DriverResult<()>;

    async fn title(&self) -> DriverResult<String>;

    /// Serialized DOM of the top-level document.
    async fn page_source(&self) -> DriverResult<String>;

    /// PNG screenshot of the viewport.
    async fn screenshot(&self) -> DriverResult<Vec<u8>>;

    /// Run `script` as a function body in the current frame. Returned
    /// promises are awaited; returned elements come back as
    /// [`ElementHandle`] references.
    async fn execute_script(&self, script: &str, args: Vec<ScriptArg>) -> DriverResult<Value>;

    /// First element matching `xpath` in the current frame.
    async fn find_element(&self, xpath: &str) -> DriverResult<ElementHandle>;

    async fn switch_to_frame(&self, frame: &ElementHandle) -> DriverResult<()>;

    async fn switch_to_default_frame(&self) -> DriverResult<()>;

    async fn window_handles(&self) -> DriverResult<Vec<String>>;

    async fn current_window_handle(&self) -> DriverResult<String>;

    async fn switch_to_window(&self, handle: &str) -> DriverResult<()>;

    async fn set_window_size(&self, width: u32, height: u32) -> DriverResult<()>;

    /// Drain the entries logged since the previous call.
    async fn get_log(&self, category: LogCategory) -> DriverResult<Vec<LogEntry>>;

    /// Native click; reports [`DriverError::ClickIntercepted`] when another
    /// element would receive it.
    async fn click(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn clear(&self, element: &ElementHandle) -> DriverResult<()>;

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> DriverResult<()>;

    /// Lower-case tag name.
    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String>;

    async fn attribute(&self, element: &ElementHandle, name: &str)
    -> DriverResult<Option<String>>;

    async fn is_displayed(&self, element: &ElementHandle) -> DriverResult<bool>;

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool>;

    /// Perform an input sequence in order.
    async fn perform(&self, actions: &[InputAction]) -> DriverResult<()>;

    /// Tear the session down.
    async fn quit(&self) -> DriverResult<()>;
}

//! Runtime configuration and shared value types.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::BrowserError;

/// Default user agent presented by launched browsers.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 \
                                      (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36";

/// Browser launch/connect configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Whether to run in headless mode.
    pub headless: bool,
    /// Path to Chrome/Chromium binary (auto-detected if not set).
    pub chrome_path: Option<String>,
    /// DevTools websocket of an already running browser. When set, nothing is
    /// launched.
    pub remote_url: Option<String>,
    /// Viewport width.
    pub viewport_width: u32,
    /// Viewport height.
    pub viewport_height: u32,
    /// Device scale factor.
    pub device_scale_factor: f64,
    /// User agent string (uses [`DEFAULT_USER_AGENT`] if not set).
    pub user_agent: Option<String>,
    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,
    /// CDP request timeout in milliseconds.
    pub navigation_timeout_ms: u64,
    /// Launch with web security and site isolation disabled so cross-origin
    /// iframe documents can be entered.
    pub disable_web_security: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            remote_url: None,
            viewport_width: 1080,
            viewport_height: 1080,
            device_scale_factor: 1.0,
            user_agent: None,
            chrome_args: Vec::new(),
            navigation_timeout_ms: 30_000,
            disable_web_security: true,
        }
    }
}

impl From<&yoink_config::schema::BrowserConfig> for BrowserConfig {
    fn from(cfg: &yoink_config::schema::BrowserConfig) -> Self {
        Self {
            headless: cfg.headless,
            chrome_path: cfg.chrome_path.clone(),
            remote_url: cfg.remote_url.clone(),
            viewport_width: cfg.viewport_width,
            viewport_height: cfg.viewport_height,
            device_scale_factor: cfg.device_scale_factor,
            user_agent: cfg.user_agent.clone(),
            chrome_args: cfg.chrome_args.clone(),
            navigation_timeout_ms: cfg.navigation_timeout_ms,
            disable_web_security: cfg.disable_web_security,
        }
    }
}

/// Idle detection tuning.
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// Upper bound for one idle wait (network and DOM phases together).
    pub timeout: Duration,
    /// Sleep between performance-log polls.
    pub poll_interval: Duration,
    /// Trailing window without DOM mutations that counts as quiescent.
    pub dom_quiet_window: Duration,
    /// Waits longer than this are reported at info level.
    pub log_threshold: Duration,
    /// Report every wait at info level.
    pub verbose: bool,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            dom_quiet_window: Duration::from_millis(500),
            log_threshold: Duration::from_secs(10),
            verbose: false,
        }
    }
}

impl From<&yoink_config::schema::IdleConfig> for IdleConfig {
    fn from(cfg: &yoink_config::schema::IdleConfig) -> Self {
        Self {
            timeout: Duration::from_millis(cfg.timeout_ms),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(1)),
            dom_quiet_window: Duration::from_millis(cfg.dom_quiet_ms),
            log_threshold: Duration::from_millis(cfg.log_threshold_ms),
            verbose: cfg.verbose,
        }
    }
}

/// Direction of a scroll gesture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// Delta for a container of `width` × `height`, scaled by `factor`.
    pub fn delta(self, width: f64, height: f64, factor: f64) -> (i64, i64) {
        let x = (width * factor).round() as i64;
        let y = (height * factor).round() as i64;
        match self {
            Self::Up => (0, -y),
            Self::Down => (0, y),
            Self::Left => (-x, 0),
            Self::Right => (x, 0),
        }
    }

    /// Script scrolling the whole page by three quarters of the viewport.
    pub fn page_script(self) -> &'static str {
        match self {
            Self::Up => "window.scrollBy(0, -window.innerHeight * 0.75);",
            Self::Down => "window.scrollBy(0, window.innerHeight * 0.75);",
            Self::Left => "window.scrollBy(-window.innerWidth * 0.75, 0);",
            Self::Right => "window.scrollBy(window.innerWidth * 0.75, 0);",
        }
    }

    /// Script returning whether `arguments[0]` can scroll further.
    pub fn element_scrollable_script(self) -> &'static str {
        match self {
            Self::Up => "return arguments[0].scrollTop > 0;",
            Self::Down => {
                "const e = arguments[0]; return e.scrollTop + e.clientHeight < e.scrollHeight - 1;"
            },
            Self::Left => "return arguments[0].scrollLeft > 0;",
            Self::Right => {
                "const e = arguments[0]; return e.scrollLeft + e.clientWidth < e.scrollWidth - 1;"
            },
        }
    }

    /// Script returning whether the page can scroll further.
    pub fn page_scrollable_script(self) -> &'static str {
        match self {
            Self::Up => "return window.scrollY > 0;",
            Self::Down => {
                "return window.innerHeight + window.scrollY < \
                 document.documentElement.scrollHeight - 1;"
            },
            Self::Left => "return window.scrollX > 0;",
            Self::Right => {
                "return window.innerWidth + window.scrollX < \
                 document.documentElement.scrollWidth - 1;"
            },
        }
    }
}

impl FromStr for ScrollDirection {
    type Err = BrowserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "LEFT" => Ok(Self::Left),
            "RIGHT" => Ok(Self::Right),
            other => Err(BrowserError::InvalidArguments {
                action: "scroll".into(),
                reason: format!("unknown direction '{other}'"),
            }),
        }
    }
}

impl fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
        };
        f.write_str(name)
    }
}

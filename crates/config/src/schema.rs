//! Config schema: `[browser]`, `[idle]` and `[fetch]` sections.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoinkConfig {
    pub browser: BrowserConfig,
    pub idle: IdleConfig,
    pub fetch: FetchConfig,
}

/// Browser launch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Browser executable; auto-detected when unset.
    pub chrome_path: Option<String>,
    /// DevTools websocket of an already running browser. When set nothing is
    /// launched locally.
    pub remote_url: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub device_scale_factor: f64,
    pub user_agent: Option<String>,
    /// Extra command-line switches passed to the browser.
    pub chrome_args: Vec<String>,
    pub navigation_timeout_ms: u64,
    /// Disable web security and site isolation so cross-origin frames can be
    /// entered.
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

/// Page-settling thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Budget for one whole idle wait.
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// How long the DOM must stay unmutated to count as quiet.
    pub dom_quiet_ms: u64,
    /// Waits longer than this are logged at info.
    pub log_threshold_ms: u64,
    pub verbose: bool,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_interval_ms: 500,
            dom_quiet_ms: 500,
            log_threshold_ms: 10_000,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Browser sessions running at once.
    pub workers: usize,
    pub clean_html: bool,
    pub tags_to_remove: Vec<String>,
    pub attributes_to_keep: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            clean_html: false,
            tags_to_remove: vec!["style".into(), "svg".into(), "script".into()],
            attributes_to_keep: vec!["id".into(), "href".into()],
        }
    }
}

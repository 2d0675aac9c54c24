//! Page idle detection.
//!
//! A page is idle once no network request is in flight, no frame load or
//! download is active, and the DOM has stopped mutating. The first two are
//! derived from the browser's performance log on every poll; the last is
//! observed in-page by [`WAIT_DOM_IDLE_JS`].

use std::collections::HashSet;

use {
    serde::Deserialize,
    serde_json::Value,
    tokio::time::{Duration, Instant, sleep, timeout_at},
    tracing::{debug, info},
};

use crate::{
    driver::{BrowserDriver, LogCategory, LogEntry, ScriptArg},
    types::IdleConfig,
};

/// Resolves once no DOM mutation was seen for `arguments[1]` ms, or after
/// `arguments[0]` ms, whichever comes first.
pub const WAIT_DOM_IDLE_JS: &str = r#"
const timeout = Math.max(0, arguments[0]);
const quiet = Math.max(0, arguments[1]);
return new Promise((resolve) => {
    let quietTimer = null;
    let observer = null;
    const done = () => {
        if (observer) observer.disconnect();
        clearTimeout(quietTimer);
        clearTimeout(hardTimer);
        resolve(true);
    };
    const hardTimer = setTimeout(done, timeout);
    const rearm = () => {
        clearTimeout(quietTimer);
        quietTimer = setTimeout(done, Math.min(quiet, timeout));
    };
    observer = new MutationObserver(rearm);
    observer.observe(document, {
        childList: true,
        subtree: true,
        attributes: true,
        characterData: true
    });
    rearm();
});
"#;

/// Lifecycle signal extracted from one performance-log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    RequestSent(String),
    RequestFinished(String),
    RequestFailed(String),
    FrameStartedLoading,
    FrameStoppedLoading,
    DownloadBegan,
    DownloadEnded,
}

#[derive(Deserialize)]
struct PerformanceMessage {
    message: DevtoolsEvent,
}

#[derive(Deserialize)]
struct DevtoolsEvent {
    method: String,
    #[serde(default)]
    params: Value,
}

impl LifecycleEvent {
    /// Classify a performance-log entry. Entries that do not affect idleness
    /// yield `None`.
    pub fn from_entry(entry: &LogEntry) -> Option<Self> {
        let parsed: PerformanceMessage = match serde_json::from_str(&entry.message) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(error = %e, "skipping unparsable performance log entry");
                return None;
            },
        };
        Self::from_devtools(&parsed.message.method, &parsed.message.params)
    }

    fn from_devtools(method: &str, params: &Value) -> Option<Self> {
        let request_id = || {
            params
                .get("requestId")
                .and_then(Value::as_str)
                .map(String::from)
        };
        match method {
            "Network.requestWillBeSent" => request_id().map(Self::RequestSent),
            "Network.loadingFinished" => request_id().map(Self::RequestFinished),
            "Network.loadingFailed" => request_id().map(Self::RequestFailed),
            "Page.frameStartedLoading" => Some(Self::FrameStartedLoading),
            "Page.frameStoppedLoading" => Some(Self::FrameStoppedLoading),
            "Browser.downloadWillBegin" => Some(Self::DownloadBegan),
            "Browser.downloadProgress" => match params.get("state").and_then(Value::as_str) {
                Some("completed" | "canceled") => Some(Self::DownloadEnded),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Network/lifecycle snapshot for one poll.
///
/// `active` is deliberately unclamped: the browser may report a stop without
/// the matching start inside the same batch, and that still counts as idle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IdleState {
    pub pending_requests: HashSet<String>,
    pub active: i64,
}

impl IdleState {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let mut state = Self::default();
        for event in entries.iter().filter_map(LifecycleEvent::from_entry) {
            state.apply(&event);
        }
        state
    }

    pub fn apply(&mut self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::RequestSent(id) => {
                self.pending_requests.insert(id.clone());
            },
            LifecycleEvent::RequestFinished(id) | LifecycleEvent::RequestFailed(id) => {
                self.pending_requests.remove(id);
            },
            LifecycleEvent::FrameStartedLoading | LifecycleEvent::DownloadBegan => {
                self.active += 1;
            },
            LifecycleEvent::FrameStoppedLoading | LifecycleEvent::DownloadEnded => {
                self.active -= 1;
            },
        }
    }

    pub fn is_network_idle(&self) -> bool {
        self.pending_requests.is_empty() && self.active <= 0
    }
}

/// Outcome of one idle wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleReport {
    /// Whether the network phase ended in an idle state before the deadline.
    pub network_idle: bool,
    pub network_wait: Duration,
    pub dom_wait: Duration,
}

impl IdleReport {
    pub fn total(&self) -> Duration {
        self.network_wait + self.dom_wait
    }
}

/// Two-phase idle wait: poll the performance log until the network settles,
/// then spend what is left of the budget waiting for DOM quiescence.
///
/// Never fails. Running out of time or hitting a driver error means
/// "proceed anyway".
#[derive(Debug, Clone, Default)]
pub struct IdleDetector {
    config: IdleConfig,
}

impl IdleDetector {
    pub fn new(config: IdleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IdleConfig {
        &self.config
    }

    /// Block until the page is idle or the configured timeout elapsed.
    pub async fn wait_until_idle(&self, driver: &dyn BrowserDriver) -> IdleReport {
        let start = Instant::now();
        let deadline = start + self.config.timeout;

        let network_idle = self.wait_for_network_idle(driver, deadline).await;
        let network_wait = start.elapsed();

        if network_idle {
            self.wait_for_dom_stable(driver, deadline).await;
        }
        let total = start.elapsed();

        let report = IdleReport {
            network_idle,
            network_wait,
            dom_wait: total.saturating_sub(network_wait),
        };

        if self.config.verbose || total > self.config.log_threshold {
            info!(
                total_ms = total.as_millis() as u64,
                network_ms = report.network_wait.as_millis() as u64,
                dom_ms = report.dom_wait.as_millis() as u64,
                network_idle,
                "waited for browser to become idle"
            );
        } else {
            debug!(
                total_ms = total.as_millis() as u64,
                network_idle, "browser idle"
            );
        }

        report
    }

    async fn wait_for_network_idle(&self, driver: &dyn BrowserDriver, deadline: Instant) -> bool {
        loop {
            match timeout_at(deadline, driver.get_log(LogCategory::Performance)).await {
                Ok(Ok(entries)) => {
                    if IdleState::from_entries(&entries).is_network_idle() {
                        return true;
                    }
                },
                Ok(Err(e)) => debug!(error = %e, "failed to read performance log"),
                Err(_) => return false,
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    async fn wait_for_dom_stable(&self, driver: &dyn BrowserDriver, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let args: Vec<ScriptArg> = vec![
            (remaining.as_millis() as u64).into(),
            (self.config.dom_quiet_window.as_millis() as u64).into(),
        ];
        match timeout_at(deadline, driver.execute_script(WAIT_DOM_IDLE_JS, args)).await {
            Ok(Ok(_)) => {},
            Ok(Err(e)) => debug!(error = %e, "DOM idle wait failed"),
            Err(_) => debug!("DOM idle wait ran out of time"),
        }
    }
}

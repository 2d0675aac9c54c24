//! One browser session: navigation, action scripts and page reads.

use std::{fmt::Write as _, sync::Arc};

use tracing::{debug, info, warn};

use crate::{
    cdp::CdpDriver,
    driver::{BrowserDriver, LogCategory, LogEntry},
    error::{BrowserError, DriverError},
    idle::{IdleDetector, IdleReport},
    locator::{Locator, resolve},
    primitives::{self, DEFAULT_SCROLL_FACTOR},
    script::{Action, parse_script},
    types::{BrowserConfig, IdleConfig, ScrollDirection},
};

/// Returns `true` when the document was not reached by navigating from
/// another page.
pub const HAS_NO_REFERRER_JS: &str = "return !document.referrer;";

pub const VIEWPORT_HEIGHT_JS: &str = "return window.innerHeight;";

/// URLs a fresh browser reports before anything was loaded.
const BLANK_URLS: &[&str] = &["data:,", "about:blank"];

type Result<T> = std::result::Result<T, BrowserError>;

/// A live browser session and the state the interaction engine keeps for it.
///
/// Operations take `&mut self`: one session serves one caller at a time.
pub struct Session {
    driver: Arc<dyn BrowserDriver>,
    idle: IdleDetector,
    last_hovered: Option<Locator>,
}

impl Session {
    pub fn new(driver: Arc<dyn BrowserDriver>, idle: IdleDetector) -> Self {
        Self {
            driver,
            idle,
            last_hovered: None,
        }
    }

    /// Launch (or connect to) a browser and size its viewport.
    pub async fn launch(config: &BrowserConfig, idle: IdleConfig) -> Result<Self> {
        let driver = CdpDriver::launch(config).await?;
        let mut session = Self::new(Arc::new(driver), IdleDetector::new(idle));
        if let Err(e) = session
            .resize(config.viewport_width, config.viewport_height)
            .await
        {
            session.close().await;
            return Err(e);
        }
        Ok(session)
    }

    pub fn driver(&self) -> &Arc<dyn BrowserDriver> {
        &self.driver
    }

    pub fn last_hovered(&self) -> Option<&Locator> {
        self.last_hovered.as_ref()
    }

    pub fn idle_detector(&self) -> &IdleDetector {
        &self.idle
    }

    // ── Navigation ──────────────────────────────────────────────────────────

    pub async fn get(&mut self, url: &str) -> Result<()> {
        debug!(url, "navigating");
        self.driver
            .navigate(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(format!("{url}: {e}")))
    }

    /// Current URL, `None` while the start page is showing.
    pub async fn get_url(&self) -> Result<Option<String>> {
        let url = self.driver.current_url().await?;
        Ok((!BLANK_URLS.contains(&url.as_str())).then_some(url))
    }

    pub async fn back(&mut self) -> Result<()> {
        let no_referrer = self
            .driver
            .execute_script(HAS_NO_REFERRER_JS, Vec::new())
            .await?;
        if no_referrer.as_bool().unwrap_or(true) {
            return Err(BrowserError::CannotGoBack);
        }
        self.driver.back().await?;
        Ok(())
    }

    /// Block until the page settles or the idle timeout elapses.
    pub async fn wait_for_idle(&self) -> IdleReport {
        self.idle.wait_until_idle(self.driver.as_ref()).await
    }

    // ── Action scripts ──────────────────────────────────────────────────────

    /// Parse and run a YAML action script, waiting for idle after each step.
    ///
    /// Returns the number of steps run. The first failing step aborts the
    /// rest; earlier steps are not undone.
    pub async fn execute(&mut self, script: &str) -> Result<usize> {
        let actions = parse_script(script)?;
        for (step, action) in actions.iter().enumerate() {
            debug!(step, action = %action.name(), "running action");
            self.run(action).await.inspect_err(|e| {
                warn!(step, action = %action.name(), error = %e, "action failed");
            })?;
            self.wait_for_idle().await;
        }
        info!(steps = actions.len(), "action script completed");
        Ok(actions.len())
    }

    /// Run one step without waiting for idle.
    pub async fn run(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::Click { locator } => self.click(locator).await,
            Action::SetValue {
                locator,
                value,
                enter,
            } => self.set_value(locator, value, *enter).await,
            Action::DropdownSelect { locator, value } => {
                self.dropdown_select(locator, value).await
            },
            Action::Hover { locator } => self.hover(locator).await,
            Action::Scroll { locator, direction } => {
                self.scroll(locator.as_ref(), *direction, DEFAULT_SCROLL_FACTOR)
                    .await
            },
            Action::FailNoElement { message } => {
                Err(BrowserError::NoElement(message.clone()))
            },
            Action::FailAmbiguous { message } => Err(BrowserError::Ambiguous(message.clone())),
        }
    }

    // ── Interactions ────────────────────────────────────────────────────────

    pub async fn click(&mut self, locator: &Locator) -> Result<()> {
        primitives::click(&self.driver, &mut self.last_hovered, locator).await
    }

    pub async fn set_value(&mut self, locator: &Locator, value: &str, enter: bool) -> Result<()> {
        primitives::set_value(&self.driver, &mut self.last_hovered, locator, value, enter).await
    }

    pub async fn dropdown_select(&mut self, locator: &Locator, value: &str) -> Result<()> {
        primitives::dropdown_select(&self.driver, &mut self.last_hovered, locator, value).await
    }

    pub async fn hover(&mut self, locator: &Locator) -> Result<()> {
        primitives::hover(&self.driver, &mut self.last_hovered, locator).await
    }

    pub async fn upload_file(&mut self, locator: &Locator, path: &str) -> Result<()> {
        primitives::upload_file(&self.driver, &mut self.last_hovered, locator, path).await
    }

    pub async fn scroll(
        &mut self,
        anchor: Option<&Locator>,
        direction: ScrollDirection,
        factor: f64,
    ) -> Result<()> {
        primitives::scroll(&self.driver, &mut self.last_hovered, anchor, direction, factor).await
    }

    pub async fn scroll_up(&mut self) -> Result<()> {
        self.scroll(None, ScrollDirection::Up, DEFAULT_SCROLL_FACTOR)
            .await
    }

    pub async fn scroll_down(&mut self) -> Result<()> {
        self.scroll(None, ScrollDirection::Down, DEFAULT_SCROLL_FACTOR)
            .await
    }

    pub async fn can_scroll(
        &self,
        anchor: Option<&Locator>,
        direction: ScrollDirection,
    ) -> Result<bool> {
        primitives::can_scroll(&self.driver, self.last_hovered.as_ref(), anchor, direction).await
    }

    pub async fn is_bottom_of_page(&self) -> Result<bool> {
        Ok(!self.can_scroll(None, ScrollDirection::Down).await?)
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Console messages recorded since the last call. Never fails.
    pub async fn console_messages(&self) -> Vec<LogEntry> {
        self.driver
            .get_log(LogCategory::Browser)
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "could not read console log");
                Vec::new()
            })
    }

    /// Whether the element is displayed and enabled. Never fails.
    pub async fn check_visibility(&self, locator: &Locator) -> bool {
        let scope = match resolve(&self.driver, locator).await {
            Ok(scope) => scope,
            Err(e) => {
                debug!(locator = %locator, error = %e, "visibility check could not resolve");
                return false;
            },
        };
        let element = scope.element().clone();
        let visible = async {
            Ok::<_, DriverError>(
                self.driver.is_displayed(&element).await?
                    && self.driver.is_enabled(&element).await?,
            )
        }
        .await;
        let released = scope.release().await;
        matches!((visible, released), (Ok(true), Ok(())))
    }

    /// Human-readable tab listing; the focused tab stays focused.
    pub async fn get_tabs(&self) -> Result<String> {
        let handles = self.driver.window_handles().await?;
        let current = self.driver.current_window_handle().await?;

        let mut listing = String::from("Tabs opened:");
        let mut titles = Ok(());
        for (index, handle) in handles.iter().enumerate() {
            let title = match self.driver.switch_to_window(handle).await {
                Ok(()) => self.driver.title().await,
                Err(e) => Err(e),
            };
            let title = match title {
                Ok(title) => title,
                Err(e) => {
                    titles = Err(e);
                    break;
                },
            };
            let marker = if *handle == current { "[CURRENT] " } else { "" };
            let _ = write!(listing, "\n{index} - {marker}{title}");
        }

        self.driver.switch_to_window(&current).await?;
        titles?;
        Ok(listing)
    }

    pub async fn switch_tab(&mut self, index: usize) -> Result<()> {
        let handles = self.driver.window_handles().await?;
        let handle = handles.get(index).ok_or(BrowserError::TabNotFound(index))?;
        self.driver.switch_to_window(handle).await?;
        Ok(())
    }

    pub async fn html(&self) -> Result<String> {
        Ok(self.driver.page_source().await?)
    }

    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        Ok(self.driver.screenshot().await?)
    }

    /// Size the window so that the viewport (not the outer window) ends up
    /// `width` × `height`.
    pub async fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.driver.set_window_size(width, height).await?;
        let viewport_height = self
            .driver
            .execute_script(VIEWPORT_HEIGHT_JS, Vec::new())
            .await?
            .as_u64()
            .unwrap_or(u64::from(height));
        let chrome = u64::from(height).saturating_sub(viewport_height);
        if chrome > 0 {
            let adjusted = u32::try_from(u64::from(height) + chrome).unwrap_or(u32::MAX);
            debug!(width, height, adjusted, "compensating for window chrome");
            self.driver.set_window_size(width, adjusted).await?;
        }
        Ok(())
    }

    /// Tear the browser down. Failures are logged; the session is gone either
    /// way.
    pub async fn close(self) {
        if let Err(e) = self.driver.quit().await {
            warn!(error = %e, "failed to close browser session");
        }
    }
}

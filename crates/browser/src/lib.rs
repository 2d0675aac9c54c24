//! Browser interaction engine for yoink.
//!
//! Drives a Chromium session to fetch rendered HTML:
//!
//! - **locator**: XPath locators that cross iframe boundaries, resolved into
//!   scoped handles that always restore the top-level frame
//! - **idle**: network and DOM quiescence detection
//! - **script**: declarative YAML action scripts
//! - **primitives**: click, setValue, dropdownSelect, hover, scroll, upload
//! - **extract**: one-shot and fan-out fetching with optional HTML cleaning
//!
//! Everything above the [`BrowserDriver`] trait is backend-agnostic;
//! [`CdpDriver`] is the DevTools Protocol implementation.
//!
//! # Example
//!
//! ```ignore
//! use yoink_browser::{FetchOptions, fetch};
//!
//! let page = fetch("https://example.com", &FetchOptions::default()).await?;
//! println!("{}", page.html);
//! ```

pub mod cdp;
pub mod detect;
pub mod driver;
pub mod error;
pub mod extract;
pub mod html;
pub mod idle;
pub mod locator;
pub mod primitives;
pub mod script;
pub mod session;
pub mod types;

#[cfg(test)]
mod testing;

pub use {
    cdp::CdpDriver,
    driver::{BrowserDriver, ElementHandle, InputAction, LogCategory, LogEntry},
    error::{BrowserError, DriverError},
    extract::{
        CleanOptions, ExtractResult, FetchOptions, fetch, fetch_all, is_valid_url, validate_url,
    },
    html::clean_html,
    idle::{IdleDetector, IdleReport},
    locator::{Locator, ScopedElement},
    script::{Action, ActionName, parse_script},
    session::Session,
    types::{BrowserConfig, IdleConfig, ScrollDirection},
};

//! Fetching rendered HTML: one session per URL, bounded fan-out across URLs.

use std::{sync::LazyLock, time::Instant};

use {
    futures::{StreamExt, stream},
    regex::Regex,
    serde::Serialize,
    tracing::{debug, info, warn},
};

use crate::{
    error::BrowserError,
    html::{DEFAULT_ATTRIBUTES_TO_KEEP, DEFAULT_TAGS_TO_REMOVE, clean_html},
    session::Session,
    types::{BrowserConfig, IdleConfig},
};

/// http(s)/ftp(s) URLs with a domain, `localhost`, IPv4 or IPv6 host.
static VALID_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)^(?:http|ftp)s?://",
        r"(?:(?:[A-Z0-9](?:[A-Z0-9-]*[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)",
        r"|localhost",
        r"|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}",
        r"|\[?[A-F0-9]*:[A-F0-9:]+\]?)",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$",
    ))
    .unwrap_or_else(|e| panic!("invalid URL regex: {e}"))
});

pub fn is_valid_url(url: &str) -> bool {
    VALID_URL.is_match(url)
}

/// Reject anything that is not a well-formed fetchable URL.
pub fn validate_url(url: &str) -> Result<(), BrowserError> {
    if url.is_empty() {
        return Err(BrowserError::InvalidUrl("URL cannot be empty".into()));
    }
    if !is_valid_url(url) {
        return Err(BrowserError::InvalidUrl(truncate_url(url)));
    }
    url::Url::parse(url)
        .map_err(|e| BrowserError::InvalidUrl(format!("{}: {e}", truncate_url(url))))?;
    Ok(())
}

/// Keep huge inputs out of error messages and logs.
fn truncate_url(url: &str) -> String {
    match url.char_indices().nth(100) {
        Some((cut, _)) => format!("{}...", &url[..cut]),
        None => url.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub tags_to_remove: Vec<String>,
    pub attributes_to_keep: Vec<String>,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            tags_to_remove: DEFAULT_TAGS_TO_REMOVE.iter().map(|s| s.to_string()).collect(),
            attributes_to_keep: DEFAULT_ATTRIBUTES_TO_KEEP
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Everything needed to turn a URL into HTML.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub browser: BrowserConfig,
    pub idle: IdleConfig,
    /// YAML action script run after the first idle wait.
    pub script: Option<String>,
    /// Clean the HTML before returning it.
    pub clean: Option<CleanOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractResult {
    pub url: String,
    pub html: String,
}

/// Launch a session, load `url` and return its settled HTML.
///
/// The session is closed whether or not extraction succeeded.
pub async fn fetch(url: &str, options: &FetchOptions) -> Result<ExtractResult, BrowserError> {
    validate_url(url)?;
    let start = Instant::now();
    let mut session = Session::launch(&options.browser, options.idle.clone()).await?;
    let result = fetch_with(&mut session, url, options).await;
    session.close().await;

    match &result {
        Ok(extracted) => info!(
            url,
            bytes = extracted.html.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fetched"
        ),
        Err(e) => warn!(url, error = %e, "fetch failed"),
    }
    result
}

/// Extraction steps on an already open session.
pub async fn fetch_with(
    session: &mut Session,
    url: &str,
    options: &FetchOptions,
) -> Result<ExtractResult, BrowserError> {
    session.get(url).await?;
    let report = session.wait_for_idle().await;
    debug!(
        url,
        network_idle = report.network_idle,
        wait_ms = report.total().as_millis() as u64,
        "page settled"
    );

    if let Some(script) = options.script.as_deref() {
        let steps = session.execute(script).await?;
        debug!(url, steps, "action script applied");
    }

    let mut html = session.html().await?;
    for entry in session.console_messages().await {
        debug!(url, level = %entry.level, message = %entry.message, "console");
    }
    if let Some(clean) = options.clean.as_ref() {
        html = clean_html(&html, &clean.tags_to_remove, &clean.attributes_to_keep);
    }

    Ok(ExtractResult {
        url: url.to_string(),
        html,
    })
}

/// Fetch every URL with at most `workers` sessions alive at once.
///
/// Results arrive in completion order; one failing URL does not affect the
/// others.
pub async fn fetch_all(
    urls: Vec<String>,
    options: &FetchOptions,
    workers: usize,
) -> Vec<(String, Result<ExtractResult, BrowserError>)> {
    let workers = workers.max(1);
    info!(urls = urls.len(), workers, "fetching");
    stream::iter(urls)
        .map(|url| async move {
            let result = fetch(&url, options).await;
            (url, result)
        })
        .buffer_unordered(workers)
        .collect()
        .await
}

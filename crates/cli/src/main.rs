mod input;
mod output;

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::ExitCode,
};

use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    yoink_browser::{
        BrowserConfig, CleanOptions, FetchOptions, IdleConfig, fetch_all, parse_script,
    },
    yoink_config::YoinkConfig,
};

use crate::output::Record;

/// Nothing to fetch, or every fetch succeeded.
const EXIT_OK: u8 = 0;
/// Missing or unrecognized input, or an invalid action script.
pub(crate) const EXIT_BAD_INPUT: u8 = 1;
/// Inputs could not be read, or output could not be written.
pub(crate) const EXIT_UNREADABLE: u8 = 2;
/// At least one URL failed.
const EXIT_FETCH_FAILED: u8 = 3;

#[derive(Parser)]
#[command(name = "yoink", version, about = "Fetch rendered HTML from URLs")]
struct Cli {
    /// URL, path to a .txt/.json file of URLs, or '-' for stdin.
    input: Option<String>,

    /// Number of concurrent browser sessions (overrides config value).
    #[arg(short, long)]
    workers: Option<usize>,

    /// YAML action script to run on every page before extraction.
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Strip scripts, styles, svgs and most attributes from the HTML.
    #[arg(long, default_value_t = false)]
    clean: bool,

    /// Show the browser window.
    #[arg(long, default_value_t = false)]
    headful: bool,

    /// Browser executable (overrides config value).
    #[arg(long)]
    chrome_path: Option<String>,

    /// DevTools websocket URL of a running browser.
    #[arg(long, env = "YOINK_REMOTE_URL")]
    remote_url: Option<String>,

    /// Log every idle wait at info level.
    #[arg(long, default_value_t = false)]
    verbose_idle: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides ./ and ~/.config/yoink/).
    #[arg(long, env = "YOINK_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

/// Logs go to stderr; stdout carries one JSON record per URL.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

/// Config values with command-line overrides applied.
fn fetch_options(cli: &Cli, config: &YoinkConfig, script: Option<String>) -> FetchOptions {
    let mut browser = BrowserConfig::from(&config.browser);
    if cli.headful {
        browser.headless = false;
    }
    if let Some(path) = cli.chrome_path.as_ref() {
        browser.chrome_path = Some(path.clone());
    }
    if let Some(url) = cli.remote_url.as_ref() {
        browser.remote_url = Some(url.clone());
    }

    let mut idle = IdleConfig::from(&config.idle);
    idle.verbose |= cli.verbose_idle;

    let clean = (cli.clean || config.fetch.clean_html).then(|| CleanOptions {
        tags_to_remove: config.fetch.tags_to_remove.clone(),
        attributes_to_keep: config.fetch.attributes_to_keep.clone(),
    });

    FetchOptions {
        browser,
        idle,
        script,
        clean,
    }
}

/// Read the action script and reject it up front if it does not parse.
fn load_script(path: &Path) -> Result<String, u8> {
    let script = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: cannot read script {}: {e}", path.display());
        EXIT_UNREADABLE
    })?;
    parse_script(&script).map_err(|e| {
        eprintln!("Error: {}: {e}", path.display());
        EXIT_BAD_INPUT
    })?;
    Ok(script)
}

/// Returns the process exit status on both paths.
async fn run(cli: Cli) -> Result<u8, u8> {
    let config = match cli.config_dir.as_deref() {
        Some(dir) => yoink_config::discover_and_load_in(dir),
        None => yoink_config::discover_and_load(),
    };

    let urls = input::read_input(cli.input.as_deref()).map_err(|e| {
        eprintln!("Error: {e}");
        e.exit_code()
    })?;
    if urls.is_empty() {
        eprintln!("No urls parsed from input");
        return Ok(EXIT_OK);
    }

    let script = cli.script.as_deref().map(load_script).transpose()?;
    let options = fetch_options(&cli, &config, script);
    let workers = cli.workers.unwrap_or(config.fetch.workers);

    let total = urls.len();
    let results = fetch_all(urls, &options, workers).await;

    let mut stdout = std::io::stdout().lock();
    let mut failed = 0usize;
    for (url, result) in &results {
        let record = match result {
            Ok(page) => Record::html(url, &page.html),
            Err(e) => {
                failed += 1;
                Record::failed(url, e)
            },
        };
        output::write_record(&mut stdout, &record).map_err(|e| {
            eprintln!("Error: cannot write output: {e}");
            EXIT_UNREADABLE
        })?;
    }
    let _ = stdout.flush();

    info!(total, failed, "done");
    if failed > 0 {
        warn!(failed, total, "some URLs could not be fetched");
        return Ok(EXIT_FETCH_FAILED);
    }
    Ok(EXIT_OK)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "yoink starting");

    match run(cli).await {
        Ok(code) | Err(code) => ExitCode::from(code),
    }
}

//! Locating a Chromium-based browser executable.

use std::path::{Path, PathBuf};

/// Executable names looked up on `PATH`, in preference order.
const EXECUTABLE_NAMES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "chromium",
    "chromium-browser",
    "microsoft-edge",
    "microsoft-edge-stable",
    "msedge",
    "brave-browser",
    "brave",
];

#[cfg(target_os = "macos")]
const INSTALL_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
];

#[cfg(target_os = "windows")]
const INSTALL_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const INSTALL_PATHS: &[&str] = &[];

/// Environment variables that may point at a browser executable.
const ENV_VARS: &[&str] = &["YOINK_CHROME", "CHROME"];

#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub found: bool,
    pub path: Option<PathBuf>,
    /// Install instructions; empty when a browser was found.
    pub install_hint: String,
}

impl DetectionResult {
    fn at(path: PathBuf) -> Self {
        Self {
            found: true,
            path: Some(path),
            install_hint: String::new(),
        }
    }
}

/// Find a browser: the configured path, then `YOINK_CHROME`/`CHROME`, then
/// well-known install locations, then `PATH`.
///
/// Install locations come before `PATH` since wrapper scripts on `PATH` are
/// sometimes broken.
pub fn detect_browser(configured: Option<&str>) -> DetectionResult {
    let explicit = configured
        .map(PathBuf::from)
        .into_iter()
        .chain(
            ENV_VARS
                .iter()
                .filter_map(|var| std::env::var_os(var).map(PathBuf::from)),
        )
        .chain(INSTALL_PATHS.iter().map(PathBuf::from));

    for candidate in explicit {
        if is_executable_file(&candidate) {
            return DetectionResult::at(candidate);
        }
    }

    if let Some(path) = EXECUTABLE_NAMES
        .iter()
        .find_map(|name| which::which(name).ok())
    {
        return DetectionResult::at(path);
    }

    DetectionResult {
        found: false,
        path: None,
        install_hint: install_instructions(),
    }
}

fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

/// Platform-specific guidance shown when no browser is available.
pub fn install_instructions() -> String {
    let commands = if cfg!(target_os = "macos") {
        "  brew install --cask google-chrome"
    } else if cfg!(target_os = "windows") {
        "  winget install Google.Chrome"
    } else if cfg!(target_os = "linux") {
        "  Debian/Ubuntu: sudo apt install chromium\n  \
         Fedora:        sudo dnf install chromium\n  \
         Arch:          sudo pacman -S chromium"
    } else {
        "  Download from https://www.google.com/chrome/"
    };

    format!(
        "No Chromium-based browser found. Install one:\n\n{commands}\n\n\
         Or point yoink at an existing executable:\n  \
         [browser]\n  chrome_path = \"/path/to/chrome\"\n\n\
         or set YOINK_CHROME, or pass --chrome-path."
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, "#!/bin/sh\n").unwrap();

        let result = detect_browser(fake.to_str());
        assert!(result.found);
        assert_eq!(result.path.as_deref(), Some(fake.as_path()));
        assert!(result.install_hint.is_empty());
    }

    #[test]
    fn missing_configured_path_falls_through() {
        let result = detect_browser(Some("/nonexistent/yoink/chrome"));
        assert_ne!(result.path.as_deref(), Some(Path::new("/nonexistent/yoink/chrome")));
        assert!(result.found || !result.install_hint.is_empty());
    }

    #[test]
    fn directories_are_not_browsers() {
        let dir = tempfile::tempdir().unwrap();
        let result = detect_browser(dir.path().to_str());
        assert_ne!(result.path.as_deref(), Some(dir.path()));
    }

    #[test]
    fn install_hint_mentions_configuration() {
        let hint = install_instructions();
        assert!(hint.contains("chrome_path"));
        assert!(hint.contains("YOINK_CHROME"));
        #[cfg(target_os = "linux")]
        assert!(hint.contains("apt"));
    }
}

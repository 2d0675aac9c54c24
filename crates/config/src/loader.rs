use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::YoinkConfig};

/// Config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["yoink.toml", "yoink.yaml", "yoink.yml", "yoink.json"];

/// Load config from `path` (TOML, YAML or JSON by extension).
pub fn load_config(path: &Path) -> anyhow::Result<YoinkConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./yoink.{toml,yaml,yml,json}`
/// 2. `~/.config/yoink/yoink.{toml,yaml,yml,json}`
///
/// Falls back to [`YoinkConfig::default()`] when nothing is found or the file
/// does not parse.
pub fn discover_and_load() -> YoinkConfig {
    load_or_default(find_config_file())
}

/// Like [`discover_and_load`] but only looks inside `dir`.
pub fn discover_and_load_in(dir: &Path) -> YoinkConfig {
    load_or_default(find_in(dir))
}

fn load_or_default(path: Option<PathBuf>) -> YoinkConfig {
    let Some(path) = path else {
        debug!("no config file found, using defaults");
        return YoinkConfig::default();
    };
    debug!(path = %path.display(), "loading config");
    load_config(&path).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
        YoinkConfig::default()
    })
}

fn find_in(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
}

fn find_config_file() -> Option<PathBuf> {
    find_in(Path::new(".")).or_else(|| config_dir().and_then(|dir| find_in(&dir)))
}

/// The user-global config directory (`~/.config/yoink/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "yoink").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<YoinkConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("yoink.yaml"),
            "idle:\n  verbose: true\nfetch:\n  workers: 2\n",
        )
        .unwrap();

        let cfg = discover_and_load_in(dir.path());
        assert!(cfg.idle.verbose);
        assert_eq!(cfg.fetch.workers, 2);
    }

    #[test]
    fn toml_wins_over_yaml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yoink.toml"), "[fetch]\nworkers = 7\n").unwrap();
        std::fs::write(dir.path().join("yoink.yaml"), "fetch:\n  workers: 1\n").unwrap();

        assert_eq!(discover_and_load_in(dir.path()).fetch.workers, 7);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("yoink.json"), "{ not json").unwrap();

        assert_eq!(discover_and_load_in(dir.path()), YoinkConfig::default());
    }

    #[test]
    fn empty_directory_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(discover_and_load_in(dir.path()), YoinkConfig::default());
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yoink.ini");
        std::fs::write(&path, "workers=1").unwrap();
        assert!(load_config(&path).is_err());
    }
}

//! Configuration loading and env substitution for yoink.
//!
//! Config files: `yoink.toml`, `yoink.yaml`, `yoink.yml` or `yoink.json`,
//! searched in `./` then `~/.config/yoink/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, discover_and_load_in, load_config},
    schema::{BrowserConfig, FetchConfig, IdleConfig, YoinkConfig},
};

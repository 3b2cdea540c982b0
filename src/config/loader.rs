//! Settings loading via the `config` crate.
//!
//! The environment is the single configuration source: `CONFIG_DIR`,
//! `TEMPLATE_DIR` and `LOG_DIR` are mandatory, everything else falls back to
//! the serde defaults on [`Settings`]. Nested keys use `__` as separator
//! (`LOG_FILES__NGINX_ERROR`).
use config::{Config, Environment};
use eyre::{Context, Result};

use crate::config::models::Settings;

/// Load settings from the process environment.
pub fn load_settings() -> Result<Settings> {
    let raw = Config::builder()
        .add_source(Environment::default().separator("__"))
        .build()
        .context("Failed to read configuration from the environment")?;
    parse_settings(raw)
}

/// Deserialize a pre-built `Config`, shared by the env loader and tests.
pub fn parse_settings(raw: Config) -> Result<Settings> {
    raw.try_deserialize()
        .context("Invalid configuration: CONFIG_DIR, TEMPLATE_DIR and LOG_DIR are required")
}

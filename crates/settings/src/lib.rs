//! Tunnox Settings
//!
//! Application configuration: the master key and HMAC secrets an
//! operator must inject, plus the tunable thresholds for every
//! security component.
//!
//! ```no_run
//! use tunnox_settings::Settings;
//!
//! let settings = Settings::load_or_default()?;
//! settings.save()?;
//! # Ok::<(), tunnox_settings::SettingsError>(())
//! ```

mod config;

pub use config::{BruteForceSettings, CryptoSettings, NodeSettings, RateLimitSettings, Settings};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("failed to create config directory: {0}")]
    CreateDirError(std::io::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// `$XDG_CONFIG_HOME/tunnox` if set, else `$HOME/.config/tunnox`.
pub fn default_config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("tunnox");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join("tunnox")
}

pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}

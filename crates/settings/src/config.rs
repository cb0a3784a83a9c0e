//! Configuration types

use std::path::PathBuf;

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{default_settings_path, Result, SettingsError};

/// Root settings object. `master_key_base64` and the HMAC secrets MUST
/// be supplied by an operator for a production deployment; when absent
/// from the loaded file, fresh ones are generated and a warning is
/// logged, since the security components require *some* value to
/// construct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub crypto: CryptoSettings,

    #[serde(default)]
    pub security: SecuritySettings,

    #[serde(default)]
    pub node: NodeSettings,

    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            crypto: CryptoSettings::default(),
            security: SecuritySettings::default(),
            node: NodeSettings::default(),
            config_path: None,
        }
    }
}

impl Settings {
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.clone());
            info!(?path, "loaded settings");
            Ok(settings)
        } else {
            warn!(?path, "no settings file found, generating ephemeral defaults");
            let mut settings = Self::default();
            settings.config_path = Some(path.clone());
            Ok(settings)
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!(?path, "saved settings");
        Ok(())
    }
}

fn random_base64(len_bytes: usize) -> String {
    let mut buf = vec![0u8; len_bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    base64::engine::general_purpose::STANDARD.encode(buf)
}

fn random_hex(len_bytes: usize) -> String {
    let mut buf = vec![0u8; len_bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// The AES-256-GCM master key and the HMAC secrets for the session and
/// reconnect token managers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoSettings {
    #[serde(default = "random_master_key")]
    pub master_key_base64: String,

    #[serde(default = "random_hmac_secret")]
    pub session_token_secret_hex: String,

    #[serde(default = "default_session_ttl_secs")]
    pub session_token_ttl_secs: i64,

    #[serde(default = "default_session_renewal_threshold_secs")]
    pub session_renewal_threshold_secs: i64,

    #[serde(default = "random_hmac_secret")]
    pub reconnect_token_secret_hex: String,

    #[serde(default = "default_reconnect_ttl_secs")]
    pub reconnect_token_ttl_secs: i64,
}

fn random_master_key() -> String {
    random_base64(32)
}

fn random_hmac_secret() -> String {
    random_hex(32)
}

fn default_session_ttl_secs() -> i64 {
    24 * 60 * 60
}

fn default_session_renewal_threshold_secs() -> i64 {
    30 * 60
}

fn default_reconnect_ttl_secs() -> i64 {
    30
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            master_key_base64: random_master_key(),
            session_token_secret_hex: random_hmac_secret(),
            session_token_ttl_secs: default_session_ttl_secs(),
            session_renewal_threshold_secs: default_session_renewal_threshold_secs(),
            reconnect_token_secret_hex: random_hmac_secret(),
            reconnect_token_ttl_secs: default_reconnect_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecuritySettings {
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub brute_force: BruteForceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_ip_rate")]
    pub ip_rate_per_sec: f64,
    #[serde(default = "default_ip_burst")]
    pub ip_burst: f64,
    #[serde(default = "default_tunnel_rate")]
    pub tunnel_rate_per_sec: f64,
    #[serde(default = "default_tunnel_burst")]
    pub tunnel_burst: f64,
}

fn default_ip_rate() -> f64 {
    10.0
}
fn default_ip_burst() -> f64 {
    20.0
}
fn default_tunnel_rate() -> f64 {
    1024.0 * 1024.0
}
fn default_tunnel_burst() -> f64 {
    10.0 * 1024.0 * 1024.0
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            ip_rate_per_sec: default_ip_rate(),
            ip_burst: default_ip_burst(),
            tunnel_rate_per_sec: default_tunnel_rate(),
            tunnel_burst: default_tunnel_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceSettings {
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: i64,
    #[serde(default = "default_ban_duration_secs")]
    pub ban_duration_secs: i64,
    #[serde(default = "default_permanent_ban_at")]
    pub permanent_ban_at: u64,
}

fn default_max_failures() -> u32 {
    5
}
fn default_time_window_secs() -> i64 {
    5 * 60
}
fn default_ban_duration_secs() -> i64 {
    30 * 60
}
fn default_permanent_ban_at() -> u64 {
    20
}

impl Default for BruteForceSettings {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            time_window_secs: default_time_window_secs(),
            ban_duration_secs: default_ban_duration_secs(),
            permanent_ban_at: default_permanent_ban_at(),
        }
    }
}

/// Node-ID leasing parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_pool_size() -> u32 {
    1000
}
fn default_lease_ttl_secs() -> u64 {
    90
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            lease_ttl_secs: default_lease_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_round_trip_through_json() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(
            parsed.crypto.master_key_base64,
            settings.crypto.master_key_base64
        );
        assert_eq!(parsed.node.pool_size, settings.node.pool_size);
    }

    #[test]
    fn defaults_match_the_documented_thresholds() {
        let settings = Settings::default();
        assert_eq!(settings.security.brute_force.max_failures, 5);
        assert_eq!(settings.security.brute_force.permanent_ban_at, 20);
        assert_eq!(settings.security.rate_limit.ip_rate_per_sec, 10.0);
        assert_eq!(settings.node.pool_size, 1000);
        assert_eq!(settings.crypto.reconnect_token_ttl_secs, 30);
    }

    #[test]
    fn load_from_missing_path_creates_defaults_with_that_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.node.pool_size, 1000);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = Settings::load_from(&path).unwrap();
        settings.node.pool_size = 42;
        settings.save().unwrap();

        let reloaded = Settings::load_from(&path).unwrap();
        assert_eq!(reloaded.node.pool_size, 42);
        assert_eq!(
            reloaded.crypto.master_key_base64,
            settings.crypto.master_key_base64
        );
    }

    #[test]
    fn partial_json_fills_in_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"node": {"pool_size": 7}}"#).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.node.pool_size, 7);
        assert_eq!(settings.node.lease_ttl_secs, 90);
        assert_eq!(settings.security.brute_force.max_failures, 5);
    }
}

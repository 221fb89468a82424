//! Operator settings for the CLI and engine.
//!
//! Settings live in a small JSON file (`~/.config/emrflow/config.json` on most
//! platforms, overridable with `EMRFLOW_CONFIG_PATH`). A missing file yields
//! the defaults. `EMRFLOW_API_BASE` and `EMRFLOW_PROFILE` override the
//! corresponding fields after the file is read.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{config_file_path, expand_tilde};

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "EMRFLOW_CONFIG_PATH";
/// Environment variable overriding the cluster API base URL.
pub const API_BASE_ENV: &str = "EMRFLOW_API_BASE";
/// Environment variable overriding the credential profile.
pub const PROFILE_ENV: &str = "EMRFLOW_PROFILE";

/// Default filename for the settings payload.
pub const SETTINGS_FILE_NAME: &str = "config.json";

/// Errors surfaced while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid api_base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

/// Persisted operator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Base URL of the cluster-management endpoint.
    pub api_base_url: String,
    /// Credential profile used when a workflow does not name one.
    pub default_profile: Option<String>,
    /// Location of the run history file.
    pub history_path: Option<PathBuf>,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "https://elasticmapreduce.us-east-1.amazonaws.com".to_string(),
            default_profile: None,
            history_path: None,
            request_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Loads settings from the default location and applies environment overrides.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from_path(&default_settings_path())
    }

    /// Loads settings from a specific path and applies environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let mut settings = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "settings file not found; using defaults");
                Settings::default()
            }
            Err(error) => return Err(SettingsError::Io(error)),
        };
        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Resolved history path, if one was configured.
    pub fn history_path(&self) -> Option<PathBuf> {
        self.history_path
            .as_ref()
            .map(|path| expand_tilde(&path.to_string_lossy()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base) = env::var(API_BASE_ENV)
            && !base.trim().is_empty()
        {
            self.api_base_url = base.trim().to_string();
        }
        if let Ok(profile) = env::var(PROFILE_ENV)
            && !profile.trim().is_empty()
        {
            self.default_profile = Some(profile.trim().to_string());
        }
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let parsed = Url::parse(&self.api_base_url).map_err(|error| SettingsError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            reason: error.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SettingsError::InvalidBaseUrl {
                url: self.api_base_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }
        Ok(())
    }
}

/// Returns the default path for the settings file.
pub fn default_settings_path() -> PathBuf {
    config_file_path(SETTINGS_PATH_ENV, SETTINGS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        temp_env::with_vars([(API_BASE_ENV, None::<&str>), (PROFILE_ENV, None)], || {
            let settings = Settings::load_from_path(&temp_dir.path().join("config.json")).expect("load defaults");
            assert_eq!(settings, Settings::default());
        });
    }

    #[test]
    fn file_values_and_env_overrides_apply() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "api_base_url": "https://emr.example.com", "default_profile": "analytics", "request_timeout_secs": 5 }"#,
        )
        .unwrap();

        temp_env::with_vars([(API_BASE_ENV, None::<&str>), (PROFILE_ENV, None)], || {
            let settings = Settings::load_from_path(&path).expect("load file");
            assert_eq!(settings.api_base_url, "https://emr.example.com");
            assert_eq!(settings.default_profile.as_deref(), Some("analytics"));
            assert_eq!(settings.request_timeout_secs, 5);
        });

        temp_env::with_vars(
            [(API_BASE_ENV, Some("http://localhost:4566")), (PROFILE_ENV, Some("local"))],
            || {
                let settings = Settings::load_from_path(&path).expect("load with overrides");
                assert_eq!(settings.api_base_url, "http://localhost:4566");
                assert_eq!(settings.default_profile.as_deref(), Some("local"));
            },
        );
    }

    #[test]
    fn rejects_unparseable_base_url() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{ "api_base_url": "ftp://emr.example.com" }"#).unwrap();

        temp_env::with_vars([(API_BASE_ENV, None::<&str>), (PROFILE_ENV, None)], || {
            let error = Settings::load_from_path(&path).expect_err("ftp scheme rejected");
            assert!(matches!(error, SettingsError::InvalidBaseUrl { .. }));
        });
    }
}

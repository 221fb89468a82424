//! Utility helpers shared across the emrflow crates.

pub mod duration;
pub mod redact;
pub mod run_history;
pub mod settings;

use std::path::PathBuf;

use dirs_next::{config_dir, home_dir};

pub use duration::{DurationParseError, format_duration, parse_duration};
pub use redact::redact_sensitive;
pub use run_history::{DEFAULT_RUN_HISTORY_LIMIT, InMemoryRunHistory, JsonRunHistory, RunHistoryError, RunHistoryStore};
pub use settings::{Settings, SettingsError};

/// Directory name used under the platform config directory.
pub const APP_DIR_NAME: &str = "emrflow";

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    if trimmed == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = trimmed.strip_prefix("~/")
        && let Some(home) = home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(trimmed)
}

/// Resolves a file path from an environment override, falling back to the app config directory.
pub fn config_file_path(env_var: &str, file_name: &str) -> PathBuf {
    if let Ok(path) = std::env::var(env_var)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
        .join(file_name)
}

//! Credential profile resolution.
//!
//! A workflow names a profile (`aws_default` by default). The profile resolves
//! to a bearer token from, in order:
//!
//! - the `EMRFLOW_PROFILE_<NAME>_TOKEN` environment variable (`<NAME>` is the
//!   profile upper-cased with non-alphanumerics replaced by `_`)
//! - the OS keychain entry stored under service [`CREDENTIAL_SERVICE`] with the
//!   profile as the account name

use std::env;

use tracing::debug;

use crate::ApiError;

/// Keychain service under which profile tokens are stored.
pub const CREDENTIAL_SERVICE: &str = "emrflow";

/// Name of the environment variable holding the token for `profile`.
pub fn profile_env_var(profile: &str) -> String {
    let normalized: String = profile
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("EMRFLOW_PROFILE_{normalized}_TOKEN")
}

/// Resolve the bearer token for a credential profile.
pub fn resolve_profile_token(profile: &str) -> Result<String, ApiError> {
    let env_var = profile_env_var(profile);
    if let Ok(token) = env::var(&env_var)
        && !token.trim().is_empty()
    {
        debug!(profile, source = "environment", "resolved credential profile");
        return Ok(token.trim().to_string());
    }

    let entry = keyring::Entry::new(CREDENTIAL_SERVICE, profile).map_err(|error| ApiError::Credentials {
        profile: profile.to_string(),
        message: error.to_string(),
    })?;
    let token = entry.get_password().map_err(|error| ApiError::Credentials {
        profile: profile.to_string(),
        message: format!("{error}; set {env_var} or store the token in the OS keychain"),
    })?;
    debug!(profile, source = "keychain", "resolved credential profile");
    Ok(token)
}

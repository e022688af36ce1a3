use std::env;

use crate::TrendPulseError;

/// Wrapper around sensitive values to reduce accidental logging.
#[derive(Clone)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "***redacted***")
    }
}

/// Require that a given environment variable is set and non-empty.
pub fn require_env(var: &str) -> Result<SecretValue, TrendPulseError> {
    optional_env(var).ok_or_else(|| TrendPulseError::MissingSecret(var.to_string()))
}

/// Read a secret that may legitimately be absent (e.g. the search key, where a
/// keyless backend is used instead). Blank names and blank values count as absent.
pub fn optional_env(var: &str) -> Option<SecretValue> {
    if var.trim().is_empty() {
        return None;
    }
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Some(SecretValue(value)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_env_success() {
        unsafe {
            std::env::set_var("TRENDPULSE_TEST_SECRET", "value");
        }
        let secret = require_env("TRENDPULSE_TEST_SECRET").expect("secret should load");
        assert_eq!(secret.expose(), "value");
        assert_eq!(format!("{secret:?}"), "***redacted***");
    }

    #[test]
    fn require_env_missing() {
        unsafe {
            std::env::remove_var("TRENDPULSE_TEST_SECRET_MISSING");
        }
        let err = require_env("TRENDPULSE_TEST_SECRET_MISSING").unwrap_err();
        assert!(matches!(err, TrendPulseError::MissingSecret(_)));
    }

    #[test]
    fn blank_names_are_absent() {
        assert!(optional_env("").is_none());
        assert!(optional_env("   ").is_none());
    }
}

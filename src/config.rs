use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Blocked filename/path patterns applied when the config does not override them.
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    // Environment files
    ".env",
    ".env.*",
    // Private keys and keystores
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    "*.jks",
    // SSH keys
    "id_rsa",
    "id_rsa.*",
    "id_ed25519",
    "id_ed25519.*",
    "id_ecdsa",
    "id_ecdsa.*",
    "authorized_keys",
    "known_hosts",
    // Credential stores
    "credentials",
    "credentials.*",
    "secrets",
    "secrets.*",
    "*_SECRET",
    "*_KEY",
    "*_TOKEN",
    "*_PASSWORD",
    // Databases and password vaults
    "*.db",
    "*.sqlite",
    "*.sqlite3",
    "*.kdb",
    "*.kdbx",
    // VCS, package-manager and cloud config
    ".git/config",
    ".npmrc",
    ".pypirc",
    ".docker/config.json",
    ".aws/credentials",
    ".aws/config",
    "*.kubeconfig",
    "kubeconfig",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackendPreference {
    /// Use ripgrep when it is on `PATH`, otherwise the builtin scanner.
    #[default]
    Auto,
    Ripgrep,
    Builtin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AirGapConfig {
    /// Directories under which access is permitted. Empty means nothing is accessible.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_files_scanned")]
    pub max_files_scanned: usize,
    /// Cap for each search excerpt.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Wall-clock budget per operation. `0` means every bounded operation times out at its
    /// first checkpoint.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log_path: Option<PathBuf>,
    #[serde(default = "default_redact_paths_in_audit")]
    pub redact_paths_in_audit: bool,
    #[serde(default)]
    pub search_backend: SearchBackendPreference,
    /// Identifier stamped on every audit record. Generated per `Context` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn default_blocked_patterns() -> Vec<String> {
    DEFAULT_BLOCKED_PATTERNS
        .iter()
        .map(|pattern| (*pattern).to_string())
        .collect()
}

const fn default_max_file_size_bytes() -> u64 {
    1024 * 1024
}

const fn default_max_response_bytes() -> usize {
    512 * 1024
}

const fn default_max_results() -> usize {
    100
}

const fn default_max_files_scanned() -> usize {
    10_000
}

const fn default_max_line_bytes() -> usize {
    4096
}

const fn default_timeout_seconds() -> f64 {
    30.0
}

const fn default_redact_paths_in_audit() -> bool {
    true
}

// Hard caps are guardrails against misconfiguration and accidental DoS.
const MAX_FILE_SIZE_BYTES_HARD_CAP: u64 = 256 * 1024 * 1024;
const MAX_RESPONSE_BYTES_HARD_CAP: usize = 64 * 1024 * 1024;
const MAX_RESULTS_HARD_CAP: usize = 100_000;
const MAX_FILES_SCANNED_HARD_CAP: usize = 5_000_000;
const MAX_LINE_BYTES_HARD_CAP: usize = 1024 * 1024;
const MAX_TIMEOUT_SECONDS: f64 = 3600.0;
const MAX_BLOCKED_PATTERNS: usize = 512;
const MAX_BLOCKED_PATTERN_BYTES: usize = 4 * 1024;
const MAX_SESSION_ID_BYTES: usize = 128;

fn validate_u64_limit(value: u64, field: &str, hard_cap: u64) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidConfig(format!("{field} must be > 0")));
    }
    if value > hard_cap {
        return Err(Error::InvalidConfig(format!(
            "{field} must be <= {hard_cap}"
        )));
    }
    Ok(())
}

fn validate_usize_limit(value: usize, field: &str, hard_cap: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::InvalidConfig(format!("{field} must be > 0")));
    }
    if value > hard_cap {
        return Err(Error::InvalidConfig(format!(
            "{field} must be <= {hard_cap}"
        )));
    }
    Ok(())
}

impl Default for AirGapConfig {
    fn default() -> Self {
        Self {
            allowed_roots: Vec::new(),
            blocked_patterns: default_blocked_patterns(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_response_bytes: default_max_response_bytes(),
            max_results: default_max_results(),
            max_files_scanned: default_max_files_scanned(),
            max_line_bytes: default_max_line_bytes(),
            timeout_seconds: default_timeout_seconds(),
            audit_log_path: None,
            redact_paths_in_audit: default_redact_paths_in_audit(),
            search_backend: SearchBackendPreference::default(),
            session_id: None,
        }
    }
}

impl AirGapConfig {
    pub fn with_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            allowed_roots: roots.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Structural validation only: checks limits and pattern shapes without any filesystem IO.
    ///
    /// Root existence and canonicalization happen in `ops::Context::new`.
    pub fn validate(&self) -> Result<()> {
        validate_u64_limit(
            self.max_file_size_bytes,
            "max_file_size_bytes",
            MAX_FILE_SIZE_BYTES_HARD_CAP,
        )?;
        validate_usize_limit(
            self.max_response_bytes,
            "max_response_bytes",
            MAX_RESPONSE_BYTES_HARD_CAP,
        )?;
        validate_usize_limit(self.max_results, "max_results", MAX_RESULTS_HARD_CAP)?;
        validate_usize_limit(
            self.max_files_scanned,
            "max_files_scanned",
            MAX_FILES_SCANNED_HARD_CAP,
        )?;
        validate_usize_limit(self.max_line_bytes, "max_line_bytes", MAX_LINE_BYTES_HARD_CAP)?;
        if !self.timeout_seconds.is_finite() || self.timeout_seconds < 0.0 {
            return Err(Error::InvalidConfig(
                "timeout_seconds must be a finite number >= 0".to_string(),
            ));
        }
        if self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "timeout_seconds must be <= {MAX_TIMEOUT_SECONDS}"
            )));
        }
        if self.blocked_patterns.len() > MAX_BLOCKED_PATTERNS {
            return Err(Error::InvalidConfig(format!(
                "blocked_patterns: too many patterns ({} > {MAX_BLOCKED_PATTERNS})",
                self.blocked_patterns.len()
            )));
        }
        for (idx, pattern) in self.blocked_patterns.iter().enumerate() {
            if pattern.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "blocked_patterns[{idx}] must not be empty"
                )));
            }
            if pattern.len() > MAX_BLOCKED_PATTERN_BYTES {
                return Err(Error::InvalidConfig(format!(
                    "blocked_patterns[{idx}] is too long ({} bytes > {MAX_BLOCKED_PATTERN_BYTES} bytes)",
                    pattern.len()
                )));
            }
        }
        for root in &self.allowed_roots {
            if root.as_os_str().is_empty() {
                return Err(Error::InvalidConfig(
                    "allowed_roots entries must not be empty".to_string(),
                ));
            }
            let expanded = crate::path_utils::expand_home(root);
            if !expanded.is_absolute() {
                return Err(Error::InvalidConfig(format!(
                    "allowed_roots entries must be absolute: {}",
                    root.display()
                )));
            }
        }
        if let Some(session_id) = &self.session_id {
            if session_id.trim().is_empty() {
                return Err(Error::InvalidConfig("session_id is empty".to_string()));
            }
            if session_id.len() > MAX_SESSION_ID_BYTES {
                return Err(Error::InvalidConfig(format!(
                    "session_id is too long (max {MAX_SESSION_ID_BYTES} bytes)"
                )));
            }
        }
        if let Some(path) = &self.audit_log_path
            && path.as_os_str().is_empty()
        {
            return Err(Error::InvalidConfig(
                "audit_log_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_seconds).unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AirGapConfig::default();
        config.validate().expect("defaults");
        assert!(config.redact_paths_in_audit);
        assert!(config.allowed_roots.is_empty());
        assert!(config.blocked_patterns.iter().any(|p| p == ".git/config"));
    }

    #[test]
    fn zero_timeout_is_accepted_and_negative_is_rejected() {
        let mut config = AirGapConfig {
            timeout_seconds: 0.0,
            ..AirGapConfig::default()
        };
        config.validate().expect("zero timeout");
        assert_eq!(config.timeout(), Duration::ZERO);

        config.timeout_seconds = -1.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        config.timeout_seconds = f64::NAN;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = AirGapConfig {
            max_results: 0,
            ..AirGapConfig::default()
        };
        match config.validate() {
            Err(Error::InvalidConfig(msg)) => assert_eq!(msg, "max_results must be > 0"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn relative_roots_are_rejected() {
        let config = AirGapConfig::with_roots(["relative/root"]);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn empty_blocked_pattern_is_rejected() {
        let config = AirGapConfig {
            blocked_patterns: vec!["  ".to_string()],
            ..AirGapConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}

use std::path::PathBuf;

use thiserror::Error;

use crate::ops::DenialReason;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("io error during {op} on {path}: {source}")]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A policy denial. The denied path is intentionally not part of the message.
    #[error("access denied: {reason}")]
    Denied { reason: DenialReason },

    #[error("file is too large ({size_bytes} bytes; max {max_bytes} bytes): {path}")]
    FileTooLarge {
        path: PathBuf,
        size_bytes: u64,
        max_bytes: u64,
    },

    #[error("path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("path is not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("failed to write audit record: {0}")]
    AuditWrite(#[source] std::io::Error),

    #[error("search backend failed: {0}")]
    SearchBackend(String),
}

impl Error {
    pub(crate) fn io_path(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn denied(reason: DenialReason) -> Self {
        Self::Denied { reason }
    }

    /// Stable, machine-checkable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::IoPath { .. } => "io_path",
            Self::Json(_) => "json",
            Self::InvalidConfig(_) => "invalid_config",
            Self::InvalidPath(_) => "invalid_path",
            Self::Denied { .. } => "denied",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::NotADirectory(_) => "not_a_directory",
            Self::NotAFile(_) => "not_a_file",
            Self::InvalidRegex(_) => "invalid_regex",
            Self::AuditWrite(_) => "audit_write",
            Self::SearchBackend(_) => "search_backend",
        }
    }

    /// The denial reason, if this error is a policy denial.
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            Self::Denied { reason } => Some(*reason),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

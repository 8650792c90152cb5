//! Append-only JSONL audit log.
//!
//! One record per operation attempt. Records are serialized whole and written under a single
//! mutex, then flushed and `fdatasync`ed before the operation returns, so concurrent operations
//! never interleave partial lines and a crash loses at most the record being written.
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::ops::{DenialReason, SearchBackendKind};

/// Replaces denied paths in persisted records when `redact_paths_in_audit` is on.
pub const REDACTED_PATH: &str = "[REDACTED]";

const MAX_AUDIT_PATTERN_BYTES: usize = 256;
const DIGEST_HEX_CHARS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    ListDir,
    ReadFile,
    SearchText,
}

impl AuditOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ListDir => "list_dir",
            Self::ReadFile => "read_file",
            Self::SearchText => "search_text",
        }
    }
}

/// Fields are additive-only: existing names are never renamed or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub operation: AuditOperation,
    pub success: bool,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Every target of a multi-path search; single-target operations use `path`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_scanned: Option<u64>,
    /// Raw search pattern; only written when redaction is off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Hex sha256 prefix of the search pattern, written instead of `pattern` under redaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_reached: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<SearchBackendKind>,
}

pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl AuditRecord {
    pub fn new(operation: AuditOperation, session_id: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            operation,
            success: false,
            session_id: session_id.into(),
            path: None,
            paths: Vec::new(),
            error: None,
            denial_reason: None,
            bytes_read: None,
            offset: None,
            limit: None,
            results_count: None,
            files_scanned: None,
            pattern: None,
            pattern_hash: None,
            truncated: None,
            timeout_reached: None,
            backend: None,
        }
    }

    /// Notes the search pattern: as a digest when `redact` is set, otherwise verbatim and cut to
    /// a bounded length on a char boundary.
    pub fn set_pattern(&mut self, pattern: &str, redact: bool) {
        if redact {
            self.pattern = None;
            self.pattern_hash = Some(digest(pattern));
            return;
        }
        let mut pattern = pattern.to_string();
        crate::ops::truncate_at_char_boundary(&mut pattern, MAX_AUDIT_PATTERN_BYTES);
        self.pattern = Some(pattern);
        self.pattern_hash = None;
    }
}

/// Short, stable digest used to correlate redacted values across records.
pub fn digest(value: &str) -> String {
    let mut encoded = hex::encode(Sha256::digest(value.as_bytes()));
    encoded.truncate(DIGEST_HEX_CHARS);
    encoded
}

#[derive(Debug)]
enum AuditSink {
    File { path: PathBuf, file: Mutex<File> },
    Tracing,
}

#[derive(Debug)]
pub struct AuditLogger {
    sink: AuditSink,
}

#[cfg(unix)]
fn open_append(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(0o600)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
}

#[cfg(not(unix))]
fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

impl AuditLogger {
    /// Opens (creating if needed) an append-only log file and its parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = crate::path_utils::expand_home(path.as_ref()).into_owned();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io_path("create_audit_dir", parent, err))?;
        }
        let file = open_append(&path).map_err(|err| Error::io_path("open_audit_log", &path, err))?;
        Ok(Self {
            sink: AuditSink::File {
                path,
                file: Mutex::new(file),
            },
        })
    }

    /// Logger that emits records as `tracing` events on target `airgap_fs::audit`.
    pub fn tracing_only() -> Self {
        Self {
            sink: AuditSink::Tracing,
        }
    }

    pub fn from_config(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Ok(Self::tracing_only()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.sink {
            AuditSink::File { path, .. } => Some(path),
            AuditSink::Tracing => None,
        }
    }

    /// Persists one record. A failure here must fail the operation that produced the record.
    pub fn record(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        match &self.sink {
            AuditSink::Tracing => {
                tracing::info!(target: "airgap_fs::audit", record = %line);
                Ok(())
            }
            AuditSink::File { file, .. } => {
                line.push('\n');
                let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
                file.write_all(line.as_bytes())
                    .and_then(|()| file.flush())
                    .and_then(|()| file.sync_data())
                    .map_err(Error::AuditWrite)
            }
        }
    }
}

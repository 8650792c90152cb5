//! `airgap-fs` is a local-only, deny-by-default filesystem access gate.
//!
//! Callers (typically an agent-facing dispatcher) list directories, read files, and search text
//! through an [`ops::Context`]. Every path is validated against an explicit allow-list and a
//! blocked-pattern set, symlinks cannot escape the allow-list, every operation is bounded by an
//! [`budget::OperationBudget`], and every attempt is written to an append-only audit log with
//! denied paths redacted.

pub mod audit;
pub mod blocked;
pub mod budget;
pub mod config;
#[cfg(feature = "config-io")]
pub mod config_io;
mod error;
pub mod ops;
pub mod path_utils;
mod platform_open;
pub mod redaction;

pub use config::{AirGapConfig, DEFAULT_BLOCKED_PATTERNS, SearchBackendPreference};
pub use error::{Error, Result};

pub use ops::{
    Context, DenialReason, EntryKind, ListDirEntry, ListDirRequest, ListDirResponse,
    PathSecurityContext, ReadFileRequest, ReadFileResponse, ScanLimitReason, SearchBackendKind,
    SearchMatch, SearchTextRequest, SearchTextResponse, TextEncoding, ValidationResult, list_dir,
    read_file, search_text,
};
pub use redaction::{RedactPreviewResponse, RedactionKind, redact_preview};

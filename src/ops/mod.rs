use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit::AuditLogger;
use crate::config::AirGapConfig;

mod context;
mod list_dir;
mod read;
mod search;
mod security;

pub use crate::budget::ScanLimitReason;
pub use list_dir::{EntryKind, ListDirEntry, ListDirRequest, ListDirResponse, list_dir};
pub use read::{ReadFileRequest, ReadFileResponse, TextEncoding, read_file};
pub use search::{
    SearchBackendKind, SearchMatch, SearchTextRequest, SearchTextResponse, search_text,
};
pub use security::PathSecurityContext;

/// Shared, immutable state for every operation: validated config, compiled path policy, audit
/// sink, session id and the search backend chosen at startup.
pub struct Context {
    config: AirGapConfig,
    security: PathSecurityContext,
    audit: AuditLogger,
    session_id: String,
    backend: search::SearchBackend,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("roots", &self.security.roots())
            .field("session_id", &self.session_id)
            .field("backend", &self.backend.kind())
            .finish_non_exhaustive()
    }
}

/// Machine-checkable reason attached to every denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    OutsideAllowedRoots,
    BlockedPattern,
    SymlinkEscape,
    TraversalDetected,
    NotFound,
    PermissionDenied,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutsideAllowedRoots => "outside_allowed_roots",
            Self::BlockedPattern => "blocked_pattern",
            Self::SymlinkEscape => "symlink_escape",
            Self::TraversalDetected => "traversal_detected",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating one candidate path. Produced fresh per call, never cached.
///
/// Exactly one of `canonical_path` / `denial_reason` is set, matching `allowed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    canonical_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    denial_reason: Option<DenialReason>,
}

impl ValidationResult {
    pub(crate) fn allowed(canonical_path: PathBuf) -> Self {
        Self {
            allowed: true,
            canonical_path: Some(canonical_path),
            denial_reason: None,
        }
    }

    pub(crate) fn denied(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            canonical_path: None,
            denial_reason: Some(reason),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn canonical_path(&self) -> Option<&Path> {
        self.canonical_path.as_deref()
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        self.denial_reason
    }

    pub fn into_result(self) -> std::result::Result<PathBuf, DenialReason> {
        match (self.canonical_path, self.denial_reason) {
            (Some(path), None) => Ok(path),
            (_, Some(reason)) => Err(reason),
            (None, None) => Err(DenialReason::NotFound),
        }
    }
}

/// Cuts `text` to at most `max_bytes`, backing off to a char boundary. Returns whether it cut.
pub(crate) fn truncate_at_char_boundary(text: &mut String, max_bytes: usize) -> bool {
    if text.len() <= max_bytes {
        return false;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_reasons_serialize_as_snake_case() {
        let json = serde_json::to_string(&DenialReason::OutsideAllowedRoots).expect("json");
        assert_eq!(json, "\"outside_allowed_roots\"");
        assert_eq!(DenialReason::SymlinkEscape.to_string(), "symlink_escape");
    }

    #[test]
    fn validation_result_keeps_fields_exclusive() {
        let ok = ValidationResult::allowed(PathBuf::from("/srv/a"));
        assert!(ok.is_allowed());
        assert_eq!(ok.denial_reason(), None);
        assert_eq!(ok.into_result(), Ok(PathBuf::from("/srv/a")));

        let denied = ValidationResult::denied(DenialReason::BlockedPattern);
        assert!(!denied.is_allowed());
        assert_eq!(denied.canonical_path(), None);
        assert_eq!(denied.into_result(), Err(DenialReason::BlockedPattern));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut text = "aé".to_string();
        assert!(truncate_at_char_boundary(&mut text, 2));
        assert_eq!(text, "a");

        let mut short = "abc".to_string();
        assert!(!truncate_at_char_boundary(&mut short, 3));
        assert_eq!(short, "abc");
    }
}

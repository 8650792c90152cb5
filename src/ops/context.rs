use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::audit::{AuditLogger, AuditOperation, AuditRecord, REDACTED_PATH, now_timestamp};
use crate::blocked::BlockedPatternSet;
use crate::budget::OperationBudget;
use crate::config::AirGapConfig;
use crate::error::{Error, Result};

use super::search::SearchBackend;
use super::{
    Context, ListDirRequest, ListDirResponse, PathSecurityContext, ReadFileRequest,
    ReadFileResponse, SearchBackendKind, SearchTextRequest, SearchTextResponse, ValidationResult,
};

impl Context {
    /// Validates `config`, canonicalizes the allowed roots, opens the audit sink and probes the
    /// search backend once for the lifetime of the context.
    pub fn new(config: AirGapConfig) -> Result<Self> {
        config.validate()?;
        let blocked = BlockedPatternSet::from_patterns(&config.blocked_patterns)?;
        let security = PathSecurityContext::new(&config.allowed_roots, blocked)?;
        let audit = AuditLogger::from_config(config.audit_log_path.as_deref())?;
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let backend = SearchBackend::select(config.search_backend)?;

        tracing::info!(
            roots = security.roots().len(),
            blocked_patterns = security.blocked().patterns().len(),
            backend = %backend.kind(),
            audit_log = ?audit.path(),
            %session_id,
            "airgap context ready"
        );

        Ok(Self {
            config,
            security,
            audit,
            session_id,
            backend,
        })
    }

    #[cfg(feature = "config-io")]
    pub fn from_config_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = crate::config_io::load_config(path)?;
        Self::new(config)
    }

    pub fn config(&self) -> &AirGapConfig {
        &self.config
    }

    pub fn security(&self) -> &PathSecurityContext {
        &self.security
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn search_backend(&self) -> SearchBackendKind {
        self.backend.kind()
    }

    /// Validates a path without auditing; operations audit their own validation.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> ValidationResult {
        self.security.validate(path)
    }

    pub fn list_dir(&self, request: ListDirRequest) -> Result<ListDirResponse> {
        super::list_dir(self, request)
    }

    pub fn read_file(&self, request: ReadFileRequest) -> Result<ReadFileResponse> {
        super::read_file(self, request)
    }

    pub fn search_text(&self, request: SearchTextRequest) -> Result<SearchTextResponse> {
        super::search_text(self, request)
    }

    pub(super) fn budget(&self) -> OperationBudget {
        OperationBudget::from_config(&self.config)
    }

    pub(super) fn backend(&self) -> &SearchBackend {
        &self.backend
    }

    pub(super) fn begin_audit(&self, operation: AuditOperation) -> AuditRecord {
        AuditRecord::new(operation, self.session_id.as_str())
    }

    fn audit_path_for_denial(&self, requested: &Path) -> String {
        if self.config.redact_paths_in_audit {
            REDACTED_PATH.to_string()
        } else {
            requested.to_string_lossy().into_owned()
        }
    }

    /// Validates `path` and notes it on the audit record: canonical when allowed, redacted (per
    /// config) when denied.
    pub(super) fn authorize(&self, record: &mut AuditRecord, path: &Path) -> Result<PathBuf> {
        match self.security.validate(path).into_result() {
            Ok(canonical) => {
                record.paths.push(canonical.to_string_lossy().into_owned());
                Ok(canonical)
            }
            Err(reason) => {
                record.paths.push(self.audit_path_for_denial(path));
                Err(Error::denied(reason))
            }
        }
    }

    /// Rewrites the most recently noted path after a denial that came later than `authorize`,
    /// so the record carries it the same way as any other denied path.
    pub(super) fn note_late_denial(&self, record: &mut AuditRecord, requested: &Path) {
        if let Some(last) = record.paths.last_mut() {
            *last = self.audit_path_for_denial(requested);
        }
    }

    /// Writes exactly one audit record for an operation outcome. If the record cannot be
    /// persisted the outcome is discarded and the audit error is returned instead.
    pub(super) fn finish_audit<T>(
        &self,
        mut record: AuditRecord,
        outcome: Result<T>,
        fill: impl FnOnce(&mut AuditRecord, &T),
    ) -> Result<T> {
        if record.paths.len() == 1 {
            record.path = record.paths.pop();
        }
        record.timestamp = now_timestamp();
        match &outcome {
            Ok(value) => {
                record.success = true;
                fill(&mut record, value);
            }
            Err(err) => {
                record.success = false;
                record.error = Some(err.code().to_string());
                record.denial_reason = err.denial_reason();
            }
        }

        if let Err(err) = self.audit.record(&record) {
            tracing::error!(
                operation = record.operation.as_str(),
                error = %err,
                "audit write failed; failing operation closed"
            );
            return Err(match err {
                Error::AuditWrite(_) => err,
                other => Error::AuditWrite(std::io::Error::other(other.to_string())),
            });
        }
        outcome
    }
}

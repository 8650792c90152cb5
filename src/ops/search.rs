use std::fmt;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use regex::bytes::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::audit::{AuditOperation, AuditRecord};
use crate::budget::{BudgetGuard, ScanLimitReason};
use crate::config::SearchBackendPreference;
use crate::error::{Error, Result};
use crate::path_utils::is_within_root;
use crate::platform_open::open_readonly_nofollow;

use super::Context;

mod builtin;
mod ripgrep;

const MAX_PATTERN_BYTES: usize = 8 * 1024;
const MAX_REGEX_SIZE_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTextRequest {
    /// Files or directories to search. Every one must pass validation.
    pub paths: Vec<PathBuf>,
    pub pattern: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    /// Treat `pattern` as a literal string instead of a regex.
    #[serde(default)]
    pub literal: bool,
}

impl SearchTextRequest {
    pub fn new(path: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            paths: vec![path.into()],
            pattern: pattern.into(),
            max_results: None,
            literal: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub path: PathBuf,
    /// 1-based line number.
    pub line: u64,
    /// 1-based byte column of the first match on the line.
    pub column: u64,
    pub excerpt: String,
    #[serde(default)]
    pub line_truncated: bool,
}

impl SearchMatch {
    fn from_line(
        path: PathBuf,
        line: u64,
        column: u64,
        raw_line: &[u8],
        max_line_bytes: usize,
    ) -> Self {
        let raw_line = raw_line.strip_suffix(b"\n").unwrap_or(raw_line);
        let raw_line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);
        let mut excerpt = String::from_utf8_lossy(raw_line).into_owned();
        let line_truncated = super::truncate_at_char_boundary(&mut excerpt, max_line_bytes);
        Self {
            path,
            line,
            column,
            excerpt,
            line_truncated,
        }
    }

    /// Bytes this match contributes to the response budget.
    fn cost(&self) -> usize {
        self.excerpt.len() + self.path.as_os_str().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchBackendKind {
    Ripgrep,
    Builtin,
}

impl fmt::Display for SearchBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ripgrep => "ripgrep",
            Self::Builtin => "builtin",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTextResponse {
    pub matches: Vec<SearchMatch>,
    pub truncated: bool,
    /// Distinguishes "found nothing" from "ran out of time".
    pub timeout_reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_reason: Option<ScanLimitReason>,
    pub files_scanned: u64,
    pub skipped_files: u64,
    pub backend: SearchBackendKind,
    pub elapsed_ms: u64,
}

/// Backend chosen once when the [`Context`] is built.
#[derive(Debug, Clone)]
pub(crate) enum SearchBackend {
    Ripgrep { program: PathBuf },
    Builtin,
}

impl SearchBackend {
    pub(crate) fn select(preference: SearchBackendPreference) -> Result<Self> {
        match preference {
            SearchBackendPreference::Builtin => Ok(Self::Builtin),
            SearchBackendPreference::Auto => Ok(match which::which("rg") {
                Ok(program) => Self::Ripgrep { program },
                Err(err) => {
                    tracing::debug!(error = %err, "rg not found; using builtin search");
                    Self::Builtin
                }
            }),
            SearchBackendPreference::Ripgrep => which::which("rg")
                .map(|program| Self::Ripgrep { program })
                .map_err(|err| {
                    Error::InvalidConfig(format!(
                        "search_backend is \"ripgrep\" but rg was not found on PATH: {err}"
                    ))
                }),
        }
    }

    pub(crate) fn kind(&self) -> SearchBackendKind {
        match self {
            Self::Ripgrep { .. } => SearchBackendKind::Ripgrep,
            Self::Builtin => SearchBackendKind::Builtin,
        }
    }
}

/// Compiled query shared by both backends.
struct SearchQuery<'a> {
    regex: Regex,
    pattern: &'a str,
    literal: bool,
    max_line_bytes: usize,
}

impl<'a> SearchQuery<'a> {
    fn compile(request: &'a SearchTextRequest, max_line_bytes: usize) -> Result<Self> {
        if request.pattern.is_empty() {
            return Err(Error::InvalidRegex(
                "search pattern must not be empty".to_string(),
            ));
        }
        if request.pattern.len() > MAX_PATTERN_BYTES {
            return Err(Error::InvalidRegex(format!(
                "search pattern too long ({} bytes > {MAX_PATTERN_BYTES} bytes)",
                request.pattern.len()
            )));
        }
        let source = if request.literal {
            regex::escape(&request.pattern)
        } else {
            request.pattern.clone()
        };
        let regex = RegexBuilder::new(&source)
            .size_limit(MAX_REGEX_SIZE_BYTES)
            .build()
            .map_err(|err| Error::InvalidRegex(err.to_string()))?;
        Ok(Self {
            regex,
            pattern: &request.pattern,
            literal: request.literal,
            max_line_bytes,
        })
    }
}

#[derive(Debug, Default)]
struct ScanOutcome {
    matches: Vec<SearchMatch>,
    files_scanned: u64,
    skipped_files: u64,
}

pub fn search_text(ctx: &Context, request: SearchTextRequest) -> Result<SearchTextResponse> {
    let mut record = ctx.begin_audit(AuditOperation::SearchText);
    record.set_pattern(&request.pattern, ctx.config().redact_paths_in_audit);
    let outcome = search_text_inner(ctx, &request, &mut record);
    ctx.finish_audit(record, outcome, |record, response| {
        record.results_count = Some(response.matches.len());
        record.files_scanned = Some(response.files_scanned);
        record.truncated = Some(response.truncated);
        record.timeout_reached = Some(response.timeout_reached);
        record.backend = Some(response.backend);
    })
}

fn search_text_inner(
    ctx: &Context,
    request: &SearchTextRequest,
    record: &mut AuditRecord,
) -> Result<SearchTextResponse> {
    if request.paths.is_empty() {
        return Err(Error::InvalidPath(
            "search_text requires at least one path".to_string(),
        ));
    }
    let query = SearchQuery::compile(request, ctx.config().max_line_bytes)?;

    let mut targets = Vec::<PathBuf>::with_capacity(request.paths.len());
    for path in &request.paths {
        targets.push(ctx.authorize(record, path)?);
    }
    let targets = collapse_nested_targets(targets);

    let budget = ctx.budget().with_max_results(request.max_results);
    let mut guard = BudgetGuard::start(budget);
    let mut outcome = ScanOutcome::default();

    let backend = match ctx.backend() {
        // An already-expired budget never starts a scan.
        backend if guard.checkpoint().is_break() => backend.kind(),
        SearchBackend::Ripgrep { program } => {
            ripgrep::search(ctx, program, &query, &targets, &mut guard, &mut outcome)?
        }
        SearchBackend::Builtin => {
            builtin::search(ctx, &query, &targets, &mut guard, &mut outcome);
            SearchBackendKind::Builtin
        }
    };
    outcome.files_scanned = guard.files_scanned();

    let mut matches = outcome.matches;
    matches.sort_by(|a, b| a.path.cmp(&b.path).then(a.line.cmp(&b.line)));

    Ok(SearchTextResponse {
        matches,
        truncated: guard.limit_reached(),
        timeout_reached: guard.timed_out(),
        limit_reason: guard.limit_reason(),
        files_scanned: outcome.files_scanned,
        skipped_files: outcome.skipped_files,
        backend,
        elapsed_ms: guard.elapsed_ms(),
    })
}

/// Sorts and deduplicates targets, dropping any that sit under another target.
fn collapse_nested_targets(mut targets: Vec<PathBuf>) -> Vec<PathBuf> {
    targets.sort();
    targets.dedup();
    let mut kept = Vec::<PathBuf>::with_capacity(targets.len());
    for target in targets {
        if kept.iter().any(|outer: &PathBuf| is_within_root(&target, outer)) {
            continue;
        }
        kept.push(target);
    }
    kept
}

fn path_is_searchable(ctx: &Context, path: &Path) -> bool {
    !ctx.security().blocked().is_blocked(path)
}

/// Walks every target in file-name order without following symlinks, pruning blocked entries,
/// and hands each regular file to `visit`. Both backends see the same candidate files.
fn walk_files(
    ctx: &Context,
    targets: &[PathBuf],
    guard: &mut BudgetGuard,
    out: &mut ScanOutcome,
    mut visit: impl FnMut(&Path, &mut BudgetGuard, &mut ScanOutcome) -> ControlFlow<ScanLimitReason>,
) -> ControlFlow<ScanLimitReason> {
    for target in targets {
        let walker = WalkDir::new(target)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || path_is_searchable(ctx, entry.path()));

        for entry in walker {
            guard.checkpoint()?;
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    out.skipped_files += 1;
                    continue;
                }
            };
            // Symlinks are never followed; regular files under a validated directory stay
            // inside it.
            if !entry.file_type().is_file() {
                continue;
            }
            visit(entry.path(), guard, out)?;
        }
    }
    ControlFlow::Continue(())
}

/// Reads a candidate without following symlinks. `None` when it is not a regular file or is
/// larger than `max_bytes`.
fn read_candidate(path: &Path, max_bytes: u64) -> std::io::Result<Option<Vec<u8>>> {
    let file = open_readonly_nofollow(path)?;
    let meta = file.metadata()?;
    if !meta.is_file() || meta.len() > max_bytes {
        return Ok(None);
    }
    let mut bytes = Vec::<u8>::with_capacity(usize::try_from(meta.len()).unwrap_or(0));
    file.take(max_bytes.saturating_add(1))
        .read_to_end(&mut bytes)?;
    if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > max_bytes {
        return Ok(None);
    }
    Ok(Some(bytes))
}

/// A NUL byte anywhere in the file marks it as binary.
fn is_binary(bytes: &[u8]) -> bool {
    memchr::memchr(0, bytes).is_some()
}

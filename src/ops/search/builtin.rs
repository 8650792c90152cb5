//! In-process scanner used when ripgrep is unavailable.
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::budget::{BudgetGuard, ScanLimitReason};

use super::super::Context;
use super::{ScanOutcome, SearchMatch, SearchQuery, is_binary, read_candidate, walk_files};

pub(super) fn search(
    ctx: &Context,
    query: &SearchQuery<'_>,
    targets: &[PathBuf],
    guard: &mut BudgetGuard,
    out: &mut ScanOutcome,
) {
    let _ = walk_files(ctx, targets, guard, out, |path, guard, out| {
        guard.begin_file()?;
        scan_file(query, path, guard, out)
    });
}

/// Scans one file that has already been counted against the file budget.
pub(super) fn scan_file(
    query: &SearchQuery<'_>,
    path: &Path,
    guard: &mut BudgetGuard,
    out: &mut ScanOutcome,
) -> ControlFlow<ScanLimitReason> {
    let bytes = match read_candidate(path, guard.budget().max_file_size_bytes) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            out.skipped_files += 1;
            return ControlFlow::Continue(());
        }
        Err(err) => {
            tracing::debug!(error = %err, "skipping unreadable file");
            out.skipped_files += 1;
            return ControlFlow::Continue(());
        }
    };
    if bytes.is_empty() {
        return ControlFlow::Continue(());
    }
    if is_binary(&bytes) {
        out.skipped_files += 1;
        return ControlFlow::Continue(());
    }

    let body = bytes.strip_suffix(b"\n").unwrap_or(&bytes);
    for (idx, line) in body.split(|byte| *byte == b'\n').enumerate() {
        guard.checkpoint()?;
        let Some(found) = query.regex.find(line) else {
            continue;
        };
        let found = SearchMatch::from_line(
            path.to_path_buf(),
            idx as u64 + 1,
            found.start() as u64 + 1,
            line,
            query.max_line_bytes,
        );
        guard.admit_result(found.cost())?;
        out.matches.push(found);
    }
    ControlFlow::Continue(())
}

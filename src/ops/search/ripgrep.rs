//! ripgrep backend: argv-only spawn over files listed by the shared walker, `--json` output
//! read on a helper thread.
//!
//! The walker applies the file budget and blocked-pattern pruning before rg sees a path. Every
//! file rg reports is still re-validated and re-read for binary content before a match is
//! returned, so both backends agree on which files can match.
use std::io::{self, BufRead, BufReader};
use std::ops::{ControlFlow, Range};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;

use crate::budget::{BudgetGuard, OperationBudget, ScanLimitReason};
use crate::error::{Error, Result};

use super::super::Context;
use super::{
    ScanOutcome, SearchBackendKind, SearchMatch, SearchQuery, builtin, is_binary, read_candidate,
    walk_files,
};

const MAX_BATCH_FILES: usize = 512;
const MAX_BATCH_ARG_BYTES: usize = 64 * 1024;

fn build_command(
    program: &Path,
    query: &SearchQuery<'_>,
    files: &[PathBuf],
    budget: &OperationBudget,
) -> Command {
    let mut cmd = Command::new(program);
    cmd.args([
        "--json",
        "--no-follow",
        "--hidden",
        "--no-ignore",
        "--no-config",
        "--no-messages",
        "--sort",
        "path",
    ])
    .arg("--max-filesize")
    .arg(budget.max_file_size_bytes.to_string());
    if query.literal {
        cmd.arg("--fixed-strings");
    }
    cmd.arg("-e").arg(query.pattern).arg("--").args(files);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    cmd
}

/// Candidate files in walk order, each already counted against the file budget.
struct Listing {
    files: Vec<PathBuf>,
    /// More files existed past `max_files_scanned`.
    capped: bool,
}

fn list_candidates(
    ctx: &Context,
    targets: &[PathBuf],
    guard: &mut BudgetGuard,
    out: &mut ScanOutcome,
) -> Listing {
    let max_files = guard.budget().max_files_scanned as u64;
    let mut files = Vec::<PathBuf>::new();
    let mut capped = false;
    let _ = walk_files(ctx, targets, guard, out, |path, guard, _| {
        if guard.files_scanned() >= max_files {
            capped = true;
            return ControlFlow::Break(ScanLimitReason::Files);
        }
        guard.begin_file()?;
        files.push(path.to_path_buf());
        ControlFlow::Continue(())
    });
    Listing { files, capped }
}

/// Splits `files` into argv-sized runs.
fn batch_ranges(files: &[PathBuf]) -> Vec<Range<usize>> {
    let mut ranges = Vec::<Range<usize>>::new();
    let mut start = 0;
    let mut arg_bytes = 0;
    for (idx, file) in files.iter().enumerate() {
        let len = file.as_os_str().len() + 1;
        if idx > start && (idx - start >= MAX_BATCH_FILES || arg_bytes + len > MAX_BATCH_ARG_BYTES)
        {
            ranges.push(start..idx);
            start = idx;
            arg_bytes = 0;
        }
        arg_bytes += len;
    }
    if start < files.len() {
        ranges.push(start..files.len());
    }
    ranges
}

/// Searches the listed candidates with rg, batch by batch. If rg cannot be spawned, the
/// remaining files are scanned in-process and the builtin backend is reported.
pub(super) fn search(
    ctx: &Context,
    program: &Path,
    query: &SearchQuery<'_>,
    targets: &[PathBuf],
    guard: &mut BudgetGuard,
    out: &mut ScanOutcome,
) -> Result<SearchBackendKind> {
    let listing = list_candidates(ctx, targets, guard, out);
    let mut kind = SearchBackendKind::Ripgrep;
    for range in batch_ranges(&listing.files) {
        if guard.checkpoint().is_break() {
            break;
        }
        let batch = &listing.files[range];
        if kind == SearchBackendKind::Ripgrep {
            match build_command(program, query, batch, guard.budget()).spawn() {
                Ok(child) => {
                    collect(ctx, child, query, guard, out)?;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to spawn rg; falling back to builtin search");
                    kind = SearchBackendKind::Builtin;
                }
            }
        }
        for path in batch {
            if builtin::scan_file(query, path, guard, out).is_break() {
                break;
            }
        }
    }
    if listing.capped {
        guard.mark_files_exhausted();
    }
    Ok(kind)
}

#[derive(Debug, Deserialize)]
struct RgEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// ripgrep encodes text as `{"text": ...}`, or `{"bytes": <base64>}` when it is not UTF-8.
#[derive(Debug, Deserialize)]
struct RgData {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    bytes: Option<String>,
}

impl RgData {
    fn into_bytes(self) -> Option<Vec<u8>> {
        match (self.text, self.bytes) {
            (Some(text), _) => Some(text.into_bytes()),
            (None, Some(encoded)) => BASE64_STANDARD.decode(encoded).ok(),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RgMatch {
    path: RgData,
    lines: RgData,
    line_number: Option<u64>,
    #[serde(default)]
    submatches: Vec<RgSubmatch>,
}

#[derive(Debug, Deserialize)]
struct RgSubmatch {
    start: u64,
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStringExt;
    Some(PathBuf::from(std::ffi::OsString::from_vec(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> Option<PathBuf> {
    String::from_utf8(bytes).ok().map(PathBuf::from)
}

/// Revalidation result for the file currently being reported.
struct CurrentFile {
    reported: PathBuf,
    canonical: Option<PathBuf>,
}

fn collect(
    ctx: &Context,
    mut child: Child,
    query: &SearchQuery<'_>,
    guard: &mut BudgetGuard,
    out: &mut ScanOutcome,
) -> Result<()> {
    let Some(stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(Error::SearchBackend("rg stdout was not captured".to_string()));
    };

    let (tx, rx) = mpsc::channel::<io::Result<Vec<u8>>>();
    let reader = thread::Builder::new()
        .name("airgap-rg-reader".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = Vec::<u8>::new();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(err));
                        break;
                    }
                }
            }
        });
    let reader = match reader {
        Ok(handle) => handle,
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::SearchBackend(format!(
                "failed to start rg reader: {err}"
            )));
        }
    };

    let mut current: Option<CurrentFile> = None;
    let mut read_error: Option<io::Error> = None;

    loop {
        if guard.checkpoint().is_break() {
            break;
        }
        let line = match rx.recv_timeout(guard.remaining()) {
            Ok(Ok(line)) => line,
            Ok(Err(err)) => {
                read_error = Some(err);
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                guard.mark_timed_out();
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let Ok(envelope) = serde_json::from_slice::<RgEnvelope>(&line) else {
            continue;
        };
        if envelope.kind != "match" {
            continue;
        }
        let Ok(found) = serde_json::from_value::<RgMatch>(envelope.data) else {
            continue;
        };
        if handle_match(ctx, query, found, &mut current, guard, out).is_break() {
            break;
        }
    }

    // The child may already have exited; a failed kill is expected then.
    let _ = child.kill();
    drop(rx);
    let _ = reader.join();
    match child.wait() {
        Ok(status) if status.code() == Some(2) => {
            tracing::debug!(%status, "rg reported errors for some paths");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "failed to reap rg"),
    }

    if let Some(err) = read_error {
        return Err(Error::SearchBackend(format!("failed to read rg output: {err}")));
    }
    Ok(())
}

/// Keeps a reported file only if it still validates and holds no NUL byte anywhere; rg's own
/// binary handling differs between walked and explicitly listed files.
fn revalidate(ctx: &Context, reported: &Path, max_file_size_bytes: u64) -> Option<PathBuf> {
    let canonical = ctx.security().validate(reported).into_result().ok()?;
    match read_candidate(&canonical, max_file_size_bytes) {
        Ok(Some(bytes)) if !is_binary(&bytes) => Some(canonical),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(error = %err, "failed to re-read rg result");
            None
        }
    }
}

fn handle_match(
    ctx: &Context,
    query: &SearchQuery<'_>,
    found: RgMatch,
    current: &mut Option<CurrentFile>,
    guard: &mut BudgetGuard,
    out: &mut ScanOutcome,
) -> ControlFlow<ScanLimitReason> {
    let Some(reported) = found.path.into_bytes().and_then(path_from_bytes) else {
        out.skipped_files += 1;
        return ControlFlow::Continue(());
    };
    let is_same_file = current
        .as_ref()
        .is_some_and(|file| file.reported == reported);
    if !is_same_file {
        let canonical = revalidate(ctx, &reported, guard.budget().max_file_size_bytes);
        if canonical.is_none() {
            tracing::debug!("dropping rg result that failed revalidation");
            out.skipped_files += 1;
        }
        *current = Some(CurrentFile {
            reported,
            canonical,
        });
    }
    let Some(canonical) = current.as_ref().and_then(|file| file.canonical.clone()) else {
        return ControlFlow::Continue(());
    };

    let (Some(line_number), Some(line)) = (found.line_number, found.lines.into_bytes()) else {
        return ControlFlow::Continue(());
    };
    let column = found
        .submatches
        .first()
        .map_or(1, |submatch| submatch.start + 1);
    let found = SearchMatch::from_line(canonical, line_number, column, &line, query.max_line_bytes);
    guard.admit_result(found.cost())?;
    out.matches.push(found);
    ControlFlow::Continue(())
}

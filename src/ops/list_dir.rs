use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit::AuditOperation;
use crate::budget::BudgetGuard;
use crate::error::{Error, Result};

use super::{Context, DenialReason};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDirRequest {
    pub path: PathBuf,
    /// Lowers the configured `max_results` for this call; never raises it.
    #[serde(default)]
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDirEntry {
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Whether a follow-up `read_file`/`list_dir` on this entry would pass validation.
    pub accessible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Kind of an accessible symlink's target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<EntryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDirResponse {
    pub path: PathBuf,
    pub entries: Vec<ListDirEntry>,
    pub truncated: bool,
    #[serde(default)]
    pub skipped_io_errors: u64,
}

pub fn list_dir(ctx: &Context, request: ListDirRequest) -> Result<ListDirResponse> {
    let mut record = ctx.begin_audit(AuditOperation::ListDir);
    let outcome = list_dir_inner(ctx, &request, &mut record);
    ctx.finish_audit(record, outcome, |record, response| {
        record.results_count = Some(response.entries.len());
        record.truncated = Some(response.truncated);
    })
}

fn list_dir_inner(
    ctx: &Context,
    request: &ListDirRequest,
    record: &mut crate::audit::AuditRecord,
) -> Result<ListDirResponse> {
    let dir = ctx.authorize(record, &request.path)?;
    let meta = fs::metadata(&dir).map_err(|err| Error::io_path("metadata", &dir, err))?;
    if !meta.is_dir() {
        return Err(Error::NotADirectory(dir));
    }

    let mut rows = fs::read_dir(&dir)
        .map_err(|err| Error::io_path("read_dir", &dir, err))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|err| Error::io_path("read_dir", &dir, err))?;
    rows.sort_by_key(|entry| entry.file_name());

    let budget = ctx.budget().with_max_results(request.max_results);
    let mut guard = BudgetGuard::start(budget);
    let mut entries = Vec::<ListDirEntry>::new();
    let mut skipped_io_errors: u64 = 0;

    for row in rows {
        let entry = classify_entry(ctx, &dir, &row, &mut skipped_io_errors);
        let cost = entry.name.len() + entry.path.as_os_str().len();
        if let ControlFlow::Break(_) = guard.admit_result(cost) {
            break;
        }
        entries.push(entry);
    }

    Ok(ListDirResponse {
        path: dir,
        entries,
        truncated: guard.limit_reached(),
        skipped_io_errors,
    })
}

fn kind_of(file_type: fs::FileType) -> EntryKind {
    if file_type.is_file() {
        EntryKind::File
    } else if file_type.is_dir() {
        EntryKind::Dir
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Unknown
    }
}

fn classify_entry(
    ctx: &Context,
    dir: &Path,
    row: &fs::DirEntry,
    skipped_io_errors: &mut u64,
) -> ListDirEntry {
    let name = row.file_name().to_string_lossy().into_owned();
    let path = dir.join(row.file_name());
    let mut entry = ListDirEntry {
        name,
        path,
        kind: EntryKind::Unknown,
        accessible: false,
        size: None,
        target_type: None,
        denial_reason: None,
    };

    // Blocked entries are named but never stat'ed. Links are judged by their target below.
    let file_type = row.file_type();
    let is_symlink = file_type.as_ref().is_ok_and(fs::FileType::is_symlink);
    if !is_symlink && ctx.security().blocked().is_blocked(&entry.path) {
        entry.denial_reason = Some(DenialReason::BlockedPattern);
        return entry;
    }

    let file_type = match file_type {
        Ok(file_type) => file_type,
        Err(err) => {
            tracing::debug!(error = %err, "failed to read entry type");
            *skipped_io_errors += 1;
            return entry;
        }
    };
    entry.kind = kind_of(file_type);

    match entry.kind {
        EntryKind::File => {
            entry.accessible = true;
            match row.metadata() {
                Ok(meta) => entry.size = Some(meta.len()),
                Err(_) => *skipped_io_errors += 1,
            }
        }
        EntryKind::Dir => entry.accessible = true,
        EntryKind::Symlink => match ctx.security().validate(&entry.path).into_result() {
            Ok(target) => {
                entry.accessible = true;
                entry.target_type = fs::metadata(&target)
                    .map(|meta| kind_of(meta.file_type()))
                    .ok();
            }
            Err(reason) => entry.denial_reason = Some(reason),
        },
        EntryKind::Unknown => {}
    }
    entry
}

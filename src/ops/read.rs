use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audit::{AuditOperation, AuditRecord};
use crate::error::{Error, Result};
use crate::platform_open::{
    FileIdentity, is_symlink_open_error, open_readonly_nofollow, resolved_handle_path,
};

use super::{Context, DenialReason};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileRequest {
    pub path: PathBuf,
    /// Byte offset to start reading from.
    #[serde(default)]
    pub offset: u64,
    /// Maximum bytes to return. Clamped to `max_file_size_bytes` and `max_response_bytes`.
    #[serde(default)]
    pub limit: Option<u64>,
}

impl ReadFileRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextEncoding {
    Utf8,
    /// Bytes that are not valid UTF-8 are mapped one-to-one onto U+0000..=U+00FF.
    Latin1,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadFileResponse {
    pub path: PathBuf,
    pub content: String,
    pub encoding: TextEncoding,
    /// Bytes actually returned, which may be fewer than `limit` at end of file.
    pub bytes_read: u64,
    pub offset: u64,
    pub limit: u64,
    pub file_size_bytes: u64,
    /// `true` when bytes remain after the returned window.
    pub truncated: bool,
}

pub fn read_file(ctx: &Context, request: ReadFileRequest) -> Result<ReadFileResponse> {
    let mut record = ctx.begin_audit(AuditOperation::ReadFile);
    record.offset = Some(request.offset);
    record.limit = request.limit;
    let outcome = read_file_inner(ctx, &request, &mut record);
    ctx.finish_audit(record, outcome, |record, response| {
        record.bytes_read = Some(response.bytes_read);
        record.truncated = Some(response.truncated);
    })
}

fn read_file_inner(
    ctx: &Context,
    request: &ReadFileRequest,
    record: &mut AuditRecord,
) -> Result<ReadFileResponse> {
    let path = ctx.authorize(record, &request.path)?;
    let file = open_validated(ctx, &path).inspect_err(|err| {
        if err.denial_reason().is_some() {
            ctx.note_late_denial(record, &request.path);
        }
    })?;

    let meta = file
        .metadata()
        .map_err(|err| Error::io_path("metadata", &path, err))?;
    if !meta.is_file() {
        return Err(Error::NotAFile(path));
    }

    let budget = ctx.budget();
    let file_size_bytes = meta.len();
    if file_size_bytes > budget.max_file_size_bytes {
        return Err(Error::FileTooLarge {
            path,
            size_bytes: file_size_bytes,
            max_bytes: budget.max_file_size_bytes,
        });
    }

    let max_window = budget
        .max_file_size_bytes
        .min(u64::try_from(budget.max_response_bytes).unwrap_or(u64::MAX));
    let limit = request.limit.unwrap_or(max_window).min(max_window);

    let mut bytes = Vec::<u8>::new();
    if request.offset < file_size_bytes && limit > 0 {
        let mut file = file;
        file.seek(SeekFrom::Start(request.offset))
            .map_err(|err| Error::io_path("seek", &path, err))?;
        file.take(limit)
            .read_to_end(&mut bytes)
            .map_err(|err| Error::io_path("read", &path, err))?;
    }

    let bytes_read = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    let truncated = request.offset.saturating_add(bytes_read) < file_size_bytes;
    let (content, encoding) = decode_text(bytes);

    Ok(ReadFileResponse {
        path,
        content,
        encoding,
        bytes_read,
        offset: request.offset,
        limit,
        file_size_bytes,
        truncated,
    })
}

/// Opens the validated path without following symlinks, then checks that the handle still
/// names an allowed file. This closes the window between validation and open.
fn open_validated(ctx: &Context, path: &Path) -> Result<fs::File> {
    let file = open_readonly_nofollow(path).map_err(|err| {
        if is_symlink_open_error(&err) {
            return Error::denied(DenialReason::SymlinkEscape);
        }
        Error::io_path("open", path, err)
    })?;

    match resolved_handle_path(&file).map_err(|err| Error::io_path("resolve_handle", path, err))? {
        Some(resolved) => {
            let recheck = ctx.security().validate(&resolved);
            if let Some(reason) = recheck.denial_reason() {
                tracing::warn!(%reason, "file changed between validation and open");
                return Err(Error::denied(reason));
            }
        }
        None => {
            let opened = file
                .metadata()
                .map_err(|err| Error::io_path("metadata", path, err))?;
            let current =
                fs::metadata(path).map_err(|err| Error::io_path("metadata", path, err))?;
            if FileIdentity::from_metadata(&opened) != FileIdentity::from_metadata(&current) {
                tracing::warn!("file identity changed between validation and open");
                return Err(Error::InvalidPath(format!(
                    "path {} changed during operation",
                    path.display()
                )));
            }
        }
    }
    Ok(file)
}

fn decode_text(bytes: Vec<u8>) -> (String, TextEncoding) {
    match String::from_utf8(bytes) {
        Ok(text) => (text, TextEncoding::Utf8),
        Err(err) => {
            let text = err.into_bytes().into_iter().map(char::from).collect();
            (text, TextEncoding::Latin1)
        }
    }
}

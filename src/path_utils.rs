//! Path utilities used by path validation, blocked-pattern matching and traversal.
//!
//! Everything here is **lexical**: it does not touch the filesystem and therefore does not
//! resolve symlinks. Canonicalization happens in `ops::security`.
//!
//! Invariants of `normalize_path_lexical`:
//! - Removes `.` segments.
//! - Resolves `..` against preceding *normal* segments when possible.
//! - Preserves leading `..` for relative paths (e.g. `../../a/../b` → `../../b`).
//! - For absolute paths, `..` cannot escape the filesystem root (e.g. `/../etc` → `/etc`).
//! - On Windows, preserves path prefixes (Disk/UNC/verbatim).
use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

pub fn normalize_path_lexical(path: &Path) -> PathBuf {
    #[derive(Debug)]
    enum Segment {
        ParentDir,
        Normal(OsString),
    }

    let mut path_prefix: Option<OsString> = None;
    let mut has_root = false;
    let mut segments: Vec<Segment> = Vec::new();

    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(segments.last(), Some(Segment::Normal(_))) {
                    segments.pop();
                } else if !has_root {
                    segments.push(Segment::ParentDir);
                }
            }
            Component::Normal(part) => segments.push(Segment::Normal(part.to_os_string())),
            Component::RootDir => {
                has_root = true;
            }
            Component::Prefix(prefix_comp) => {
                path_prefix = Some(prefix_comp.as_os_str().to_os_string());
            }
        }
    }

    let mut out = PathBuf::new();
    if let Some(prefix) = path_prefix {
        out.push(Path::new(&prefix));
    }
    if has_root {
        if out.as_os_str().is_empty() {
            out.push(std::path::MAIN_SEPARATOR_STR);
        } else {
            // Pushing `RootDir` after a Windows `Prefix` would drop the prefix.
            out.as_mut_os_string().push(std::path::MAIN_SEPARATOR_STR);
        }
    }
    for segment in segments {
        match segment {
            Segment::ParentDir => out.push(".."),
            Segment::Normal(part) => out.push(part),
        }
    }

    if out.as_os_str().is_empty() && path.is_relative() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// Returns `true` when the raw input contains a `..` segment under either separator style.
pub fn has_traversal_segment(path: &Path) -> bool {
    if path
        .components()
        .any(|comp| matches!(comp, Component::ParentDir))
    {
        return true;
    }
    to_slash_string(path).split('/').any(|segment| segment == "..")
}

/// Forward-slash form of a path used for pattern matching. Backslashes are always rewritten,
/// so Windows-style separators cannot slip past a pattern written with `/`.
pub fn to_slash_string(path: &Path) -> Cow<'_, str> {
    let raw = path.to_string_lossy();
    if raw.contains('\\') {
        Cow::Owned(raw.replace('\\', "/"))
    } else {
        raw
    }
}

/// Expands a leading `~` or `~/` to the current user's home directory.
///
/// `~user` forms are left untouched. Returns the input unchanged when no home directory is known.
pub fn expand_home(path: &Path) -> Cow<'_, Path> {
    let mut components = path.components();
    let Some(Component::Normal(first)) = components.next() else {
        return Cow::Borrowed(path);
    };
    if first != "~" {
        return Cow::Borrowed(path);
    }
    match dirs::home_dir() {
        Some(home) => Cow::Owned(home.join(components.as_path())),
        None => Cow::Borrowed(path),
    }
}

/// Home expansion followed by joining relative paths onto the process working directory.
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        return Ok(expanded.into_owned());
    }
    Ok(std::env::current_dir()?.join(expanded))
}

#[cfg(windows)]
fn components_eq(a: Component<'_>, b: Component<'_>) -> bool {
    a.as_os_str()
        .as_encoded_bytes()
        .eq_ignore_ascii_case(b.as_os_str().as_encoded_bytes())
}

#[cfg(not(windows))]
fn components_eq(a: Component<'_>, b: Component<'_>) -> bool {
    a == b
}

/// `true` when `path` equals `root` or is a strict descendant of it.
///
/// The comparison is component-wise, so `/home/user` never contains `/home/username`.
/// Both inputs must already be normalized (canonical or `normalize_path_lexical`).
pub fn is_within_root(path: &Path, root: &Path) -> bool {
    let mut path_components = path.components();
    for root_comp in root.components() {
        match path_components.next() {
            Some(path_comp) if components_eq(path_comp, root_comp) => {}
            _ => return false,
        }
    }
    true
}

/// Strips `root` from `path` with the same component rules as [`is_within_root`].
pub fn strip_root<'a>(path: &'a Path, root: &Path) -> Option<&'a Path> {
    let mut path_components = path.components();
    for root_comp in root.components() {
        match path_components.next() {
            Some(path_comp) if components_eq(path_comp, root_comp) => {}
            _ => return None,
        }
    }
    Some(path_components.as_path())
}

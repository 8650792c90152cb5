#![allow(dead_code)]

use std::path::{Path, PathBuf};

use airgap_fs::ops::Context;
use airgap_fs::{AirGapConfig, SearchBackendPreference};

pub const SESSION_ID: &str = "test-session";

/// Single-root config with the builtin search backend so results do not depend on `rg`.
pub fn test_config(root: &Path) -> AirGapConfig {
    AirGapConfig {
        search_backend: SearchBackendPreference::Builtin,
        session_id: Some(SESSION_ID.to_string()),
        ..AirGapConfig::with_roots([root.to_path_buf()])
    }
}

pub fn test_context(root: &Path) -> Context {
    Context::new(test_config(root)).expect("ctx")
}

/// A root directory plus a sibling directory outside it, both under one tempdir.
pub struct Sandbox {
    pub dir: tempfile::TempDir,
    pub root: PathBuf,
    pub outside: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        std::fs::create_dir(&root).expect("mkdir root");
        std::fs::create_dir(&outside).expect("mkdir outside");
        Self { dir, root, outside }
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.path().join("logs").join("audit.jsonl")
    }

    pub fn audited_config(&self) -> AirGapConfig {
        AirGapConfig {
            audit_log_path: Some(self.audit_path()),
            ..test_config(&self.root)
        }
    }

    pub fn write(&self, relative: &str, contents: impl AsRef<[u8]>) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir parent");
        }
        std::fs::write(&path, contents).expect("write");
        path
    }

    pub fn audit_records(&self) -> Vec<serde_json::Value> {
        read_audit_records(&self.audit_path())
    }
}

pub fn read_audit_records(path: &Path) -> Vec<serde_json::Value> {
    let raw = std::fs::read_to_string(path).unwrap_or_default();
    raw.lines()
        .map(|line| serde_json::from_str(line).expect("audit line is json"))
        .collect()
}

#[cfg(unix)]
pub mod unix {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    pub fn symlink(target: &Path, link: &Path) {
        std::os::unix::fs::symlink(target, link).expect("symlink");
    }

    pub fn mkfifo(path: &Path) {
        let c_path = CString::new(path.as_os_str().as_bytes()).expect("path without NUL");
        // Safety: `c_path` is NUL-terminated and outlives the call.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        assert_eq!(
            rc,
            0,
            "mkfifo {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        );
    }
}

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Device/inode pair used to check that an open handle still names the validated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
}

impl FileIdentity {
    pub(crate) fn from_metadata(meta: &fs::Metadata) -> Option<Self> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;

            Some(Self {
                dev: meta.dev(),
                ino: meta.ino(),
            })
        }
        #[cfg(not(unix))]
        {
            let _ = meta;
            None
        }
    }
}

#[cfg(unix)]
pub(crate) fn is_symlink_open_error(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ELOOP)
}

#[cfg(not(unix))]
pub(crate) fn is_symlink_open_error(_err: &io::Error) -> bool {
    false
}

/// Opens `path` read-only without following a final symlink component.
///
/// `O_NONBLOCK` keeps a FIFO swapped in after validation from blocking the open.
#[cfg(unix)]
pub(crate) fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK);
    options.open(path)
}

#[cfg(windows)]
pub(crate) fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    use windows_sys::Win32::Storage::FileSystem::FILE_FLAG_OPEN_REPARSE_POINT;

    let mut options = OpenOptions::new();
    options
        .read(true)
        .custom_flags(FILE_FLAG_OPEN_REPARSE_POINT);
    options.open(path)
}

#[cfg(all(not(unix), not(windows)))]
pub(crate) fn open_readonly_nofollow(path: &Path) -> io::Result<File> {
    let _ = path;
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "platform does not support no-follow reads",
    ))
}

/// The path the kernel reports for an open handle.
///
/// `Ok(None)` means the platform cannot answer (or `/proc` is not mounted); callers fall back to
/// comparing [`FileIdentity`] values.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn resolved_handle_path(file: &File) -> io::Result<Option<PathBuf>> {
    use std::os::fd::AsRawFd;

    let link = PathBuf::from(format!("/proc/self/fd/{}", file.as_raw_fd()));
    match fs::read_link(&link) {
        Ok(path) => Ok(Some(path)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub(crate) fn resolved_handle_path(file: &File) -> io::Result<Option<PathBuf>> {
    use std::ffi::OsString;
    use std::os::fd::AsRawFd;
    use std::os::unix::ffi::OsStringExt;

    let mut buf = vec![0_u8; libc::PATH_MAX as usize];
    // SAFETY: `F_GETPATH` writes at most `PATH_MAX` bytes (NUL included) into `buf`, which is
    // valid for that length for the duration of the call.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETPATH, buf.as_mut_ptr()) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    let len = memchr::memchr(0, &buf).unwrap_or(buf.len());
    buf.truncate(len);
    Ok(Some(PathBuf::from(OsString::from_vec(buf))))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
pub(crate) fn resolved_handle_path(file: &File) -> io::Result<Option<PathBuf>> {
    let _ = file;
    Ok(None)
}

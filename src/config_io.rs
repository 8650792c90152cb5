//! Loading an [`AirGapConfig`] from a TOML or JSON file.
//!
//! Relative `allowed_roots` and `audit_log_path` entries in a file are resolved against the
//! directory holding that file, so a config can travel with the tree it guards. `~` is expanded
//! first; paths that are absolute after expansion are kept as written.
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::path_utils::{expand_home, normalize_path_lexical};
use crate::platform_open::{is_symlink_open_error, open_readonly_nofollow};
use crate::{AirGapConfig, Error, Result};

/// Upper bound on a config file's size.
pub const MAX_CONFIG_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// `.json` is JSON; `.toml` or no extension is TOML.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") | None => Ok(Self::Toml),
            Some(other) => Err(Error::InvalidConfig(format!(
                "unsupported config format {other:?}; expected .toml or .json"
            ))),
        }
    }
}

/// Parses without validating or resolving paths.
pub fn parse_config(raw: &str, format: ConfigFormat) -> Result<AirGapConfig> {
    match format {
        ConfigFormat::Json => serde_json::from_str(raw)
            .map_err(|err| Error::InvalidConfig(format!("invalid json config: {err}"))),
        ConfigFormat::Toml => toml::from_str(raw)
            .map_err(|err| Error::InvalidConfig(format!("invalid toml config: {err}"))),
    }
}

/// Reads, parses, resolves relative paths and validates the config at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<AirGapConfig> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let raw = read_config_text(path)?;
    let mut config = parse_config(&raw, format)?;
    if let Some(base) = config_dir(path)? {
        resolve_relative_paths(&mut config, &base);
    }
    config.validate()?;
    tracing::debug!(
        roots = config.allowed_roots.len(),
        ?format,
        "loaded config"
    );
    Ok(config)
}

fn read_config_text(path: &Path) -> Result<String> {
    let file = open_readonly_nofollow(path).map_err(|err| {
        if is_symlink_open_error(&err) {
            return Error::InvalidPath(format!(
                "path {} is a symlink; refusing to load config from symlink paths",
                path.display()
            ));
        }
        Error::io_path("open", path, err)
    })?;
    let meta = file
        .metadata()
        .map_err(|err| Error::io_path("metadata", path, err))?;
    if !meta.is_file() {
        return Err(Error::NotAFile(path.to_path_buf()));
    }

    let mut bytes = Vec::<u8>::new();
    file.take(MAX_CONFIG_BYTES.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|err| Error::io_path("read", path, err))?;
    let size_bytes = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if size_bytes > MAX_CONFIG_BYTES {
        return Err(Error::FileTooLarge {
            path: path.to_path_buf(),
            size_bytes,
            max_bytes: MAX_CONFIG_BYTES,
        });
    }
    String::from_utf8(bytes)
        .map_err(|_| Error::InvalidConfig(format!("config {} is not valid utf-8", path.display())))
}

// Absolute directory of the config file, taken lexically so a relative `--config` works.
fn config_dir(path: &Path) -> Result<Option<PathBuf>> {
    let absolute = crate::path_utils::absolutize(path)
        .map_err(|err| Error::io_path("current_dir", path, err))?;
    Ok(normalize_path_lexical(&absolute).parent().map(Path::to_path_buf))
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() || expanded.as_os_str().is_empty() {
        return expanded.into_owned();
    }
    normalize_path_lexical(&base.join(expanded))
}

fn resolve_relative_paths(config: &mut AirGapConfig, base: &Path) {
    for root in &mut config.allowed_roots {
        *root = resolve_against(base, root);
    }
    if let Some(audit_log_path) = &mut config.audit_log_path {
        *audit_log_path = resolve_against(base, audit_log_path);
    }
}

//! Typed blocked-pattern matchers.
//!
//! Patterns are classified once at load time:
//! - no `/`: a glob matched against the basename (`*.pem`, `.env.*`, `id_rsa`);
//! - `/` and no glob metacharacters: a component-aligned path suffix (`.git/config`);
//! - `/` and glob metacharacters: a full-path glob, anchored with `**/` unless it starts with
//!   `/` or `**` (`.ssh/*`, `**/secrets/**`).
//!
//! All matching happens on a forward-slash normalized string so `\` separators cannot bypass a
//! pattern written with `/`.
use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{Error, Result};
use crate::path_utils::to_slash_string;

const GLOB_METACHARACTERS: &[char] = &['*', '?', '[', '{'];

#[derive(Debug, Clone)]
pub enum BlockedPattern {
    Basename {
        pattern: String,
        matcher: GlobMatcher,
    },
    PathSuffix {
        pattern: String,
        suffix: String,
    },
    PathGlob {
        pattern: String,
        matcher: GlobMatcher,
    },
}

fn build_matcher(pattern: &str, original: &str) -> Result<GlobMatcher> {
    let mut builder = GlobBuilder::new(pattern);
    builder.literal_separator(true);
    #[cfg(windows)]
    builder.case_insensitive(true);
    builder
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| {
            Error::InvalidConfig(format!("invalid blocked pattern {original:?}: {err}"))
        })
}

fn ends_with_component_suffix(path: &str, suffix: &str) -> bool {
    #[cfg(windows)]
    let (path, suffix) = (path.to_ascii_lowercase(), suffix.to_ascii_lowercase());
    #[cfg(windows)]
    let (path, suffix) = (path.as_str(), suffix.as_str());

    if path == suffix {
        return true;
    }
    path.strip_suffix(suffix)
        .is_some_and(|head| head.ends_with('/'))
}

impl BlockedPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let normalized = pattern.trim().replace('\\', "/");
        if normalized.is_empty() {
            return Err(Error::InvalidConfig(
                "blocked pattern must not be empty".to_string(),
            ));
        }
        if !normalized.contains('/') {
            return Ok(Self::Basename {
                pattern: pattern.to_string(),
                matcher: build_matcher(&normalized, pattern)?,
            });
        }

        let mut trimmed = normalized.as_str();
        while let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        }
        let trimmed = trimmed.trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "invalid blocked pattern {pattern:?}: pattern has no path segments"
            )));
        }

        if trimmed.contains(GLOB_METACHARACTERS) {
            let anchored = if trimmed.starts_with('/') || trimmed.starts_with("**") {
                trimmed.to_string()
            } else {
                format!("**/{trimmed}")
            };
            return Ok(Self::PathGlob {
                pattern: pattern.to_string(),
                matcher: build_matcher(&anchored, pattern)?,
            });
        }

        Ok(Self::PathSuffix {
            pattern: pattern.to_string(),
            suffix: trimmed.trim_start_matches('/').to_string(),
        })
    }

    /// The pattern as it was configured.
    pub fn pattern(&self) -> &str {
        match self {
            Self::Basename { pattern, .. }
            | Self::PathSuffix { pattern, .. }
            | Self::PathGlob { pattern, .. } => pattern,
        }
    }

    fn matches_normalized(&self, basename: &str, slash_path: &str) -> bool {
        match self {
            Self::Basename { matcher, .. } => matcher.is_match(basename),
            Self::PathSuffix { suffix, .. } => ends_with_component_suffix(slash_path, suffix),
            Self::PathGlob { matcher, .. } => matcher.is_match(slash_path),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockedPatternSet {
    patterns: Vec<BlockedPattern>,
}

impl BlockedPatternSet {
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| BlockedPattern::parse(pattern.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[BlockedPattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns the first pattern matching either the basename or the full path of `path`.
    pub fn first_match(&self, path: &Path) -> Option<&BlockedPattern> {
        let slash_path = to_slash_string(path);
        let slash_path = slash_path.trim_end_matches('/');
        let basename = slash_path.rsplit('/').next().unwrap_or(slash_path);
        self.patterns
            .iter()
            .find(|pattern| pattern.matches_normalized(basename, slash_path))
    }

    pub fn is_blocked(&self, path: &Path) -> bool {
        self.first_match(path).is_some()
    }
}

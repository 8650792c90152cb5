//! Path validation against the allow-list and the blocked-pattern set.
//!
//! Order of checks for `validate`:
//! 1. home expansion and absolutization (no filesystem access);
//! 2. `..` that lexically leaves every root is `traversal_detected`;
//! 3. canonicalization (follows symlinks);
//! 4. blocked-pattern match on the canonical path and on each of its directories below the root;
//! 5. component-wise root containment of the canonical path.
//!
//! Blocked patterns are only matched against the lexical path when the candidate cannot be
//! canonicalized, so a missing `.env` is still `blocked_pattern` rather than `not_found`. A
//! symlink whose own name looks sensitive is judged by its target.
//!
//! A candidate that is lexically inside a root but canonically outside it got there through a
//! symlink and is reported as `symlink_escape`.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::blocked::BlockedPatternSet;
use crate::error::{Error, Result};
use crate::path_utils::{
    absolutize, expand_home, has_traversal_segment, is_within_root, normalize_path_lexical,
};

use super::{DenialReason, ValidationResult};

#[derive(Debug, Clone)]
pub struct PathSecurityContext {
    /// Canonical, deduplicated roots in configured order.
    roots: Vec<PathBuf>,
    /// Roots as configured (home-expanded, lexically normalized). They differ from `roots` when
    /// a root itself sits behind a symlink (e.g. `/tmp` on macOS).
    lexical_roots: Vec<PathBuf>,
    blocked: BlockedPatternSet,
}

impl PathSecurityContext {
    /// Canonicalizes every root. Roots must exist and be directories.
    pub fn new<P: AsRef<Path>>(allowed_roots: &[P], blocked: BlockedPatternSet) -> Result<Self> {
        let mut roots = Vec::<PathBuf>::with_capacity(allowed_roots.len());
        let mut lexical_roots = Vec::<PathBuf>::with_capacity(allowed_roots.len());
        for root in allowed_roots {
            let root = root.as_ref();
            let expanded = expand_home(root);
            if !expanded.is_absolute() {
                return Err(Error::InvalidConfig(format!(
                    "allowed root {} is not absolute",
                    root.display()
                )));
            }
            let canonical = fs::canonicalize(&expanded).map_err(|err| {
                Error::InvalidConfig(format!(
                    "failed to canonicalize allowed root {}: {err}",
                    root.display()
                ))
            })?;
            let meta = fs::metadata(&canonical).map_err(|err| {
                Error::InvalidConfig(format!(
                    "failed to stat allowed root {}: {err}",
                    canonical.display()
                ))
            })?;
            if !meta.is_dir() {
                return Err(Error::InvalidConfig(format!(
                    "allowed root {} is not a directory",
                    canonical.display()
                )));
            }

            let lexical = normalize_path_lexical(&expanded);
            if !lexical_roots.contains(&lexical) {
                lexical_roots.push(lexical);
            }
            if !roots.contains(&canonical) {
                roots.push(canonical);
            }
        }
        Ok(Self {
            roots,
            lexical_roots,
            blocked,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn blocked(&self) -> &BlockedPatternSet {
        &self.blocked
    }

    /// `true` when a canonical path equals or descends from some canonical root.
    pub fn is_within_allowed_roots(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| is_within_root(canonical, root))
    }

    fn is_lexically_inside(&self, lexical: &Path) -> bool {
        self.lexical_roots
            .iter()
            .chain(&self.roots)
            .any(|root| is_within_root(lexical, root))
    }

    pub fn validate(&self, candidate: impl AsRef<Path>) -> ValidationResult {
        let candidate = candidate.as_ref();
        let outcome = self.validate_inner(candidate);
        if let Some(reason) = outcome.denial_reason() {
            tracing::debug!(%reason, "path denied");
        }
        outcome
    }

    fn validate_inner(&self, candidate: &Path) -> ValidationResult {
        if self.roots.is_empty() {
            return ValidationResult::denied(DenialReason::OutsideAllowedRoots);
        }
        if candidate.as_os_str().is_empty() {
            return ValidationResult::denied(DenialReason::NotFound);
        }
        let absolute = match absolutize(candidate) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(error = %err, "cannot resolve working directory");
                return ValidationResult::denied(DenialReason::NotFound);
            }
        };

        let lexical = normalize_path_lexical(&absolute);
        let lexically_inside = self.is_lexically_inside(&lexical);
        if has_traversal_segment(candidate) && !lexically_inside {
            return ValidationResult::denied(DenialReason::TraversalDetected);
        }

        let canonical = match fs::canonicalize(&absolute) {
            Ok(path) => path,
            Err(err) => {
                let roots = self.lexical_roots.iter().chain(&self.roots);
                if self.is_blocked_below_root(&lexical, roots) {
                    return ValidationResult::denied(DenialReason::BlockedPattern);
                }
                return ValidationResult::denied(self.classify_unresolvable(
                    &absolute,
                    lexically_inside,
                    &err,
                ));
            }
        };

        if self.is_blocked_below_root(&canonical, self.roots.iter()) {
            return ValidationResult::denied(DenialReason::BlockedPattern);
        }
        if self.is_within_allowed_roots(&canonical) {
            return ValidationResult::allowed(canonical);
        }
        if lexically_inside {
            ValidationResult::denied(DenialReason::SymlinkEscape)
        } else {
            ValidationResult::denied(DenialReason::OutsideAllowedRoots)
        }
    }

    /// Matches `path` itself, then every directory between it and the deepest root containing
    /// it, so a file inside a blocked directory is as unreachable as the directory.
    fn is_blocked_below_root<'a>(
        &self,
        path: &Path,
        roots: impl Iterator<Item = &'a PathBuf>,
    ) -> bool {
        if self.blocked.is_blocked(path) {
            return true;
        }
        let Some(root) = roots
            .filter(|root| is_within_root(path, root))
            .max_by_key(|root| root.components().count())
        else {
            return false;
        };
        path.ancestors()
            .skip(1)
            .take_while(|ancestor| *ancestor != root.as_path())
            .any(|ancestor| self.blocked.is_blocked(ancestor))
    }

    fn classify_unresolvable(
        &self,
        absolute: &Path,
        lexically_inside: bool,
        err: &io::Error,
    ) -> DenialReason {
        match err.kind() {
            io::ErrorKind::NotFound => {}
            io::ErrorKind::PermissionDenied => return DenialReason::PermissionDenied,
            _ => {
                tracing::debug!(error = %err, "canonicalization failed");
                return DenialReason::NotFound;
            }
        }
        if lexically_inside
            && (self.dangling_link_escapes(absolute) || self.nearest_ancestor_escapes(absolute))
        {
            return DenialReason::SymlinkEscape;
        }
        DenialReason::NotFound
    }

    // A dangling symlink still names a target; deny it as an escape when that target would land
    // outside every root once created.
    fn dangling_link_escapes(&self, path: &Path) -> bool {
        let is_symlink = fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if !is_symlink {
            return false;
        }
        let Ok(target) = fs::read_link(path) else {
            return false;
        };
        let target = match path.parent() {
            Some(parent) if target.is_relative() => parent.join(target),
            _ => target,
        };
        self.nearest_ancestor_escapes(&normalize_path_lexical(&target))
    }

    // Canonicalizes the deepest existing ancestor of a missing path.
    fn nearest_ancestor_escapes(&self, path: &Path) -> bool {
        path.ancestors()
            .skip(1)
            .find_map(|ancestor| fs::canonicalize(ancestor).ok())
            .is_some_and(|ancestor| !self.is_within_allowed_roots(&ancestor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_for(root: &Path) -> PathSecurityContext {
        let blocked =
            BlockedPatternSet::from_patterns(crate::config::DEFAULT_BLOCKED_PATTERNS).expect("set");
        PathSecurityContext::new(&[root], blocked).expect("context")
    }

    #[test]
    fn empty_roots_deny_everything() {
        let ctx = PathSecurityContext::new::<PathBuf>(&[], BlockedPatternSet::default())
            .expect("context");
        let result = ctx.validate(std::env::temp_dir());
        assert_eq!(
            result.denial_reason(),
            Some(DenialReason::OutsideAllowedRoots)
        );
    }

    #[test]
    fn missing_root_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        let err = PathSecurityContext::new(&[missing], BlockedPatternSet::default())
            .expect_err("missing root");
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn duplicate_roots_are_collapsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = PathSecurityContext::new(
            &[dir.path().to_path_buf(), dir.path().join(".")],
            BlockedPatternSet::default(),
        )
        .expect("context");
        assert_eq!(ctx.roots().len(), 1);
    }

    #[test]
    fn missing_blocked_path_is_still_blocked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = context_for(dir.path());
        let result = ctx.validate(dir.path().join("does-not-exist").join(".env"));
        assert_eq!(result.denial_reason(), Some(DenialReason::BlockedPattern));
    }

    #[test]
    fn traversal_that_stays_inside_is_allowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("sub")).expect("mkdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        let ctx = context_for(dir.path());
        let result = ctx.validate(dir.path().join("sub").join("..").join("a.txt"));
        assert!(result.is_allowed(), "{result:?}");
    }

    #[test]
    fn traversal_that_leaves_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        fs::create_dir(&root).expect("mkdir");
        fs::write(dir.path().join("outside.txt"), "x").expect("write");
        let ctx = context_for(&root);
        let result = ctx.validate(root.join("..").join("outside.txt"));
        assert_eq!(
            result.denial_reason(),
            Some(DenialReason::TraversalDetected)
        );
    }

    #[cfg(unix)]
    #[test]
    fn dangling_link_to_outside_is_an_escape() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        fs::create_dir(&root).expect("mkdir");
        let link = root.join("dangling");
        std::os::unix::fs::symlink(dir.path().join("nowhere").join("x"), &link).expect("symlink");
        let ctx = context_for(&root);
        assert_eq!(
            ctx.validate(&link).denial_reason(),
            Some(DenialReason::SymlinkEscape)
        );

        let inner = root.join("dangling-inner");
        std::os::unix::fs::symlink(root.join("missing"), &inner).expect("symlink");
        assert_eq!(
            ctx.validate(&inner).denial_reason(),
            Some(DenialReason::NotFound)
        );
    }

    #[test]
    fn files_inside_blocked_directories_are_blocked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        fs::create_dir_all(root.join("secrets").join("nested")).expect("mkdir");
        fs::write(root.join("secrets").join("nested").join("api.txt"), "x").expect("write");
        let ctx = context_for(&root);

        assert_eq!(
            ctx.validate(root.join("secrets").join("nested").join("api.txt"))
                .denial_reason(),
            Some(DenialReason::BlockedPattern)
        );
        assert_eq!(
            ctx.validate(root.join("secrets").join("missing.txt"))
                .denial_reason(),
            Some(DenialReason::BlockedPattern)
        );
    }

    #[test]
    fn nested_root_under_a_blocked_name_is_allowed_inside() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("vault");
        fs::create_dir_all(root.join("secrets")).expect("mkdir");
        fs::write(root.join("secrets").join("notes.txt"), "x").expect("write");
        let blocked =
            BlockedPatternSet::from_patterns(crate::config::DEFAULT_BLOCKED_PATTERNS).expect("set");
        let ctx = PathSecurityContext::new(&[root.clone(), root.join("secrets")], blocked)
            .expect("context");

        assert!(
            ctx.validate(root.join("secrets").join("notes.txt"))
                .is_allowed()
        );
    }

    #[cfg(unix)]
    #[test]
    fn sensitive_looking_link_to_a_plain_file_is_allowed() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("notes.txt"), "x").expect("write");
        let link = dir.path().join("credentials");
        std::os::unix::fs::symlink(dir.path().join("notes.txt"), &link).expect("symlink");
        let ctx = context_for(dir.path());

        let result = ctx.validate(&link);
        assert!(result.is_allowed(), "{result:?}");
        assert_eq!(
            result.canonical_path(),
            Some(
                fs::canonicalize(dir.path().join("notes.txt"))
                    .expect("canonicalize")
                    .as_path()
            )
        );
    }
}

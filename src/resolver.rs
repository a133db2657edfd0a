//! Monitored-root validation and path resolution.
//!
//! The resolver owns the configured list of monitored root directories. Each
//! candidate is canonicalized at construction; entries that do not exist or
//! are not directories are dropped with a warning. The root list is read-only
//! afterwards, so the resolver can be shared freely between tasks.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

/// Errors that can occur while building the path resolver.
#[derive(Error, Debug)]
pub enum ResolverError {
    /// Every configured root was missing or not a directory.
    #[error("no valid monitored roots configured")]
    NoValidRoots,
}

/// Resolves paths across the configured monitored roots.
#[derive(Debug)]
pub struct PathResolver {
    /// Canonical roots, in configuration order.
    roots: Vec<PathBuf>,
}

impl PathResolver {
    /// Builds a resolver from configured root candidates.
    ///
    /// Candidates are canonicalized (absolute, symlinks resolved) for stable
    /// comparison. Invalid entries are dropped with a warning rather than
    /// failing startup.
    ///
    /// # Errors
    ///
    /// Returns [`ResolverError::NoValidRoots`] when no candidate survives
    /// validation.
    pub fn new<I, P>(candidates: I) -> Result<Self, ResolverError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut roots = Vec::new();

        for candidate in candidates {
            let candidate = candidate.as_ref();
            match candidate.canonicalize() {
                Ok(canonical) if canonical.is_dir() => roots.push(canonical),
                Ok(_) => {
                    warn!(root = %candidate.display(), "Monitored root is not a directory, skipping");
                }
                Err(e) => {
                    warn!(root = %candidate.display(), error = %e, "Monitored root does not exist, skipping");
                }
            }
        }

        if roots.is_empty() {
            return Err(ResolverError::NoValidRoots);
        }

        Ok(Self { roots })
    }

    /// Returns the canonical roots in configuration order.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Renders a path relative to its monitored root for display.
    ///
    /// Returns `<rootName>/<relativePath>` for the first root that is a
    /// prefix of `path`, the bare root name for the root itself, and falls
    /// back to the file name when no root matches.
    #[must_use]
    pub fn relative_display(&self, path: &Path) -> String {
        for root in &self.roots {
            if let Ok(rel) = path.strip_prefix(root) {
                let root_name = root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| root.display().to_string());

                return if rel.as_os_str().is_empty() {
                    root_name
                } else {
                    format!("{root_name}/{}", rel.display())
                };
            }
        }

        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    /// Resolves a bare filename to a concrete path across all roots.
    ///
    /// The filename is sanitized first (directory separators and traversal
    /// components stripped). The search checks directly under each root in
    /// configuration order, then recursively within each root; the first
    /// match wins. Absence is `None`, not an error.
    #[must_use]
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        let name = sanitize_filename(filename);
        if name.is_empty() {
            return None;
        }

        // Direct children first, across all roots in order.
        for root in &self.roots {
            let candidate = root.join(&name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }

        // Then recursively within each root.
        for root in &self.roots {
            if let Some(found) = find_in_tree(root, &name) {
                return Some(found);
            }
        }

        None
    }
}

/// Reduces a requested filename to a safe base name.
///
/// Separators and traversal components are stripped so a lookup can never
/// escape the monitored roots.
fn sanitize_filename(name: &str) -> String {
    name.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .next_back()
        .unwrap_or_default()
        .to_string()
}

/// Depth-first search for a file named `name` under `dir`.
fn find_in_tree(dir: &Path, name: &str) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read directory while resolving, skipping");
            return None;
        }
    };

    let mut subdirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
        } else if path.file_name().is_some_and(|n| n == name) {
            return Some(path);
        }
    }

    subdirs.into_iter().find_map(|sub| find_in_tree(&sub, name))
}

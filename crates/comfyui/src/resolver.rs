//! Confinement of backend-reported output files to the output directory.

use std::path::{Path, PathBuf};

use crate::history::ArtifactRef;

/// Resolves `{filename, subfolder}` references under a fixed output root.
///
/// A reference resolves only if its canonical path lies inside the
/// canonical root and names an existing regular file. `..` segments,
/// absolute subfolders or filenames, and symlinks pointing out of the root
/// are all rejected.
#[derive(Debug, Clone)]
pub struct OutputResolver {
    root: PathBuf,
}

impl OutputResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a reference to a real file path, or `None`.
    ///
    /// Runs on every poll, so the root is canonicalized each time rather
    /// than cached.
    pub fn resolve(&self, reference: &ArtifactRef) -> Option<PathBuf> {
        let filename = reference.filename.as_deref().filter(|f| !f.is_empty())?;
        let subfolder = reference.subfolder.as_deref().unwrap_or("");

        let candidate = self.root.join(subfolder).join(filename);
        let root = self.root.canonicalize().ok()?;
        let resolved = candidate.canonicalize().ok()?;

        if !resolved.starts_with(&root) {
            tracing::warn!(
                filename,
                subfolder,
                resolved = %resolved.display(),
                "Rejected output path outside the output directory",
            );
            return None;
        }

        resolved.is_file().then_some(resolved)
    }
}

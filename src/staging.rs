//! File staging around a build.
//!
//! The runtime library ships sample program sources that would collide with
//! the module's own. Each [`RenameTask`] moves one such file aside before the
//! build and moves it back during cleanup. Both directions are no-ops when
//! the file is absent, so a task pair is safe to run after a crashed session
//! left the tree in either state.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// A symmetric rename-aside/restore pair for one file.
pub struct RenameTask {
    source: PathBuf,
    staged: PathBuf,
}

impl RenameTask {
    pub fn new(source: PathBuf, staged: PathBuf) -> Self {
        Self { source, staged }
    }

    /// A task staging `source` to `<source>.old`.
    pub fn aside(source: PathBuf) -> Self {
        let mut staged = source.clone().into_os_string();
        staged.push(".old");
        Self {
            source,
            staged: PathBuf::from(staged),
        }
    }

    /// Moves the source file aside if it exists.
    pub fn stage(&self) -> Result<()> {
        if self.source.exists() {
            tracing::debug!(
                "Staging {} to {}",
                self.source.display(),
                self.staged.display()
            );
            fs::rename(&self.source, &self.staged)
                .with_context(|| format!("failed to stage {}", self.source.display()))?;
        }
        Ok(())
    }

    /// Moves the staged file back if it exists.
    pub fn restore(&self) -> Result<()> {
        if self.staged.exists() {
            tracing::debug!(
                "Restoring {} to {}",
                self.staged.display(),
                self.source.display()
            );
            fs::rename(&self.staged, &self.source)
                .with_context(|| format!("failed to restore {}", self.source.display()))?;
        }
        Ok(())
    }
}

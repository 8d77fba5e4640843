//! External toolchain invocation.
//!
//! The orchestrator never compiles or links anything itself; it shells out
//! to `make` and consumes only the process exit status. The [`Toolchain`]
//! trait keeps that boundary mockable so the workflow engine can be tested
//! without a real build tree.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Command;

const MAKE_JOBS: &str = "-j8";
const MAKEFILE: &str = "../config/build.mk";

/// Runs one build of the module for a runtime version.
pub trait Toolchain {
    /// Invokes the build and reports whether it exited successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if the build tool cannot be spawned at all; a build
    /// that runs and fails is `Ok(false)`.
    fn build(&mut self, version: &str) -> Result<bool>;
}

/// Live toolchain invoking `make` from the workspace root.
pub struct MakeToolchain {
    root: PathBuf,
}

impl MakeToolchain {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Toolchain for MakeToolchain {
    fn build(&mut self, version: &str) -> Result<bool> {
        let build_dir = format!("build_{version}");
        tracing::debug!("Invoking make in {build_dir}");
        let status = Command::new("make")
            .arg(MAKE_JOBS)
            .arg("-C")
            .arg(&build_dir)
            .arg("-f")
            .arg(MAKEFILE)
            .arg(format!("VERSION={version}"))
            .current_dir(&self.root)
            .status()
            .context("failed to invoke make")?;
        Ok(status.success())
    }
}

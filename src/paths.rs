//! Workspace path layout.
//!
//! All file locations used by a build session are derived here from an
//! explicit workspace root and reference-data directory, so the core never
//! consults the current directory or the environment.

use std::path::{Path, PathBuf};

/// Base name of the module artifacts produced by the toolchain.
pub const MODULE_NAME: &str = "module";

/// Reference runtime symbol dumps combined by the differ, in load order.
pub const RUNTIME_DUMPS: [&str; 4] = ["main.syms", "rtld.syms", "sdk.syms", "subsdk0.syms"];

/// Resolves every path a build session touches.
pub struct Paths {
    root: PathBuf,
    reference_dir: PathBuf,
}

impl Paths {
    pub fn new(root: PathBuf, reference_dir: PathBuf) -> Self {
        Self { root, reference_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The versioned linker configuration file.
    pub fn config_file(&self, version: &str) -> PathBuf {
        self.root
            .join("config/linker")
            .join(format!("{version}_symbols.yaml"))
    }

    /// The per-version build directory the toolchain works in.
    pub fn build_dir(&self, version: &str) -> PathBuf {
        self.root.join(format!("build_{version}"))
    }

    /// The generated linker script consumed by the toolchain.
    pub fn linker_script(&self, version: &str) -> PathBuf {
        self.build_dir(version).join("syms.ld")
    }

    /// The symbol dump of the freshly built module.
    pub fn target_dump(&self, version: &str) -> PathBuf {
        self.build_dir(version).join(format!("{MODULE_NAME}.syms"))
    }

    /// Build artifacts removed to force a fresh link.
    pub fn module_artifacts(&self, version: &str) -> Vec<PathBuf> {
        let build_dir = self.build_dir(version);
        [
            format!("{MODULE_NAME}.bin"),
            format!("{MODULE_NAME}.elf"),
            format!("{MODULE_NAME}.syms"),
        ]
        .into_iter()
        .map(|name| build_dir.join(name))
        .collect()
    }

    /// Directory holding the runtime's exported-symbol dumps for `version`.
    pub fn dumped_symbols_dir(&self, version: &str) -> PathBuf {
        self.root.join("tools/dumped_symbols").join(version)
    }

    /// The data-symbol listing of the reference checkout.
    pub fn data_listing(&self) -> PathBuf {
        self.reference_dir.join("data/data_symbols.csv")
    }

    /// The function-symbol listing of the reference checkout.
    pub fn func_listing(&self) -> PathBuf {
        self.reference_dir.join("data/func_symbols.csv")
    }

    /// Sample program sources of the runtime library that must be staged
    /// aside while the module builds.
    pub fn staged_sources(&self) -> Vec<PathBuf> {
        let program_dir = self.root.join("libs/runtime/source/program");
        vec![program_dir.join("main.cpp"), program_dir.join("setting.hpp")]
    }
}

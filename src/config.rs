//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the relink driver
//! using `clap`. It handles parsing arguments like the target runtime version
//! and the rebuild mode flags.

use clap::Parser;
use std::path::PathBuf;

use crate::session::SUPPORTED_VERSIONS;

/// Incremental relink driver for runtime code modules.
///
/// Drives the external make toolchain through build/diagnose/relink cycles
/// until the module has no unresolved symbols, updating the linker
/// configuration file along the way.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Target runtime version
    #[arg(value_parser = SUPPORTED_VERSIONS)]
    pub target: String,

    /// Remove the built module before the first make, forcing a fresh link
    #[arg(short, long)]
    pub relink: bool,

    /// Discard the generated linker script and force a full rebuild cycle
    #[arg(short, long)]
    pub clean_linker: bool,

    /// Workspace root containing config/, tools/ and the build directories
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Reference symbol listing directory (overrides RELINK_REFERENCE)
    #[arg(long)]
    pub reference: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

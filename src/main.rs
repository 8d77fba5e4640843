//! Entry point for the relink build driver.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Initialize the `tracing` subscriber at the requested log level.
//! 3. Resolve the workspace root and the reference-data directory.
//! 4. Run the build session and exit with its status.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use relink::config::Config;
use relink::paths::Paths;
use relink::session::Session;
use relink::staging::RenameTask;
use relink::toolchain::MakeToolchain;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log level {:?}", config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // The reference checkout can live outside the workspace; the flag wins
    // over the environment, which wins over the bundled default.
    let reference_dir = config
        .reference
        .or_else(|| std::env::var_os("RELINK_REFERENCE").map(PathBuf::from))
        .unwrap_or_else(|| config.root.join("libs/reference"));

    let paths = Paths::new(config.root, reference_dir);
    let staging = paths
        .staged_sources()
        .into_iter()
        .map(RenameTask::aside)
        .collect();
    let toolchain = MakeToolchain::new(paths.root().to_path_buf());
    let mut session = Session::new(&config.target, paths, Box::new(toolchain), staging);

    let success = session.run(config.relink, config.clean_linker);
    std::process::exit(i32::from(!success));
}

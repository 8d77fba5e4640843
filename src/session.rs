//! The build workflow engine.
//!
//! A session executes a directed, conditionally branching sequence of named
//! steps over shared state. Pending work is an explicit last-in-first-out
//! stack of [`Step`] values rather than recursive calls: the terminal
//! Cleanup step is pushed first so it sits at the stack base, the initial
//! path is pushed on top of it, and each step pushes its own successors
//! before control returns to the pop-and-execute loop. Any step failure
//! records the error and routes straight to Cleanup, which therefore runs
//! exactly once on every path.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::fs;

use crate::console;
use crate::differ::SymbolDiffer;
use crate::linker_config::LinkerConfig;
use crate::paths::Paths;
use crate::reference::ReferenceIndex;
use crate::staging::RenameTask;
use crate::toolchain::Toolchain;

/// Runtime versions the driver knows how to build for.
pub const SUPPORTED_VERSIONS: [&str; 2] = ["150", "160"];

/// No exhaustive reference listing exists for 1.6.0, so its symbols can
/// only be bound through manual entries.
pub const UNSCANNABLE_VERSION: &str = "160";

/// One step of the build workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Initialize,
    LinkerScript,
    RunMake,
    CheckBinary,
    PrepareRebuild,
    ConfigureLinker,
    ReferenceScan,
    PrepareRelink,
    Cleanup,
}

impl Step {
    pub fn name(self) -> &'static str {
        match self {
            Step::Initialize => "Initialize",
            Step::LinkerScript => "Linker Script",
            Step::RunMake => "Run Make",
            Step::CheckBinary => "Check Binary",
            Step::PrepareRebuild => "Prepare Rebuild",
            Step::ConfigureLinker => "Configure Linker",
            Step::ReferenceScan => "Reference Scan",
            Step::PrepareRelink => "Prepare Relink",
            Step::Cleanup => "Cleanup",
        }
    }
}

/// The failure recorded by the first step that went wrong.
pub struct SessionError {
    pub step: Step,
    pub message: String,
}

/// One build run: owns the step stack, the linker configuration, and the
/// symbol caches for a single target version.
pub struct Session {
    version: String,
    paths: Paths,
    toolchain: Box<dyn Toolchain>,
    staging: Vec<RenameTask>,
    linker_config: LinkerConfig,
    differ: SymbolDiffer,
    reference: ReferenceIndex,
    stack: Vec<Step>,
    history: Vec<Step>,
    current_step: usize,
    make_iteration: usize,
    unresolved: BTreeSet<String>,
    error: Option<SessionError>,
}

impl Session {
    pub fn new(
        version: &str,
        paths: Paths,
        toolchain: Box<dyn Toolchain>,
        staging: Vec<RenameTask>,
    ) -> Self {
        let linker_config = LinkerConfig::new(paths.config_file(version));
        let differ = SymbolDiffer::new(
            paths.dumped_symbols_dir(version),
            paths.target_dump(version),
        );
        let reference = ReferenceIndex::new(paths.data_listing(), paths.func_listing());
        Self {
            version: version.to_string(),
            paths,
            toolchain,
            staging,
            linker_config,
            differ,
            reference,
            stack: Vec::new(),
            history: Vec::new(),
            current_step: 0,
            make_iteration: 0,
            unresolved: BTreeSet::new(),
            error: None,
        }
    }

    /// Runs the session to completion and returns whether it succeeded.
    ///
    /// With `relink`, a Prepare Relink step is inserted before the first
    /// linker-script emission. With `clean_linker`, the normal
    /// script/make/check prefix is replaced by Prepare Rebuild, forcing one
    /// full rebuild cycle against an empty linker script.
    pub fn run(&mut self, relink: bool, clean_linker: bool) -> bool {
        self.stack.push(Step::Cleanup);
        if clean_linker {
            self.stack.push(Step::PrepareRebuild);
            self.make_iteration = 1;
        } else {
            self.stack.push(Step::CheckBinary);
            self.stack.push(Step::RunMake);
            self.stack.push(Step::LinkerScript);
        }
        if relink {
            self.stack.push(Step::PrepareRelink);
        }
        self.stack.push(Step::Initialize);

        while let Some(step) = self.stack.pop() {
            self.current_step += 1;
            self.history.push(step);
            console::step(&format!(
                "({}/{}) {}",
                self.current_step,
                self.current_step + self.stack.len(),
                step.name()
            ));
            if let Err(err) = self.execute(step) {
                self.fail(step, format!("{err:#}"));
            }
        }
        self.error.is_none()
    }

    /// The steps executed so far, in order.
    pub fn history(&self) -> &[Step] {
        &self.history
    }

    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    /// Records the first failure and truncates the pending work to the
    /// terminal Cleanup step.
    fn fail(&mut self, step: Step, message: String) {
        tracing::error!("Step {} failed: {message}", step.name());
        if self.error.is_none() {
            self.error = Some(SessionError { step, message });
        }
        self.stack.clear();
        if step != Step::Cleanup {
            self.stack.push(Step::Cleanup);
        }
    }

    fn execute(&mut self, step: Step) -> Result<()> {
        match step {
            Step::Initialize => self.initialize(),
            Step::LinkerScript => self.linker_script(),
            Step::RunMake => self.run_make(),
            Step::CheckBinary => self.check_binary(),
            Step::PrepareRebuild => self.prepare_rebuild(),
            Step::ConfigureLinker => self.configure_linker(),
            Step::ReferenceScan => self.reference_scan(),
            Step::PrepareRelink => self.prepare_relink(),
            Step::Cleanup => self.cleanup(),
        }
    }

    /// Stages conflicting source files aside and loads the linker config.
    fn initialize(&mut self) -> Result<()> {
        for task in &self.staging {
            task.stage()?;
        }
        self.linker_config.load()?;
        Ok(())
    }

    /// Emits the full linker script from the current configuration.
    fn linker_script(&mut self) -> Result<()> {
        self.linker_config
            .write_script(&self.paths.linker_script(&self.version), false)
    }

    /// Invokes the external toolchain; a non-zero exit is a step failure.
    fn run_make(&mut self) -> Result<()> {
        self.make_iteration += 1;
        tracing::debug!("Make iteration {}", self.make_iteration);
        if !self.toolchain.build(&self.version)? {
            bail!("make exited with a failure status");
        }
        Ok(())
    }

    /// Rescans the built module for unlinked symbols and decides the next
    /// path: done, a blind rebuild on the first iteration, or symbol
    /// resolution afterwards.
    fn check_binary(&mut self) -> Result<()> {
        self.unresolved = self.differ.unresolved()?;
        if self.unresolved.is_empty() {
            console::good("All module symbols appear to be linked");
            return Ok(());
        }
        console::error(&format!(
            "{} unlinked symbol(s) found",
            self.unresolved.len()
        ));
        if self.make_iteration == 1 {
            self.stack.push(Step::PrepareRebuild);
        } else {
            self.stack.push(Step::ConfigureLinker);
        }
        Ok(())
    }

    /// Writes an empty linker script and queues a fresh link/build/check
    /// cycle, so the next scan sees the module's true imports.
    fn prepare_rebuild(&mut self) -> Result<()> {
        self.linker_config
            .write_script(&self.paths.linker_script(&self.version), true)?;
        self.stack.push(Step::CheckBinary);
        self.stack.push(Step::RunMake);
        self.stack.push(Step::PrepareRelink);
        Ok(())
    }

    /// Resolves the cached unlinked symbols against the persisted
    /// configuration; anything left over goes to the reference scan.
    fn configure_linker(&mut self) -> Result<()> {
        let mut remaining = BTreeSet::new();
        for symbol in &self.unresolved {
            match self.linker_config.resolve(symbol) {
                Some(address) => tracing::debug!("Resolved {symbol} = {address}"),
                None => {
                    remaining.insert(symbol.clone());
                }
            }
        }
        tracing::debug!("{} symbol(s) remaining after config pass", remaining.len());
        self.unresolved = remaining;
        if self.unresolved.is_empty() {
            self.push_rebuild_cycle();
        } else {
            self.stack.push(Step::ReferenceScan);
        }
        Ok(())
    }

    /// Resolves the remaining symbols against the reference listing,
    /// recording each hit as an auto entry. Any residue is terminal.
    fn reference_scan(&mut self) -> Result<()> {
        if self.version == UNSCANNABLE_VERSION {
            bail!("1.6.0 symbols cannot be automatically scanned");
        }
        let mut remaining = BTreeSet::new();
        for symbol in &self.unresolved {
            match self.reference.resolve(symbol)? {
                Some(address) => {
                    tracing::debug!("Resolved {symbol} = {address}");
                    self.linker_config.add_auto(&address, symbol);
                }
                None => {
                    remaining.insert(symbol.clone());
                }
            }
        }
        tracing::debug!("{} symbol(s) remaining after reference scan", remaining.len());
        self.unresolved = remaining;
        if !self.unresolved.is_empty() {
            bail!("some symbols cannot be automatically matched");
        }
        self.push_rebuild_cycle();
        Ok(())
    }

    /// Queues a full relink/script/build/check cycle.
    fn push_rebuild_cycle(&mut self) {
        self.stack.push(Step::CheckBinary);
        self.stack.push(Step::RunMake);
        self.stack.push(Step::LinkerScript);
        self.stack.push(Step::PrepareRelink);
    }

    /// Removes stale module artifacts so the next make relinks from scratch.
    fn prepare_relink(&mut self) -> Result<()> {
        for artifact in self.paths.module_artifacts(&self.version) {
            if artifact.exists() {
                tracing::debug!("Removing {}", artifact.display());
                fs::remove_file(&artifact)?;
            }
        }
        Ok(())
    }

    /// Terminal step: restores staged files, persists the configuration
    /// (even after a failure, so auto discoveries and demotions are not
    /// lost), and prints the final verdict.
    fn cleanup(&mut self) -> Result<()> {
        self.stack.clear();
        for task in &self.staging {
            if let Err(err) = task.restore() {
                tracing::warn!("Cleanup could not restore a staged file: {err:#}");
            }
        }
        if let Err(err) = self.linker_config.save() {
            let message = format!("saving linker config failed: {err:#}");
            tracing::error!("{message}");
            if self.error.is_none() {
                self.error = Some(SessionError {
                    step: Step::Cleanup,
                    message,
                });
            }
        }
        self.report();
        Ok(())
    }

    fn report(&self) {
        println!();
        let Some(error) = &self.error else {
            console::good("BUILD SUCCESS");
            return;
        };
        console::error("BUILD FAILED");
        println!();
        println!("Step that failed: {}", error.step.name());
        println!("{}", error.message);
        if self.unresolved.is_empty() {
            return;
        }
        println!();
        println!("Looks like some symbols cannot be linked:");
        for symbol in &self.unresolved {
            println!("  {symbol}");
        }
        println!();
        let config_file = self.paths.config_file(&self.version);
        if self.version == UNSCANNABLE_VERSION {
            println!(
                "Add the symbols to the \"manual\" section of {} and rebuild",
                config_file.display()
            );
        } else {
            println!("Do one of the following and rebuild:");
            println!("1. Add the symbols to the reference listing");
            println!(
                "2. Add entries to the \"manual\" section of {}",
                config_file.display()
            );
        }
    }
}

//! Unlinked symbol detection.
//!
//! Compares the freshly built module's symbol dump against the union of the
//! runtime's exported symbols. Anything the module references that the
//! runtime does not export must be satisfied by the generated linker script,
//! so the difference is exactly the set of symbols still to be resolved.

use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::RUNTIME_DUMPS;

/// Loader symbols that are expected to stay unresolved: the module entry
/// points the loader binds itself, exception-frame registration hooks, and
/// section markers.
pub const IGNORED_SYMBOLS: [&str; 6] = [
    "module_init",
    "exception_entry",
    ".text",
    ".data",
    "__register_frame_info",
    "__deregister_frame_info",
];

const DUMP_HEADER_LINES: usize = 4;
const SYMBOL_COLUMN: usize = 25;

/// Computes the unresolved-symbol set of the built module.
pub struct SymbolDiffer {
    dumps_dir: PathBuf,
    target_dump: PathBuf,
    runtime_symbols: Option<HashSet<String>>,
}

impl SymbolDiffer {
    pub fn new(dumps_dir: PathBuf, target_dump: PathBuf) -> Self {
        Self {
            dumps_dir,
            target_dump,
            runtime_symbols: None,
        }
    }

    /// Returns every symbol in the target dump that neither the runtime
    /// exports nor the ignore list covers. Empty means fully linked.
    ///
    /// The runtime export union is loaded once and reused; the target dump
    /// is re-read on every call since each build rewrites it.
    pub fn unresolved(&mut self) -> Result<BTreeSet<String>> {
        if self.runtime_symbols.is_none() {
            tracing::debug!("Building runtime export cache");
            let mut exports = HashSet::new();
            for name in RUNTIME_DUMPS {
                read_dump(&self.dumps_dir.join(name), &mut exports)?;
            }
            for symbol in IGNORED_SYMBOLS {
                exports.insert(symbol.to_string());
            }
            tracing::debug!("Cached {} runtime export(s)", exports.len());
            self.runtime_symbols = Some(exports);
        }

        let mut target = HashSet::new();
        read_dump(&self.target_dump, &mut target)?;
        let difference = match &self.runtime_symbols {
            Some(exports) => target.difference(exports).cloned().collect(),
            None => BTreeSet::new(),
        };
        Ok(difference)
    }
}

/// Reads one objdump-style symbol dump into `output`.
///
/// The dump carries a fixed four-line header; each remaining non-blank line
/// is fixed-width, with the symbol name in the second space-separated token
/// after the flag columns.
fn read_dump(path: &Path, output: &mut HashSet<String>) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read symbol dump {}", path.display()))?;
    let mut count = 0;
    for (number, line) in text.lines().enumerate() {
        if number < DUMP_HEADER_LINES {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let symbol = parse_dump_line(line).with_context(|| {
            format!("malformed symbol line {} in {}", number + 1, path.display())
        })?;
        output.insert(symbol.to_string());
        count += 1;
    }
    tracing::debug!("Loaded {count} symbol(s) from {}", path.display());
    Ok(())
}

// Example line:
// 0000000000000000      DF *UND*	0000000000000000 memGetPeerName
fn parse_dump_line(line: &str) -> Option<&str> {
    let tail = line.get(SYMBOL_COLUMN..)?;
    let symbol = tail.split(' ').nth(1)?.trim();
    if symbol.is_empty() {
        return None;
    }
    Some(symbol)
}

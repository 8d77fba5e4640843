//! Persistent symbol/address configuration.
//!
//! The linker configuration file records which runtime address each symbol
//! binds to, split into three categories:
//! - `auto` entries are rediscovered from the reference listing on every run
//!   and only live for one rebuild cycle.
//! - `manual` entries are operator-curated and durable.
//! - `unused` entries are manual entries a previous run no longer needed,
//!   kept in the file for audit but excluded from the generated script.
//!
//! A manual entry that goes unreferenced for a whole session is demoted to
//! `unused` rather than deleted, so the operator can see which overrides the
//! reference listing has made obsolete.

use anyhow::{bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const FILE_HEADER: &str = "\
# Linker Config
#
# Symbols and their absolute addresses in the target runtime.
# \"base\" is the load address of the runtime's main executable.
# \"manual\" and \"auto\" entries generate the linker script.
# \"auto\" entries are rediscovered from the reference listing on every run.
# \"unused\" entries are manual entries a previous run no longer needed.
";

const SCRIPT_HEADER: &str = "\
/*
 * This linker script is generated from config/linker
 * CHANGES WILL BE LOST
 */
";

/// One address/symbol binding within a category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub address: String,
    pub symbol: String,
}

/// Reverse lookup state built lazily on the first `resolve` call.
///
/// Building it snapshots every manual address as a demotion candidate and
/// clears the auto category; resolving a manual address removes it from the
/// candidate set. The demotion pass consumes this state.
struct Index {
    symbol_to_addr: HashMap<String, String>,
    manual_candidates: HashSet<String>,
}

/// The versioned linker configuration owned by one build session.
pub struct LinkerConfig {
    path: PathBuf,
    base: String,
    auto: Vec<Entry>,
    manual: Vec<Entry>,
    unused: Vec<Entry>,
    comments: HashMap<String, String>,
    index: Option<Index>,
}

impl LinkerConfig {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            base: "0x0".to_string(),
            auto: Vec::new(),
            manual: Vec::new(),
            unused: Vec::new(),
            comments: HashMap::new(),
            index: None,
        }
    }

    /// Parses the configuration file, replacing any previously loaded state.
    ///
    /// Lines have the form `key: value  # comment`. A line whose value is
    /// empty opens a category section; an entry line binds an address (key)
    /// to a symbol (value) in the current section, with the comment
    /// reattached on save.
    pub fn load(&mut self) -> Result<()> {
        self.base = "0x0".to_string();
        self.auto.clear();
        self.manual.clear();
        self.unused.clear();
        self.comments.clear();
        self.index = None;

        tracing::debug!("Loading linker config from {}", self.path.display());
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        let mut section: Option<String> = None;
        let mut count = 0;
        for raw in text.lines() {
            let (content, comment) = match raw.split_once('#') {
                Some((content, rest)) => (content, Some(rest)),
                None => (raw, None),
            };
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            let Some((key, value)) = content.split_once(':') else {
                bail!("missing `:` delimiter in line {content:?}");
            };
            let key = key.trim();
            let value = value.trim();
            if key == "base" {
                self.base = value.to_string();
                continue;
            }
            if value.is_empty() {
                if !matches!(key, "auto" | "manual" | "unused") {
                    bail!("unknown section {key:?}");
                }
                section = Some(key.to_string());
                continue;
            }
            let Some(section) = &section else {
                bail!("entry {key:?} appears before any section header");
            };
            let entry = Entry {
                address: key.to_string(),
                symbol: value.to_string(),
            };
            if let Some(rest) = comment {
                self.comments
                    .insert(entry.address.clone(), format!("#{}", rest.trim_end()));
            }
            match section.as_str() {
                "auto" => self.auto.push(entry),
                "manual" => self.manual.push(entry),
                _ => self.unused.push(entry),
            }
            count += 1;
        }
        tracing::debug!("Loaded {count} entrie(s) from linker config");
        Ok(())
    }

    /// Runs the demotion pass, then serializes the configuration back to its
    /// file: header, base address, and the three sections in fixed order.
    pub fn save(&mut self) -> Result<()> {
        self.demote_unused();
        tracing::debug!("Saving linker config to {}", self.path.display());

        let mut out = String::from(FILE_HEADER);
        out.push('\n');
        out.push_str(&format!("base: {}\n", self.base));
        let mut count = 0;
        for (name, entries) in [
            ("auto", &self.auto),
            ("manual", &self.manual),
            ("unused", &self.unused),
        ] {
            out.push('\n');
            out.push_str(&format!("{name}:\n"));
            for entry in entries {
                match self.comments.get(&entry.address) {
                    Some(comment) => out.push_str(&format!(
                        "  {}: {} {}\n",
                        entry.address, entry.symbol, comment
                    )),
                    None => out.push_str(&format!("  {}: {}\n", entry.address, entry.symbol)),
                }
                count += 1;
            }
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, out)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        tracing::debug!("Written {count} entrie(s) to linker config");
        Ok(())
    }

    /// Runs the demotion pass, then writes the linker script: one
    /// `symbol = address - base;` directive per auto and manual entry.
    ///
    /// In dry mode only the header is written, producing a script that
    /// defines nothing and forces a symbol-free rebuild.
    pub fn write_script(&mut self, script_path: &Path, dry: bool) -> Result<()> {
        self.demote_unused();
        tracing::debug!("Writing linker script to {}", script_path.display());

        let mut out = String::from(SCRIPT_HEADER);
        out.push('\n');
        let mut count = 0;
        if !dry {
            for entry in self.auto.iter().chain(self.manual.iter()) {
                out.push_str(&format!(
                    "{} = {} - {};\n",
                    entry.symbol, entry.address, self.base
                ));
                count += 1;
            }
        }
        fs::write(script_path, out)
            .with_context(|| format!("failed to write {}", script_path.display()))?;
        tracing::debug!("Written {count} entrie(s) to linker script");
        Ok(())
    }

    /// Looks up the address bound to `symbol`, if any.
    ///
    /// The first call builds the reverse index across all three categories,
    /// snapshots the manual addresses as demotion candidates, and discards
    /// the auto entries. A hit on a manual address marks it used for this
    /// session. A miss changes nothing.
    pub fn resolve(&mut self, symbol: &str) -> Option<String> {
        self.ensure_index();
        let index = self.index.as_mut()?;
        let address = index.symbol_to_addr.get(symbol)?.clone();
        index.manual_candidates.remove(&address);
        Some(address)
    }

    /// Records a binding discovered this session in the auto category.
    ///
    /// The entry is invisible to `resolve` until the next indexing pass.
    pub fn add_auto(&mut self, address: &str, symbol: &str) {
        self.auto.push(Entry {
            address: address.to_string(),
            symbol: symbol.to_string(),
        });
    }

    /// The unindexed → indexed transition.
    fn ensure_index(&mut self) {
        if self.index.is_some() {
            return;
        }
        tracing::debug!("Indexing linker config");
        let mut symbol_to_addr = HashMap::new();
        for entry in self
            .auto
            .iter()
            .chain(self.manual.iter())
            .chain(self.unused.iter())
        {
            symbol_to_addr.insert(entry.symbol.clone(), entry.address.clone());
        }
        let manual_candidates = self.manual.iter().map(|e| e.address.clone()).collect();
        // Auto entries are single-cycle scan results; the index keeps them
        // resolvable for this cycle while the category restarts empty.
        self.auto.clear();
        self.index = Some(Index {
            symbol_to_addr,
            manual_candidates,
        });
    }

    /// The indexed → rebuilt transition: every manual address still in the
    /// candidate set moves to unused, and the index is dropped so the next
    /// `resolve` starts from scratch.
    fn demote_unused(&mut self) {
        let Some(index) = self.index.take() else {
            return;
        };
        if index.manual_candidates.is_empty() {
            return;
        }
        tracing::debug!(
            "Demoting {} unreferenced manual entrie(s)",
            index.manual_candidates.len()
        );
        let mut kept = Vec::with_capacity(self.manual.len());
        for entry in self.manual.drain(..) {
            if index.manual_candidates.contains(&entry.address) {
                self.unused.push(entry);
            } else {
                kept.push(entry);
            }
        }
        self.manual = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("relink-config-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("150_symbols.yaml");
        fs::write(&path, body).unwrap();
        path
    }

    const SAMPLE: &str = "\
# hand-written file
base: 0x2d91000

auto:
  0x100: auto_one

manual:
  0x200: manual_one # keep me
  0x300: manual_two

unused:
  0x400: old_one
";

    #[test]
    fn load_parses_sections_base_and_comments() {
        let dir = scratch("load");
        let mut config = LinkerConfig::new(write_config(&dir, SAMPLE));
        config.load().unwrap();

        assert_eq!(config.base, "0x2d91000");
        assert_eq!(config.auto.len(), 1);
        assert_eq!(config.auto[0].symbol, "auto_one");
        assert_eq!(config.manual.len(), 2);
        assert_eq!(config.unused[0].address, "0x400");
        assert_eq!(config.comments.get("0x200").unwrap(), "# keep me");
    }

    #[test]
    fn save_load_round_trip_is_stable() {
        let dir = scratch("round-trip");
        let mut config = LinkerConfig::new(write_config(&dir, SAMPLE));
        config.load().unwrap();
        // No resolve happened, so save must not demote anything.
        config.save().unwrap();
        let first = fs::read_to_string(dir.join("150_symbols.yaml")).unwrap();

        let mut reloaded = LinkerConfig::new(dir.join("150_symbols.yaml"));
        reloaded.load().unwrap();
        assert_eq!(reloaded.base, "0x2d91000");
        assert_eq!(reloaded.auto, config.auto);
        assert_eq!(reloaded.manual, config.manual);
        assert_eq!(reloaded.unused, config.unused);
        assert_eq!(reloaded.comments.get("0x200").unwrap(), "# keep me");

        reloaded.save().unwrap();
        let second = fs::read_to_string(dir.join("150_symbols.yaml")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn resolve_miss_returns_none_and_leaves_the_file_alone() {
        let dir = scratch("miss");
        let path = write_config(&dir, SAMPLE);
        let before = fs::read_to_string(&path).unwrap();

        let mut config = LinkerConfig::new(path.clone());
        config.load().unwrap();
        assert_eq!(config.resolve("no_such_symbol"), None);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        // The index is live; known symbols still resolve.
        assert_eq!(config.resolve("manual_one").as_deref(), Some("0x200"));
    }

    #[test]
    fn unreferenced_manual_entries_demote_to_unused() {
        let dir = scratch("demote");
        let path = write_config(&dir, SAMPLE);
        let mut config = LinkerConfig::new(path.clone());
        config.load().unwrap();

        assert_eq!(config.resolve("manual_one").as_deref(), Some("0x200"));
        config.save().unwrap();

        let mut reloaded = LinkerConfig::new(path);
        reloaded.load().unwrap();
        let manual: Vec<&str> = reloaded.manual.iter().map(|e| e.symbol.as_str()).collect();
        let unused: Vec<&str> = reloaded.unused.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(manual, ["manual_one"]);
        assert_eq!(unused, ["old_one", "manual_two"]);
        // The demoted entry keeps resolving from unused and never returns
        // to manual on a later save, even when it is referenced again.
        assert_eq!(reloaded.resolve("manual_one").as_deref(), Some("0x200"));
        assert_eq!(reloaded.resolve("manual_two").as_deref(), Some("0x300"));
        reloaded.save().unwrap();
        let mut again = LinkerConfig::new(dir.join("150_symbols.yaml"));
        again.load().unwrap();
        assert_eq!(again.manual.len(), 1);
        assert_eq!(again.unused.len(), 2);
    }

    #[test]
    fn auto_entries_do_not_survive_an_indexing_pass() {
        let dir = scratch("auto-ephemeral");
        let path = write_config(&dir, SAMPLE);
        let mut config = LinkerConfig::new(path.clone());
        config.load().unwrap();

        // Indexing keeps the loaded auto entry resolvable for this cycle...
        assert_eq!(config.resolve("auto_one").as_deref(), Some("0x100"));
        config.save().unwrap();

        // ...but the persisted category is rebuilt empty.
        let mut reloaded = LinkerConfig::new(path);
        reloaded.load().unwrap();
        assert!(reloaded.auto.is_empty());
        assert_eq!(reloaded.resolve("auto_one"), None);
    }

    #[test]
    fn add_auto_persists_for_exactly_one_cycle() {
        let dir = scratch("add-auto");
        let path = write_config(&dir, "base: 0x1000\n\nmanual:\n");
        let mut config = LinkerConfig::new(path.clone());
        config.load().unwrap();

        assert_eq!(config.resolve("fresh"), None);
        config.add_auto("0x500", "fresh");
        // Not indexed yet, so still invisible to resolve.
        assert_eq!(config.resolve("fresh"), None);
        config.save().unwrap();

        let mut reloaded = LinkerConfig::new(path.clone());
        reloaded.load().unwrap();
        assert_eq!(reloaded.auto.len(), 1);
        assert_eq!(reloaded.resolve("fresh").as_deref(), Some("0x500"));
        reloaded.save().unwrap();

        let mut last = LinkerConfig::new(path);
        last.load().unwrap();
        assert!(last.auto.is_empty());
    }

    #[test]
    fn script_emits_auto_then_manual_and_skips_unused() {
        let dir = scratch("script");
        let mut config = LinkerConfig::new(write_config(&dir, SAMPLE));
        config.load().unwrap();

        let script = dir.join("syms.ld");
        config.write_script(&script, false).unwrap();
        let text = fs::read_to_string(&script).unwrap();
        let directives: Vec<&str> = text
            .lines()
            .filter(|line| line.contains(" = "))
            .collect();
        assert_eq!(
            directives,
            [
                "auto_one = 0x100 - 0x2d91000;",
                "manual_one = 0x200 - 0x2d91000;",
                "manual_two = 0x300 - 0x2d91000;",
            ]
        );
        assert!(!text.contains("old_one"));
        assert!(text.contains("CHANGES WILL BE LOST"));
    }

    #[test]
    fn dry_script_contains_only_the_header() {
        let dir = scratch("dry-script");
        let mut config = LinkerConfig::new(write_config(&dir, SAMPLE));
        config.load().unwrap();

        let script = dir.join("syms.ld");
        config.write_script(&script, true).unwrap();
        let text = fs::read_to_string(&script).unwrap();
        assert!(text.contains("CHANGES WILL BE LOST"));
        assert!(!text.contains(" = "));
    }

    #[test]
    fn entry_before_any_section_is_a_format_error() {
        let dir = scratch("no-section");
        let mut config = LinkerConfig::new(write_config(&dir, "0x100: stray\n"));
        let err = config.load().unwrap_err();
        assert!(err.to_string().contains("before any section"));
    }

    #[test]
    fn unknown_section_is_a_format_error() {
        let dir = scratch("bad-section");
        let mut config = LinkerConfig::new(write_config(&dir, "bogus:\n  0x100: sym\n"));
        let err = config.load().unwrap_err();
        assert!(err.to_string().contains("unknown section"));
    }

    #[test]
    fn missing_delimiter_is_a_format_error() {
        let dir = scratch("no-colon");
        let mut config = LinkerConfig::new(write_config(&dir, "manual:\n  just some words\n"));
        let err = config.load().unwrap_err();
        assert!(err.to_string().contains("delimiter"));
    }
}

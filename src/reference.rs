//! Offline reference symbol listing.
//!
//! The reference checkout ships two CSV listings mapping known runtime
//! symbols to their absolute addresses: one for data symbols, one for
//! functions. Both are folded into a single name → address index on the
//! first lookup. The listings are curated by hand upstream, so integrity
//! problems are hard errors: an address without the expected address-space
//! prefix, or the same address appearing twice (which would silently alias
//! two distinct symbols), abort the load.

use anyhow::{anyhow, bail, Context, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Address-space prefix every listed address must carry.
pub const ADDRESS_PREFIX: &str = "0x00000071";

/// Lazily loaded name → address index over the two reference listings.
pub struct ReferenceIndex {
    data_listing: PathBuf,
    func_listing: PathBuf,
    symbol_to_addr: Option<HashMap<String, String>>,
}

impl ReferenceIndex {
    pub fn new(data_listing: PathBuf, func_listing: PathBuf) -> Self {
        Self {
            data_listing,
            func_listing,
            symbol_to_addr: None,
        }
    }

    /// Looks up the address of `symbol`, loading both listings on the first
    /// call. A load failure leaves the index unloaded and is returned as a
    /// reference-data integrity error.
    pub fn resolve(&mut self, symbol: &str) -> Result<Option<String>> {
        if self.symbol_to_addr.is_none() {
            self.symbol_to_addr = Some(self.load()?);
        }
        Ok(self
            .symbol_to_addr
            .as_ref()
            .and_then(|map| map.get(symbol).cloned()))
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        let mut map = HashMap::new();
        let mut seen = HashSet::new();
        load_data_listing(&self.data_listing, &mut map, &mut seen)?;
        load_func_listing(&self.func_listing, &mut map, &mut seen)?;
        Ok(map)
    }
}

/// Data listing rows are `[address, name, ...]`; rows with fewer than two
/// fields or an empty name are skipped.
fn load_data_listing(
    path: &Path,
    map: &mut HashMap<String, String>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    tracing::debug!("Loading symbol listing from {}", path.display());
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut count = 0;
    for line in text.lines() {
        let fields = split_csv_row(line);
        if fields.len() < 2 {
            continue;
        }
        let name = fields[1].trim();
        if name.is_empty() {
            continue;
        }
        insert(map, seen, name, fields[0].trim())?;
        count += 1;
    }
    tracing::debug!("Loaded {count} symbol(s)");
    Ok(())
}

/// Function listing rows are `[address, _, _, name]`; the literal `Address`
/// header row and rows with fewer than four fields are skipped.
fn load_func_listing(
    path: &Path,
    map: &mut HashMap<String, String>,
    seen: &mut HashSet<String>,
) -> Result<()> {
    tracing::debug!("Loading symbol listing from {}", path.display());
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut count = 0;
    for line in text.lines() {
        let fields = split_csv_row(line);
        if fields.len() < 4 {
            continue;
        }
        let raw_addr = fields[0].trim();
        if raw_addr == "Address" {
            continue;
        }
        let name = fields[3].trim();
        if name.is_empty() {
            continue;
        }
        insert(map, seen, name, raw_addr)?;
        count += 1;
    }
    tracing::debug!("Loaded {count} symbol(s)");
    Ok(())
}

fn insert(
    map: &mut HashMap<String, String>,
    seen: &mut HashSet<String>,
    name: &str,
    raw_addr: &str,
) -> Result<()> {
    let address = parse_address(raw_addr)
        .ok_or_else(|| anyhow!("invalid address {raw_addr:?} in reference listing"))?;
    if !seen.insert(address.clone()) {
        bail!("duplicate address {raw_addr:?} in reference listing");
    }
    map.insert(name.to_string(), address);
    Ok(())
}

/// Strips and validates the address-space prefix.
fn parse_address(raw: &str) -> Option<String> {
    raw.strip_prefix(ADDRESS_PREFIX)
        .map(|rest| format!("0x{rest}"))
}

/// Splits one CSV row. Fields may be double-quoted; mangled C++ names can
/// contain commas.
fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("relink-reference-{}-{name}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn index(dir: &Path, data: &str, funcs: &str) -> ReferenceIndex {
        let data_listing = dir.join("data_symbols.csv");
        let func_listing = dir.join("func_symbols.csv");
        fs::write(&data_listing, data).unwrap();
        fs::write(&func_listing, funcs).unwrap();
        ReferenceIndex::new(data_listing, func_listing)
    }

    #[test]
    fn resolves_symbols_from_both_listings() {
        let dir = scratch("both");
        let mut index = index(
            &dir,
            "0x0000007100a00000,gDataTable,8\n",
            "Address,Quality,Size,Name\n0x0000007100b00000,O,64,doThing\n",
        );

        assert_eq!(
            index.resolve("gDataTable").unwrap().as_deref(),
            Some("0x00a00000")
        );
        assert_eq!(
            index.resolve("doThing").unwrap().as_deref(),
            Some("0x00b00000")
        );
        assert_eq!(index.resolve("absent").unwrap(), None);
    }

    #[test]
    fn short_rows_and_empty_names_are_skipped() {
        let dir = scratch("short-rows");
        let mut index = index(
            &dir,
            "justonefield\n0x0000007100a00000,gData\n0x0000007100a00008,\n",
            "0x0000007100b00000,O,64\n",
        );

        assert_eq!(index.resolve("gData").unwrap().as_deref(), Some("0x00a00000"));
    }

    #[test]
    fn quoted_names_may_contain_commas() {
        let dir = scratch("quoted");
        let mut index = index(
            &dir,
            "",
            "0x0000007100c00000,O,32,\"lookup<int, float>\"\n",
        );

        assert_eq!(
            index.resolve("lookup<int, float>").unwrap().as_deref(),
            Some("0x00c00000")
        );
    }

    #[test]
    fn address_without_prefix_is_an_integrity_error() {
        let dir = scratch("bad-prefix");
        let mut index = index(&dir, "0x0000009900a00000,gData\n", "");

        let err = index.resolve("gData").unwrap_err();
        assert!(err.to_string().contains("invalid address"));
    }

    #[test]
    fn duplicate_address_across_listings_is_an_integrity_error() {
        let dir = scratch("dup");
        let mut index = index(
            &dir,
            "0x0000007100a00000,gData\n",
            "0x0000007100a00000,O,64,doThing\n",
        );

        let err = index.resolve("anything").unwrap_err();
        assert!(err.to_string().contains("duplicate address"));
    }

    #[test]
    fn duplicate_address_within_one_listing_is_an_integrity_error() {
        let dir = scratch("dup-same");
        let mut index = index(
            &dir,
            "0x0000007100a00000,gData\n0x0000007100a00000,gOther\n",
            "",
        );

        let err = index.resolve("gData").unwrap_err();
        assert!(err.to_string().contains("duplicate address"));
    }
}

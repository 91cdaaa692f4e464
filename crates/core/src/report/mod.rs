//! Run report and product serialization.
//!
//! Products are written as pretty JSON. Maps are `BTreeMap`s and lists are
//! pre-sorted, so the bytes written depend only on the corpus.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::aggregate::{Aggregates, SetCount};
use crate::classify::Label;
use crate::config::OutputLayout;
use crate::extract::ExtractionWarning;
use crate::index::{FrozenIndex, PackageInventory};
use crate::model::StringValue;
use crate::partition::{DuplicateGroup, Partitions, SymbolMatch, TieredString, UniquenessTier};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeFailure {
    pub binary: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryWarning {
    pub binary: String,
    #[serde(flatten)]
    pub warning: ExtractionWarning,
}

/// Per-run summary of what was processed and what went wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub binaries_total: usize,
    /// Binaries merged into the index, including resumed ones.
    pub processed: usize,
    /// Binaries reloaded from the checkpoint instead of extracted.
    pub resumed: usize,
    /// Members that are not ELF files.
    pub non_elf: Vec<String>,
    pub decode_failures: Vec<DecodeFailure>,
    pub extraction_warnings: Vec<BinaryWarning>,
    pub distinct_strings: usize,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: String,
}

impl RunReport {
    /// Order every list by binary key so reports of equal runs compare equal.
    pub fn normalize(&mut self) {
        self.non_elf.sort();
        self.decode_failures.sort_by(|a, b| a.binary.cmp(&b.binary));
        self.extraction_warnings.sort_by(|a, b| {
            a.binary.cmp(&b.binary).then(a.warning.section_index.cmp(&b.warning.section_index))
        });
    }
}

/// Every product of one run, ready for serialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Products {
    pub classified_aggregated: BTreeMap<Label, usize>,
    pub classified_per_package: BTreeMap<String, BTreeMap<Label, usize>>,
    pub classified_per_elf: BTreeMap<String, BTreeMap<Label, Vec<StringValue>>>,
    pub inventory_per_package: BTreeMap<String, PackageInventory>,
    pub grouped_by_elf_set: Vec<SetCount>,
    pub grouped_by_package_set: Vec<SetCount>,
    pub duplicate_grouped: Vec<DuplicateGroup>,
    pub not_unique_grouped_by_elf_set: Vec<DuplicateGroup>,
    pub unique_per_package: BTreeMap<String, Vec<StringValue>>,
    pub unique_per_elf: BTreeMap<String, Vec<StringValue>>,
    pub uniqueness_tiers: BTreeMap<UniquenessTier, usize>,
    pub strings_by_length: BTreeMap<usize, BTreeMap<UniquenessTier, usize>>,
    pub tiered_strings: BTreeMap<UniquenessTier, Vec<TieredString>>,
    pub tiers_per_elf: BTreeMap<String, BTreeMap<UniquenessTier, Vec<StringValue>>>,
    pub strings_matching_symbols: Vec<SymbolMatch>,
}

impl Products {
    pub fn assemble(index: &FrozenIndex, aggregates: Aggregates, partitions: Partitions) -> Self {
        let classified_per_elf = index
            .inventories()
            .map(|inv| (inv.binary.key(), inv.labels.clone()))
            .collect();
        Self {
            classified_aggregated: aggregates.classified_aggregated,
            classified_per_package: aggregates.classified_per_package,
            classified_per_elf,
            inventory_per_package: index.package_inventories(),
            grouped_by_elf_set: aggregates.grouped_by_elf_set,
            grouped_by_package_set: aggregates.grouped_by_package_set,
            duplicate_grouped: partitions.duplicates_by_package_set,
            not_unique_grouped_by_elf_set: partitions.duplicates_by_elf_set,
            unique_per_package: partitions.unique_per_package,
            unique_per_elf: partitions.unique_per_elf,
            uniqueness_tiers: partitions.tier_counts,
            strings_by_length: partitions.strings_by_length,
            tiered_strings: partitions.tiered_strings,
            tiers_per_elf: partitions.tiers_per_elf,
            strings_matching_symbols: partitions.strings_matching_symbols,
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    json.push('\n');
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write every product file and the run report under `layout.root`.
pub fn write_products(layout: &OutputLayout, products: &Products, report: &RunReport) -> Result<()> {
    std::fs::create_dir_all(&layout.root)
        .with_context(|| format!("Failed to create output directory {}", layout.root.display()))?;

    write_json(&layout.classified_aggregated, &products.classified_aggregated)?;
    write_json(&layout.classified_per_package, &products.classified_per_package)?;
    write_json(&layout.classified_per_elf, &products.classified_per_elf)?;
    write_json(&layout.inventory_per_package, &products.inventory_per_package)?;
    write_json(&layout.grouped_by_elf_set, &products.grouped_by_elf_set)?;
    write_json(&layout.grouped_by_package_set, &products.grouped_by_package_set)?;
    write_json(&layout.duplicate_grouped, &products.duplicate_grouped)?;
    write_json(&layout.not_unique_grouped_by_elf_set, &products.not_unique_grouped_by_elf_set)?;
    write_json(&layout.unique_per_package, &products.unique_per_package)?;
    write_json(&layout.unique_per_elf, &products.unique_per_elf)?;
    write_json(&layout.uniqueness_tiers, &products.uniqueness_tiers)?;
    write_json(&layout.strings_by_length, &products.strings_by_length)?;
    write_json(&layout.tiered_strings, &products.tiered_strings)?;
    write_json(&layout.tiers_per_elf, &products.tiers_per_elf)?;
    write_json(&layout.strings_matching_symbols, &products.strings_matching_symbols)?;
    write_json(&layout.run_report, report)?;

    info!(out = %layout.root.display(), "wrote products");
    Ok(())
}

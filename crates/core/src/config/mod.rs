//! Run configuration and output layout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::extract::{ExtractOptions, SectionSelection, DEFAULT_MIN_LENGTH};

/// Tunables of one pipeline run. Every field has a default, so an empty JSON
/// object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum string length in characters.
    pub min_length: usize,
    pub allow_utf8: bool,
    pub wide_strings: bool,
    pub sections: SectionSelection,
    pub include_symbols: bool,
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
    /// Bound of the worker → reducer queue.
    pub queue_depth: usize,
    /// Number of inverted-index shards.
    pub shards: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            allow_utf8: true,
            wide_strings: false,
            sections: SectionSelection::Data,
            include_symbols: true,
            workers: None,
            queue_depth: 64,
            shards: 16,
        }
    }
}

impl PipelineConfig {
    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            min_length: self.min_length.max(1),
            allow_utf8: self.allow_utf8,
            wide_strings: self.wide_strings,
            sections: self.sections,
            include_symbols: self.include_symbols,
        }
    }
}

/// Load a pipeline config JSON file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline config at {}", path.display()))?;
    let config: PipelineConfig = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse pipeline config JSON at {}", path.display()))?;
    Ok(config)
}

/// Paths of every file a run writes, derived from the output directory.
///
/// This does not touch the filesystem; the report writer creates directories.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    pub root: PathBuf,
    /// Directory for run-internal state (`.pkgprint`).
    pub meta_dir: PathBuf,
    pub checkpoint_path: PathBuf,
    pub classified_aggregated: PathBuf,
    pub classified_per_package: PathBuf,
    pub classified_per_elf: PathBuf,
    pub inventory_per_package: PathBuf,
    pub grouped_by_elf_set: PathBuf,
    pub grouped_by_package_set: PathBuf,
    pub duplicate_grouped: PathBuf,
    pub not_unique_grouped_by_elf_set: PathBuf,
    pub unique_per_package: PathBuf,
    pub unique_per_elf: PathBuf,
    pub uniqueness_tiers: PathBuf,
    pub strings_by_length: PathBuf,
    pub tiered_strings: PathBuf,
    pub tiers_per_elf: PathBuf,
    pub strings_matching_symbols: PathBuf,
    pub run_report: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".pkgprint");
        let checkpoint_path = meta_dir.join("checkpoint.db");
        let file = |name: &str| root.join(name);
        Self {
            classified_aggregated: file("classified-aggregated.json"),
            classified_per_package: file("classified-per-package.json"),
            classified_per_elf: file("classified-per-elf.json"),
            inventory_per_package: file("inventory-per-package.json"),
            grouped_by_elf_set: file("grouped-by-elf-set.json"),
            grouped_by_package_set: file("grouped-by-package-set.json"),
            duplicate_grouped: file("duplicate-grouped.json"),
            not_unique_grouped_by_elf_set: file("not-unique-grouped-by-elf-set.json"),
            unique_per_package: file("unique-per-package.json"),
            unique_per_elf: file("unique-per-elf.json"),
            uniqueness_tiers: file("uniqueness-tiers.json"),
            strings_by_length: file("strings-by-length.json"),
            tiered_strings: file("tiered-strings.json"),
            tiers_per_elf: file("tiers-per-elf.json"),
            strings_matching_symbols: file("strings-matching-symbols.json"),
            run_report: file("run-report.json"),
            root,
            meta_dir,
            checkpoint_path,
        }
    }

    /// Product files covered by the determinism guarantee, in a fixed order.
    pub fn product_files(&self) -> [&Path; 15] {
        [
            self.classified_aggregated.as_path(),
            self.classified_per_package.as_path(),
            self.classified_per_elf.as_path(),
            self.inventory_per_package.as_path(),
            self.grouped_by_elf_set.as_path(),
            self.grouped_by_package_set.as_path(),
            self.duplicate_grouped.as_path(),
            self.not_unique_grouped_by_elf_set.as_path(),
            self.unique_per_package.as_path(),
            self.unique_per_elf.as_path(),
            self.uniqueness_tiers.as_path(),
            self.strings_by_length.as_path(),
            self.tiered_strings.as_path(),
            self.tiers_per_elf.as_path(),
            self.strings_matching_symbols.as_path(),
        ]
    }
}

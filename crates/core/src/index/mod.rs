//! Corpus indexer: per-binary inventories and the global inverted index.
//!
//! This is the single place where occurrences collapse to set membership.
//! A [`BinaryInventory`] holds each distinct value of one binary once; the
//! [`ShardedIndex`] maps every value to the set of binaries and packages that
//! contain it. Merging is idempotent per binary, so a binary merged twice (for
//! example after resuming from a checkpoint) leaves every set unchanged.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::{classify, Label};
use crate::extract::{ExtractionWarning, Extractor};
use crate::model::{Binary, BinaryId, StringValue, SymbolFeatures};

/// Defects in the indexing stage. Never recovered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("String {value:?} classified as both {first} and {second}")]
    LabelConflict { value: String, first: Label, second: Label },
    #[error("Binary {0} is not part of the corpus catalog")]
    UnknownBinary(String),
    #[error("Binary {binary} belongs to package #{expected} but was merged as package #{found}")]
    PackageMismatch { binary: String, expected: u32, found: u32 },
    #[error("Containing sets of {value:?} disagree: packages {packages:?} vs binaries' packages {derived:?}")]
    InconsistentSets { value: String, packages: Vec<u32>, derived: Vec<u32> },
}

/// Sorted, duplicate-free set of dense identifiers.
///
/// Equal sets always have equal representations, so an `IdSet` can be used
/// directly as a grouping key.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdSet(Vec<u32>);

impl IdSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert `id`; returns false when it was already present.
    pub fn insert(&mut self, id: u32) -> bool {
        match self.0.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, id);
                true
            }
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    /// The sole member of a cardinality-1 set.
    pub fn single(&self) -> Option<u32> {
        match self.0.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }
}

impl FromIterator<u32> for IdSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut ids: Vec<u32> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogBinary {
    pub key: String,
    pub package: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPackage {
    pub key: String,
    pub source: String,
}

/// Dense-id lookup tables for every binary and package of the corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub binaries: Vec<CatalogBinary>,
    pub packages: Vec<CatalogPackage>,
}

impl Catalog {
    pub fn binary(&self, index: u32) -> Option<&CatalogBinary> {
        self.binaries.get(index as usize)
    }

    pub fn package(&self, index: u32) -> Option<&CatalogPackage> {
        self.packages.get(index as usize)
    }

    pub fn binary_key(&self, index: u32) -> &str {
        self.binary(index).map_or("", |b| b.key.as_str())
    }

    pub fn package_key(&self, index: u32) -> &str {
        self.package(index).map_or("", |p| p.key.as_str())
    }

    /// Canonical encoding of a binary set: member keys, sorted.
    pub fn binary_keys(&self, set: &IdSet) -> Vec<String> {
        let mut keys: Vec<String> = set.iter().map(|id| self.binary_key(id).to_string()).collect();
        keys.sort();
        keys
    }

    /// Canonical encoding of a package set: member keys, sorted.
    pub fn package_keys(&self, set: &IdSet) -> Vec<String> {
        let mut keys: Vec<String> = set.iter().map(|id| self.package_key(id).to_string()).collect();
        keys.sort();
        keys
    }
}

/// Classified distinct strings of one binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryInventory {
    pub binary: BinaryId,
    pub binary_index: u32,
    pub package_index: u32,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Label → distinct values in first-occurrence order.
    pub labels: BTreeMap<Label, Vec<StringValue>>,
    #[serde(default)]
    pub symbols: SymbolFeatures,
    #[serde(default)]
    pub warnings: Vec<ExtractionWarning>,
}

impl BinaryInventory {
    /// Run the extractor over `binary` and classify each distinct value once.
    pub fn build(binary: &Binary, arch: impl Into<String>, extractor: &Extractor<'_>) -> Self {
        let mut seen: HashSet<StringValue> = HashSet::new();
        let mut labels: BTreeMap<Label, Vec<StringValue>> = BTreeMap::new();
        for extracted in extractor.strings() {
            if seen.contains(&extracted.value) {
                continue;
            }
            let label = classify(&extracted.value);
            seen.insert(extracted.value.clone());
            labels.entry(label).or_default().push(extracted.value);
        }
        Self {
            binary: binary.id.clone(),
            binary_index: binary.index,
            package_index: binary.package,
            arch: arch.into(),
            content_hash: None,
            labels,
            symbols: extractor.symbols(),
            warnings: extractor.warnings(),
        }
    }

    pub fn distinct_count(&self) -> usize {
        self.labels.values().map(Vec::len).sum()
    }

    pub fn values(&self) -> impl Iterator<Item = (Label, &StringValue)> {
        self.labels.iter().flat_map(|(label, values)| values.iter().map(move |v| (*label, v)))
    }
}

/// Classified distinct strings of one package (union of its binaries).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInventory {
    pub labels: BTreeMap<Label, Vec<StringValue>>,
}

impl PackageInventory {
    pub fn distinct_count(&self) -> usize {
        self.labels.values().map(Vec::len).sum()
    }
}

/// Inverted-index record of one distinct value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub label: Label,
    pub elfs: IdSet,
    pub packages: IdSet,
}

impl IndexEntry {
    fn new(label: Label) -> Self {
        Self { label, elfs: IdSet::new(), packages: IdSet::new() }
    }
}

type Shard = HashMap<StringValue, IndexEntry>;

/// Hash-sharded inverted index.
///
/// Each value lives in exactly one shard, so merges touching different shards
/// never contend and no cross-shard coordination is needed.
#[derive(Debug)]
pub struct ShardedIndex {
    catalog: Catalog,
    shards: Vec<Mutex<Shard>>,
    inventories: Mutex<BTreeMap<u32, BinaryInventory>>,
}

impl ShardedIndex {
    pub fn new(catalog: Catalog, shards: usize) -> Self {
        let shards = (0..shards.max(1)).map(|_| Mutex::new(Shard::new())).collect();
        Self { catalog, shards, inventories: Mutex::new(BTreeMap::new()) }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, value: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Whether `binary_index` has already been merged.
    pub fn contains_binary(&self, binary_index: u32) -> bool {
        self.inventories.lock().unwrap_or_else(PoisonError::into_inner).contains_key(&binary_index)
    }

    pub fn merged_binaries(&self) -> usize {
        self.inventories.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Add every value of `inventory` to the containing sets of its binary
    /// and package.
    ///
    /// The merge is all-or-nothing: every touched shard is locked (in shard
    /// order) and checked for label conflicts before anything is inserted.
    pub fn merge(&self, inventory: BinaryInventory) -> Result<(), InvariantViolation> {
        let known = self
            .catalog
            .binary(inventory.binary_index)
            .ok_or_else(|| InvariantViolation::UnknownBinary(inventory.binary.key()))?;
        if known.package != inventory.package_index {
            return Err(InvariantViolation::PackageMismatch {
                binary: inventory.binary.key(),
                expected: known.package,
                found: inventory.package_index,
            });
        }

        let mut buckets: Vec<Vec<(Label, &StringValue)>> = vec![Vec::new(); self.shards.len()];
        for (label, value) in inventory.values() {
            buckets[self.shard_for(value)].push((label, value));
        }
        let mut locked: Vec<(MutexGuard<'_, Shard>, Vec<(Label, &StringValue)>)> = self
            .shards
            .iter()
            .zip(buckets)
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(shard, bucket)| (shard.lock().unwrap_or_else(PoisonError::into_inner), bucket))
            .collect();

        for (shard, bucket) in &locked {
            for &(label, value) in bucket {
                if let Some(entry) = shard.get(&**value) {
                    if entry.label != label {
                        return Err(InvariantViolation::LabelConflict {
                            value: value.to_string(),
                            first: entry.label,
                            second: label,
                        });
                    }
                }
            }
        }
        for (shard, bucket) in &mut locked {
            for &(label, value) in bucket.iter() {
                let entry = shard.entry(value.clone()).or_insert_with(|| IndexEntry::new(label));
                entry.elfs.insert(inventory.binary_index);
                entry.packages.insert(inventory.package_index);
            }
        }
        drop(locked);

        self.inventories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(inventory.binary_index, inventory);
        Ok(())
    }

    /// Stop accepting merges and produce a value-sorted, read-only index.
    pub fn freeze(self) -> Result<FrozenIndex, InvariantViolation> {
        let mut entries: Vec<(StringValue, IndexEntry)> = self
            .shards
            .into_iter()
            .flat_map(|shard| shard.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect();
        entries.par_sort_unstable_by(|a, b| a.0.cmp(&b.0));

        let catalog = self.catalog;
        entries.par_iter().try_for_each(|(value, entry)| {
            let derived: IdSet = entry
                .elfs
                .iter()
                .filter_map(|id| catalog.binary(id).map(|b| b.package))
                .collect();
            if derived != entry.packages || entry.elfs.is_empty() {
                return Err(InvariantViolation::InconsistentSets {
                    value: value.to_string(),
                    packages: entry.packages.as_slice().to_vec(),
                    derived: derived.as_slice().to_vec(),
                });
            }
            Ok(())
        })?;

        let inventories = self.inventories.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok(FrozenIndex { catalog, entries, inventories })
    }
}

/// Read-only inverted index, sorted by value.
#[derive(Debug, Clone)]
pub struct FrozenIndex {
    catalog: Catalog,
    entries: Vec<(StringValue, IndexEntry)>,
    inventories: BTreeMap<u32, BinaryInventory>,
}

impl FrozenIndex {
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn entries(&self) -> &[(StringValue, IndexEntry)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, value: &str) -> Option<&IndexEntry> {
        self.entries
            .binary_search_by(|(v, _)| (**v).cmp(value))
            .ok()
            .map(|pos| &self.entries[pos].1)
    }

    /// Merged binary inventories, in manifest order.
    pub fn inventories(&self) -> impl Iterator<Item = &BinaryInventory> {
        self.inventories.values()
    }

    pub fn inventory(&self, binary_index: u32) -> Option<&BinaryInventory> {
        self.inventories.get(&binary_index)
    }

    /// Union of the inventories of `package_index`'s binaries, in binary
    /// order then first-occurrence order.
    pub fn package_inventory(&self, package_index: u32) -> PackageInventory {
        union_of(self.inventories.values().filter(|b| b.package_index == package_index))
    }

    /// Package inventories keyed by package key, for every package with at
    /// least one merged binary.
    pub fn package_inventories(&self) -> BTreeMap<String, PackageInventory> {
        let mut by_package: BTreeMap<u32, Vec<&BinaryInventory>> = BTreeMap::new();
        for binary in self.inventories.values() {
            by_package.entry(binary.package_index).or_default().push(binary);
        }
        by_package
            .into_iter()
            .map(|(pkg, binaries)| (self.catalog.package_key(pkg).to_string(), union_of(binaries)))
            .collect()
    }
}

fn union_of<'a>(binaries: impl IntoIterator<Item = &'a BinaryInventory>) -> PackageInventory {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut inventory = PackageInventory::default();
    for binary in binaries {
        for (label, value) in binary.values() {
            if seen.insert(value) {
                inventory.labels.entry(label).or_default().push(value.clone());
            }
        }
    }
    inventory
}

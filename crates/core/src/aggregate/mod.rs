//! Count summaries derived from the frozen inverted index.
//!
//! Every count is the cardinality of a set of distinct values; nothing here
//! looks at raw occurrences. All passes are read-only rayon fold/reduce
//! passes over the index entries, so results do not depend on scheduling.

use std::collections::{BTreeMap, HashMap};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::classify::Label;
use crate::index::{FrozenIndex, IdSet, IndexEntry};

type LabelCounts = [usize; Label::ALL.len()];

/// Number of distinct values sharing one exact containing set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCount {
    /// Canonical encoding of the set: sorted member keys.
    pub members: Vec<String>,
    pub count: usize,
}

/// All count products of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregates {
    pub classified_aggregated: BTreeMap<Label, usize>,
    pub classified_per_package: BTreeMap<String, BTreeMap<Label, usize>>,
    pub grouped_by_elf_set: Vec<SetCount>,
    pub grouped_by_package_set: Vec<SetCount>,
}

fn add_counts(mut a: LabelCounts, b: LabelCounts) -> LabelCounts {
    for (x, y) in a.iter_mut().zip(b) {
        *x += y;
    }
    a
}

/// Distinct values per label across the corpus. Every label is present.
pub fn classified_aggregated(index: &FrozenIndex) -> BTreeMap<Label, usize> {
    let counts = index
        .entries()
        .par_iter()
        .fold(
            || [0usize; Label::ALL.len()],
            |mut acc, (_, entry)| {
                acc[entry.label as usize] += 1;
                acc
            },
        )
        .reduce(|| [0usize; Label::ALL.len()], add_counts);
    Label::ALL.iter().map(|label| (*label, counts[*label as usize])).collect()
}

/// Distinct values per label for every package with merged binaries.
/// Labels with a zero count are omitted.
pub fn classified_per_package(index: &FrozenIndex) -> BTreeMap<String, BTreeMap<Label, usize>> {
    let per_package: HashMap<u32, LabelCounts> = index
        .entries()
        .par_iter()
        .fold(HashMap::new, |mut acc: HashMap<u32, LabelCounts>, (_, entry)| {
            for pkg in entry.packages.iter() {
                acc.entry(pkg).or_insert([0; Label::ALL.len()])[entry.label as usize] += 1;
            }
            acc
        })
        .reduce(HashMap::new, |mut a, b| {
            for (pkg, counts) in b {
                let slot = a.entry(pkg).or_insert([0; Label::ALL.len()]);
                *slot = add_counts(*slot, counts);
            }
            a
        });

    let catalog = index.catalog();
    let mut out: BTreeMap<String, BTreeMap<Label, usize>> = index
        .inventories()
        .map(|inv| (catalog.package_key(inv.package_index).to_string(), BTreeMap::new()))
        .collect();
    for (pkg, counts) in per_package {
        let labels = out.entry(catalog.package_key(pkg).to_string()).or_default();
        for label in Label::ALL {
            let count = counts[label as usize];
            if count > 0 {
                labels.insert(label, count);
            }
        }
    }
    out
}

/// Count distinct values per containing set selected by `set_of`.
fn group_counts<F>(index: &FrozenIndex, set_of: F, encode: impl Fn(&IdSet) -> Vec<String>) -> Vec<SetCount>
where
    F: Fn(&IndexEntry) -> &IdSet + Sync,
{
    let counts: HashMap<&IdSet, usize> = index
        .entries()
        .par_iter()
        .fold(HashMap::new, |mut acc: HashMap<&IdSet, usize>, (_, entry)| {
            *acc.entry(set_of(entry)).or_default() += 1;
            acc
        })
        .reduce(HashMap::new, |mut a, b| {
            for (set, count) in b {
                *a.entry(set).or_default() += count;
            }
            a
        });
    let mut groups: Vec<SetCount> =
        counts.into_iter().map(|(set, count)| SetCount { members: encode(set), count }).collect();
    groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.members.cmp(&b.members)));
    groups
}

pub fn grouped_by_elf_set(index: &FrozenIndex) -> Vec<SetCount> {
    let catalog = index.catalog();
    group_counts(index, |entry| &entry.elfs, |set| catalog.binary_keys(set))
}

pub fn grouped_by_package_set(index: &FrozenIndex) -> Vec<SetCount> {
    let catalog = index.catalog();
    group_counts(index, |entry| &entry.packages, |set| catalog.package_keys(set))
}

pub fn aggregate(index: &FrozenIndex) -> Aggregates {
    Aggregates {
        classified_aggregated: classified_aggregated(index),
        classified_per_package: classified_per_package(index),
        grouped_by_elf_set: grouped_by_elf_set(index),
        grouped_by_package_set: grouped_by_package_set(index),
    }
}

//! Duplicate/uniqueness partitioning of the inverted index.
//!
//! Uniqueness is evaluated independently at ELF and at package granularity:
//! a value unique to one package may still be shared by several binaries of
//! that package. At each granularity every value lands in exactly one of
//! "unique" (set cardinality 1) or a duplicate group (cardinality > 1).

use std::collections::{BTreeMap, HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::index::{Catalog, FrozenIndex, IdSet, IndexEntry};
use crate::model::StringValue;

/// Values sharing one exact containing set of cardinality > 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub members: Vec<String>,
    pub count: usize,
    pub strings: Vec<StringValue>,
}

/// How widely a value is spread over binaries, binary packages and source
/// packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniquenessTier {
    ElfUnique,
    BinaryPkgUnique,
    SourcePkgUnique,
    NotUnique,
}

impl UniquenessTier {
    pub const ALL: [UniquenessTier; 4] = [
        UniquenessTier::ElfUnique,
        UniquenessTier::BinaryPkgUnique,
        UniquenessTier::SourcePkgUnique,
        UniquenessTier::NotUnique,
    ];

    pub fn of(entry: &IndexEntry, catalog: &Catalog) -> Self {
        Self::from_counts(source_count(entry, catalog), entry.packages.len(), entry.elfs.len())
    }

    pub fn from_counts(sources: usize, packages: usize, elfs: usize) -> Self {
        if elfs == 1 {
            UniquenessTier::ElfUnique
        } else if packages == 1 {
            UniquenessTier::BinaryPkgUnique
        } else if sources == 1 {
            UniquenessTier::SourcePkgUnique
        } else {
            UniquenessTier::NotUnique
        }
    }
}

/// Number of distinct source packages among the packages of `entry`.
pub fn source_count(entry: &IndexEntry, catalog: &Catalog) -> usize {
    let sources: HashSet<&str> = entry
        .packages
        .iter()
        .filter_map(|pkg| catalog.package(pkg).map(|p| p.source.as_str()))
        .collect();
    sources.len()
}

/// One value of a uniqueness tier with its spread over source packages,
/// binary packages and binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieredString {
    pub value: StringValue,
    pub sources: usize,
    pub packages: usize,
    pub elfs: usize,
}

/// A value that is an extracted string in some binaries and a dynamic
/// symbol in some (possibly other) binaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub value: StringValue,
    pub string_in: Vec<String>,
    pub symbol_in: Vec<String>,
}

/// Partition products of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partitions {
    pub unique_per_elf: BTreeMap<String, Vec<StringValue>>,
    pub unique_per_package: BTreeMap<String, Vec<StringValue>>,
    pub duplicates_by_elf_set: Vec<DuplicateGroup>,
    pub duplicates_by_package_set: Vec<DuplicateGroup>,
    pub tier_counts: BTreeMap<UniquenessTier, usize>,
    pub strings_by_length: BTreeMap<usize, BTreeMap<UniquenessTier, usize>>,
    pub tiered_strings: BTreeMap<UniquenessTier, Vec<TieredString>>,
    pub tiers_per_elf: BTreeMap<String, BTreeMap<UniquenessTier, Vec<StringValue>>>,
    pub strings_matching_symbols: Vec<SymbolMatch>,
}

/// Values whose set (selected by `set_of`) has a single member, keyed by
/// that member. Lists stay value-sorted because the index is.
fn unique_by<F>(index: &FrozenIndex, set_of: F, key: impl Fn(u32) -> String) -> BTreeMap<String, Vec<StringValue>>
where
    F: Fn(&IndexEntry) -> &IdSet,
{
    let mut out: BTreeMap<String, Vec<StringValue>> = BTreeMap::new();
    for (value, entry) in index.entries() {
        if let Some(owner) = set_of(entry).single() {
            out.entry(key(owner)).or_default().push(value.clone());
        }
    }
    out
}

fn duplicates_by<F>(index: &FrozenIndex, set_of: F, encode: impl Fn(&IdSet) -> Vec<String>) -> Vec<DuplicateGroup>
where
    F: Fn(&IndexEntry) -> &IdSet,
{
    let mut groups: HashMap<&IdSet, Vec<StringValue>> = HashMap::new();
    for (value, entry) in index.entries() {
        let set = set_of(entry);
        if set.len() > 1 {
            groups.entry(set).or_default().push(value.clone());
        }
    }
    let mut out: Vec<DuplicateGroup> = groups
        .into_iter()
        .map(|(set, strings)| DuplicateGroup { members: encode(set), count: strings.len(), strings })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.members.cmp(&b.members)));
    out
}

pub fn unique_per_elf(index: &FrozenIndex) -> BTreeMap<String, Vec<StringValue>> {
    let catalog = index.catalog();
    unique_by(index, |e| &e.elfs, |id| catalog.binary_key(id).to_string())
}

pub fn unique_per_package(index: &FrozenIndex) -> BTreeMap<String, Vec<StringValue>> {
    let catalog = index.catalog();
    unique_by(index, |e| &e.packages, |id| catalog.package_key(id).to_string())
}

pub fn duplicates_by_elf_set(index: &FrozenIndex) -> Vec<DuplicateGroup> {
    let catalog = index.catalog();
    duplicates_by(index, |e| &e.elfs, |set| catalog.binary_keys(set))
}

pub fn duplicates_by_package_set(index: &FrozenIndex) -> Vec<DuplicateGroup> {
    let catalog = index.catalog();
    duplicates_by(index, |e| &e.packages, |set| catalog.package_keys(set))
}

type TierTables = (BTreeMap<UniquenessTier, usize>, BTreeMap<usize, BTreeMap<UniquenessTier, usize>>);

/// Tier counts and per-length tier counts (length in characters).
pub fn tier_tables(index: &FrozenIndex) -> TierTables {
    let catalog = index.catalog();
    let (tiers, by_length) = index
        .entries()
        .par_iter()
        .fold(
            || (BTreeMap::new(), BTreeMap::new()),
            |(mut tiers, mut by_length): TierTables, (value, entry)| {
                let tier = UniquenessTier::of(entry, catalog);
                *tiers.entry(tier).or_default() += 1;
                *by_length
                    .entry(value.chars().count())
                    .or_insert_with(BTreeMap::new)
                    .entry(tier)
                    .or_default() += 1;
                (tiers, by_length)
            },
        )
        .reduce(
            || (BTreeMap::new(), BTreeMap::new()),
            |(mut tiers, mut by_length), (other_tiers, other_by_length)| {
                for (tier, count) in other_tiers {
                    *tiers.entry(tier).or_default() += count;
                }
                for (len, counts) in other_by_length {
                    let slot: &mut BTreeMap<UniquenessTier, usize> = by_length.entry(len).or_default();
                    for (tier, count) in counts {
                        *slot.entry(tier).or_default() += count;
                    }
                }
                (tiers, by_length)
            },
        );
    let mut tiers: BTreeMap<UniquenessTier, usize> = tiers;
    for tier in UniquenessTier::ALL {
        tiers.entry(tier).or_insert(0);
    }
    (tiers, by_length)
}

/// Every value under its tier, widest spread first (sources, then packages,
/// then binaries, all descending), ties broken by value. Every tier is present.
pub fn tiered_strings(index: &FrozenIndex) -> BTreeMap<UniquenessTier, Vec<TieredString>> {
    let catalog = index.catalog();
    let mut tiered: Vec<(UniquenessTier, TieredString)> = index
        .entries()
        .par_iter()
        .map(|(value, entry)| {
            let spread = TieredString {
                value: value.clone(),
                sources: source_count(entry, catalog),
                packages: entry.packages.len(),
                elfs: entry.elfs.len(),
            };
            (UniquenessTier::from_counts(spread.sources, spread.packages, spread.elfs), spread)
        })
        .collect();
    tiered.par_sort_by(|(_, a), (_, b)| {
        (b.sources, b.packages, b.elfs)
            .cmp(&(a.sources, a.packages, a.elfs))
            .then_with(|| a.value.cmp(&b.value))
    });

    let mut out: BTreeMap<UniquenessTier, Vec<TieredString>> =
        UniquenessTier::ALL.into_iter().map(|tier| (tier, Vec::new())).collect();
    for (tier, spread) in tiered {
        out.entry(tier).or_default().push(spread);
    }
    out
}

/// Binary key → tier → the binary's values in that tier, value-sorted.
pub fn tiers_per_elf(index: &FrozenIndex) -> BTreeMap<String, BTreeMap<UniquenessTier, Vec<StringValue>>> {
    let catalog = index.catalog();
    let mut by_binary: BTreeMap<u32, BTreeMap<UniquenessTier, Vec<StringValue>>> = BTreeMap::new();
    for (value, entry) in index.entries() {
        let tier = UniquenessTier::of(entry, catalog);
        for elf in entry.elfs.iter() {
            by_binary.entry(elf).or_default().entry(tier).or_default().push(value.clone());
        }
    }
    by_binary
        .into_iter()
        .map(|(elf, tiers)| (catalog.binary_key(elf).to_string(), tiers))
        .collect()
}

/// Values that appear both as extracted strings and as dynamic symbols.
pub fn strings_matching_symbols(index: &FrozenIndex) -> Vec<SymbolMatch> {
    let mut symbol_sets: HashMap<&str, IdSet> = HashMap::new();
    for inventory in index.inventories() {
        for name in inventory.symbols.names() {
            symbol_sets.entry(&**name).or_default().insert(inventory.binary_index);
        }
    }
    if symbol_sets.is_empty() {
        return Vec::new();
    }
    let catalog = index.catalog();
    index
        .entries()
        .iter()
        .filter_map(|(value, entry)| {
            let symbol_in = symbol_sets.get(&**value)?;
            Some(SymbolMatch {
                value: value.clone(),
                string_in: catalog.binary_keys(&entry.elfs),
                symbol_in: catalog.binary_keys(symbol_in),
            })
        })
        .collect()
}

pub fn partition(index: &FrozenIndex) -> Partitions {
    let (tier_counts, strings_by_length) = tier_tables(index);
    Partitions {
        unique_per_elf: unique_per_elf(index),
        unique_per_package: unique_per_package(index),
        duplicates_by_elf_set: duplicates_by_elf_set(index),
        duplicates_by_package_set: duplicates_by_package_set(index),
        tier_counts,
        strings_by_length,
        tiered_strings: tiered_strings(index),
        tiers_per_elf: tiers_per_elf(index),
        strings_matching_symbols: strings_matching_symbols(index),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Label;
    use crate::index::{BinaryInventory, CatalogBinary, CatalogPackage, ShardedIndex};
    use crate::model::{BinaryId, SymbolFeatures};

    fn catalog() -> Catalog {
        Catalog {
            binaries: vec![
                CatalogBinary { key: "libfoo1_1_amd64/libfoo.so.1".into(), package: 0 },
                CatalogBinary { key: "foo-bin_1_amd64/foo".into(), package: 1 },
                CatalogBinary { key: "foo-bin_1_amd64/foo-helper".into(), package: 1 },
                CatalogBinary { key: "bar_2_amd64/bar".into(), package: 2 },
            ],
            packages: vec![
                CatalogPackage { key: "libfoo1_1_amd64".into(), source: "foo".into() },
                CatalogPackage { key: "foo-bin_1_amd64".into(), source: "foo".into() },
                CatalogPackage { key: "bar_2_amd64".into(), source: "bar".into() },
            ],
        }
    }

    fn inventory(index: u32, package: u32, values: &[&str], defined: &[&str]) -> BinaryInventory {
        let mut labels: BTreeMap<Label, Vec<StringValue>> = BTreeMap::new();
        for value in values {
            labels.entry(crate::classify::classify(value)).or_default().push(StringValue::from(*value));
        }
        BinaryInventory {
            binary: BinaryId::new("pkg", format!("bin{index}")),
            binary_index: index,
            package_index: package,
            arch: "x86_64".into(),
            content_hash: None,
            labels,
            symbols: SymbolFeatures {
                defined: defined.iter().map(|s| StringValue::from(*s)).collect(),
                undefined: vec![],
            },
            warnings: vec![],
        }
    }

    fn frozen() -> FrozenIndex {
        let index = ShardedIndex::new(catalog(), 4);
        index.merge(inventory(0, 0, &["foo_init", "shared by all", "lib only"], &["foo_init"])).unwrap();
        index.merge(inventory(1, 1, &["foo_init", "shared by all", "in both bins"], &[])).unwrap();
        index.merge(inventory(2, 1, &["shared by all", "in both bins"], &[])).unwrap();
        index.merge(inventory(3, 2, &["shared by all", "bar only"], &[])).unwrap();
        index.freeze().unwrap()
    }

    #[test]
    fn tiers_follow_binary_package_and_source_spread() {
        let index = frozen();
        let tier = |value: &str| UniquenessTier::of(index.get(value).unwrap(), index.catalog());
        assert_eq!(tier("lib only"), UniquenessTier::ElfUnique);
        assert_eq!(tier("in both bins"), UniquenessTier::BinaryPkgUnique);
        assert_eq!(tier("foo_init"), UniquenessTier::SourcePkgUnique);
        assert_eq!(tier("shared by all"), UniquenessTier::NotUnique);

        let (tiers, by_length) = tier_tables(&index);
        assert_eq!(tiers.values().sum::<usize>(), index.len());
        assert_eq!(tiers[&UniquenessTier::ElfUnique], 2);
        assert_eq!(by_length[&8][&UniquenessTier::ElfUnique], 2);
    }

    #[test]
    fn tiered_strings_carry_spread_and_widest_first_order() {
        let index = frozen();
        let tiered = tiered_strings(&index);
        assert_eq!(tiered.len(), UniquenessTier::ALL.len());
        assert_eq!(tiered.values().map(Vec::len).sum::<usize>(), index.len());

        let elf_unique: Vec<&str> = tiered[&UniquenessTier::ElfUnique].iter().map(|s| &*s.value).collect();
        assert_eq!(elf_unique, vec!["bar only", "lib only"]);
        assert_eq!(
            tiered[&UniquenessTier::SourcePkgUnique],
            vec![TieredString { value: "foo_init".into(), sources: 1, packages: 2, elfs: 2 }]
        );
        assert_eq!(
            tiered[&UniquenessTier::NotUnique],
            vec![TieredString { value: "shared by all".into(), sources: 2, packages: 3, elfs: 4 }]
        );
    }

    #[test]
    fn tiers_per_elf_lists_each_binary_values_by_tier() {
        let index = frozen();
        let per_elf = tiers_per_elf(&index);
        assert_eq!(per_elf.len(), 4);
        let helper = &per_elf["foo-bin_1_amd64/foo-helper"];
        assert_eq!(helper[&UniquenessTier::BinaryPkgUnique], vec![StringValue::from("in both bins")]);
        assert_eq!(helper[&UniquenessTier::NotUnique], vec![StringValue::from("shared by all")]);
        assert!(!helper.contains_key(&UniquenessTier::ElfUnique));
        assert_eq!(
            per_elf["libfoo1_1_amd64/libfoo.so.1"][&UniquenessTier::SourcePkgUnique],
            vec![StringValue::from("foo_init")]
        );
    }

    #[test]
    fn each_value_is_unique_or_in_one_duplicate_group() {
        let index = frozen();
        let parts = partition(&index);
        for (elf_unique, groups) in [
            (&parts.unique_per_elf, &parts.duplicates_by_elf_set),
            (&parts.unique_per_package, &parts.duplicates_by_package_set),
        ] {
            let unique: usize = elf_unique.values().map(Vec::len).sum();
            let grouped: usize = groups.iter().map(|g| g.count).sum();
            assert_eq!(unique + grouped, index.len());
            assert!(groups.iter().all(|g| g.members.len() > 1 && g.count == g.strings.len()));
        }
        assert_eq!(
            parts.unique_per_package["foo-bin_1_amd64"],
            vec![StringValue::from("in both bins")]
        );
        assert_eq!(parts.duplicates_by_elf_set[0].strings, vec![StringValue::from("shared by all")]);
    }

    #[test]
    fn defined_symbols_found_as_strings_are_reported() {
        let index = frozen();
        let matches = strings_matching_symbols(&index);
        assert_eq!(matches.len(), 1);
        assert_eq!(&*matches[0].value, "foo_init");
        assert_eq!(matches[0].symbol_in, vec!["libfoo1_1_amd64/libfoo.so.1"]);
        assert_eq!(matches[0].string_in, vec!["foo-bin_1_amd64/foo", "libfoo1_1_amd64/libfoo.so.1"]);
    }
}

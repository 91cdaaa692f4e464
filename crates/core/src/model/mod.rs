//! Core data model for packages, binaries and the strings extracted from them.
//!
//! Everything here is a derived, read-only value: packages and binaries are
//! created when the manifest is parsed, extracted strings when a binary is
//! scanned. Nothing is mutated after the stage that produced it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// A distinct string value.
///
/// Identity for aggregation is by value, so values are shared (`Arc`) between
/// per-binary inventories and the inverted index instead of copied.
pub type StringValue = Arc<str>;

/// Identifier of a binary package: name + version + architecture.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    pub version: String,
    pub arch: String,
}

impl PackageId {
    pub fn new(name: impl Into<String>, version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into(), arch: arch.into() }
    }

    /// Key used for this package in every output product (`name_version_arch`).
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.name, self.version, self.arch)
    }
}

/// A binary package and the member files it ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Dense id assigned in manifest order.
    pub index: u32,
    pub id: PackageId,
    /// Source package this binary package was built from.
    pub source: String,
    /// Member paths, in manifest order.
    pub members: Vec<PathBuf>,
}

/// Stable identifier of one ELF binary: owning package key plus member name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BinaryId {
    pub package: String,
    pub name: String,
}

impl BinaryId {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        Self { package: package.into(), name: name.into() }
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BinaryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.name)
    }
}

/// One member file of a package that is scheduled for extraction.
///
/// The package is referenced by its dense index only; the corpus owns the
/// package record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    /// Dense id assigned in manifest order.
    pub index: u32,
    pub id: BinaryId,
    pub package: u32,
    /// Resolved on-disk location of the member.
    pub path: PathBuf,
}

/// How the bytes of an extracted string were encoded in the section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// ASCII / UTF-8 run.
    Narrow,
    /// UTF-16 little-endian run of ASCII-range code units.
    Utf16Le,
}

/// One occurrence of a printable run inside a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedString {
    pub value: StringValue,
    /// Name of the originating section (may be empty for unnamed sections).
    pub section: String,
    /// Raw ELF `sh_type` of the originating section.
    pub section_type: u32,
    /// Byte offset relative to the start of the section.
    pub offset: u64,
    pub encoding: Encoding,
}

/// Global dynamic symbols of a binary, split by whether the binary defines them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolFeatures {
    pub defined: Vec<StringValue>,
    pub undefined: Vec<StringValue>,
}

impl SymbolFeatures {
    pub fn is_empty(&self) -> bool {
        self.defined.is_empty() && self.undefined.is_empty()
    }

    /// Iterate over all symbol names, defined first.
    pub fn names(&self) -> impl Iterator<Item = &StringValue> {
        self.defined.iter().chain(self.undefined.iter())
    }
}

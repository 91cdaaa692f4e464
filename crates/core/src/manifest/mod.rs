//! Package manifest parsing and corpus construction.
//!
//! A manifest lists one package member per line:
//!
//! ```text
//! <package-name>[:<qualifier>]  <version>  <architecture>  <member-path>  [<source-package>]
//! ```
//!
//! Fields are separated by a TAB, or by runs of spaces when the line has no
//! TAB. Blank lines and `#` comments are ignored. Every problem found here is
//! fatal and reported before any binary is processed.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::index::{Catalog, CatalogBinary, CatalogPackage};
use crate::model::{Binary, BinaryId, Package, PackageId};

/// Fatal problems with the corpus description.
#[derive(Debug, Error)]
pub enum CorpusInputError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed manifest line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("Manifest lists no packages")]
    Empty,

    #[error("Package {package} lists member {path} more than once")]
    DuplicateMember { package: String, path: PathBuf },

    #[error("Member {path} does not exist or is not a regular file")]
    MissingMember { path: PathBuf },
}

/// One parsed manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRecord {
    /// 1-based line number in the manifest.
    pub line: usize,
    pub package: PackageId,
    pub member: PathBuf,
    pub source: Option<String>,
}

/// Debian policy shape of a package name: `[a-z0-9][a-z0-9+.-]+`.
pub fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return false;
    }
    let rest = chars.as_str();
    !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+.-".contains(c))
}

fn split_fields(line: &str) -> Vec<&str> {
    if line.contains('\t') {
        line.split('\t').map(str::trim).filter(|f| !f.is_empty()).collect()
    } else {
        line.split_whitespace().collect()
    }
}

/// Parse manifest text into records, in order.
pub fn parse_manifest(text: &str) -> Result<Vec<ManifestRecord>, CorpusInputError> {
    let mut records = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields = split_fields(trimmed);
        if fields.len() < 4 {
            return Err(CorpusInputError::Malformed {
                line,
                reason: format!("expected at least 4 fields, found {}", fields.len()),
            });
        }
        if fields[0].starts_with("snap:") {
            debug!(line, package = fields[0], "skipping snap entry");
            continue;
        }
        let name = fields[0].split_once(':').map_or(fields[0], |(name, _)| name);
        if name.is_empty() {
            return Err(CorpusInputError::Malformed { line, reason: "empty package name".into() });
        }
        if !is_valid_package_name(name) {
            warn!(line, package = name, "package name does not follow Debian naming policy");
        }
        records.push(ManifestRecord {
            line,
            package: PackageId::new(name, fields[1], fields[2]),
            member: PathBuf::from(fields[3]),
            source: fields.get(4).map(|s| s.to_string()),
        });
    }
    Ok(records)
}

/// The set of packages and binaries one run operates on.
///
/// Dense ids are assigned here, in manifest order, so that everything
/// downstream is independent of worker scheduling.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub root: PathBuf,
    pub packages: Vec<Package>,
    pub binaries: Vec<Binary>,
}

impl Corpus {
    /// Read and parse `manifest`, resolving member paths against `root`, and
    /// check that every member exists.
    pub fn load(manifest: &Path, root: &Path) -> Result<Self, CorpusInputError> {
        let text = std::fs::read_to_string(manifest)
            .map_err(|source| CorpusInputError::Io { path: manifest.to_path_buf(), source })?;
        let corpus = Self::from_records(root, parse_manifest(&text)?)?;
        corpus.validate_members()?;
        info!(
            manifest = %manifest.display(),
            packages = corpus.packages.len(),
            binaries = corpus.binaries.len(),
            "loaded corpus manifest"
        );
        Ok(corpus)
    }

    /// Group records into packages and name their binaries. Does no IO.
    pub fn from_records(root: &Path, records: Vec<ManifestRecord>) -> Result<Self, CorpusInputError> {
        if records.is_empty() {
            return Err(CorpusInputError::Empty);
        }

        let mut packages: Vec<Package> = Vec::new();
        let mut by_id: HashMap<PackageId, usize> = HashMap::new();
        let mut seen: HashSet<(usize, PathBuf)> = HashSet::new();
        for record in records {
            let pos = *by_id.entry(record.package.clone()).or_insert_with(|| {
                packages.push(Package {
                    index: packages.len() as u32,
                    source: record.source.clone().unwrap_or_else(|| record.package.name.clone()),
                    id: record.package.clone(),
                    members: Vec::new(),
                });
                packages.len() - 1
            });
            let member = normalize(&record.member);
            if !seen.insert((pos, member.clone())) {
                return Err(CorpusInputError::DuplicateMember { package: record.package.key(), path: member });
            }
            packages[pos].members.push(member);
        }

        let mut binaries = Vec::new();
        for package in &packages {
            let key = package.id.key();
            for (member, name) in package.members.iter().zip(member_names(&package.members)) {
                binaries.push(Binary {
                    index: binaries.len() as u32,
                    id: BinaryId::new(key.clone(), name),
                    package: package.index,
                    path: resolve(root, member),
                });
            }
        }

        Ok(Self { root: root.to_path_buf(), packages, binaries })
    }

    /// Every member must be an existing regular file.
    pub fn validate_members(&self) -> Result<(), CorpusInputError> {
        for binary in &self.binaries {
            if !binary.path.is_file() {
                return Err(CorpusInputError::MissingMember { path: binary.path.clone() });
            }
        }
        Ok(())
    }

    pub fn package(&self, index: u32) -> Option<&Package> {
        self.packages.get(index as usize)
    }

    /// Dense-id lookup tables handed to the indexer.
    pub fn catalog(&self) -> Catalog {
        Catalog {
            binaries: self
                .binaries
                .iter()
                .map(|b| CatalogBinary { key: b.id.key(), package: b.package })
                .collect(),
            packages: self
                .packages
                .iter()
                .map(|p| CatalogPackage { key: p.id.key(), source: p.source.clone() })
                .collect(),
        }
    }
}

fn resolve(root: &Path, member: &Path) -> PathBuf {
    if member.is_absolute() {
        member.to_path_buf()
    } else {
        root.join(member)
    }
}

/// Lexically normalized member path: `.` components dropped, `..` folded
/// into its parent where there is one.
fn normalize(member: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in member.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(out.components().next_back(), Some(Component::Normal(_))) || !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

fn file_name(member: &Path) -> String {
    member
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| member.to_string_lossy().into_owned())
}

fn joined_components(member: &Path) -> String {
    member
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Names of a package's members: the file name when it is unique inside the
/// package, otherwise the path components joined with `-`. A name that still
/// collides falls back to the full member path, then to a `#<n>` suffix.
fn member_names(members: &[PathBuf]) -> Vec<String> {
    fn colliding(names: &[String]) -> HashSet<String> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for name in names {
            *counts.entry(name).or_default() += 1;
        }
        counts.into_iter().filter(|(_, n)| *n > 1).map(|(name, _)| name.to_string()).collect()
    }

    let mut names: Vec<String> = members.iter().map(|m| file_name(m)).collect();
    let dup = colliding(&names);
    for (name, member) in names.iter_mut().zip(members) {
        if dup.contains(name.as_str()) {
            *name = joined_components(member);
        }
    }
    let dup = colliding(&names);
    for (name, member) in names.iter_mut().zip(members) {
        if dup.contains(name.as_str()) {
            *name = member.to_string_lossy().into_owned();
        }
    }

    let dup = colliding(&names);
    if dup.is_empty() {
        return names;
    }
    let mut used: HashSet<String> = names.iter().filter(|n| !dup.contains(*n)).cloned().collect();
    for name in names.iter_mut() {
        if !dup.contains(name.as_str()) {
            continue;
        }
        let mut n = 1;
        let unique = loop {
            let candidate = format!("{name}#{n}");
            if !used.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        used.insert(unique.clone());
        *name = unique;
    }
    names
}

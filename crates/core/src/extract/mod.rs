//! Printable-string extraction from decoded ELF sections.
//!
//! A string is a maximal run of printable bytes bounded by non-printable bytes
//! or the section boundary. Only data and string-table sections are scanned;
//! code-only and NOBITS sections are skipped. Malformed sections never abort a
//! binary: they yield no strings and an [`ExtractionWarning`] instead.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::decode::{DecodedElf, Section};
use crate::model::{Encoding, ExtractedString, StringValue, SymbolFeatures};

/// Default minimum string length, in characters.
pub const DEFAULT_MIN_LENGTH: usize = 4;

/// Which sections are eligible for scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionSelection {
    /// Every non-executable PROGBITS section plus string tables.
    #[default]
    Data,
    /// Only `rodata`-named sections.
    Rodata,
}

/// Knobs for a single binary's extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
    pub min_length: usize,
    pub allow_utf8: bool,
    pub wide_strings: bool,
    pub sections: SectionSelection,
    pub include_symbols: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            allow_utf8: true,
            wide_strings: false,
            sections: SectionSelection::Data,
            include_symbols: true,
        }
    }
}

impl ExtractOptions {
    /// Stable digest of every option that shapes an inventory. Checkpointed
    /// inventories are only reused under the same fingerprint.
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "min_length={};allow_utf8={};wide_strings={};sections={:?};include_symbols={}",
            self.min_length, self.allow_utf8, self.wide_strings, self.sections, self.include_symbols
        );
        format!("{:x}", Sha256::digest(canonical.as_bytes()))
    }
}

/// A section that could not be scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionWarning {
    pub section: String,
    pub section_index: usize,
    pub reason: String,
}

/// What to do with one section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionPlan {
    Scan { wide: bool },
    Skip,
    Malformed(String),
}

fn is_rodata_name(name: &str) -> bool {
    name.contains("rodata") && !name.starts_with(".rel")
}

/// Decide whether `section` is scanned under `options`.
pub fn plan_section(section: &Section, options: &ExtractOptions) -> SectionPlan {
    if section.is_shstrtab {
        return SectionPlan::Skip;
    }
    match options.sections {
        SectionSelection::Rodata => {
            if !is_rodata_name(&section.name) || section.is_nobits() {
                SectionPlan::Skip
            } else if section.is_progbits() {
                SectionPlan::Scan { wide: options.wide_strings }
            } else {
                SectionPlan::Malformed(format!(
                    "unexpected type {:#x} for {} section",
                    section.sh_type, section.name
                ))
            }
        }
        SectionSelection::Data => {
            if section.is_nobits() {
                SectionPlan::Skip
            } else if section.is_progbits() && !section.is_executable() {
                SectionPlan::Scan { wide: options.wide_strings }
            } else if section.is_string_table() {
                SectionPlan::Scan { wide: false }
            } else {
                SectionPlan::Skip
            }
        }
    }
}

/// Width in bytes of the printable character starting at `bytes[i]`, or 0.
fn printable_width(bytes: &[u8], i: usize, allow_utf8: bool) -> usize {
    let Some(&b) = bytes.get(i) else { return 0 };
    if b == b'\t' || (0x20..=0x7e).contains(&b) {
        return 1;
    }
    if !allow_utf8 {
        return 0;
    }
    let width = match b {
        0xc2..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => return 0,
    };
    let Some(chunk) = bytes.get(i..i + width) else { return 0 };
    match std::str::from_utf8(chunk).ok().and_then(|s| s.chars().next()) {
        Some(c) if !c.is_control() => width,
        _ => 0,
    }
}

/// Lazy scanner over narrow (ASCII / UTF-8) runs of a byte slice.
///
/// Yields `(offset, text)` pairs in offset order.
#[derive(Debug, Clone)]
pub struct NarrowRuns<'a> {
    bytes: &'a [u8],
    pos: usize,
    min_length: usize,
    allow_utf8: bool,
}

impl<'a> NarrowRuns<'a> {
    pub fn new(bytes: &'a [u8], min_length: usize, allow_utf8: bool) -> Self {
        Self { bytes, pos: 0, min_length: min_length.max(1), allow_utf8 }
    }
}

impl<'a> Iterator for NarrowRuns<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let mut end = start;
            let mut chars = 0usize;
            loop {
                let width = printable_width(self.bytes, end, self.allow_utf8);
                if width == 0 {
                    break;
                }
                end += width;
                chars += 1;
            }
            if end == start {
                self.pos = start + 1;
                continue;
            }
            self.pos = end;
            if chars < self.min_length {
                continue;
            }
            let Ok(text) = std::str::from_utf8(&self.bytes[start..end]) else { continue };
            if text.trim().is_empty() {
                continue;
            }
            return Some((start, text));
        }
        None
    }
}

/// Lazy scanner over UTF-16LE runs of ASCII-range code units.
#[derive(Debug, Clone)]
pub struct WideRuns<'a> {
    bytes: &'a [u8],
    pos: usize,
    min_length: usize,
}

impl<'a> WideRuns<'a> {
    pub fn new(bytes: &'a [u8], min_length: usize) -> Self {
        Self { bytes, pos: 0, min_length: min_length.max(1) }
    }
}

impl Iterator for WideRuns<'_> {
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos + 1 < self.bytes.len() {
            let start = self.pos;
            let mut end = start;
            let mut text = String::new();
            while end + 1 < self.bytes.len() {
                let unit = u16::from_le_bytes([self.bytes[end], self.bytes[end + 1]]);
                if unit != 0x09 && !(0x20..=0x7e).contains(&unit) {
                    break;
                }
                text.push(char::from(self.bytes[end]));
                end += 2;
            }
            if end == start {
                self.pos = start + 1;
                continue;
            }
            self.pos = end;
            if text.chars().count() < self.min_length || text.trim().is_empty() {
                continue;
            }
            return Some((start, text));
        }
        None
    }
}

/// Extraction view over one decoded binary.
///
/// [`Extractor::strings`] is lazy and restartable: every call walks the
/// borrowed section bytes again and yields the identical sequence.
#[derive(Debug, Clone, Copy)]
pub struct Extractor<'a> {
    elf: &'a DecodedElf,
    options: &'a ExtractOptions,
}

impl<'a> Extractor<'a> {
    pub fn new(elf: &'a DecodedElf, options: &'a ExtractOptions) -> Self {
        Self { elf, options }
    }

    /// Sections that will actually be scanned, with their bytes.
    fn scanned_sections(&self) -> impl Iterator<Item = (&'a Section, &'a [u8], bool)> + 'a {
        let elf = self.elf;
        let options = self.options;
        elf.sections.iter().filter_map(move |section| match plan_section(section, options) {
            SectionPlan::Scan { wide } => {
                elf.section_data(section).map(|data| (section, data, wide))
            }
            SectionPlan::Skip | SectionPlan::Malformed(_) => None,
        })
    }

    /// All strings of the binary: sections in table order, narrow runs
    /// before wide runs within a section, each in offset order.
    pub fn strings(&self) -> impl Iterator<Item = ExtractedString> + 'a {
        let options = self.options;
        self.scanned_sections().flat_map(move |(section, data, wide)| {
            let narrow = NarrowRuns::new(data, options.min_length, options.allow_utf8).map(
                move |(offset, text)| ExtractedString {
                    value: StringValue::from(text),
                    section: section.name.clone(),
                    section_type: section.sh_type,
                    offset: offset as u64,
                    encoding: Encoding::Narrow,
                },
            );
            let wide_runs = wide
                .then(|| WideRuns::new(data, options.min_length))
                .into_iter()
                .flatten()
                .map(move |(offset, text)| ExtractedString {
                    value: StringValue::from(text),
                    section: section.name.clone(),
                    section_type: section.sh_type,
                    offset: offset as u64,
                    encoding: Encoding::Utf16Le,
                });
            narrow.chain(wide_runs)
        })
    }

    /// Sections that were eligible but could not be scanned.
    pub fn warnings(&self) -> Vec<ExtractionWarning> {
        let mut warnings = Vec::new();
        for section in &self.elf.sections {
            match plan_section(section, self.options) {
                SectionPlan::Scan { .. } => {
                    if self.elf.section_data(section).is_none() {
                        warnings.push(ExtractionWarning {
                            section: section.name.clone(),
                            section_index: section.index,
                            reason: format!(
                                "section range {:#x}+{:#x} exceeds file size {:#x}",
                                section.offset,
                                section.size,
                                self.elf.data.len()
                            ),
                        });
                    }
                }
                SectionPlan::Malformed(reason) => warnings.push(ExtractionWarning {
                    section: section.name.clone(),
                    section_index: section.index,
                    reason,
                }),
                SectionPlan::Skip => {}
            }
        }
        warnings
    }

    /// Ordered distinct global dynamic symbols, split by definedness.
    pub fn symbols(&self) -> SymbolFeatures {
        let mut features = SymbolFeatures::default();
        if !self.options.include_symbols {
            return features;
        }
        let mut seen_defined: HashSet<&str> = HashSet::new();
        let mut seen_undefined: HashSet<&str> = HashSet::new();
        for sym in &self.elf.dynamic_symbols {
            if sym.defined {
                if seen_defined.insert(&sym.name) {
                    features.defined.push(StringValue::from(sym.name.as_str()));
                }
            } else if seen_undefined.insert(&sym.name) {
                features.undefined.push(StringValue::from(sym.name.as_str()));
            }
        }
        features
    }
}

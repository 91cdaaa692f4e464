use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use pkgprint_core::classify::{classify, Label};
use pkgprint_core::config::{load_config, PipelineConfig};
use pkgprint_core::decode::{ElfDecoder, GoblinDecoder};
use pkgprint_core::extract::Extractor;
use pkgprint_core::model::{Encoding, StringValue};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
struct ClassifiedString {
    value: StringValue,
    label: Label,
    section: String,
    offset: u64,
    encoding: Encoding,
}

/// Dump the classified strings of a single ELF file, in extraction order.
pub fn extract_command(path: &str, config: Option<&str>, json: bool) -> Result<()> {
    let config = match config {
        Some(config) => load_config(Path::new(config))?,
        None => PipelineConfig::default(),
    };
    let options = config.extract_options();

    let bytes = fs::read(path).with_context(|| format!("Failed to read binary {path}"))?;
    let elf = GoblinDecoder
        .decode(bytes)
        .with_context(|| format!("Failed to decode {path} as ELF"))?;
    let extractor = Extractor::new(&elf, &options);
    for warning in extractor.warnings() {
        warn!(section = %warning.section, reason = %warning.reason, "skipped section");
    }

    let strings: Vec<ClassifiedString> = extractor
        .strings()
        .map(|s| ClassifiedString {
            label: classify(&s.value),
            value: s.value,
            section: s.section,
            offset: s.offset,
            encoding: s.encoding,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&strings)?);
        return Ok(());
    }

    println!("{} ({}, {} strings)", path, elf.arch, strings.len());
    for s in &strings {
        println!("{:<26} {:<12} {:#08x}  {}", s.label.as_str(), s.section, s.offset, s.value);
    }
    Ok(())
}

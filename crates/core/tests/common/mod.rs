#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use object::write::Object;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};
use pkgprint_core::config::PipelineConfig;
use pkgprint_core::extract::SectionSelection;
use pkgprint_core::manifest::Corpus;
use pkgprint_core::pipeline::{Pipeline, RunOutput};
use pkgprint_core::store::CheckpointDb;

/// NUL-terminated concatenation of `strings`.
pub fn c_strings(strings: &[&str]) -> Vec<u8> {
    let mut data = Vec::new();
    for s in strings {
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }
    data
}

/// Relocatable x86_64 ELF with `strings` in `.rodata` and a one-byte `.text`.
pub fn rodata_elf(strings: &[&str]) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
    obj.section_mut(text).set_data(vec![0xc3], 1);
    let rodata = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
    obj.section_mut(rodata).set_data(c_strings(strings), 1);
    obj.write().expect("write elf fixture")
}

/// One manifest line plus the strings its member carries.
pub struct Member<'a> {
    pub package: &'a str,
    pub version: &'a str,
    pub path: &'a str,
    pub source: Option<&'a str>,
    pub strings: &'a [&'a str],
}

impl<'a> Member<'a> {
    pub fn new(package: &'a str, path: &'a str, strings: &'a [&'a str]) -> Self {
        Self { package, version: "1.0", path, source: None, strings }
    }

    pub fn source(mut self, source: &'a str) -> Self {
        self.source = Some(source);
        self
    }
}

/// Write every member as an ELF under `root` and return the manifest path.
pub fn write_corpus(root: &Path, members: &[Member<'_>]) -> PathBuf {
    let mut manifest = String::from("# package version arch member [source]\n");
    for member in members {
        let path = root.join(member.path);
        fs::create_dir_all(path.parent().expect("member parent")).expect("create member dir");
        fs::write(&path, rodata_elf(member.strings)).expect("write member");
        manifest.push_str(&format!(
            "{}\t{}\tamd64\t{}",
            member.package, member.version, member.path
        ));
        if let Some(source) = member.source {
            manifest.push('\t');
            manifest.push_str(source);
        }
        manifest.push('\n');
    }
    let path = root.join("manifest.txt");
    fs::write(&path, manifest).expect("write manifest");
    path
}

/// Extraction limited to `.rodata`, so fixtures yield exactly their strings.
pub fn rodata_config() -> PipelineConfig {
    PipelineConfig { sections: SectionSelection::Rodata, ..PipelineConfig::default() }
}

pub fn run_corpus(root: &Path, manifest: &Path, config: PipelineConfig) -> RunOutput {
    run_with(root, manifest, config, None)
}

pub fn run_with(
    root: &Path,
    manifest: &Path,
    config: PipelineConfig,
    checkpoint: Option<&CheckpointDb>,
) -> RunOutput {
    let corpus = Corpus::load(manifest, root).expect("load corpus");
    let cancel = AtomicBool::new(false);
    Pipeline::new(config).run(&corpus, checkpoint, &cancel).expect("run pipeline")
}

//! Structural view of an ELF binary and the decoder seam that produces it.
//!
//! The pipeline never parses ELF headers itself: it consumes a [`DecodedElf`]
//! (section table, section flags, raw bytes, dynamic symbols) from an
//! [`ElfDecoder`]. [`GoblinDecoder`] is the default implementation.

use std::path::PathBuf;

use goblin::elf::{self, header, section_header, sym};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use section_header::{SHF_EXECINSTR, SHT_NOBITS, SHT_PROGBITS, SHT_STRTAB};

/// First four bytes of every ELF file.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Quick magic check, used to filter package members before decoding.
pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.len() >= ELF_MAGIC.len() && bytes[..ELF_MAGIC.len()] == ELF_MAGIC
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Not an ELF file")]
    NotElf,
    #[error("Malformed ELF: {0}")]
    Parse(String),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<goblin::error::Error> for DecodeError {
    fn from(err: goblin::error::Error) -> Self {
        DecodeError::Parse(err.to_string())
    }
}

/// One entry of the section header table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub index: usize,
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub offset: u64,
    pub size: u64,
    /// True for the section-header string table (`e_shstrndx`).
    pub is_shstrtab: bool,
}

impl Section {
    pub fn is_nobits(&self) -> bool {
        self.sh_type == SHT_NOBITS
    }

    pub fn is_progbits(&self) -> bool {
        self.sh_type == SHT_PROGBITS
    }

    pub fn is_string_table(&self) -> bool {
        self.sh_type == SHT_STRTAB
    }

    pub fn is_executable(&self) -> bool {
        self.flags & u64::from(SHF_EXECINSTR) != 0
    }
}

/// A global FUNC/OBJECT entry of `.dynsym`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynSymbol {
    pub name: String,
    /// False when the symbol is imported (`st_shndx == SHN_UNDEF`).
    pub defined: bool,
}

/// Decoded structural data of one binary.
///
/// Owns the raw file bytes; sections refer into them by offset/size. The
/// whole value is dropped once the binary's strings have been extracted.
#[derive(Debug, Clone)]
pub struct DecodedElf {
    pub arch: String,
    pub is_64: bool,
    pub little_endian: bool,
    pub sections: Vec<Section>,
    pub dynamic_symbols: Vec<DynSymbol>,
    pub data: Vec<u8>,
}

impl DecodedElf {
    /// Bytes of `section`, or `None` when its range does not fit the file.
    pub fn section_data(&self, section: &Section) -> Option<&[u8]> {
        let start = usize::try_from(section.offset).ok()?;
        let len = usize::try_from(section.size).ok()?;
        let end = start.checked_add(len)?;
        self.data.get(start..end)
    }
}

/// Trait implemented by structural decoders.
pub trait ElfDecoder: Send + Sync {
    fn decode(&self, bytes: Vec<u8>) -> Result<DecodedElf, DecodeError>;
    fn name(&self) -> &'static str;
}

/// Decoder backed by `goblin`'s ELF parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct GoblinDecoder;

fn machine_name(machine: u16) -> String {
    match machine {
        header::EM_X86_64 => "x86_64".into(),
        header::EM_386 => "x86".into(),
        header::EM_AARCH64 => "arm64".into(),
        header::EM_ARM => "arm".into(),
        header::EM_RISCV => "riscv".into(),
        header::EM_PPC64 => "ppc64".into(),
        header::EM_PPC => "ppc".into(),
        header::EM_S390 => "s390x".into(),
        header::EM_MIPS => "mips".into(),
        other => format!("unknown({other})"),
    }
}

fn collect_sections(elf: &elf::Elf) -> Vec<Section> {
    let shstrndx = usize::from(elf.header.e_shstrndx);
    elf.section_headers
        .iter()
        .enumerate()
        .map(|(index, sh)| Section {
            index,
            name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
            sh_type: sh.sh_type,
            flags: sh.sh_flags,
            offset: sh.sh_offset,
            size: sh.sh_size,
            is_shstrtab: index == shstrndx && sh.sh_type == SHT_STRTAB,
        })
        .collect()
}

fn collect_dynamic_symbols(elf: &elf::Elf) -> Vec<DynSymbol> {
    let mut symbols = Vec::new();
    for s in elf.dynsyms.iter() {
        if s.st_bind() != sym::STB_GLOBAL {
            continue;
        }
        if !matches!(s.st_type(), sym::STT_FUNC | sym::STT_OBJECT) {
            continue;
        }
        let name = elf.dynstrtab.get_at(s.st_name).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        symbols.push(DynSymbol {
            name: name.to_string(),
            defined: s.st_shndx != section_header::SHN_UNDEF as usize,
        });
    }
    symbols
}

impl ElfDecoder for GoblinDecoder {
    fn decode(&self, bytes: Vec<u8>) -> Result<DecodedElf, DecodeError> {
        if !is_elf(&bytes) {
            return Err(DecodeError::NotElf);
        }
        let elf = elf::Elf::parse(&bytes)?;
        let arch = machine_name(elf.header.e_machine);
        let is_64 = elf.is_64;
        let little_endian = elf.little_endian;
        let sections = collect_sections(&elf);
        let dynamic_symbols = collect_dynamic_symbols(&elf);
        drop(elf);
        Ok(DecodedElf { arch, is_64, little_endian, sections, dynamic_symbols, data: bytes })
    }

    fn name(&self) -> &'static str {
        "goblin"
    }
}

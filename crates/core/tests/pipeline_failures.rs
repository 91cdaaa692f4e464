mod common;

use std::fs;
use std::sync::atomic::AtomicBool;

use common::{rodata_config, rodata_elf, run_corpus, write_corpus, Member};
use pkgprint_core::classify::Label;
use pkgprint_core::decode::{ElfDecoder, GoblinDecoder};
use pkgprint_core::manifest::{Corpus, CorpusInputError};
use pkgprint_core::pipeline::Pipeline;
use tempfile::tempdir;

#[test]
fn corrupt_and_non_elf_members_are_reported_not_fatal() {
    let dir = tempdir().expect("tempdir");
    let manifest = write_corpus(
        dir.path(),
        &[
            Member::new("good", "usr/bin/good", &["/usr/share/good/data"]),
            Member::new("bad", "usr/bin/corrupt", &[]),
            Member::new("bad", "usr/share/doc/README", &[]),
        ],
    );
    let mut corrupt = b"\x7fELF".to_vec();
    corrupt.extend_from_slice(&[0xff; 12]);
    fs::write(dir.path().join("usr/bin/corrupt"), corrupt).expect("write corrupt");
    fs::write(dir.path().join("usr/share/doc/README"), "plain text, not ELF\n").expect("write readme");

    let output = run_corpus(dir.path(), &manifest, rodata_config());
    let report = &output.report;
    assert_eq!(report.binaries_total, 3);
    assert_eq!(report.processed, 1);
    assert_eq!(report.non_elf, vec!["bad_1.0_amd64/README"]);
    assert_eq!(report.decode_failures.len(), 1);
    assert_eq!(report.decode_failures[0].binary, "bad_1.0_amd64/corrupt");
    assert!(!report.cancelled);
    assert_eq!(output.products.classified_aggregated[&Label::FilesystemPath], 1);
    assert!(!output.products.classified_per_package.contains_key("bad_1.0_amd64"));
}

#[test]
fn out_of_range_section_is_skipped_with_a_warning() {
    let dir = tempdir().expect("tempdir");
    let manifest = write_corpus(
        dir.path(),
        &[
            Member::new("odd", "usr/bin/odd", &["never extracted"]),
            Member::new("fine", "usr/bin/fine", &["still extracted"]),
        ],
    );

    // Point the .rodata section header of `odd` far past the end of the file.
    let path = dir.path().join("usr/bin/odd");
    let mut bytes = fs::read(&path).expect("read odd");
    let elf = GoblinDecoder.decode(bytes.clone()).expect("decode fixture");
    let rodata = elf.sections.iter().find(|s| s.name == ".rodata").expect("rodata section");
    let shoff = u64::from_le_bytes(bytes[0x28..0x30].try_into().expect("e_shoff")) as usize;
    let shentsize = u16::from_le_bytes(bytes[0x3a..0x3c].try_into().expect("e_shentsize")) as usize;
    let sh_offset = shoff + rodata.index * shentsize + 0x18;
    bytes[sh_offset..sh_offset + 8].copy_from_slice(&0xffff_ff00u64.to_le_bytes());
    fs::write(&path, bytes).expect("write patched");

    let output = run_corpus(dir.path(), &manifest, rodata_config());
    let report = &output.report;
    assert_eq!(report.processed, 2);
    assert_eq!(report.extraction_warnings.len(), 1);
    assert_eq!(report.extraction_warnings[0].binary, "odd_1.0_amd64/odd");
    assert_eq!(report.extraction_warnings[0].warning.section, ".rodata");
    assert!(output.index.get("never extracted").is_none());
    assert!(output.index.get("still extracted").is_some());
}

#[test]
fn missing_member_aborts_before_processing() {
    let dir = tempdir().expect("tempdir");
    let manifest = dir.path().join("manifest.txt");
    fs::write(dir.path().join("present"), rodata_elf(&["x"])).expect("write present");
    fs::write(&manifest, "pkg 1 amd64 present\npkg 1 amd64 absent\n").expect("write manifest");

    let err = Corpus::load(&manifest, dir.path()).expect_err("missing member");
    assert!(matches!(err, CorpusInputError::MissingMember { .. }));
    assert!(err.to_string().contains("absent"));
}

#[test]
fn empty_or_malformed_manifest_is_fatal() {
    let dir = tempdir().expect("tempdir");
    let manifest = dir.path().join("manifest.txt");

    fs::write(&manifest, "# only comments\n\n").expect("write manifest");
    let err = Corpus::load(&manifest, dir.path()).expect_err("empty manifest");
    assert!(matches!(err, CorpusInputError::Empty));

    fs::write(&manifest, "pkg 1 amd64\n").expect("write manifest");
    let err = Corpus::load(&manifest, dir.path()).expect_err("malformed manifest");
    assert!(matches!(err, CorpusInputError::Malformed { line: 1, .. }));

    let err = Corpus::load(&dir.path().join("nope.txt"), dir.path()).expect_err("unreadable manifest");
    assert!(matches!(err, CorpusInputError::Io { .. }));
}

#[test]
fn cancelled_run_returns_a_valid_partial_result() {
    let dir = tempdir().expect("tempdir");
    let manifest = write_corpus(
        dir.path(),
        &[
            Member::new("p1", "usr/bin/a", &["/usr/bin/foo"]),
            Member::new("p2", "usr/bin/b", &["/usr/bin/foo"]),
        ],
    );
    let corpus = Corpus::load(&manifest, dir.path()).expect("load corpus");
    let cancel = AtomicBool::new(true);
    let output = Pipeline::new(rodata_config()).run(&corpus, None, &cancel).expect("run");

    assert!(output.report.cancelled);
    assert_eq!(output.report.processed, 0);
    assert!(output.index.is_empty());
    assert_eq!(output.products.classified_aggregated.len(), Label::ALL.len());
    assert!(output.products.classified_aggregated.values().all(|&count| count == 0));
    assert!(output.products.duplicate_grouped.is_empty());
}

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use object::write::Object;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};
use predicates::prelude::*;
use tempfile::tempdir;

fn rodata_elf(strings: &[&str]) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let rodata = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
    let mut data = Vec::new();
    for s in strings {
        data.extend_from_slice(s.as_bytes());
        data.push(0);
    }
    obj.section_mut(rodata).set_data(data, 1);
    obj.write().expect("write elf fixture")
}

fn write_corpus(root: &Path) {
    fs::create_dir_all(root.join("usr/bin")).expect("create usr/bin");
    fs::write(root.join("usr/bin/a"), rodata_elf(&["/usr/bin/foo", "1.2.3"])).expect("write a");
    fs::write(root.join("usr/bin/b"), rodata_elf(&["/usr/bin/foo", "GPL-2.0"])).expect("write b");
    fs::write(root.join("config.json"), r#"{ "sections": "rodata" }"#).expect("write config");
    fs::write(
        root.join("manifest.txt"),
        "p1\t1.0\tamd64\tusr/bin/a\np2\t1.0\tamd64\tusr/bin/b\n",
    )
    .expect("write manifest");
}

#[test]
fn run_writes_products_and_reports_counts() {
    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let out = dir.path().join("out");

    cargo_bin_cmd!("pkgprint")
        .current_dir(dir.path())
        .args(["run", "--manifest", "manifest.txt", "--config", "config.json", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Processed 2/2 binaries"))
        .stdout(predicate::str::contains("3 distinct strings"));

    let duplicates = fs::read_to_string(out.join("duplicate-grouped.json")).expect("read duplicates");
    let duplicates: serde_json::Value = serde_json::from_str(&duplicates).expect("parse duplicates");
    assert_eq!(duplicates[0]["members"][0], "p1_1.0_amd64");
    assert_eq!(duplicates[0]["strings"][0], "/usr/bin/foo");

    let unique = fs::read_to_string(out.join("unique-per-package.json")).expect("read unique");
    assert!(unique.contains("GPL-2.0"));
    assert!(out.join("run-report.json").is_file());
    assert!(out.join(".pkgprint/checkpoint.db").is_file());
}

#[test]
fn rerun_resumes_from_checkpoint() {
    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let out = dir.path().join("out");

    for _ in 0..2 {
        cargo_bin_cmd!("pkgprint")
            .current_dir(dir.path())
            .args(["run", "--manifest", "manifest.txt", "--config", "config.json", "--out"])
            .arg(&out)
            .assert()
            .success();
    }
    let report = fs::read_to_string(out.join("run-report.json")).expect("read report");
    let report: serde_json::Value = serde_json::from_str(&report).expect("parse report");
    assert_eq!(report["resumed"], 2);
}

#[test]
fn no_checkpoint_skips_the_database() {
    let dir = tempdir().expect("tempdir");
    write_corpus(dir.path());
    let out = dir.path().join("out");

    cargo_bin_cmd!("pkgprint")
        .current_dir(dir.path())
        .args(["run", "--manifest", "manifest.txt", "--no-checkpoint", "--out"])
        .arg(&out)
        .assert()
        .success();
    assert!(!out.join(".pkgprint/checkpoint.db").exists());
}

#[test]
fn missing_member_fails_with_a_descriptive_message() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("manifest.txt"), "p1 1.0 amd64 usr/bin/ghost\n").expect("write manifest");

    cargo_bin_cmd!("pkgprint")
        .current_dir(dir.path())
        .args(["run", "--manifest", "manifest.txt", "--out", "out"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ghost"));
}

#[test]
fn malformed_manifest_names_the_line() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("manifest.txt"), "# header\np1 1.0\n").expect("write manifest");

    cargo_bin_cmd!("pkgprint")
        .current_dir(dir.path())
        .args(["run", "--manifest", "manifest.txt", "--out", "out"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 2"));
}

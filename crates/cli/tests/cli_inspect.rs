use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use object::write::Object;
use object::{Architecture, BinaryFormat, Endianness, SectionKind};
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn classify_prints_one_label_per_value() {
    cargo_bin_cmd!("pkgprint")
        .args(["classify", "https://example.org", "/usr/lib/libz.so.1", "1.2.13", "hello world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("url-or-uri\thttps://example.org"))
        .stdout(predicate::str::contains("filesystem-path\t/usr/lib/libz.so.1"))
        .stdout(predicate::str::contains("version-string\t1.2.13"))
        .stdout(predicate::str::contains("other-text\thello world"));
}

#[test]
fn classify_json_includes_the_matching_rule() {
    let output = cargo_bin_cmd!("pkgprint")
        .args(["classify", "--json", "GPL-2.0", "plain words here"])
        .output()
        .expect("run classify");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("parse json");
    assert_eq!(json[0]["label"], "license-or-copyright-text");
    assert_eq!(json[0]["rule"], "license");
    assert_eq!(json[1]["label"], "other-text");
    assert!(json[1]["rule"].is_null());
}

#[test]
fn classify_requires_values() {
    cargo_bin_cmd!("pkgprint").arg("classify").assert().failure();
}

#[test]
fn extract_dumps_classified_strings() {
    let dir = tempdir().expect("tempdir");
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let rodata = obj.add_section(Vec::new(), b".rodata".to_vec(), SectionKind::ReadOnlyData);
    obj.section_mut(rodata).set_data(b"/etc/fixture.conf\0fixture version 0.9.1\0".to_vec(), 1);
    let path = dir.path().join("fixture");
    fs::write(&path, obj.write().expect("write elf")).expect("write fixture");

    let output = cargo_bin_cmd!("pkgprint")
        .arg("extract")
        .arg(&path)
        .arg("--json")
        .output()
        .expect("run extract");
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("parse json");
    let entries = json.as_array().expect("array");
    let path_entry = entries
        .iter()
        .find(|e| e["value"] == "/etc/fixture.conf")
        .expect("path string extracted");
    assert_eq!(path_entry["label"], "filesystem-path");
    assert_eq!(path_entry["section"], ".rodata");
    assert!(entries.iter().any(|e| e["value"] == "fixture version 0.9.1" && e["label"] == "version-string"));
}

#[test]
fn extract_rejects_non_elf_input() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("notes.txt");
    fs::write(&path, "just text\n").expect("write text");

    cargo_bin_cmd!("pkgprint")
        .arg("extract")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to decode"));
}

use std::fs;
use std::path::Path;

use pkgprint::{canonicalize_or_current, default_corpus_root};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current(".").expect("canonicalize").canonicalize().expect("canon");
    let expected = tmp.path().canonicalize().expect("canon tmp");
    assert_eq!(result, expected);

    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
fn canonicalize_or_current_keeps_missing_paths_absolute() {
    let tmp = tempdir().expect("tempdir");
    let existing = tmp.path().join("nested");
    fs::create_dir_all(&existing).expect("create nested");

    let resolved = canonicalize_or_current(existing.to_str().expect("utf8 path")).expect("resolve");
    assert_eq!(resolved, existing.canonicalize().expect("canonicalize nested"));

    let missing = canonicalize_or_current("does-not-exist-yet/out").expect("resolve missing");
    assert!(missing.is_absolute());
    assert!(missing.ends_with("does-not-exist-yet/out"));
}

#[test]
fn corpus_root_defaults_to_manifest_directory() {
    assert_eq!(default_corpus_root(Path::new("/srv/corpus/manifest.txt")), Path::new("/srv/corpus"));
}

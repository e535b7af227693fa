//! Manifest error-message, atomic-write-safety, and init integration tests.

use assert_fs::prelude::*;
use kiln_core::{
    manifest::{self, Manifest, MANIFEST_FILE},
    ConfigError,
};
use predicates::prelude::predicate;
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_manifest_returns_io_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = manifest::manifest_path_at(dir.path());
    let err = manifest::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains(MANIFEST_FILE));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(MANIFEST_FILE)
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = manifest::load_at(&dir.child(MANIFEST_FILE).path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains(MANIFEST_FILE), "must contain file path, got: {msg}");
}

#[test]
fn load_wrong_type_returns_parse_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(MANIFEST_FILE)
        .write_str("server:\n  port: not-a-number\n")
        .expect("write");

    let err = manifest::load_at(&dir.child(MANIFEST_FILE).path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

#[test]
fn cyclic_paths_fail_when_building_context() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(MANIFEST_FILE)
        .write_str("paths:\n  source: ${dist}/src\n  dist: ${source}/dist\n")
        .expect("write");

    let manifest = manifest::load_at(&dir.child(MANIFEST_FILE).path()).expect("load");
    let err = manifest.context(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::CyclicReference { .. }), "got: {err}");
    assert!(err.to_string().contains("dist -> source -> dist"));
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn mid_write_crash_leaves_original_intact() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = manifest::manifest_path_at(dir.path());
    manifest::save_at(&path, &Manifest::scaffold()).expect("save");
    let original = fs::read(&path).expect("read original");

    // Simulate crash: .tmp written but process died before rename
    let tmp = path.with_extension("yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    assert_eq!(original, fs::read(&path).expect("read after crash"));
    assert_eq!(manifest::load_at(&path).expect("load"), Manifest::scaffold());
}

// ---------------------------------------------------------------------------
// 3. Init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_scaffold() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = manifest::init_at(dir.path()).expect("init");

    dir.child(MANIFEST_FILE).assert(predicate::path::exists());
    dir.child(MANIFEST_FILE)
        .assert(predicate::str::contains("staging: var"));
    let loaded = manifest::load_at(&path).expect("load");
    assert_eq!(loaded.paths["source"], "src");
}

#[test]
fn init_never_overwrites() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(MANIFEST_FILE)
        .write_str("paths:\n  source: app\n")
        .expect("write");

    let err = manifest::init_at(dir.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ManifestExists { .. }));
    dir.child(MANIFEST_FILE)
        .assert(predicate::str::contains("source: app"));
}

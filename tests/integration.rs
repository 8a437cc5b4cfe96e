use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const GRAMMAR: &str = r#"<grammar xmlns="http://relaxng.org/ns/structure/1.0" ns="http://www.tei-c.org/ns/1.0">
  <start><element name="TEI"><text/></element></start>
</grammar>"#;

fn packstore_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("packstore");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Test fixtures
    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(files_dir.join("doc.xml"), "<TEI>hello</TEI>").unwrap();
    fs::write(files_dir.join("tei.rng"), GRAMMAR).unwrap();
    fs::write(
        files_dir.join("tei-pack.json"),
        serde_json::json!({
            "interchangeVersion": 1,
            "name": "tei",
            "schema": GRAMMAR,
            "mode": "generic",
            "match": {
                "method": "top-element",
                "localName": "TEI",
                "namespaceURI": "http://www.tei-c.org/ns/1.0",
            },
        })
        .to_string(),
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/packstore.sqlite"

[backup]
dir = "{root}/backups"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("packstore.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_packstore(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = packstore_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run packstore binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn fixture(config_path: &Path, name: &str) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("files")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_packstore(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_packstore(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_packstore(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_and_list_schema() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);

    let (stdout, stderr, success) = run_packstore(
        &config_path,
        &["import", "schema", &fixture(&config_path, "tei.rng")],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Imported tei.rng"));

    let (stdout, _, success) = run_packstore(&config_path, &["list", "schema"]);
    assert!(success);
    assert!(stdout.contains("tei.rng"));
}

#[test]
fn test_status_counts_records() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);
    run_packstore(
        &config_path,
        &["import", "xml", &fixture(&config_path, "doc.xml")],
    );

    let (stdout, _, success) = run_packstore(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("xmlfiles  1"));
    assert!(stdout.contains("chunks    1"));
    assert!(stdout.contains("packs     0"));
}

#[test]
fn test_match_against_imported_pack() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);

    let (stdout, stderr, success) = run_packstore(
        &config_path,
        &["import", "pack", &fixture(&config_path, "tei-pack.json")],
    );
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    // packs are named by their interchange form, not the file
    assert!(stdout.contains("Imported tei"));

    let (stdout, _, success) = run_packstore(
        &config_path,
        &["match", "TEI", "--ns", "http://www.tei-c.org/ns/1.0"],
    );
    assert!(success);
    assert!(stdout.contains("tei"));
    assert!(stdout.contains("mode generic"));

    let (stdout, _, success) = run_packstore(&config_path, &["match", "unknown"]);
    assert!(success);
    assert!(stdout.contains("No pack matches"));
}

#[test]
fn test_export_round_trips_content() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);
    run_packstore(
        &config_path,
        &["import", "xml", &fixture(&config_path, "doc.xml")],
    );

    let out = config_path.parent().unwrap().join("exported.xml");
    let (_, stderr, success) = run_packstore(
        &config_path,
        &["export", "xml", "doc.xml", "--out", out.to_str().unwrap()],
    );
    assert!(success, "export failed: stderr={}", stderr);
    assert_eq!(fs::read_to_string(&out).unwrap(), "<TEI>hello</TEI>");
}

#[test]
fn test_export_unknown_record_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);

    let (_, stderr, success) = run_packstore(&config_path, &["export", "schema", "missing.rng"]);
    assert!(!success);
    assert!(stderr.contains("no schema record named missing.rng"));
}

#[test]
fn test_dump_and_load_round_trip() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);
    run_packstore(
        &config_path,
        &["import", "schema", &fixture(&config_path, "tei.rng")],
    );

    let dump_path = config_path.parent().unwrap().join("dump.json");
    let (_, _, success) = run_packstore(
        &config_path,
        &["dump", "--out", dump_path.to_str().unwrap()],
    );
    assert!(success);

    // loading replaces the whole database with the dump's contents
    let (_, stderr, success) = run_packstore(
        &config_path,
        &["load", dump_path.to_str().unwrap(), "--force"],
    );
    assert!(success, "load failed: stderr={}", stderr);

    let (stdout, _, _) = run_packstore(&config_path, &["list", "schema"]);
    assert!(stdout.contains("tei.rng"));
}

#[test]
fn test_delete_unreferenced_pack() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);
    run_packstore(
        &config_path,
        &["import", "pack", &fixture(&config_path, "tei-pack.json")],
    );

    let (stdout, stderr, success) = run_packstore(&config_path, &["delete", "pack", "tei"]);
    assert!(success, "delete failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Deleted tei"));

    let (stdout, _, _) = run_packstore(&config_path, &["list", "pack"]);
    assert!(!stdout.contains("tei"));
}

#[test]
fn test_upgrade_with_nothing_obsolete() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);

    let (stdout, _, success) = run_packstore(&config_path, &["upgrade", "--yes"]);
    assert!(success);
    assert!(stdout.contains("Nothing to upgrade"));
}

#[test]
fn test_upgrade_removes_v1_packs_after_load() {
    let (_tmp, config_path) = setup_test_env();
    run_packstore(&config_path, &["init"]);

    // a dump carrying a version 1 pack, as an old installation would produce
    let dump_path = config_path.parent().unwrap().join("old.json");
    fs::write(
        &dump_path,
        serde_json::json!({
            "creationDate": "2020-01-01T00:00:00Z",
            "interchangeVersion": 1,
            "tables": {
                "chunks": [],
                "xmlfiles": [],
                "schemas": [],
                "metadata": [],
                "packs": [{
                    "id": 1,
                    "name": "old",
                    "recordVersion": 1,
                    "schema": "abc",
                    "mode": "generic",
                }],
            },
        })
        .to_string(),
    )
    .unwrap();
    let (_, stderr, success) = run_packstore(
        &config_path,
        &["load", dump_path.to_str().unwrap(), "--force"],
    );
    assert!(success, "load failed: stderr={}", stderr);

    let (stdout, stderr, success) = run_packstore(&config_path, &["upgrade", "--yes"]);
    assert!(success, "upgrade failed: stderr={}", stderr);
    assert!(stdout.contains("Upgrade applied"));

    let (stdout, _, _) = run_packstore(&config_path, &["list", "pack"]);
    assert!(!stdout.contains("old"));

    // the pre-upgrade backup landed in the configured directory
    let backups = config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("backups");
    assert_eq!(fs::read_dir(&backups).unwrap().count(), 1);
}

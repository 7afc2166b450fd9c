//! End-to-end CLI tests for the myrient-dl binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn myrient(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("myrient-dl").unwrap();
    cmd.arg("--db")
        .arg(dir.path().join("catalog.db"))
        .arg("--download-root")
        .arg(dir.path().join("downloads"))
        .env_remove("RUST_LOG");
    cmd
}

/// Without a subcommand clap prints usage and exits non-zero.
#[test]
fn test_binary_without_subcommand_shows_usage() {
    let mut cmd = Command::cargo_bin("myrient-dl").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("myrient-dl").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("politely download"))
        .stdout(predicate::str::contains("crawl"))
        .stdout(predicate::str::contains("verify"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("myrient-dl").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("myrient-dl"));
}

#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("myrient-dl").unwrap();
    cmd.arg("--invalid-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_init_creates_catalog() {
    let dir = TempDir::new().unwrap();
    myrient(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Catalog ready"))
        .stdout(predicate::str::contains("0 paused"));
    assert!(dir.path().join("catalog.db").exists());
}

#[test]
fn test_stats_json_on_empty_catalog() {
    let dir = TempDir::new().unwrap();
    let output = myrient(&dir)
        .args(["-q", "stats", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stats: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(stats["overall"]["total_entries"], 0);
    assert!(stats["collections"].as_array().unwrap().is_empty());
}

#[test]
fn test_search_on_empty_catalog_reports_no_matches() {
    let dir = TempDir::new().unwrap();
    myrient(&dir)
        .args(["search", "tetris"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No catalog entries matched"));
}

#[test]
fn test_verify_unknown_address_fails() {
    let dir = TempDir::new().unwrap();
    myrient(&dir)
        .args(["verify", "https://archive.example/files/missing.zip"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("SKIP"));
}

#[test]
fn test_invalid_config_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("myrient.conf");
    std::fs::write(&config, "crawl_max_depth = 0\n").unwrap();

    myrient(&dir)
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("crawl_max_depth"));
    assert!(!dir.path().join("catalog.db").exists());
}

/// Seeds a catalog with one completed and one failed Game Boy entry.
fn seeded_catalog(dir: &TempDir) {
    use myrient_core::catalog::{Cadence, CollectionSpec, ContentType, NewEntry};
    use myrient_core::search::normalize;
    use myrient_core::{Catalog, Database, TransferStatus};

    let db_path = dir.path().join("catalog.db");
    tokio_test::block_on(async {
        let catalog = Catalog::new(Database::new(&db_path).await.unwrap());
        for (name, status) in [
            ("Tetris (World).zip", TransferStatus::Completed),
            ("Dr. Mario (World).zip", TransferStatus::Failed),
        ] {
            let address = format!("https://archive.example/files/{}", urlencoding::encode(name));
            catalog
                .upsert(&NewEntry {
                    address: address.clone(),
                    name: name.to_string(),
                    normalized_name: normalize(name),
                    size: Some(32_768),
                    size_exact: true,
                    console: Some("Game Boy".to_string()),
                    region: Some("World".to_string()),
                    collection: CollectionSpec {
                        name: "No-Intro".to_string(),
                        content_type: ContentType::Cartridge,
                        cadence: Cadence::Daily,
                    },
                    parent_path: "No-Intro/Nintendo - Game Boy".to_string(),
                    format: "zip".to_string(),
                    requires_conversion: false,
                })
                .await
                .unwrap();
            catalog
                .update_transfer_state(&address, TransferStatus::Downloading, 0)
                .await
                .unwrap();
            match status {
                TransferStatus::Failed => catalog
                    .mark_failed(&address, 0, "HTTP 404 Not Found")
                    .await
                    .unwrap(),
                _ => catalog
                    .update_transfer_state(&address, status, 32_768)
                    .await
                    .unwrap(),
            }
        }
        catalog.database().close().await;
    });
}

#[test]
fn test_status_lists_failed_entries() {
    let dir = TempDir::new().unwrap();
    seeded_catalog(&dir);

    myrient(&dir)
        .args(["-q", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed: 1"))
        .stdout(predicate::str::contains("failed: 1"))
        .stdout(predicate::str::contains("Dr. Mario (World).zip"))
        .stdout(predicate::str::contains("HTTP 404"));
}

#[test]
fn test_search_json_ranks_exact_title_first() {
    let dir = TempDir::new().unwrap();
    seeded_catalog(&dir);

    let output = myrient(&dir)
        .args(["-q", "search", "tetris", "--console", "gb", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let hits: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["entry"]["name"], "Tetris (World).zip");
    assert_eq!(hits[0]["entry"]["status"], "completed");
}

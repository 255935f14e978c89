//! Integration tests for the on-disk result store format.

use docharvest_core::store::{OutcomeRecord, OutcomeStatus, ResultStore, ResumePolicy, StoreError};
use tempfile::TempDir;

#[tokio::test]
async fn test_hand_written_store_loads_and_keeps_non_ascii() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("results.json");
    std::fs::write(
        &path,
        r#"{
    "https://site.test/รายงาน": {
        "source_url": "https://site.test/รายงาน",
        "status": "success",
        "download_url": "https://site.test/รายงาน.pdf",
        "downloaded_filename": "รายงาน_1700000000000.pdf"
    },
    "17": {
        "source_url": "https://site.test/item/17",
        "status": "no_link_found"
    }
}"#,
    )
    .expect("write");

    let mut store = ResultStore::load(&path, ResumePolicy::default()).expect("load");
    assert_eq!(store.len(), 2);
    assert!(store.contains_terminal("https://site.test/รายงาน"));
    assert!(!store.contains_terminal("17"));
    assert_eq!(store.get("17").expect("record").runs, 0);

    store.record("17", OutcomeRecord::no_link_found("https://site.test/item/17"));
    store.save().await.expect("save");

    let raw = std::fs::read_to_string(&path).expect("read");
    assert!(raw.contains("รายงาน_1700000000000.pdf"));
    assert!(!raw.contains("\\u"), "non-ASCII must not be escaped");
    assert!(!raw.contains("\"runs\""));
    let reloaded = ResultStore::load(&path, ResumePolicy::default()).expect("reload");
    assert_eq!(reloaded.get("17").expect("record").runs, 0);
    assert_eq!(
        reloaded.get("17").expect("record").status,
        OutcomeStatus::NoLinkFound
    );
}

#[test]
fn test_corrupt_store_is_fatal_and_left_untouched() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("results.json");
    let garbage = "{\"1\": {\"source_url\": \"https://x.test\", \"status\": \"succ";
    std::fs::write(&path, garbage).expect("write");

    let err = ResultStore::load(&path, ResumePolicy::default()).expect_err("corrupt");
    assert!(matches!(err, StoreError::Corrupt { .. }));
    assert!(err.to_string().contains("results.json"));
    assert_eq!(std::fs::read_to_string(&path).expect("read"), garbage);
}

#[test]
fn test_unknown_status_is_corrupt() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("results.json");
    std::fs::write(
        &path,
        r#"{"1": {"source_url": "https://x.test/1", "status": "maybe"}}"#,
    )
    .expect("write");

    let err = ResultStore::load(&path, ResumePolicy::default()).expect_err("corrupt");
    assert!(matches!(err, StoreError::Corrupt { .. }));
}

#[test]
fn test_filename_without_success_is_corrupt() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("results.json");
    std::fs::write(
        &path,
        r#"{"1": {"source_url": "https://x.test/1", "status": "download_failed", "downloaded_filename": "a.pdf"}}"#,
    )
    .expect("write");

    assert!(matches!(
        ResultStore::load(&path, ResumePolicy::default()),
        Err(StoreError::Corrupt { .. })
    ));
}

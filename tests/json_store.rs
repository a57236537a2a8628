mod common;

use common::*;
use image_guardian::{
    model::{CheckRecord, CheckStatus, ImageId, ListOrder, SearchOutcome, UserDecision},
    recording::{RecordOptions, build_record},
    risk::ThresholdPolicy,
    store::{JsonFileStore, ResultStore},
    util::now_utc,
};

fn record(id: u64) -> CheckRecord {
    let outcome = SearchOutcome {
        search_id: None,
        match_count: 0,
        match_percentage: Some(0.0),
        raw_result: serde_json::json!({}),
    };
    build_record(
        None,
        ImageId(id),
        &url_for(id),
        &outcome,
        &ThresholdPolicy::default(),
        RecordOptions::default(),
    )
}

#[test]
fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("store.json");
    {
        let store = JsonFileStore::open(&path).unwrap();
        seed(&store, &[1, 2]);
        assert!(store.upsert_record(record(1)).unwrap());
        store
            .set_scalar("bulk_run", serde_json::json!({"status": "idle"}))
            .unwrap();
    }
    assert!(path.exists());

    let store = JsonFileStore::open(&path).unwrap();
    let rec = store.get_record(ImageId(1)).unwrap().expect("record");
    assert_eq!(rec.image_url, url_for(1));
    assert_eq!(
        store.get_scalar("bulk_run").unwrap(),
        Some(serde_json::json!({"status": "idle"}))
    );
    assert_eq!(
        store.list_unchecked_image_ids(ListOrder::NewestFirst).unwrap(),
        ids(&[2])
    );

    store.delete_scalar("bulk_run").unwrap();
    assert_eq!(store.get_scalar("bulk_run").unwrap(), None);
}

#[test]
fn unchecked_listing_follows_upload_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(&dir.path().join("store.json")).unwrap();
    seed(&store, &[30, 10, 20, 40]);

    let mut pending = record(20);
    pending.status = CheckStatus::Pending;
    store.upsert_record(pending).unwrap();
    store.upsert_record(record(40)).unwrap();

    assert_eq!(
        store.list_unchecked_image_ids(ListOrder::NewestFirst).unwrap(),
        ids(&[20, 10, 30])
    );
    assert_eq!(
        store.list_unchecked_image_ids(ListOrder::OldestFirst).unwrap(),
        ids(&[30, 10, 20])
    );
}

#[test]
fn registering_twice_adds_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(&dir.path().join("store.json")).unwrap();
    seed(&store, &[1, 2]);
    let again = store.list_unchecked_image_ids(ListOrder::OldestFirst).unwrap();
    seed(&store, &[1, 2]);
    assert_eq!(store.list_unchecked_image_ids(ListOrder::OldestFirst).unwrap(), again);
}

#[test]
fn upsert_keeps_decision_and_creation_time() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(&dir.path().join("store.json")).unwrap();
    let first = record(5);
    store.upsert_record(first.clone()).unwrap();
    assert!(store.set_user_decision(ImageId(5), UserDecision::Safe).unwrap());
    assert!(!store.set_user_decision(ImageId(6), UserDecision::Safe).unwrap());

    let mut second = record(5);
    second.user_decision = None;
    second.created_at = now_utc();
    store.upsert_record(second).unwrap();

    let stored = store.get_record(ImageId(5)).unwrap().unwrap();
    assert_eq!(stored.user_decision, Some(UserDecision::Safe));
    assert_eq!(stored.created_at, first.created_at);
}

#[test]
fn old_records_are_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(&dir.path().join("store.json")).unwrap();
    let mut old = record(1);
    old.checked_at = now_utc() - time::Duration::days(120);
    store.upsert_record(old).unwrap();
    store.upsert_record(record(2)).unwrap();

    let cutoff = now_utc() - time::Duration::days(90);
    assert_eq!(store.delete_records_checked_before(cutoff).unwrap(), 1);
    assert!(store.get_record(ImageId(1)).unwrap().is_none());
    assert!(store.get_record(ImageId(2)).unwrap().is_some());
}

#[test]
fn corrupt_file_fails_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    std::fs::write(&path, b"{not json").unwrap();
    assert!(JsonFileStore::open(&path).is_err());

    std::fs::write(&path, b"").unwrap();
    let store = JsonFileStore::open(&path).unwrap();
    assert!(store.list_records().unwrap().is_empty());
}

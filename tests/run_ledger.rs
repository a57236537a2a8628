mod common;

use common::*;
use image_guardian::{
    model::{CheckRecord, ImageId, ImageRef, ListOrder, RiskLevel, UserDecision},
    scheduler::{BulkRunState, RunLedger, RunStatus},
    store::{JsonFileStore, ResultStore, ScalarUpdate},
    util::now_utc,
};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use time::OffsetDateTime;

/// File store that, once armed, lets a second store on the same file cancel
/// the run while its own update sits between load and save.
struct InterleavingStore {
    inner: JsonFileStore,
    path: PathBuf,
    armed: AtomicBool,
    other: Mutex<Option<JoinHandle<bool>>>,
}

impl InterleavingStore {
    fn cancel_from_other_store(&self) {
        let path = self.path.clone();
        let handle = std::thread::spawn(move || {
            let other: Arc<dyn ResultStore> = Arc::new(JsonFileStore::open(&path).unwrap());
            RunLedger::new(other).cancel().unwrap()
        });
        *self.other.lock().unwrap() = Some(handle);
        std::thread::sleep(Duration::from_millis(50));
    }
}

impl ResultStore for InterleavingStore {
    fn get_record(&self, id: ImageId) -> Result<Option<CheckRecord>> {
        self.inner.get_record(id)
    }

    fn upsert_record(&self, record: CheckRecord) -> Result<bool> {
        self.inner.upsert_record(record)
    }

    fn list_unchecked_image_ids(&self, order: ListOrder) -> Result<Vec<ImageId>> {
        self.inner.list_unchecked_image_ids(order)
    }

    fn get_scalar(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.inner.get_scalar(key)
    }

    fn set_scalar(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.inner.set_scalar(key, value)
    }

    fn delete_scalar(&self, key: &str) -> Result<()> {
        self.inner.delete_scalar(key)
    }

    fn update_scalar(&self, key: &str, f: &mut ScalarUpdate<'_>) -> Result<()> {
        self.inner.update_scalar(key, &mut |current| {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.cancel_from_other_store();
            }
            f(current)
        })
    }

    fn register_images(&self, images: &[ImageRef]) -> Result<usize> {
        self.inner.register_images(images)
    }

    fn set_user_decision(&self, id: ImageId, decision: UserDecision) -> Result<bool> {
        self.inner.set_user_decision(id, decision)
    }

    fn set_manual_risk(&self, id: ImageId, level: Option<RiskLevel>, image_url: &str) -> Result<()> {
        self.inner.set_manual_risk(id, level, image_url)
    }

    fn list_images(&self) -> Result<Vec<ImageRef>> {
        self.inner.list_images()
    }

    fn list_records(&self) -> Result<Vec<CheckRecord>> {
        self.inner.list_records()
    }

    fn delete_records_checked_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        self.inner.delete_records_checked_before(cutoff)
    }
}

#[test]
fn cancel_from_another_store_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let store = Arc::new(InterleavingStore {
        inner: JsonFileStore::open(&path).unwrap(),
        path: path.clone(),
        armed: AtomicBool::new(false),
        other: Mutex::new(None),
    });
    let ledger = RunLedger::new(Arc::clone(&store) as Arc<dyn ResultStore>);
    ledger
        .update(|st| *st = BulkRunState::begin(ids(&[1, 2, 3]), now_utc()))
        .unwrap();

    store.armed.store(true, Ordering::SeqCst);
    let popped = ledger.update(|st| st.pop_next()).unwrap();
    assert_eq!(popped, Some(ImageId(1)));

    let handle = store.other.lock().unwrap().take().expect("cancel thread");
    assert!(handle.join().unwrap());

    let st = ledger.read().unwrap();
    assert_eq!(st.status, RunStatus::Cancelled);
    assert!(st.queue.is_empty());
}

#[test]
fn update_scalar_sees_the_stored_value() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(&dir.path().join("store.json")).unwrap();

    store
        .update_scalar("counter", &mut |current| {
            assert_eq!(current, None);
            Ok(serde_json::json!(1))
        })
        .unwrap();
    store
        .update_scalar("counter", &mut |current| {
            let n = current.and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(serde_json::json!(n + 1))
        })
        .unwrap();
    assert_eq!(store.get_scalar("counter").unwrap(), Some(serde_json::json!(2)));

    let failed = store.update_scalar("counter", &mut |_| anyhow::bail!("rejected"));
    assert!(failed.is_err());
    assert_eq!(store.get_scalar("counter").unwrap(), Some(serde_json::json!(2)));
}

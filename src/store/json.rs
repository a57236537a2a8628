use super::{ResultStore, ScalarUpdate, StoreDocument, StoreFile};
use crate::model::{CheckRecord, ImageId, ImageRef, ListOrder, RiskLevel, UserDecision};
use crate::util::ensure_dir;
use anyhow::{anyhow, Context, Result};
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;
use tracing::debug;

/// Whole-document JSON store.
///
/// Every call reloads the file, so writes made by another process (an
/// operator running `bulk cancel`, say) are seen on the next access. Writes
/// go to a sibling temp file that is renamed over the original.
///
/// Each call holds an advisory lock on a sibling `.json.lock` file from load
/// to save, so read-modify-write sequences from different processes never
/// interleave.
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<RwLock<File>>,
}

impl JsonFileStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
        }
        let lock_path = path.with_extension("json.lock");
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("opening store lock: {}", lock_path.display()))?;
        let store = Self {
            path: path.to_path_buf(),
            lock: Mutex::new(RwLock::new(lock_file)),
        };
        // Fail early on a corrupt file rather than on the first tick.
        store.read(|_| ())?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument> {
        if !self.path.exists() {
            return Ok(StoreDocument::default());
        }
        let raw = std::fs::read(&self.path)
            .with_context(|| format!("reading store: {}", self.path.display()))?;
        if raw.is_empty() {
            return Ok(StoreDocument::default());
        }
        let file: StoreFile = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing store: {}", self.path.display()))?;
        Ok(file.into())
    }

    fn save(&self, doc: &StoreDocument) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&StoreFile::from(doc))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("writing store: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing store: {}", self.path.display()))?;
        debug!("store saved {}", self.path.display());
        Ok(())
    }

    fn file_lock(&self) -> Result<MutexGuard<'_, RwLock<File>>> {
        self.lock.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T) -> Result<T> {
        let lock = self.file_lock()?;
        let _shared = lock.read().context("locking store file")?;
        let doc = self.load()?;
        Ok(f(&doc))
    }

    fn write<T>(&self, f: impl FnOnce(&mut StoreDocument) -> T) -> Result<T> {
        let mut lock = self.file_lock()?;
        let _exclusive = lock.write().context("locking store file")?;
        let mut doc = self.load()?;
        let out = f(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }
}

impl ResultStore for JsonFileStore {
    fn get_record(&self, id: ImageId) -> Result<Option<CheckRecord>> {
        self.read(|d| d.get_record(id))
    }

    fn upsert_record(&self, record: CheckRecord) -> Result<bool> {
        self.write(|d| d.upsert_record(record))
    }

    fn list_unchecked_image_ids(&self, order: ListOrder) -> Result<Vec<ImageId>> {
        self.read(|d| d.list_unchecked(order))
    }

    fn get_scalar(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.read(|d| d.get_scalar(key))
    }

    fn set_scalar(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.write(|d| d.set_scalar(key, value))
    }

    fn delete_scalar(&self, key: &str) -> Result<()> {
        self.write(|d| d.delete_scalar(key))
    }

    fn update_scalar(&self, key: &str, f: &mut ScalarUpdate<'_>) -> Result<()> {
        self.write(|d| d.update_scalar(key, f))?
    }

    fn register_images(&self, images: &[ImageRef]) -> Result<usize> {
        self.write(|d| d.register_images(images))
    }

    fn set_user_decision(&self, id: ImageId, decision: UserDecision) -> Result<bool> {
        self.write(|d| d.set_user_decision(id, decision))
    }

    fn set_manual_risk(&self, id: ImageId, level: Option<RiskLevel>, image_url: &str) -> Result<()> {
        self.write(|d| d.set_manual_risk(id, level, image_url))
    }

    fn list_images(&self) -> Result<Vec<ImageRef>> {
        self.read(|d| d.list_images())
    }

    fn list_records(&self) -> Result<Vec<CheckRecord>> {
        self.read(|d| d.list_records())
    }

    fn delete_records_checked_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        self.write(|d| d.delete_checked_before(cutoff))
    }
}

use super::{ResultStore, ScalarUpdate, StoreDocument};
use crate::model::{CheckRecord, ImageId, ImageRef, ListOrder, RiskLevel, UserDecision};
use anyhow::{anyhow, Result};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn doc(&self) -> Result<MutexGuard<'_, StoreDocument>> {
        self.doc.lock().map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

impl ResultStore for MemoryStore {
    fn get_record(&self, id: ImageId) -> Result<Option<CheckRecord>> {
        Ok(self.doc()?.get_record(id))
    }

    fn upsert_record(&self, record: CheckRecord) -> Result<bool> {
        Ok(self.doc()?.upsert_record(record))
    }

    fn list_unchecked_image_ids(&self, order: ListOrder) -> Result<Vec<ImageId>> {
        Ok(self.doc()?.list_unchecked(order))
    }

    fn get_scalar(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.doc()?.get_scalar(key))
    }

    fn set_scalar(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.doc()?.set_scalar(key, value);
        Ok(())
    }

    fn delete_scalar(&self, key: &str) -> Result<()> {
        self.doc()?.delete_scalar(key);
        Ok(())
    }

    fn update_scalar(&self, key: &str, f: &mut ScalarUpdate<'_>) -> Result<()> {
        self.doc()?.update_scalar(key, f)
    }

    fn register_images(&self, images: &[ImageRef]) -> Result<usize> {
        Ok(self.doc()?.register_images(images))
    }

    fn set_user_decision(&self, id: ImageId, decision: UserDecision) -> Result<bool> {
        Ok(self.doc()?.set_user_decision(id, decision))
    }

    fn set_manual_risk(&self, id: ImageId, level: Option<RiskLevel>, image_url: &str) -> Result<()> {
        self.doc()?.set_manual_risk(id, level, image_url);
        Ok(())
    }

    fn list_images(&self) -> Result<Vec<ImageRef>> {
        Ok(self.doc()?.list_images())
    }

    fn list_records(&self) -> Result<Vec<CheckRecord>> {
        Ok(self.doc()?.list_records())
    }

    fn delete_records_checked_before(&self, cutoff: OffsetDateTime) -> Result<usize> {
        Ok(self.doc()?.delete_checked_before(cutoff))
    }
}

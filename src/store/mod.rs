pub mod json;
pub mod memory;

use crate::model::{CheckRecord, CheckStatus, ImageId, ImageRef, ListOrder, RiskLevel, UserDecision};
use crate::util::{now_utc, sha256_hex};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

/// Durable per-image records plus a small scalar key/value area.
///
/// Implementations must keep a stored, non-null `user_decision` when a
/// record is upserted again.
pub trait ResultStore: Send + Sync {
    fn get_record(&self, id: ImageId) -> Result<Option<CheckRecord>>;
    fn upsert_record(&self, record: CheckRecord) -> Result<bool>;
    fn list_unchecked_image_ids(&self, order: ListOrder) -> Result<Vec<ImageId>>;

    fn get_scalar(&self, key: &str) -> Result<Option<serde_json::Value>>;
    fn set_scalar(&self, key: &str, value: serde_json::Value) -> Result<()>;
    fn delete_scalar(&self, key: &str) -> Result<()>;
    /// Read-modify-write of one scalar as a single step. Nothing else may
    /// write the store between the read handed to `f` and the write of its
    /// result. An error from `f` leaves the scalar untouched.
    fn update_scalar(&self, key: &str, f: &mut ScalarUpdate<'_>) -> Result<()>;

    /// Adds images to the catalogue the backlog is computed from.
    /// Returns how many were new.
    fn register_images(&self, images: &[ImageRef]) -> Result<usize>;
    /// Human review. Returns false when the image has no record.
    fn set_user_decision(&self, id: ImageId, decision: UserDecision) -> Result<bool>;
    /// Human override of the computed tier; `None` clears it. An image with
    /// no record gets a `pending` one carrying the override.
    fn set_manual_risk(&self, id: ImageId, level: Option<RiskLevel>, image_url: &str) -> Result<()>;
    fn list_images(&self) -> Result<Vec<ImageRef>>;
    fn list_records(&self) -> Result<Vec<CheckRecord>>;
    fn delete_records_checked_before(&self, cutoff: OffsetDateTime) -> Result<usize>;
}

pub type ScalarUpdate<'a> = dyn FnMut(Option<serde_json::Value>) -> Result<serde_json::Value> + 'a;

/// In-memory shape shared by the store implementations.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreDocument {
    images: BTreeMap<ImageId, ImageRef>,
    records: BTreeMap<ImageId, CheckRecord>,
    scalars: BTreeMap<String, serde_json::Value>,
}

/// On-disk layout. Records are a list so ids never become JSON object keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreFile {
    #[serde(default)]
    images: Vec<ImageRef>,
    #[serde(default)]
    records: Vec<CheckRecord>,
    #[serde(default)]
    scalars: BTreeMap<String, serde_json::Value>,
}

impl From<StoreFile> for StoreDocument {
    fn from(f: StoreFile) -> Self {
        Self {
            images: f.images.into_iter().map(|i| (i.id, i)).collect(),
            records: f.records.into_iter().map(|r| (r.image_id, r)).collect(),
            scalars: f.scalars,
        }
    }
}

impl From<&StoreDocument> for StoreFile {
    fn from(d: &StoreDocument) -> Self {
        Self {
            images: d.images.values().cloned().collect(),
            records: d.records.values().cloned().collect(),
            scalars: d.scalars.clone(),
        }
    }
}

impl StoreDocument {
    pub(crate) fn get_record(&self, id: ImageId) -> Option<CheckRecord> {
        self.records.get(&id).cloned()
    }

    pub(crate) fn upsert_record(&mut self, mut record: CheckRecord) -> bool {
        if let Some(existing) = self.records.get(&record.image_id) {
            if existing.user_decision.is_some() {
                record.user_decision = existing.user_decision;
            }
            if existing.manual_risk_level.is_some() {
                record.manual_risk_level = existing.manual_risk_level;
            }
            record.created_at = existing.created_at;
        }
        self.records.insert(record.image_id, record);
        true
    }

    pub(crate) fn list_unchecked(&self, order: ListOrder) -> Vec<ImageId> {
        let mut pending: Vec<&ImageRef> = self
            .images
            .values()
            .filter(|img| match self.records.get(&img.id) {
                None => true,
                Some(r) => r.status == CheckStatus::Pending,
            })
            .collect();
        pending.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
        if order == ListOrder::NewestFirst {
            pending.reverse();
        }
        pending.into_iter().map(|img| img.id).collect()
    }

    pub(crate) fn get_scalar(&self, key: &str) -> Option<serde_json::Value> {
        self.scalars.get(key).cloned()
    }

    pub(crate) fn set_scalar(&mut self, key: &str, value: serde_json::Value) {
        self.scalars.insert(key.to_string(), value);
    }

    pub(crate) fn delete_scalar(&mut self, key: &str) {
        self.scalars.remove(key);
    }

    pub(crate) fn update_scalar(&mut self, key: &str, f: &mut ScalarUpdate<'_>) -> Result<()> {
        let next = f(self.get_scalar(key))?;
        self.set_scalar(key, next);
        Ok(())
    }

    pub(crate) fn register_images(&mut self, images: &[ImageRef]) -> usize {
        let mut added = 0;
        for img in images {
            if self.images.insert(img.id, img.clone()).is_none() {
                added += 1;
            }
        }
        added
    }

    pub(crate) fn set_user_decision(&mut self, id: ImageId, decision: UserDecision) -> bool {
        match self.records.get_mut(&id) {
            Some(r) => {
                r.user_decision = Some(decision);
                r.updated_at = now_utc();
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_manual_risk(&mut self, id: ImageId, level: Option<RiskLevel>, image_url: &str) {
        let now = now_utc();
        if let Some(r) = self.records.get_mut(&id) {
            r.manual_risk_level = level;
            r.updated_at = now;
            return;
        }
        if level.is_none() {
            return;
        }
        self.records.insert(
            id,
            CheckRecord {
                image_id: id,
                image_url: image_url.to_string(),
                image_hash: sha256_hex(image_url.as_bytes()),
                status: CheckStatus::Pending,
                search_id: None,
                match_count: 0,
                match_percentage: None,
                risk_level: RiskLevel::Unknown,
                manual_risk_level: level,
                user_decision: None,
                raw_result: serde_json::Value::Null,
                checked_at: now,
                created_at: now,
                updated_at: now,
            },
        );
    }

    pub(crate) fn list_images(&self) -> Vec<ImageRef> {
        self.images.values().cloned().collect()
    }

    pub(crate) fn list_records(&self) -> Vec<CheckRecord> {
        self.records.values().cloned().collect()
    }

    pub(crate) fn delete_checked_before(&mut self, cutoff: OffsetDateTime) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| r.checked_at >= cutoff);
        before - self.records.len()
    }
}

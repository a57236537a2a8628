use crate::library::{ImageResolver, ResolveError};
use crate::model::{CheckRecord, ImageId, MediaCounts, RiskLevel, RiskStats, UserDecision};
use crate::store::ResultStore;
use crate::util::now_utc;
use anyhow::{bail, Result};
use time::Duration;
use tracing::info;

const DEFAULT_RECENT_LIMIT: usize = 10;
const MAX_RECENT_LIMIT: usize = 100;

pub fn mark(store: &dyn ResultStore, id: ImageId, decision: UserDecision) -> Result<()> {
    if !store.set_user_decision(id, decision)? {
        bail!("image {id} has not been checked yet");
    }
    info!("image={} marked {:?}", id, decision);
    Ok(())
}

/// Pins (or with `None`, clears) the tier shown for an image. An image that
/// was never checked gets a pending record holding just the override.
pub fn set_manual_risk(
    store: &dyn ResultStore,
    resolver: &dyn ImageResolver,
    id: ImageId,
    level: Option<RiskLevel>,
) -> Result<()> {
    let url = match resolver.resolve_checkable_url(id) {
        Ok(url) => url,
        Err(ResolveError::NotFound(_)) => bail!("image {id} not found"),
    };
    store.set_manual_risk(id, level, &url)?;
    match level {
        Some(level) => info!("image={} manual risk {}", id, level),
        None => info!("image={} manual risk cleared", id),
    }
    Ok(())
}

pub fn risk_stats(store: &dyn ResultStore) -> Result<RiskStats> {
    let records = store.list_records()?;
    Ok(RiskStats::from_records(&records))
}

pub fn media_counts(store: &dyn ResultStore) -> Result<MediaCounts> {
    let images = store.list_images()?;
    let records = store.list_records()?;
    Ok(MediaCounts::from_parts(&images, &records))
}

/// Newest checks first. Limits outside 1..=100 fall back to 10.
pub fn recent_checks(store: &dyn ResultStore, limit: usize) -> Result<Vec<CheckRecord>> {
    let limit = if (1..=MAX_RECENT_LIMIT).contains(&limit) {
        limit
    } else {
        DEFAULT_RECENT_LIMIT
    };
    let mut records = store.list_records()?;
    records.sort_by(|a, b| b.checked_at.cmp(&a.checked_at).then(b.image_id.cmp(&a.image_id)));
    records.truncate(limit);
    Ok(records)
}

/// Deletes records checked more than `days` days ago.
pub fn cleanup_old_checks(store: &dyn ResultStore, days: u32) -> Result<usize> {
    let cutoff = now_utc() - Duration::days(i64::from(days));
    let removed = store.delete_records_checked_before(cutoff)?;
    info!("cleanup removed={} older_than_days={}", removed, days);
    Ok(removed)
}

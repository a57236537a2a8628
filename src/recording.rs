use crate::library::{ImageResolver, ResolveError};
use crate::model::{CheckRecord, CheckStatus, ImageId, RiskLevel, SearchOutcome, UserDecision};
use crate::provider::SearchProvider;
use crate::risk::{RiskInput, RiskPolicy};
use crate::store::ResultStore;
use crate::util::{now_utc, sha256_hex, truncate_chars};
use anyhow::{anyhow, bail, Result};
use serde_json::json;
use tracing::{debug, info};

const MAX_SEARCH_ID_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordOptions {
    /// A fresh `low` verdict sets `user_decision = safe` when none exists.
    pub auto_mark_low_risk_safe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedFormat,
    NotFound,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnsupportedFormat => "unsupported_format",
            SkipReason::NotFound => "not_found",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            SkipReason::UnsupportedFormat => "Unsupported image format - skipped search",
            SkipReason::NotFound => "Image could not be resolved - skipped search",
        }
    }
}

pub fn build_record(
    existing: Option<&CheckRecord>,
    image_id: ImageId,
    image_url: &str,
    outcome: &SearchOutcome,
    policy: &dyn RiskPolicy,
    opts: RecordOptions,
) -> CheckRecord {
    let now = now_utc();
    let match_percentage = outcome
        .match_percentage
        .filter(|p| !p.is_nan())
        .map(|p| p.clamp(0.0, 100.0));
    let input = RiskInput {
        match_percentage,
        match_count: Some(outcome.match_count),
        raw_result: &outcome.raw_result,
    };
    let risk_level = policy.classify(&input);
    let manual_risk_level = existing.and_then(|r| r.manual_risk_level);
    let effective = manual_risk_level.unwrap_or(risk_level);

    let user_decision = match existing.and_then(|r| r.user_decision) {
        Some(d) => Some(d),
        None if opts.auto_mark_low_risk_safe && effective == RiskLevel::Low => {
            Some(UserDecision::Safe)
        }
        None => None,
    };

    CheckRecord {
        image_id,
        image_url: image_url.to_string(),
        image_hash: sha256_hex(image_url.as_bytes()),
        status: CheckStatus::Completed,
        search_id: outcome
            .search_id
            .as_deref()
            .map(|s| truncate_chars(s.trim(), MAX_SEARCH_ID_CHARS))
            .filter(|s| !s.is_empty()),
        match_count: outcome.match_count,
        match_percentage,
        risk_level,
        manual_risk_level,
        user_decision,
        raw_result: outcome.raw_result.clone(),
        checked_at: now,
        created_at: existing.map(|r| r.created_at).unwrap_or(now),
        updated_at: now,
    }
}

/// Classifies a provider outcome and upserts the resulting record.
pub fn record_outcome(
    store: &dyn ResultStore,
    policy: &dyn RiskPolicy,
    opts: RecordOptions,
    image_id: ImageId,
    image_url: &str,
    outcome: &SearchOutcome,
) -> Result<CheckRecord> {
    let existing = store.get_record(image_id)?;
    let record = build_record(existing.as_ref(), image_id, image_url, outcome, policy, opts);
    if !store.upsert_record(record.clone())? {
        bail!("store rejected record for image {image_id}");
    }
    debug!(
        "recorded image={} risk={} matches={} pct={:?}",
        image_id, record.risk_level, record.match_count, record.match_percentage
    );
    Ok(record)
}

/// Records an inconclusive (`unknown`) result for an image that was never
/// eligible for a search.
pub fn record_skip(
    store: &dyn ResultStore,
    image_id: ImageId,
    image_url: Option<&str>,
    reason: SkipReason,
) -> Result<CheckRecord> {
    let now = now_utc();
    let existing = store.get_record(image_id)?;
    let url = image_url.unwrap_or_default();
    let record = CheckRecord {
        image_id,
        image_url: url.to_string(),
        image_hash: sha256_hex(url.as_bytes()),
        status: CheckStatus::Completed,
        search_id: None,
        match_count: 0,
        match_percentage: None,
        risk_level: RiskLevel::Unknown,
        manual_risk_level: existing.as_ref().and_then(|r| r.manual_risk_level),
        user_decision: existing.as_ref().and_then(|r| r.user_decision),
        raw_result: json!({
            "reason": reason.as_str(),
            "message": reason.message(),
        }),
        checked_at: now,
        created_at: existing.as_ref().map(|r| r.created_at).unwrap_or(now),
        updated_at: now,
    };
    if !store.upsert_record(record.clone())? {
        bail!("store rejected skip record for image {image_id}");
    }
    debug!("skipped image={} reason={}", image_id, reason.as_str());
    Ok(record)
}

/// Manual, one-off check of a single image outside any bulk run.
pub fn check_single_image(
    store: &dyn ResultStore,
    provider: &dyn SearchProvider,
    resolver: &dyn ImageResolver,
    policy: &dyn RiskPolicy,
    opts: RecordOptions,
    image_id: ImageId,
) -> Result<CheckRecord> {
    let url = match resolver.resolve_checkable_url(image_id) {
        Ok(url) => url,
        Err(ResolveError::NotFound(_)) => bail!("image {image_id} not found"),
    };
    if !resolver.is_supported_format(image_id) {
        return record_skip(store, image_id, Some(&url), SkipReason::UnsupportedFormat);
    }

    let remaining = provider.get_remaining_quota()?;
    if remaining <= 0 {
        return Err(anyhow!("no remaining searches available"));
    }

    let outcome = provider.check_image(&url)?;
    let record = record_outcome(store, policy, opts, image_id, &url, &outcome)?;
    info!("checked image={} risk={}", image_id, record.effective_risk());
    Ok(record)
}

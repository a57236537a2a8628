use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use time::OffsetDateTime;

/// Opaque identifier of an image in the host's media library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub u64);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ImageId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    High,
    Medium,
    Low,
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
            RiskLevel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum UserDecision {
    Safe,
    Unsafe,
}

/// One risk-check result per image. Re-checks update in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRecord {
    pub image_id: ImageId,
    pub image_url: String,
    /// sha256 of the URL, not of the pixel data.
    pub image_hash: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub search_id: Option<String>,
    pub match_count: u64,
    #[serde(default)]
    pub match_percentage: Option<f64>,
    pub risk_level: RiskLevel,
    /// Operator override. Survives re-checks and wins over `risk_level`.
    #[serde(default)]
    pub manual_risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub user_decision: Option<UserDecision>,
    #[serde(default)]
    pub raw_result: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl CheckRecord {
    pub fn is_checked(&self) -> bool {
        self.status != CheckStatus::Pending
    }

    pub fn effective_risk(&self) -> RiskLevel {
        self.manual_risk_level.unwrap_or(self.risk_level)
    }
}

/// What the search provider returned for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    #[serde(default)]
    pub search_id: Option<String>,
    pub match_count: u64,
    #[serde(default)]
    pub match_percentage: Option<f64>,
    #[serde(default)]
    pub raw_result: serde_json::Value,
}

/// Known image, as registered by the host library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: ImageId,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskStats {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    pub unknown: u64,
    pub total: u64,
}

impl RiskStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a CheckRecord>) -> Self {
        let mut stats = RiskStats::default();
        for r in records {
            if r.status != CheckStatus::Completed {
                continue;
            }
            match r.effective_risk() {
                RiskLevel::High => stats.high += 1,
                RiskLevel::Medium => stats.medium += 1,
                RiskLevel::Low => stats.low += 1,
                RiskLevel::Unknown => stats.unknown += 1,
            }
            stats.total += 1;
        }
        stats
    }
}

/// Review progress within one risk tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub total: u64,
    pub reviewed: u64,
    #[serde(rename = "safe")]
    pub marked_safe: u64,
    #[serde(rename = "unsafe")]
    pub marked_unsafe: u64,
}

impl TierCounts {
    fn add(&mut self, decision: Option<UserDecision>) {
        self.total += 1;
        match decision {
            Some(UserDecision::Safe) => self.marked_safe += 1,
            Some(UserDecision::Unsafe) => self.marked_unsafe += 1,
            None => return,
        }
        self.reviewed += 1;
    }
}

/// Library-wide counts: how much of the library has a completed check, and
/// how review is going in each actionable tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaCounts {
    pub total: u64,
    pub checked: u64,
    pub unchecked: u64,
    pub high: TierCounts,
    pub medium: TierCounts,
    pub low: TierCounts,
}

impl MediaCounts {
    /// An image counts as checked once it has a completed record. Records
    /// for ids outside `images` are ignored.
    pub fn from_parts<'a>(
        images: &[ImageRef],
        records: impl IntoIterator<Item = &'a CheckRecord>,
    ) -> Self {
        let known: HashSet<ImageId> = images.iter().map(|i| i.id).collect();
        let mut counts = MediaCounts {
            total: known.len() as u64,
            ..MediaCounts::default()
        };
        for r in records {
            if r.status != CheckStatus::Completed || !known.contains(&r.image_id) {
                continue;
            }
            counts.checked += 1;
            match r.effective_risk() {
                RiskLevel::High => counts.high.add(r.user_decision),
                RiskLevel::Medium => counts.medium.add(r.user_decision),
                RiskLevel::Low => counts.low.add(r.user_decision),
                RiskLevel::Unknown => {}
            }
        }
        counts.unchecked = counts.total - counts.checked;
        counts
    }
}

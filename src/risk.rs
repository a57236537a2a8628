use crate::model::RiskLevel;
use std::sync::Arc;

/// Signals a policy may look at when classifying one search result.
#[derive(Debug, Clone, Copy)]
pub struct RiskInput<'a> {
    pub match_percentage: Option<f64>,
    pub match_count: Option<u64>,
    pub raw_result: &'a serde_json::Value,
}

/// Replaceable risk classification strategy.
///
/// Any `Fn(&RiskInput) -> RiskLevel` closure is a policy, so hosts can swap
/// the rules outright or wrap the default with [`Adjusted`].
pub trait RiskPolicy: Send + Sync {
    fn classify(&self, input: &RiskInput<'_>) -> RiskLevel;
}

impl<F> RiskPolicy for F
where
    F: Fn(&RiskInput<'_>) -> RiskLevel + Send + Sync,
{
    fn classify(&self, input: &RiskInput<'_>) -> RiskLevel {
        self(input)
    }
}

/// Percentage thresholds first, match count as the fallback signal.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdPolicy {
    pub high_percentage: f64,
    pub medium_percentage: f64,
    /// Counts up to and including this value are `medium`; above is `high`.
    pub medium_max_count: u64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            high_percentage: 80.0,
            medium_percentage: 50.0,
            medium_max_count: 3,
        }
    }
}

impl RiskPolicy for ThresholdPolicy {
    fn classify(&self, input: &RiskInput<'_>) -> RiskLevel {
        if let Some(pct) = input.match_percentage {
            // Zero matches is still a definitive low.
            return if pct >= self.high_percentage {
                RiskLevel::High
            } else if pct >= self.medium_percentage {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            };
        }

        match input.match_count {
            Some(0) => RiskLevel::Low,
            Some(n) if n <= self.medium_max_count => RiskLevel::Medium,
            Some(_) => RiskLevel::High,
            None => RiskLevel::Unknown,
        }
    }
}

/// Runs `inner`, then lets `adjust` rewrite its verdict.
pub struct Adjusted<P, F> {
    inner: P,
    adjust: F,
}

impl<P, F> Adjusted<P, F>
where
    P: RiskPolicy,
    F: Fn(RiskLevel, &RiskInput<'_>) -> RiskLevel + Send + Sync,
{
    pub fn new(inner: P, adjust: F) -> Self {
        Self { inner, adjust }
    }
}

impl<P, F> RiskPolicy for Adjusted<P, F>
where
    P: RiskPolicy,
    F: Fn(RiskLevel, &RiskInput<'_>) -> RiskLevel + Send + Sync,
{
    fn classify(&self, input: &RiskInput<'_>) -> RiskLevel {
        let base = self.inner.classify(input);
        (self.adjust)(base, input)
    }
}

pub fn default_policy() -> Arc<dyn RiskPolicy> {
    Arc::new(ThresholdPolicy::default())
}

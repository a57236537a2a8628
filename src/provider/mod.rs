pub mod tineye;

use crate::model::SearchOutcome;
use thiserror::Error;

pub use tineye::TinEyeClient;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("search provider API key is not configured")]
    MissingApiKey,
    #[error("invalid image URL: {0}")]
    InvalidUrl(String),
    #[error("invalid API key")]
    Unauthorized,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("provider returned HTTP {status}")]
    Http { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed provider payload: {0}")]
    Malformed(String),
}

/// Quota-limited reverse image search.
///
/// Implementations bound each call with a timeout so a stuck provider cannot
/// hold the scheduler's tick forever.
pub trait SearchProvider: Send + Sync {
    /// Searches still available on the account. May be zero or negative.
    fn get_remaining_quota(&self) -> Result<i64, ProviderError>;
    fn check_image(&self, url: &str) -> Result<SearchOutcome, ProviderError>;
}

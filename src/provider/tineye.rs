//! Blocking client for the TinEye commercial search API.

use super::{ProviderError, SearchProvider};
use crate::config::Config;
use crate::model::SearchOutcome;
use crate::util::mask_secret;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

pub struct TinEyeClient {
    client: Client,
    base_url: String,
    api_key: String,
    tags: String,
    sort: String,
    quota_timeout: Duration,
}

impl TinEyeClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let api_key = cfg.provider.resolve_api_key();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !api_key.is_empty() {
            headers.insert(
                "x-api-key",
                HeaderValue::from_str(&api_key).context("invalid TinEye API key")?,
            );
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.scheduler.request_timeout_seconds.max(1)))
            .default_headers(headers)
            .build()
            .context("failed to build TinEye HTTP client")?;
        Ok(Self {
            client,
            base_url: cfg.provider.base_url.trim_end_matches('/').to_string(),
            api_key,
            tags: cfg.provider.tags.clone(),
            sort: cfg.provider.sort.clone(),
            quota_timeout: Duration::from_secs(cfg.scheduler.quota_timeout_seconds.max(1)),
        })
    }

    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }

    fn ensure_key(&self) -> Result<(), ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }
        Ok(())
    }
}

impl SearchProvider for TinEyeClient {
    fn get_remaining_quota(&self) -> Result<i64, ProviderError> {
        self.ensure_key()?;
        let url = format!("{}/rest/remaining_searches/", self.base_url);
        debug!("tineye remaining_searches key={}", self.masked_api_key());
        let resp = self
            .client
            .get(&url)
            .timeout(self.quota_timeout)
            .send()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if status != StatusCode::OK {
            return Err(status_error(status, &body));
        }
        parse_remaining(&body)
    }

    fn check_image(&self, image_url: &str) -> Result<SearchOutcome, ProviderError> {
        self.ensure_key()?;
        reqwest::Url::parse(image_url)
            .map_err(|_| ProviderError::InvalidUrl(image_url.to_string()))?;

        let url = format!("{}/rest/search/", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("image_url", image_url),
                ("tags", self.tags.as_str()),
                ("sort", self.sort.as_str()),
            ])
            .send()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        if status != StatusCode::OK {
            warn!("tineye search failed status={} url={}", status, image_url);
            return Err(status_error(status, &body));
        }
        let data: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        parse_search(data)
    }
}

fn status_error(status: StatusCode, body: &str) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized,
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::BAD_REQUEST => ProviderError::InvalidRequest(bad_request_message(body)),
        other => ProviderError::Http {
            status: other.as_u16(),
        },
    }
}

fn bad_request_message(body: &str) -> String {
    let data: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    if let Some(messages) = data.get("messages").and_then(Value::as_array) {
        let joined: Vec<&str> = messages.iter().filter_map(Value::as_str).collect();
        if !joined.is_empty() {
            return joined.join(", ");
        }
    }
    data.get("message")
        .and_then(Value::as_str)
        .unwrap_or("Invalid request")
        .to_string()
}

fn as_i64(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_f64().map(|f| f as i64))
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

pub(crate) fn parse_remaining(body: &str) -> Result<i64, ProviderError> {
    if let Ok(data) = serde_json::from_str::<Value>(body) {
        let candidates = [
            data.pointer("/results/total_remaining_searches"),
            data.pointer("/results/bundles/0/remaining_searches"),
            data.get("remaining_searches"),
            data.get("remaining"),
        ];
        if let Some(n) = candidates.into_iter().flatten().find_map(as_i64) {
            return Ok(n);
        }
    }
    body.trim()
        .parse::<i64>()
        .map_err(|_| ProviderError::Malformed(format!("unexpected remaining_searches body: {body}")))
}

pub(crate) fn parse_search(data: Value) -> Result<SearchOutcome, ProviderError> {
    if !data.is_object() {
        return Err(ProviderError::Malformed("search response is not an object".into()));
    }
    let matches: Vec<Value> = data
        .pointer("/results/matches")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let match_count = data
        .pointer("/stats/total_filtered_results")
        .and_then(Value::as_u64)
        .unwrap_or(matches.len() as u64);
    let search_id = data
        .get("search_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(SearchOutcome {
        search_id,
        match_count,
        match_percentage: Some(match_percentage(&matches)),
        raw_result: data,
    })
}

/// Highest per-match score, or a coarse estimate from the match count when
/// no match carries one.
pub(crate) fn match_percentage(matches: &[Value]) -> f64 {
    if matches.is_empty() {
        return 0.0;
    }
    const SCORE_FIELDS: [&str; 4] = ["query_match_percent", "score", "percentage", "match_percentage"];
    let best = matches
        .iter()
        .filter_map(|m| {
            SCORE_FIELDS
                .iter()
                .find_map(|f| m.get(*f).and_then(|v| v.as_f64().or_else(|| v.as_str()?.parse().ok())))
        })
        .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
    if let Some(best) = best {
        return best;
    }
    match matches.len() {
        0 => 0.0,
        1..=3 => 30.0,
        4..=10 => 60.0,
        _ => 90.0,
    }
}

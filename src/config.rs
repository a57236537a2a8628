use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: Scheduler,
    #[serde(default)]
    pub provider: Provider,
    #[serde(default)]
    pub library: Library,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub retention: Retention,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    /// Minimum gap between two provider searches.
    pub rate_limit_ms: u64,
    pub request_timeout_seconds: u64,
    pub quota_timeout_seconds: u64,
    pub auto_mark_low_risk_safe: bool,
}
impl Default for Scheduler {
    fn default() -> Self {
        Self {
            rate_limit_ms: 500,
            request_timeout_seconds: 60,
            quota_timeout_seconds: 30,
            auto_mark_low_risk_safe: false,
        }
    }
}
impl Scheduler {
    pub fn rate_limit(&self) -> Duration {
        Duration::from_millis(self.rate_limit_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Provider {
    pub base_url: String,
    pub api_key: String,
    pub api_key_env: String,
    pub tags: String,
    pub sort: String,
}
impl Default for Provider {
    fn default() -> Self {
        Self {
            base_url: "https://api.tineye.com".into(),
            api_key: "".into(),
            api_key_env: "TINEYE_API_KEY".into(),
            tags: "stock".into(),
            sort: "score".into(),
        }
    }
}
impl Provider {
    /// Inline key wins; otherwise the named environment variable.
    pub fn resolve_api_key(&self) -> String {
        let inline = self.api_key.trim();
        if !inline.is_empty() {
            return inline.to_string();
        }
        if self.api_key_env.is_empty() {
            return String::new();
        }
        std::env::var(&self.api_key_env)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Library {
    pub manifest_path: String,
    pub site_url: String,
    pub public_url_override: String,
}
impl Default for Library {
    fn default() -> Self {
        Self {
            manifest_path: "media.toml".into(),
            site_url: "".into(),
            public_url_override: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub store_path: String,
    pub log_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            store_path: ".image-guardian/store.json".into(),
            log_dir: ".image-guardian/logs".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub cleanup_days: u32,
}
impl Default for Retention {
    fn default() -> Self {
        Self { cleanup_days: 90 }
    }
}

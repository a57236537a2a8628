use crate::config::Config;
use crate::model::{ImageId, ImageRef};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use time::OffsetDateTime;

const SUPPORTED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/x-ms-bmp",
    "image/avif",
    "image/tiff",
    "image/tif",
    "image/heic",
    "image/heif",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("image {0} not found")]
    NotFound(ImageId),
}

/// Locates images and tells whether the search provider accepts them.
pub trait ImageResolver: Send + Sync {
    fn resolve_checkable_url(&self, id: ImageId) -> Result<String, ResolveError>;
    fn is_supported_format(&self, id: ImageId) -> bool;
}

pub fn is_supported_mime(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    SUPPORTED_MIME_TYPES.contains(&mime.as_str())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: ImageId,
    pub url: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub uploaded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    images: Vec<MediaItem>,
}

/// Media library described by a TOML manifest of `[[images]]` entries.
#[derive(Debug, Clone, Default)]
pub struct MediaLibrary {
    items: BTreeMap<ImageId, MediaItem>,
    url_rewrite: Option<UrlRewrite>,
}

impl MediaLibrary {
    pub fn new(items: impl IntoIterator<Item = MediaItem>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id, i)).collect(),
            url_rewrite: None,
        }
    }

    pub fn load(cfg: &Config) -> Result<Self> {
        let path = Path::new(&cfg.library.manifest_path);
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest: {}", path.display()))?;
        let manifest: Manifest = toml::from_str(&raw)
            .with_context(|| format!("parsing manifest: {}", path.display()))?;
        let mut lib = Self::new(manifest.images);
        lib.url_rewrite = UrlRewrite::from_config(cfg);
        Ok(lib)
    }

    pub fn with_url_rewrite(mut self, site_url: &str, public_url: &str) -> Self {
        self.url_rewrite = Some(UrlRewrite::new(site_url, public_url));
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn image_refs(&self) -> Vec<ImageRef> {
        self.items
            .values()
            .map(|i| ImageRef {
                id: i.id,
                uploaded_at: i.uploaded_at,
            })
            .collect()
    }
}

impl ImageResolver for MediaLibrary {
    fn resolve_checkable_url(&self, id: ImageId) -> Result<String, ResolveError> {
        let item = self.items.get(&id).ok_or(ResolveError::NotFound(id))?;
        if item.url.trim().is_empty() {
            return Err(ResolveError::NotFound(id));
        }
        Ok(match &self.url_rewrite {
            Some(rw) => rw.apply(&item.url),
            None => item.url.clone(),
        })
    }

    fn is_supported_format(&self, id: ImageId) -> bool {
        self.items
            .get(&id)
            .map(|i| is_supported_mime(&i.mime_type))
            .unwrap_or(false)
    }
}

/// Swaps a private site origin for the public one the provider can fetch.
#[derive(Debug, Clone)]
pub struct UrlRewrite {
    site: String,
    public: String,
}

impl UrlRewrite {
    pub fn new(site_url: &str, public_url: &str) -> Self {
        Self {
            site: site_url.trim_end_matches('/').to_string(),
            public: public_url.trim_end_matches('/').to_string(),
        }
    }

    fn from_config(cfg: &Config) -> Option<Self> {
        let public = cfg.library.public_url_override.trim();
        let site = cfg.library.site_url.trim();
        if public.is_empty() || site.is_empty() {
            return None;
        }
        Some(Self::new(site, public))
    }

    pub fn apply(&self, url: &str) -> String {
        if self.site == self.public || self.site.is_empty() {
            return url.to_string();
        }
        url.replace(&self.site, &self.public)
    }
}

//! Worker configuration: cache version, precache manifest and routing settings
//!
//! A deployment is described by one [`WorkerConfig`]. The cache version and
//! the precache manifest travel together: bumping one without the other would
//! leave a generation whose name no longer matches its content.

use serde::Serialize;
use sitecache_storage::{RequestDescriptor, validate_generation_name};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::error::CoreError;

/// Cache version used when none is configured
pub const DEFAULT_CACHE_VERSION: &str = "psp-v1";

/// Reserved path prefix that always reaches the live backend
pub const DEFAULT_API_PREFIX: &str = "/api/";

/// Pages and assets captured at install time by default
pub const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/features.html",
    "/screenshots.html",
    "/download.html",
    "/404.html",
    "/css/styles.css",
    "/js/main.js",
    "/assets/icons/app-icon.png",
    "/assets/screenshots/dashboard-library.png",
    "/assets/screenshots/movies-dashboard.png",
    "/assets/screenshots/tv-dashboard.png",
    "/assets/screenshots/collections.png",
    "/assets/screenshots/upcoming.png",
    "/assets/screenshots/settings-artwork.png",
    "/assets/screenshots/settings-cloud-sync.png",
    "/assets/screenshots/rename-rescrape.png",
];

/// Name of one cache generation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CacheVersion(String);

impl CacheVersion {
    pub fn new(version: impl Into<String>) -> Result<Self, CoreError> {
        let version = version.into();
        validate_generation_name(&version)
            .map_err(|e| CoreError::InvalidConfig(format!("cache version: {}", e)))?;
        Ok(Self(version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CacheVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered list of absolute paths captured before a generation is ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PrecacheManifest(Vec<String>);

impl PrecacheManifest {
    /// Build a manifest; duplicates are dropped, first occurrence wins
    pub fn new<I, S>(paths: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for path in paths {
            let path = path.into();
            if !path.starts_with('/') {
                return Err(CoreError::InvalidConfig(format!(
                    "precache path must be absolute: {}",
                    path
                )));
            }
            if !unique.contains(&path) {
                unique.push(path);
            }
        }
        Ok(Self(unique))
    }

    pub fn paths(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve every path against the origin into a GET descriptor
    pub fn requests(&self, origin: &Url) -> Result<Vec<RequestDescriptor>, CoreError> {
        self.0
            .iter()
            .map(|path| resolve(origin, path).map(RequestDescriptor::get))
            .collect()
    }
}

impl Default for PrecacheManifest {
    fn default() -> Self {
        Self(DEFAULT_PRECACHE.iter().map(|p| p.to_string()).collect())
    }
}

fn resolve(origin: &Url, path: &str) -> Result<Url, CoreError> {
    origin
        .join(path)
        .map_err(|e| CoreError::InvalidConfig(format!("cannot resolve {}: {}", path, e)))
}

/// Everything one deployed worker needs to know
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub cache_version: CacheVersion,
    pub precache: PrecacheManifest,
    /// Site origin; requests to any other origin are never cached
    pub origin: Url,
    /// Paths under this prefix are never cached
    pub api_prefix: String,
    /// Document served when a navigation fails and has no entry of its own
    pub root_path: String,
}

impl WorkerConfig {
    pub fn new(cache_version: CacheVersion, precache: PrecacheManifest, origin: Url) -> Self {
        Self {
            cache_version,
            precache,
            origin,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            root_path: "/".to_string(),
        }
    }

    pub fn with_api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn with_root_path(mut self, path: impl Into<String>) -> Self {
        self.root_path = path.into();
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !matches!(self.origin.scheme(), "http" | "https") || self.origin.host().is_none() {
            return Err(CoreError::InvalidConfig(format!(
                "origin must be an http(s) URL with a host: {}",
                self.origin
            )));
        }
        if !self.api_prefix.starts_with('/') || self.api_prefix.len() < 2 {
            return Err(CoreError::InvalidConfig(format!(
                "api prefix must be a non-root absolute path: {}",
                self.api_prefix
            )));
        }
        if !self.root_path.starts_with('/') {
            return Err(CoreError::InvalidConfig(format!(
                "root path must be absolute: {}",
                self.root_path
            )));
        }
        Ok(())
    }

    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    /// Whether a path falls inside the reserved API namespace
    pub fn is_api_path(&self, path: &str) -> bool {
        path.starts_with(&self.api_prefix) || path == self.api_prefix.trim_end_matches('/')
    }

    /// Descriptor of the site root document
    pub fn root_request(&self) -> Result<RequestDescriptor, CoreError> {
        resolve(&self.origin, &self.root_path).map(RequestDescriptor::get)
    }
}

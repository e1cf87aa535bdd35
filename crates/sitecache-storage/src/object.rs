//! Object-store storage backend
//!
//! Uses the `object_store` crate to keep generations in an S3-compatible
//! bucket (AWS S3, MinIO, ...) or in memory.

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{CacheStore, validate_generation_name};
use crate::entry::{CapturedResponse, EntryMeta, RequestDescriptor};
use crate::error::StorageError;

/// Marker object that makes an empty generation visible in listings
const GENERATION_MARKER: &str = "_generation";

/// S3 storage configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// S3 region (e.g., "us-east-1")
    pub region: String,
    /// S3 endpoint URL (for MinIO or other S3-compatible services)
    pub endpoint: Option<String>,
    /// AWS access key ID
    pub access_key_id: Option<String>,
    /// AWS secret access key
    pub secret_access_key: Option<String>,
    /// Prefix for all objects (optional)
    pub prefix: Option<String>,
    /// Allow HTTP (not HTTPS) connections
    pub allow_http: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "sitecache".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            prefix: None,
            allow_http: false,
        }
    }
}

/// Object-store storage backend
///
/// Layout: `<prefix>/generations/<name>/entries/<key>.{json,body}`
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    root: ObjectPath,
    kind: &'static str,
}

impl ObjectStorage {
    /// Create a backend on an S3-compatible bucket
    pub fn s3(config: S3Config) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        // Set endpoint for MinIO or other S3-compatible services
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(|e| {
            StorageError::Configuration(format!("Failed to create S3 client: {}", e))
        })?;

        let prefix = config.prefix.unwrap_or_default();

        info!(
            "Initialized S3 cache storage: bucket={}, region={}, endpoint={:?}, prefix={}",
            config.bucket, config.region, config.endpoint, prefix
        );

        Ok(Self::with_store(Arc::new(store), &prefix, "s3"))
    }

    /// Create a backend that keeps everything in process memory
    pub fn in_memory() -> Self {
        info!("Initialized in-memory cache storage");
        Self::with_store(Arc::new(InMemory::new()), "", "memory")
    }

    fn with_store(store: Arc<dyn ObjectStore>, prefix: &str, kind: &'static str) -> Self {
        let prefix = prefix.trim_matches('/');
        let root = if prefix.is_empty() {
            ObjectPath::from("generations")
        } else {
            ObjectPath::from(format!("{}/generations", prefix))
        };
        Self { store, root, kind }
    }

    fn generation_path(&self, name: &str) -> Result<ObjectPath, StorageError> {
        validate_generation_name(name)?;
        Ok(self.root.child(name))
    }

    fn entry_paths(
        &self,
        name: &str,
        request: &RequestDescriptor,
    ) -> Result<(ObjectPath, ObjectPath), StorageError> {
        let key = request.cache_key();
        let entries = self.generation_path(name)?.child("entries");
        Ok((
            entries.child(format!("{}.json", key)),
            entries.child(format!("{}.body", key)),
        ))
    }

    async fn get_optional(&self, path: &ObjectPath) -> Result<Option<bytes::Bytes>, StorageError> {
        match self.store.get(path).await {
            Ok(result) => Ok(Some(result.bytes().await.map_err(object_error)?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(object_error(e)),
        }
    }
}

fn object_error(e: object_store::Error) -> StorageError {
    StorageError::ObjectStore(e.to_string())
}

#[async_trait]
impl CacheStore for ObjectStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        let marker = self.generation_path(name)?.child(GENERATION_MARKER);
        debug!("Opening generation at {}", marker);
        self.store
            .put(&marker, PutPayload::from(bytes::Bytes::from_static(b"")))
            .await
            .map_err(object_error)?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let listing = self
            .store
            .list_with_delimiter(Some(&self.root))
            .await
            .map_err(object_error)?;

        let mut names: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename())
            .filter(|name| validate_generation_name(name).is_ok())
            .map(str::to_string)
            .collect();

        names.sort();
        Ok(names)
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        let marker = self.generation_path(name)?.child(GENERATION_MARKER);
        match self.store.head(&marker).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(object_error(e)),
        }
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.generation_path(name)?;
        debug!("Deleting generation at {}", path);

        let objects: Vec<_> = self
            .store
            .list(Some(&path))
            .try_collect()
            .await
            .map_err(object_error)?;

        for object in &objects {
            match self.store.delete(&object.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(object_error(e)),
            }
        }

        Ok(!objects.is_empty())
    }

    async fn put(
        &self,
        name: &str,
        request: &RequestDescriptor,
        response: &CapturedResponse,
    ) -> Result<(), StorageError> {
        let (meta_path, body_path) = self.entry_paths(name, request)?;
        debug!(
            "Storing {} {} in {} ({} bytes)",
            request.method,
            request.url,
            name,
            response.body.len()
        );

        self.store
            .put(&body_path, PutPayload::from(response.body.clone()))
            .await
            .map_err(object_error)?;

        let meta = serde_json::to_vec(&EntryMeta::capture(request, response))?;
        self.store
            .put(&meta_path, PutPayload::from(meta))
            .await
            .map_err(object_error)?;

        Ok(())
    }

    async fn lookup(
        &self,
        name: &str,
        request: &RequestDescriptor,
    ) -> Result<Option<CapturedResponse>, StorageError> {
        let (meta_path, body_path) = self.entry_paths(name, request)?;

        let Some(meta) = self.get_optional(&meta_path).await? else {
            return Ok(None);
        };
        let meta: EntryMeta = serde_json::from_slice(&meta)?;

        if meta.method != request.method || meta.url != request.url.as_str() {
            warn!(
                "Cache key collision in {}: stored {} {}, requested {} {}",
                name, meta.method, meta.url, request.method, request.url
            );
            return Ok(None);
        }

        if meta.varies_from(request) {
            debug!("Entry for {} in {} varies from the request", request.url, name);
            return Ok(None);
        }

        match self.get_optional(&body_path).await? {
            Some(body) => Ok(Some(meta.into_response(body))),
            None => {
                warn!("Entry metadata without body in {}: {}", name, request.url);
                Ok(None)
            }
        }
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestDescriptor>, StorageError> {
        if !self.has(name).await? {
            return Err(StorageError::NotFound(name.to_string()));
        }

        let prefix = self.generation_path(name)?.child("entries");
        let objects: Vec<_> = self
            .store
            .list(Some(&prefix))
            .try_collect()
            .await
            .map_err(object_error)?;

        let mut requests = Vec::new();
        for object in objects {
            let is_meta = object
                .location
                .filename()
                .is_some_and(|f| f.ends_with(".json"));
            if !is_meta {
                continue;
            }
            let Some(data) = self.get_optional(&object.location).await? else {
                continue;
            };
            let meta: EntryMeta = serde_json::from_slice(&data)?;
            requests.push(meta.request()?);
        }

        requests.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
        Ok(requests)
    }

    fn kind(&self) -> &'static str {
        self.kind
    }
}

//! Local disk storage backend

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::backend::{CacheStore, validate_generation_name};
use crate::entry::{CapturedResponse, EntryMeta, RequestDescriptor};
use crate::error::StorageError;

/// Local disk storage backend
///
/// Stores entries under one directory per generation:
/// `<base_path>/generations/<name>/<first 2 chars of key>/<key>.{json,body}`
pub struct LocalStorage {
    base_path: PathBuf,
    temp_counter: AtomicU64,
}

impl LocalStorage {
    /// Create a new local storage backend
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();

        fs::create_dir_all(base_path.join("generations")).await?;

        info!("Initialized local cache storage at {:?}", base_path);

        Ok(Self {
            base_path,
            temp_counter: AtomicU64::new(0),
        })
    }

    fn generations_path(&self) -> PathBuf {
        self.base_path.join("generations")
    }

    /// Get the directory for a generation
    fn generation_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_generation_name(name)?;
        Ok(self.generations_path().join(name))
    }

    /// Get the metadata and body paths for a request
    fn entry_paths(
        &self,
        name: &str,
        request: &RequestDescriptor,
    ) -> Result<(PathBuf, PathBuf), StorageError> {
        let key = request.cache_key();
        // Use first 2 characters for sharding
        let shard = self.generation_path(name)?.join(&key[..2]);
        Ok((
            shard.join(format!("{}.json", key)),
            shard.join(format!("{}.body", key)),
        ))
    }

    /// Write a file atomically using a uniquely named temp file
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), StorageError> {
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("tmp{}", n));
        fs::write(&temp_path, data).await?;
        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::Io(e)),
    }
}

#[async_trait]
impl CacheStore for LocalStorage {
    async fn open(&self, name: &str) -> Result<(), StorageError> {
        let path = self.generation_path(name)?;
        debug!("Opening generation at {:?}", path);
        fs::create_dir_all(&path).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut dir = fs::read_dir(self.generations_path()).await?;

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_generation_name(&name).is_ok() => names.push(name),
                Ok(name) => warn!("Ignoring unexpected directory in cache storage: {}", name),
                Err(name) => warn!("Ignoring non UTF-8 directory in cache storage: {:?}", name),
            }
        }

        names.sort();
        Ok(names)
    }

    async fn has(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.generation_path(name)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.generation_path(name)?;
        debug!("Deleting generation at {:?}", path);

        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
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

        if let Some(parent) = meta_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Body first, so metadata never points at a missing body
        self.write_atomic(&body_path, &response.body).await?;
        let meta = serde_json::to_vec(&EntryMeta::capture(request, response))?;
        self.write_atomic(&meta_path, &meta).await?;

        Ok(())
    }

    async fn lookup(
        &self,
        name: &str,
        request: &RequestDescriptor,
    ) -> Result<Option<CapturedResponse>, StorageError> {
        let (meta_path, body_path) = self.entry_paths(name, request)?;

        let Some(meta) = read_optional(&meta_path).await? else {
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

        match read_optional(&body_path).await? {
            Some(body) => Ok(Some(meta.into_response(Bytes::from(body)))),
            None => {
                warn!("Entry metadata without body in {}: {}", name, request.url);
                Ok(None)
            }
        }
    }

    async fn entries(&self, name: &str) -> Result<Vec<RequestDescriptor>, StorageError> {
        let path = self.generation_path(name)?;
        let mut shards = match fs::read_dir(&path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(name.to_string()));
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let mut requests = Vec::new();
        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let file_path = file.path();
                if file_path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(data) = read_optional(&file_path).await? else {
                    continue;
                };
                let meta: EntryMeta = serde_json::from_slice(&data)?;
                requests.push(meta.request()?);
            }
        }

        requests.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
        Ok(requests)
    }

    fn kind(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request(path: &str) -> RequestDescriptor {
        RequestDescriptor::get(Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_put_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.open("psp-v1").await.unwrap();

        let response = CapturedResponse::new(200, "body { color: red }")
            .with_header("Content-Type", "text/css");
        storage
            .put("psp-v1", &request("/css/styles.css"), &response)
            .await
            .unwrap();

        let found = storage
            .lookup("psp-v1", &request("/css/styles.css"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, 200);
        assert_eq!(found.body, Bytes::from("body { color: red }"));
        assert_eq!(found.header("content-type"), Some("text/css"));
        assert!(found.stored_at.is_some());

        assert!(
            storage
                .lookup("psp-v1", &request("/js/main.js"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.open("v1").await.unwrap();

        storage
            .put("v1", &request("/a.js"), &CapturedResponse::new(200, "old"))
            .await
            .unwrap();
        storage
            .put("v1", &request("/a.js"), &CapturedResponse::new(200, "new"))
            .await
            .unwrap();

        let found = storage.lookup("v1", &request("/a.js")).await.unwrap().unwrap();
        assert_eq!(found.body, Bytes::from("new"));
        assert_eq!(storage.entries("v1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_generations_are_isolated_and_deletable() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.open("v1").await.unwrap();
        storage.open("v2").await.unwrap();
        storage
            .put("v1", &request("/"), &CapturedResponse::new(200, "one"))
            .await
            .unwrap();

        assert_eq!(storage.keys().await.unwrap(), vec!["v1", "v2"]);
        assert!(storage.lookup("v2", &request("/")).await.unwrap().is_none());

        assert!(storage.delete("v1").await.unwrap());
        assert!(!storage.delete("v1").await.unwrap());
        assert!(!storage.has("v1").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["v2"]);
        assert!(matches!(
            storage.entries("v1").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        assert!(matches!(
            storage.open("../outside").await,
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            storage.delete("..").await,
            Err(StorageError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_entries_round_trip_request() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        storage.open("v1").await.unwrap();
        let req = request("/index.html").with_header("Accept", "text/html");
        storage
            .put("v1", &req, &CapturedResponse::new(200, "<html>"))
            .await
            .unwrap();

        let entries = storage.entries("v1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url.as_str(), "https://example.com/index.html");
        assert_eq!(entries[0].accept(), Some("text/html"));
    }
}

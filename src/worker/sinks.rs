//! Where fetched content goes
//!
//! Page bodies are written to a `BlobStore` under a content address derived
//! from the canonical URL. Pages are handed to an `Indexer` only after the
//! coordinator has accepted the success report.

use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// SHA-256 hex digest of the canonical URL
pub fn content_address(canonical_url: &str) -> String {
    hex::encode(Sha256::digest(canonical_url.as_bytes()))
}

/// Storage for fetched page bodies
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `body` for `canonical_url`, returning its key
    ///
    /// Writing the same URL twice overwrites the previous body.
    async fn put(&self, canonical_url: &str, body: &[u8]) -> Result<String>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.lock().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, canonical_url: &str, body: &[u8]) -> Result<String> {
        let key = content_address(canonical_url);
        self.blobs.lock().await.insert(key.clone(), body.to_vec());
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(key).cloned())
    }
}

/// Stores blobs as files under `<root>/<first two hex chars>/<key>`
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("00");
        self.root.join(shard).join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, canonical_url: &str, body: &[u8]) -> Result<String> {
        let key = content_address(canonical_url);
        let path = self.path_for(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// A page ready for indexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPage {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    pub content_ref: String,
}

/// Downstream consumer of successfully crawled pages
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, page: IndexedPage) -> Result<()>;
}

/// Logs each indexed page
#[derive(Debug, Clone, Default)]
pub struct LogIndexer;

#[async_trait]
impl Indexer for LogIndexer {
    async fn index(&self, page: IndexedPage) -> Result<()> {
        tracing::info!(
            "Indexed {} ({} words): {}",
            page.url,
            page.text.split_whitespace().count(),
            page.title.as_deref().unwrap_or("<untitled>")
        );
        Ok(())
    }
}

/// Keeps indexed pages in memory
#[derive(Debug, Default)]
pub struct MemoryIndexer {
    pages: Mutex<Vec<IndexedPage>>,
}

impl MemoryIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn pages(&self) -> Vec<IndexedPage> {
        self.pages.lock().await.clone()
    }
}

#[async_trait]
impl Indexer for MemoryIndexer {
    async fn index(&self, page: IndexedPage) -> Result<()> {
        self.pages.lock().await.push(page);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_address_is_sha256_hex() {
        let key = content_address("https://example.com/");
        assert_eq!(key.len(), 64);
        assert_eq!(key, content_address("https://example.com/"));
        assert_ne!(key, content_address("https://example.com/other"));
    }

    #[tokio::test]
    async fn test_memory_blob_store_overwrites() {
        let store = MemoryBlobStore::new();
        let first = store.put("https://a.com/", b"one").await.unwrap();
        let second = store.put("https://a.com/", b"two").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&first).await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn test_fs_blob_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        let key = store.put("https://a.com/page", b"<html></html>").await.unwrap();

        assert!(dir.path().join(&key[..2]).join(&key).exists());
        assert_eq!(
            store.get(&key).await.unwrap(),
            Some(b"<html></html>".to_vec())
        );
        assert_eq!(store.get("ffmissing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_indexer_collects_pages() {
        let indexer = MemoryIndexer::new();
        let page = IndexedPage {
            url: "https://a.com/".to_string(),
            title: Some("A".to_string()),
            text: "hello".to_string(),
            content_ref: content_address("https://a.com/"),
        };

        indexer.index(page.clone()).await.unwrap();
        LogIndexer.index(page.clone()).await.unwrap();

        assert_eq!(indexer.pages().await, vec![page]);
    }
}

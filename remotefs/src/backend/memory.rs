//! In-memory object store.
//!
//! Buckets are created on first write. Listings come back in key order and can
//! be split into pages to exercise continuation handling.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use remotefs_common::{
    ListPage, ObjectEntry, ObjectHandle, ObjectHeaders, ObjectLister, ObjectReader, ObjectWriter,
    ReadConditions, StorageError,
};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

type Bucket = BTreeMap<String, StoredObject>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    page_size: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit listings to `page_size` entries per call.
    pub fn with_page_size(page_size: usize) -> Self {
        Self { page_size: Some(page_size.max(1)), ..Default::default() }
    }

    /// Insert an object stamped with the current time.
    pub fn insert(&self, bucket: &str, key: &str, data: Bytes) {
        self.insert_at(bucket, key, data, Utc::now());
    }

    pub fn insert_at(&self, bucket: &str, key: &str, data: Bytes, last_modified: DateTime<Utc>) {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { data, last_modified });
    }

    /// Snapshot of an object's bytes, bypassing conditions.
    pub fn get(&self, bucket: &str, key: &str) -> Option<Bytes> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.get(bucket)?.get(key).map(|o| o.data.clone())
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        buckets.get(bucket).map(|b| b.keys().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl ObjectLister for MemoryStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NotFound(bucket.to_string()))?;

        // The continuation token is the last key of the previous page
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| continuation.map_or(true, |after| key.as_str() > after));

        let limit = self.page_size.unwrap_or(usize::MAX);
        let mut entries = Vec::new();
        for (key, object) in matching.by_ref().take(limit) {
            entries.push(ObjectEntry {
                key: key.clone(),
                last_modified: object.last_modified,
                size: object.data.len() as u64,
            });
        }

        let truncated = matching.next().is_some();
        let next_continuation = if truncated { entries.last().map(|e| e.key.clone()) } else { None };

        debug!(bucket = %bucket, prefix = %prefix, count = entries.len(), truncated, "Memory list complete");
        Ok(ListPage { prefix: prefix.to_string(), entries, truncated, next_continuation })
    }
}

#[async_trait]
impl ObjectReader for MemoryStore {
    async fn open(
        &self,
        bucket: &str,
        key: &str,
        conditions: &ReadConditions,
    ) -> Result<ObjectHandle, StorageError> {
        let object = {
            let buckets = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            buckets
                .get(bucket)
                .and_then(|b| b.get(key))
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?
        };
        conditions.check(object.last_modified)?;

        let headers = ObjectHeaders {
            content_type: mime_guess::from_path(key).first().map(|m| m.to_string()),
            content_length: Some(object.data.len() as u64),
            last_modified: Some(object.last_modified),
        };
        Ok(ObjectHandle::from_bytes(headers, object.data))
    }
}

#[async_trait]
impl ObjectWriter for MemoryStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StorageError> {
        self.insert(bucket, key, data);
        debug!(bucket = %bucket, key = %key, "Memory put complete");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let mut buckets = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(objects) = buckets.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

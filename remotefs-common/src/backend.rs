use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;

use crate::error::StorageError;

/// Body of an opened object, delivered chunk by chunk.
pub type BodyStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// One object as reported by a listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectEntry {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// A single page of listing results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Prefix echoed back by the backend.
    pub prefix: String,
    pub entries: Vec<ObjectEntry>,
    pub truncated: bool,
    /// Cursor for the next page when `truncated` is set.
    pub next_continuation: Option<String>,
}

/// Metadata returned alongside an opened object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHeaders {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Conditional-read headers.
///
/// `if_modified_since` yields `StorageError::NotModified` for unchanged objects,
/// `if_unmodified_since` yields `StorageError::PreconditionFailed` for changed ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadConditions {
    pub if_modified_since: Option<DateTime<Utc>>,
    pub if_unmodified_since: Option<DateTime<Utc>>,
}

impl ReadConditions {
    /// Evaluate the conditions against an object's modification time.
    /// Adapters without native conditional requests use this.
    pub fn check(&self, last_modified: DateTime<Utc>) -> Result<(), StorageError> {
        // HTTP dates have second precision
        let mtime = last_modified.timestamp();
        if let Some(since) = self.if_modified_since {
            if mtime <= since.timestamp() {
                return Err(StorageError::NotModified);
            }
        }
        if let Some(since) = self.if_unmodified_since {
            if mtime > since.timestamp() {
                return Err(StorageError::PreconditionFailed);
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.if_modified_since.is_none() && self.if_unmodified_since.is_none()
    }
}

/// An opened object: headers are available immediately, the body streams.
pub struct ObjectHandle {
    pub headers: ObjectHeaders,
    pub body: BodyStream,
}

impl ObjectHandle {
    /// Wrap an in-memory buffer as a handle.
    pub fn from_bytes(headers: ObjectHeaders, data: Bytes) -> Self {
        Self {
            headers,
            body: futures::stream::once(async move { Ok(data) }).boxed(),
        }
    }

    /// Drain the body into a single buffer.
    pub async fn read_all(self) -> Result<Bytes, StorageError> {
        collect_body(self.body).await
    }
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Concatenate every chunk of a body stream.
pub async fn collect_body(mut body: BodyStream) -> Result<Bytes, StorageError> {
    let mut chunks = Vec::new();
    while let Some(chunk) = body.next().await {
        chunks.push(chunk?);
    }
    match chunks.len() {
        0 => Ok(Bytes::new()),
        1 => Ok(chunks.remove(0)),
        _ => Ok(Bytes::from(chunks.concat())),
    }
}

/// Listing capability.
#[async_trait::async_trait]
pub trait ObjectLister: Send + Sync {
    /// List one page of objects under `prefix`, starting from `continuation` if given.
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError>;
}

/// Read capability.
#[async_trait::async_trait]
pub trait ObjectReader: Send + Sync {
    /// Open an object for reading, honoring the given conditions.
    async fn open(
        &self,
        bucket: &str,
        key: &str,
        conditions: &ReadConditions,
    ) -> Result<ObjectHandle, StorageError>;
}

/// Write capability.
#[async_trait::async_trait]
pub trait ObjectWriter: Send + Sync {
    /// Store `data` at `key`, replacing any existing object.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StorageError>;

    /// Store a streamed body. The default buffers the whole body and calls `put`.
    async fn put_stream(&self, bucket: &str, key: &str, body: BodyStream) -> Result<(), StorageError> {
        let data = collect_body(body).await?;
        self.put(bucket, key, data).await
    }

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// A backend offering every capability the filesystem facade needs.
pub trait ObjectStore: ObjectLister + ObjectReader + ObjectWriter {}

impl<T: ObjectLister + ObjectReader + ObjectWriter> ObjectStore for T {}

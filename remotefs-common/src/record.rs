//! The file record handed to pipeline consumers.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::backend::{collect_body, BodyStream};
use crate::error::StorageError;
use crate::keys::relative_key;

/// Stat block of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileStat {
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

/// A lazily consumed object body.
///
/// Clones share the same underlying stream: whichever clone reads first gets
/// the data. The length is carried separately because a stream cannot report
/// it without being read.
#[derive(Clone)]
pub struct ContentStream {
    body: Arc<Mutex<Option<BodyStream>>>,
    len: Option<u64>,
}

impl ContentStream {
    pub fn new(body: BodyStream, len: Option<u64>) -> Self {
        Self { body: Arc::new(Mutex::new(Some(body))), len }
    }

    pub fn len(&self) -> Option<u64> {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == Some(0)
    }

    /// Copy of this handle with its length set.
    pub fn with_len(&self, len: u64) -> Self {
        Self { body: Arc::clone(&self.body), len: Some(len) }
    }

    /// Take the body out of the handle. Returns `None` once consumed.
    pub async fn take(&self) -> Option<BodyStream> {
        self.body.lock().await.take()
    }

    /// Read the whole body into memory.
    pub async fn read_all(&self) -> Result<Bytes, StorageError> {
        match self.take().await {
            Some(body) => collect_body(body).await,
            None => Err(StorageError::InvalidResponse("body already consumed".to_string())),
        }
    }
}

impl PartialEq for ContentStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.body, &other.body) && self.len == other.len
    }
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream").field("len", &self.len).finish_non_exhaustive()
    }
}

/// Contents of a record: absent, fully buffered, or streamed.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FileContents {
    #[default]
    Null,
    Buffer(Bytes),
    Stream(ContentStream),
}

impl FileContents {
    /// Length of the contents, when known without reading.
    pub fn len(&self) -> Option<u64> {
        match self {
            FileContents::Null => None,
            FileContents::Buffer(b) => Some(b.len() as u64),
            FileContents::Stream(s) => s.len(),
        }
    }

    /// Resolve the contents to a buffer. Null contents read as empty.
    pub async fn into_bytes(self) -> Result<Bytes, StorageError> {
        match self {
            FileContents::Null => Ok(Bytes::new()),
            FileContents::Buffer(b) => Ok(b),
            FileContents::Stream(s) => s.read_all().await,
        }
    }
}

/// A file-like view of one object, detached from the backend that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Bucket the object was listed from, when known.
    pub bucket: Option<String>,
    pub base: String,
    /// Full object key.
    pub path: String,
    pub contents: FileContents,
    pub stat: FileStat,
    pub content_type: Option<String>,
}

impl FileRecord {
    /// Path relative to `base`.
    pub fn relative(&self) -> &str {
        relative_key(&self.base, &self.path)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.contents, FileContents::Null)
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.contents, FileContents::Buffer(_))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.contents, FileContents::Stream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn record(base: &str, path: &str, contents: FileContents) -> FileRecord {
        FileRecord {
            bucket: None,
            base: base.to_string(),
            path: path.to_string(),
            contents,
            stat: FileStat { mtime: Utc::now(), size: 5 },
            content_type: None,
        }
    }

    #[test]
    fn test_relative() {
        assert_eq!(record("docs", "docs/a.md", FileContents::Null).relative(), "a.md");
        assert_eq!(record("", "docs/a.md", FileContents::Null).relative(), "docs/a.md");
    }

    #[test]
    fn test_contents_kind() {
        let r = record("", "a", FileContents::Buffer(Bytes::from_static(b"hello")));
        assert!(r.is_buffer());
        assert_eq!(r.contents.len(), Some(5));
        assert!(record("", "a", FileContents::Null).is_null());
    }

    #[tokio::test]
    async fn test_stream_shared_between_clones() {
        let body: BodyStream = futures::stream::once(async { Ok(Bytes::from_static(b"hello")) }).boxed();
        let stream = ContentStream::new(body, None);
        let sized = stream.with_len(5);
        assert_eq!(sized.len(), Some(5));
        assert_ne!(stream, sized);
        assert_eq!(sized, sized.clone());

        assert_eq!(sized.read_all().await.unwrap(), Bytes::from_static(b"hello"));
        // Both handles point at the same, now drained, body
        assert!(stream.read_all().await.is_err());
    }
}

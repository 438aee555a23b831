//! Local directory object store.
//!
//! Each bucket is a subdirectory of the root and keys map to relative paths.
//! Writes are staged under `<root>/.staging/{uuid}`, fsynced, then renamed into
//! place, so listings never see partial objects. A key ending in `/` is a
//! directory marker: writing one creates the directory, empty directories are
//! listed back as markers, and opening one reads as an empty object.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use remotefs_common::keys::{is_directory_marker, normalize_key};
use remotefs_common::{
    ListPage, ObjectEntry, ObjectHandle, ObjectHeaders, ObjectLister, ObjectReader, ObjectWriter,
    ReadConditions, StorageError,
};

const STAGING_DIR: &str = ".staging";

pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_path(&self, bucket: &str) -> PathBuf {
        // Buckets are single path components and never hidden, so no bucket
        // can alias the staging directory
        let mut bucket = normalize_key(bucket).replace('/', "_");
        if bucket.starts_with('.') {
            bucket.replace_range(..1, "_");
        }
        self.root.join(bucket)
    }

    fn full_path(&self, bucket: &str, key: &str) -> PathBuf {
        // Prevent path traversal
        let key = normalize_key(key);
        self.bucket_path(bucket).join(key.trim_start_matches('/'))
    }

    fn staging_path(&self) -> PathBuf {
        self.root.join(STAGING_DIR).join(uuid::Uuid::new_v4().to_string())
    }
}

fn system_time_to_chrono(t: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(t)
}

fn to_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl ObjectLister for DirectoryStore {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        let base = self.bucket_path(bucket);
        if !base.is_dir() {
            return Err(StorageError::NotFound(bucket.to_string()));
        }

        let mut entries = Vec::new();
        let mut stack = vec![base.clone()];
        while let Some(dir) = stack.pop() {
            let mut children = tokio::fs::read_dir(&dir).await?;
            let mut empty = true;

            while let Some(child) = children.next_entry().await? {
                empty = false;
                let path = child.path();
                let meta = child.metadata().await?;

                if meta.is_dir() {
                    stack.push(path);
                } else if meta.is_file() {
                    let Ok(relative) = path.strip_prefix(&base) else { continue };
                    entries.push(ObjectEntry {
                        key: to_key(relative),
                        last_modified: system_time_to_chrono(meta.modified()?),
                        size: meta.len(),
                    });
                }
            }

            if empty && dir != base {
                if let Ok(relative) = dir.strip_prefix(&base) {
                    let meta = tokio::fs::metadata(&dir).await?;
                    entries.push(ObjectEntry {
                        key: format!("{}/", to_key(relative)),
                        last_modified: system_time_to_chrono(meta.modified()?),
                        size: 0,
                    });
                }
            }
        }

        entries.retain(|e| e.key.starts_with(prefix));
        if let Some(after) = continuation {
            entries.retain(|e| e.key.as_str() > after);
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(bucket = %bucket, prefix = %prefix, count = entries.len(), "Directory list complete");
        Ok(ListPage { prefix: prefix.to_string(), entries, truncated: false, next_continuation: None })
    }
}

#[async_trait]
impl ObjectReader for DirectoryStore {
    async fn open(
        &self,
        bucket: &str,
        key: &str,
        conditions: &ReadConditions,
    ) -> Result<ObjectHandle, StorageError> {
        let src = self.full_path(bucket, key);
        let meta = match tokio::fs::metadata(&src).await {
            Ok(m) if m.is_file() => m,
            Ok(m) if m.is_dir() && is_directory_marker(key) => {
                let last_modified = system_time_to_chrono(m.modified()?);
                conditions.check(last_modified)?;
                let headers = ObjectHeaders {
                    content_type: None,
                    content_length: Some(0),
                    last_modified: Some(last_modified),
                };
                return Ok(ObjectHandle::from_bytes(headers, Bytes::new()));
            }
            Ok(_) => return Err(StorageError::NotFound(key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let last_modified = system_time_to_chrono(meta.modified()?);
        conditions.check(last_modified)?;

        let file = tokio::fs::File::open(&src).await?;
        let body = ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::from)).boxed();

        Ok(ObjectHandle {
            headers: ObjectHeaders {
                content_type: mime_guess::from_path(key).first().map(|m| m.to_string()),
                content_length: Some(meta.len()),
                last_modified: Some(last_modified),
            },
            body,
        })
    }
}

#[async_trait]
impl ObjectWriter for DirectoryStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StorageError> {
        let dest = self.full_path(bucket, key);

        if is_directory_marker(key) {
            tokio::fs::create_dir_all(&dest).await?;
            debug!(bucket = %bucket, key = %key, "Directory marker created");
            return Ok(());
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a staging file, then rename (atomic)
        let tmp_path = self.staging_path();
        if let Some(staging) = tmp_path.parent() {
            tokio::fs::create_dir_all(staging).await?;
        }
        let staged = async {
            tokio::fs::write(&tmp_path, &data).await?;
            let file = tokio::fs::OpenOptions::new().write(true).open(&tmp_path).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &dest).await
        };
        if let Err(e) = staged.await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(bucket = %bucket, key = %key, bytes = data.len(), "Directory put complete");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let path = self.full_path(bucket, key);
        let result = if is_directory_marker(key) {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(bucket = %bucket, key = %key, "Directory delete complete");
        Ok(())
    }
}

//! Filesystem facade over an object store.
//!
//! A [`RemoteFs`] is rooted at one bucket (its context) and exposes file-style
//! operations on top of the listing and streaming primitives. Calls taking
//! [`SrcOptions`] may target another bucket through `delegate_context`.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use remotefs_common::keys::{directory_key, is_directory_marker, join_key, relative_key};
use remotefs_common::{BodyStream, FileContents, FileRecord, FileStat, ObjectStore, StorageError};

use crate::config::RemoteFsConfig;
use crate::error::{from_storage, Error, Result};
use crate::pattern::{GlobSpec, PatternSet};
use crate::pipeline::{self, RecordStream, SrcOptions};
use crate::resolver::cancellable_body;
use crate::selector::Selector;

/// Await a storage call, giving up early if the token fires.
async fn cancellable<T, F>(cancel: Option<&CancellationToken>, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, StorageError>>,
{
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            result = fut => result.map_err(from_storage),
        },
        None => fut.await.map_err(from_storage),
    }
}

/// Metadata-only records from one listing page.
#[derive(Debug, Clone, Default)]
pub struct FileList {
    pub files: Vec<FileRecord>,
    /// Set when the page was truncated; pass it back as
    /// [`SrcOptions::continuation`] to list the rest.
    pub next_continuation: Option<String>,
}

#[derive(Clone)]
pub struct RemoteFs {
    context: String,
    store: Arc<dyn ObjectStore>,
}

impl RemoteFs {
    /// Root a filesystem at `context` on the given store.
    ///
    /// The context cannot be changed afterwards. An empty context is rejected
    /// before any I/O happens.
    pub fn new(context: impl Into<String>, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let context = context.into();
        if context.trim().is_empty() {
            return Err(Error::Configuration("context (bucket) is required".to_string()));
        }
        Ok(Self { context, store })
    }

    pub fn from_config(config: &RemoteFsConfig) -> anyhow::Result<Self> {
        let store = crate::backend::from_config(&config.backend)?;
        Ok(Self::new(config.context.clone(), store)?)
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Lazily stream every object matching `globs` as a [`FileRecord`] with contents.
    pub fn src(&self, globs: impl Into<GlobSpec>, options: &SrcOptions) -> Result<RecordStream> {
        pipeline::src(Arc::clone(&self.store), options.bucket(&self.context), globs, options)
    }

    /// List objects matching `globs` without fetching their contents.
    ///
    /// Covers one listing page, like `src`; a truncated page leaves its cursor
    /// in [`FileList::next_continuation`].
    pub async fn list_files(&self, globs: impl Into<GlobSpec>, options: &SrcOptions) -> Result<FileList> {
        let bucket = options.bucket(&self.context);
        let patterns = PatternSet::new(globs, &options.base)?;
        let mut selector = Selector::new(Arc::clone(&self.store), bucket, &options.base, patterns)?
            .with_continuation(options.continuation.clone())
            .with_cancellation(options.cancel.clone());

        let mut files = Vec::new();
        while let Some(entry) = selector.next().await {
            let entry = entry?;
            files.push(FileRecord {
                bucket: Some(bucket.to_string()),
                base: options.base.clone(),
                path: entry.key,
                contents: FileContents::Null,
                stat: FileStat { mtime: entry.last_modified, size: entry.size },
                content_type: None,
            });
        }
        let next_continuation = selector.next_continuation().map(str::to_string);
        Ok(FileList { files, next_continuation })
    }

    pub async fn read_file(&self, path: &str, options: &SrcOptions) -> Result<Bytes> {
        let bucket = options.bucket(&self.context);
        let conditions = options.conditions();
        cancellable(options.cancel.as_ref(), async {
            let handle = self.store.open(bucket, path, &conditions).await?;
            handle.read_all().await
        })
        .await
    }

    /// Write `data` at `path`; `None` writes an empty object.
    pub async fn write_file(&self, path: &str, data: Option<Bytes>) -> Result<()> {
        self.store
            .put(&self.context, path, data.unwrap_or_default())
            .await
            .map_err(from_storage)
    }

    /// Create a directory marker: a zero-byte object whose key ends in `/`.
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.write_file(&directory_key(path), None).await
    }

    pub async fn remove_file(&self, path: &str) -> Result<()> {
        self.store.delete(&self.context, path).await.map_err(from_storage)
    }

    /// Every object key under `path`, relative to it, excluding directory markers.
    ///
    /// Unlike `src`, this follows continuation tokens until the listing is exhausted.
    pub async fn readdirp(&self, path: &str) -> Result<Vec<String>> {
        let prefix = if path.is_empty() { String::new() } else { directory_key(path) };
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .store
                .list(&self.context, &prefix, continuation.as_deref())
                .await
                .map_err(from_storage)?;
            names.extend(
                page.entries
                    .iter()
                    .filter(|e| !is_directory_marker(&e.key))
                    .map(|e| relative_key(&prefix, &e.key).to_string()),
            );
            match page.next_continuation {
                Some(token) if page.truncated => continuation = Some(token),
                _ => break,
            }
        }

        debug!(path = %path, count = names.len(), "readdirp complete");
        Ok(names)
    }

    /// Open `path` and return its body as a byte stream.
    pub async fn create_read_stream(&self, path: &str, options: &SrcOptions) -> Result<BodyStream> {
        let bucket = options.bucket(&self.context);
        let conditions = options.conditions();
        let handle = cancellable(options.cancel.as_ref(), self.store.open(bucket, path, &conditions)).await?;
        Ok(match &options.cancel {
            Some(token) => cancellable_body(handle.body, token.clone()),
            None => handle.body,
        })
    }

    /// Writer that uploads everything written to it when finished.
    pub fn create_write_stream(&self, path: &str, options: &SrcOptions) -> WriteStream {
        WriteStream {
            store: Arc::clone(&self.store),
            bucket: options.bucket(&self.context).to_string(),
            key: path.to_string(),
            chunks: Vec::new(),
        }
    }

    /// Write each record's contents to `dest/<record.path>`.
    ///
    /// Stops at the first failing record, whether it came from upstream or
    /// from the write. Returns the number of objects written.
    pub async fn write_through<S>(&self, records: S, dest: &str, options: &SrcOptions) -> Result<usize>
    where
        S: Stream<Item = Result<FileRecord>>,
    {
        let bucket = options.bucket(&self.context);
        let mut records = std::pin::pin!(records);
        let mut written = 0;

        while let Some(record) = records.next().await {
            let record = record?;
            let key = join_key(dest, &record.path);
            let data = cancellable(options.cancel.as_ref(), record.contents.into_bytes()).await?;
            cancellable(options.cancel.as_ref(), self.store.put(bucket, &key, data)).await?;
            written += 1;
        }

        debug!(dest = %dest, written, "write-through complete");
        Ok(written)
    }

    /// Copy `files` to `dest/<file.relative()>` in this filesystem's context
    /// (or `delegate_context`). Files listed from another bucket are read from
    /// that bucket. Copies run concurrently; the first failure is returned.
    pub async fn copy_files_to(&self, files: &[FileRecord], dest: &str, options: &SrcOptions) -> Result<usize> {
        let target = options.bucket(&self.context);

        let copies = files.iter().map(|file| {
            let source_bucket = file.bucket.as_deref().unwrap_or(&self.context);
            let destination = join_key(dest, file.relative());
            async move {
                let handle = cancellable(
                    options.cancel.as_ref(),
                    self.store.open(source_bucket, &file.path, &Default::default()),
                )
                .await?;
                debug!(
                    from = %file.path,
                    to = %destination,
                    bytes = ?handle.headers.content_length,
                    "Copying object"
                );
                cancellable(
                    options.cancel.as_ref(),
                    self.store.put_stream(target, &destination, handle.body),
                )
                .await
            }
        });

        let copied = futures::future::try_join_all(copies).await?.len();
        info!(count = copied, dest = %dest, bucket = %target, "Copy complete");
        Ok(copied)
    }
}

impl std::fmt::Debug for RemoteFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFs").field("context", &self.context).finish_non_exhaustive()
    }
}

/// Buffered upload handle returned by [`RemoteFs::create_write_stream`].
pub struct WriteStream {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    chunks: Vec<Bytes>,
}

impl WriteStream {
    pub fn write(&mut self, chunk: impl Into<Bytes>) {
        self.chunks.push(chunk.into());
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Upload the written data. Nothing is stored until this resolves.
    pub async fn finish(self) -> Result<()> {
        let body: BodyStream = futures::stream::iter(self.chunks.into_iter().map(Ok)).boxed();
        self.store
            .put_stream(&self.bucket, &self.key, body)
            .await
            .map_err(from_storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryStore;

    fn fs_with(keys: &[(&str, &str)]) -> (RemoteFs, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        for (key, body) in keys {
            store.insert("ctx", key, Bytes::from(body.to_string()));
        }
        let fs = RemoteFs::new("ctx", store.clone()).unwrap();
        (fs, store)
    }

    #[test]
    fn test_empty_context_rejected() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
        assert!(matches!(RemoteFs::new("", store), Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_write_and_read_file() {
        let (fs, _) = fs_with(&[]);
        fs.write_file("notes/today.txt", Some(Bytes::from("hi"))).await.unwrap();
        let data = fs.read_file("notes/today.txt", &SrcOptions::default()).await.unwrap();
        assert_eq!(data, Bytes::from("hi"));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let (fs, _) = fs_with(&[("a", "x")]);
        let err = fs.read_file("missing", &SrcOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), Some(404));
    }

    #[tokio::test]
    async fn test_mkdir_writes_marker() {
        let (fs, store) = fs_with(&[]);
        fs.mkdir("photos").await.unwrap();
        fs.mkdir("videos/").await.unwrap();
        assert_eq!(store.keys("ctx"), vec!["photos/", "videos/"]);
        assert_eq!(store.get("ctx", "photos/"), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_readdirp() {
        let (fs, _) = fs_with(&[("genesis/", ""), ("genesis/a.txt", "a"), ("genesis/sub/b.txt", "b"), ("other/c", "c")]);
        let names = fs.readdirp("genesis").await.unwrap();
        assert_eq!(names, vec!["a.txt", "sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_readdirp_follows_pages() {
        let store = Arc::new(MemoryStore::with_page_size(1));
        for key in ["d/1", "d/2", "d/3"] {
            store.insert("ctx", key, Bytes::new());
        }
        let fs = RemoteFs::new("ctx", store).unwrap();
        assert_eq!(fs.readdirp("d").await.unwrap(), vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_list_files_metadata_only() {
        let (fs, _) = fs_with(&[("docs/a.md", "aaa"), ("docs/b.md", "b"), ("img/c.png", "c")]);
        let listing = fs.list_files("docs/*", &SrcOptions::with_base("docs")).await.unwrap();
        assert!(listing.files.is_empty(), "patterns are anchored under the base");

        let listing = fs.list_files("*.md", &SrcOptions::with_base("docs")).await.unwrap();
        assert_eq!(listing.next_continuation, None);
        let files = listing.files;
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.is_null()));
        assert_eq!(files[0].relative(), "a.md");
        assert_eq!(files[0].stat.size, 3);
        assert_eq!(files[0].bucket.as_deref(), Some("ctx"));
    }

    #[tokio::test]
    async fn test_write_stream() {
        let (fs, store) = fs_with(&[]);
        let mut upload = fs.create_write_stream("out.txt", &SrcOptions::default());
        upload.write("hello ");
        upload.write(Bytes::from("world"));
        assert_eq!(store.get("ctx", "out.txt"), None);
        upload.finish().await.unwrap();
        assert_eq!(store.get("ctx", "out.txt"), Some(Bytes::from("hello world")));
    }

    #[tokio::test]
    async fn test_read_stream() {
        let (fs, _) = fs_with(&[("a.txt", "streamed")]);
        let body = fs.create_read_stream("a.txt", &SrcOptions::default()).await.unwrap();
        let data = remotefs_common::backend::collect_body(body).await.unwrap();
        assert_eq!(data, Bytes::from("streamed"));
    }

    #[tokio::test]
    async fn test_write_through() {
        let (fs, store) = fs_with(&[("src/a.txt", "a"), ("src/b.txt", "b")]);
        let records = fs.src("src/*", &SrcOptions::default()).unwrap();
        let written = fs.write_through(records, "backup", &SrcOptions::default()).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.get("ctx", "backup/src/a.txt"), Some(Bytes::from("a")));
        assert_eq!(store.get("ctx", "backup/src/b.txt"), Some(Bytes::from("b")));
    }

    #[tokio::test]
    async fn test_write_through_stops_on_error() {
        let (fs, store) = fs_with(&[]);
        let records = futures::stream::iter(Vec::<Result<FileRecord>>::from([Err(Error::Cancelled)]));
        assert!(fs.write_through(records, "backup", &SrcOptions::default()).await.is_err());
        assert!(store.keys("ctx").is_empty());
    }

    #[tokio::test]
    async fn test_copy_files_across_buckets() {
        let store = Arc::new(MemoryStore::new());
        store.insert("templates", "genesis/index.html", Bytes::from("<html>"));
        store.insert("templates", "genesis/css/site.css", Bytes::from("body{}"));
        store.insert("site", "keep.txt", Bytes::from("keep"));

        let source = RemoteFs::new("templates", store.clone()).unwrap();
        let target = RemoteFs::new("site", store.clone()).unwrap();

        let files = source.list_files("**", &SrcOptions::with_base("genesis")).await.unwrap().files;
        assert_eq!(files.len(), 2);

        let copied = target.copy_files_to(&files, "helloworld/master", &SrcOptions::default()).await.unwrap();
        assert_eq!(copied, 2);
        assert_eq!(store.get("site", "helloworld/master/index.html"), Some(Bytes::from("<html>")));
        assert_eq!(store.get("site", "helloworld/master/css/site.css"), Some(Bytes::from("body{}")));
        assert_eq!(store.get("site", "keep.txt"), Some(Bytes::from("keep")));
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails() {
        let (fs, _) = fs_with(&[]);
        let ghost = FileRecord {
            bucket: Some("ctx".to_string()),
            base: String::new(),
            path: "ghost.txt".to_string(),
            contents: FileContents::Null,
            stat: FileStat { mtime: chrono::Utc::now(), size: 0 },
            content_type: None,
        };
        let err = fs.copy_files_to(&[ghost], "dest", &SrcOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), Some(404));
    }

    #[tokio::test]
    async fn test_cancelled_read() {
        let (fs, _) = fs_with(&[("a", "x")]);
        let token = CancellationToken::new();
        token.cancel();
        let options = SrcOptions { cancel: Some(token), ..Default::default() };
        assert!(matches!(fs.read_file("a", &options).await, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn test_list_files_returns_cursor() {
        let store = Arc::new(MemoryStore::with_page_size(2));
        for key in ["k1", "k2", "k3"] {
            store.insert("ctx", key, Bytes::from(key));
        }
        let fs = RemoteFs::new("ctx", store).unwrap();

        let first = fs.list_files("k*", &SrcOptions::default()).await.unwrap();
        let paths: Vec<&str> = first.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["k1", "k2"]);
        assert_eq!(first.next_continuation.as_deref(), Some("k2"));

        let options = SrcOptions { continuation: first.next_continuation, ..Default::default() };
        let rest = fs.list_files("k*", &options).await.unwrap();
        let paths: Vec<&str> = rest.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["k3"]);
        assert_eq!(rest.next_continuation, None);
    }

    #[tokio::test]
    async fn test_src_returns_cursor() {
        let store = Arc::new(MemoryStore::with_page_size(2));
        for key in ["k1", "k2", "k3"] {
            store.insert("ctx", key, Bytes::from(key));
        }
        let fs = RemoteFs::new("ctx", store).unwrap();

        let records = fs.src("k*", &SrcOptions::default()).unwrap();
        let cursor = records.cursor();
        let written = fs.write_through(records, "copy", &SrcOptions::default()).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(cursor.get(), Some("k2"));
    }

    #[tokio::test]
    async fn test_write_through_cancelled_during_body_read() {
        let (fs, store) = fs_with(&[("a.txt", "a")]);
        let token = CancellationToken::new();
        let stream_mode = SrcOptions { buffer: false, ..Default::default() };
        let records: Vec<Result<FileRecord>> = fs.src("*", &stream_mode).unwrap().collect().await;
        assert_eq!(records.len(), 1);

        token.cancel();
        let options = SrcOptions { cancel: Some(token), ..Default::default() };
        let result = fs.write_through(futures::stream::iter(records), "copy", &options).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(store.get("ctx", "copy/a.txt"), None);
    }

    #[tokio::test]
    async fn test_read_stream_cancelled_mid_body() {
        let (fs, _) = fs_with(&[("a.txt", "streamed")]);
        let token = CancellationToken::new();
        let options = SrcOptions { cancel: Some(token.clone()), ..Default::default() };
        let mut body = fs.create_read_stream("a.txt", &options).await.unwrap();

        token.cancel();
        assert!(matches!(body.next().await, Some(Err(StorageError::Cancelled))));
        assert!(body.next().await.is_none());
    }
}

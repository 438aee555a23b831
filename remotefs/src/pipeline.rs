//! `src`: Selector -> ContentResolver -> RecordNormalizer as one lazy stream.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use remotefs_common::{FileRecord, ObjectStore, ReadConditions};

use crate::error::Result;
use crate::normalize::RecordNormalizer;
use crate::pattern::{GlobSpec, PatternSet};
use crate::resolver::{ContentResolver, ResolverConfig};
use crate::selector::{ListingCursor, Selector};

/// Lazy sequence of records. Ends after the first error.
///
/// Only one listing page is selected. If that page was truncated,
/// [`RecordStream::next_continuation`] returns the cursor for the next one
/// once the listing has resolved; pass it back through
/// [`SrcOptions::continuation`] to resume.
pub struct RecordStream {
    inner: BoxStream<'static, Result<FileRecord>>,
    cursor: ListingCursor,
}

impl RecordStream {
    pub fn next_continuation(&self) -> Option<&str> {
        self.cursor.get()
    }

    /// Handle on the continuation token that outlives the stream.
    pub fn cursor(&self) -> ListingCursor {
        self.cursor.clone()
    }
}

impl Stream for RecordStream {
    type Item = Result<FileRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for RecordStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStream")
            .field("next_continuation", &self.cursor.get())
            .finish_non_exhaustive()
    }
}

/// Options accepted by `src` and the other facade calls.
#[derive(Debug, Clone)]
pub struct SrcOptions {
    /// Listing prefix, and the base records are relative to.
    pub base: String,
    /// Bucket to use for this call instead of the filesystem's context.
    pub delegate_context: Option<String>,
    /// Buffer bodies in memory (`true`) or hand out streams (`false`).
    pub buffer: bool,
    /// Skip objects not modified since this time.
    pub since: Option<DateTime<Utc>>,
    /// Skip objects modified after this time.
    pub unmodified_since: Option<DateTime<Utc>>,
    /// Resume a truncated listing.
    pub continuation: Option<String>,
    pub cancel: Option<CancellationToken>,
}

impl Default for SrcOptions {
    fn default() -> Self {
        Self {
            base: String::new(),
            delegate_context: None,
            buffer: true,
            since: None,
            unmodified_since: None,
            continuation: None,
            cancel: None,
        }
    }
}

impl SrcOptions {
    pub fn with_base(base: impl Into<String>) -> Self {
        Self { base: base.into(), ..Default::default() }
    }

    /// Bucket this call targets, given the filesystem's own context.
    pub fn bucket<'a>(&'a self, context: &'a str) -> &'a str {
        self.delegate_context.as_deref().unwrap_or(context)
    }

    pub fn conditions(&self) -> ReadConditions {
        ReadConditions {
            if_modified_since: self.since,
            if_unmodified_since: self.unmodified_since,
        }
    }
}

/// Compose the selection pipeline for `globs` over `bucket`.
///
/// Patterns are compiled and the bucket is checked before anything is
/// listed; the returned stream does no I/O until it is polled.
pub fn src(
    store: Arc<dyn ObjectStore>,
    bucket: &str,
    globs: impl Into<GlobSpec>,
    options: &SrcOptions,
) -> Result<RecordStream> {
    let patterns = PatternSet::new(globs, &options.base)?;
    let selector = Selector::new(Arc::clone(&store), bucket, &options.base, patterns)?
        .with_continuation(options.continuation.clone())
        .with_cancellation(options.cancel.clone());
    let cursor = selector.cursor();

    let resolver = ContentResolver::new(
        selector,
        store,
        ResolverConfig {
            bucket: bucket.to_string(),
            conditions: options.conditions(),
            buffer: options.buffer,
            cancel: options.cancel.clone(),
        },
    );

    let normalizer = RecordNormalizer::new(&options.base, Some(bucket));
    let inner = resolver
        .map(move |enriched| enriched.map(|e| normalizer.normalize(&e)))
        .boxed();
    Ok(RecordStream { inner, cursor })
}

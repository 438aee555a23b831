//! Pull-driven listing engine.
//!
//! A `Selector` lists one page of keys under its prefix the first time it is
//! polled, filters them through a [`PatternSet`], and yields the matches in
//! listing order. The listing call is issued at most once: polls arriving
//! while it is in flight drive the same future instead of starting another.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use remotefs_common::{ListPage, ObjectEntry, ObjectStore, StorageError};

use crate::error::{from_storage, Error, Result};
use crate::pattern::PatternSet;

type ListFuture = BoxFuture<'static, std::result::Result<ListPage, StorageError>>;

/// Where a selector is in its single-page lifecycle.
enum SelectorState {
    /// No listing call issued yet.
    Idle,
    /// Exactly one listing call outstanding.
    Listing(ListFuture),
    /// Page received; matches waiting to be pulled.
    Emitting(VecDeque<ObjectEntry>),
    Done,
    Failed,
}

impl SelectorState {
    fn name(&self) -> &'static str {
        match self {
            SelectorState::Idle => "idle",
            SelectorState::Listing(_) => "listing",
            SelectorState::Emitting(_) => "emitting",
            SelectorState::Done => "done",
            SelectorState::Failed => "failed",
        }
    }
}

/// Continuation token left behind by a truncated listing.
///
/// Clones share the same slot, so a handle taken before the selector is moved
/// into a larger stream still sees the token once the listing resolves.
#[derive(Debug, Clone, Default)]
pub struct ListingCursor(Arc<OnceLock<String>>);

impl ListingCursor {
    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    fn set(&self, token: String) {
        // One page per selector, so the slot is written at most once
        let _ = self.0.set(token);
    }
}

pub struct Selector {
    store: Arc<dyn ObjectStore>,
    patterns: PatternSet,
    bucket: String,
    prefix: String,
    continuation: Option<String>,
    cancel: Option<CancellationToken>,
    state: SelectorState,
    cursor: ListingCursor,
}

impl Selector {
    /// Build a selector over `bucket`, listing under `base` and matching `patterns`.
    ///
    /// Fails before any I/O when the bucket is empty.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        base: &str,
        patterns: PatternSet,
    ) -> Result<Self> {
        if bucket.is_empty() {
            return Err(Error::Configuration("a bucket is required".to_string()));
        }
        if patterns.is_empty() {
            debug!(bucket = %bucket, base = %base, "Selector has no include patterns; it will yield nothing");
        }
        Ok(Self {
            store,
            patterns,
            bucket: bucket.to_string(),
            prefix: base.to_string(),
            continuation: None,
            cancel: None,
            state: SelectorState::Idle,
            cursor: ListingCursor::default(),
        })
    }

    /// Start listing from a cursor returned by an earlier selector.
    pub fn with_continuation(mut self, token: Option<String>) -> Self {
        self.continuation = token;
        self
    }

    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Cursor for the page after the one this selector consumed, if the
    /// listing was truncated. Only meaningful once the listing has resolved.
    pub fn next_continuation(&self) -> Option<&str> {
        self.cursor.get()
    }

    /// Shared handle on the continuation token, usable after `self` is consumed.
    pub fn cursor(&self) -> ListingCursor {
        self.cursor.clone()
    }

    pub fn is_listing(&self) -> bool {
        matches!(self.state, SelectorState::Listing(_))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    fn start_listing(&self) -> ListFuture {
        let store = Arc::clone(&self.store);
        let bucket = self.bucket.clone();
        let prefix = self.prefix.clone();
        let continuation = self.continuation.clone();
        let cancel = self.cancel.clone();

        Box::pin(async move {
            let list = store.list(&bucket, &prefix, continuation.as_deref());
            match cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(StorageError::Cancelled),
                    page = list => page,
                },
                None => list.await,
            }
        })
    }

    fn accept_page(&mut self, page: ListPage) -> VecDeque<ObjectEntry> {
        let listed = page.entries.len();
        let matched: VecDeque<ObjectEntry> = page
            .entries
            .into_iter()
            .filter(|entry| self.patterns.matches(&entry.key))
            .collect();

        if page.truncated {
            warn!(
                bucket = %self.bucket,
                prefix = %self.prefix,
                "Listing truncated; only the first page is selected"
            );
            if let Some(token) = page.next_continuation {
                self.cursor.set(token);
            }
        }

        debug!(
            bucket = %self.bucket,
            prefix = %page.prefix,
            listed,
            matched = matched.len(),
            "Listing complete"
        );
        matched
    }
}

impl Stream for Selector {
    type Item = Result<ObjectEntry>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.is_cancelled() && !matches!(this.state, SelectorState::Done | SelectorState::Failed) {
                this.state = SelectorState::Failed;
                return Poll::Ready(Some(Err(Error::Cancelled)));
            }

            match &mut this.state {
                SelectorState::Idle => {
                    debug!(bucket = %this.bucket, prefix = %this.prefix, "Issuing listing call");
                    this.state = SelectorState::Listing(this.start_listing());
                }
                SelectorState::Listing(fut) => match fut.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(Ok(page)) => {
                        let matched = this.accept_page(page);
                        this.state = SelectorState::Emitting(matched);
                    }
                    Poll::Ready(Err(e)) => {
                        this.state = SelectorState::Failed;
                        return Poll::Ready(Some(Err(from_storage(e))));
                    }
                },
                SelectorState::Emitting(queue) => match queue.pop_front() {
                    Some(entry) => return Poll::Ready(Some(Ok(entry))),
                    // Single page: the sequence ends with the page
                    None => this.state = SelectorState::Done,
                },
                SelectorState::Done | SelectorState::Failed => return Poll::Ready(None),
            }
        }
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selector")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("state", &self.state.name())
            .finish_non_exhaustive()
    }
}

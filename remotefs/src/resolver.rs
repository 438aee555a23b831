//! Content fetch stage.
//!
//! For each listed entry the resolver opens the object and merges its headers
//! and body into an [`EnrichedEntry`]. "Not modified" and "precondition failed"
//! answers drop the entry and the stage carries on; any other failure ends the
//! stream with that error. Entries are fetched one at a time, in upstream order.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use remotefs_common::backend::collect_body;
use remotefs_common::{
    BodyStream, ContentStream, FileContents, ObjectEntry, ObjectHandle, ObjectHeaders, ObjectStore,
    ReadConditions, StorageError,
};

use crate::error::{from_storage, Result};

/// A listed entry merged with what opening the object returned.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedEntry {
    pub entry: ObjectEntry,
    pub headers: ObjectHeaders,
    pub body: FileContents,
}

/// How the resolver reads objects.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub bucket: String,
    pub conditions: ReadConditions,
    /// Read bodies fully into memory instead of handing out streams.
    pub buffer: bool,
    pub cancel: Option<CancellationToken>,
}

/// Tie a body stream to `token`: once it fires, the next poll yields
/// `StorageError::Cancelled` and the stream ends.
pub(crate) fn cancellable_body(body: BodyStream, token: CancellationToken) -> BodyStream {
    futures::stream::unfold(Some((body, token)), |state| async move {
        let (mut body, token) = state?;
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            chunk = body.next() => Some(chunk),
        };
        match chunk {
            None => Some((Err(StorageError::Cancelled), None)),
            Some(Some(chunk)) => Some((chunk, Some((body, token)))),
            Some(None) => None,
        }
    })
    .boxed()
}

type FetchFuture = BoxFuture<'static, std::result::Result<EnrichedEntry, StorageError>>;

pub struct ContentResolver<S> {
    upstream: S,
    store: Arc<dyn ObjectStore>,
    config: ResolverConfig,
    pending: Option<(String, FetchFuture)>,
    done: bool,
}

impl<S> ContentResolver<S>
where
    S: Stream<Item = Result<ObjectEntry>> + Unpin,
{
    pub fn new(upstream: S, store: Arc<dyn ObjectStore>, config: ResolverConfig) -> Self {
        Self { upstream, store, config, pending: None, done: false }
    }

    fn fetch(&self, entry: ObjectEntry) -> FetchFuture {
        let store = Arc::clone(&self.store);
        let bucket = self.config.bucket.clone();
        let conditions = self.config.conditions;
        let buffer = self.config.buffer;
        let cancel = self.config.cancel.clone();

        Box::pin(async move {
            let work = async {
                let ObjectHandle { headers, body } = store.open(&bucket, &entry.key, &conditions).await?;
                let body = if buffer {
                    FileContents::Buffer(collect_body(body).await?)
                } else {
                    let body = match &cancel {
                        Some(token) => cancellable_body(body, token.clone()),
                        None => body,
                    };
                    // Length is unknown until the stream is read; the
                    // normalizer fills it in from the stat block.
                    FileContents::Stream(ContentStream::new(body, None))
                };
                Ok::<_, StorageError>(EnrichedEntry { entry, headers, body })
            };
            match &cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(StorageError::Cancelled),
                    result = work => result,
                },
                None => work.await,
            }
        })
    }
}

impl<S> Stream for ContentResolver<S>
where
    S: Stream<Item = Result<ObjectEntry>> + Unpin,
{
    type Item = Result<EnrichedEntry>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some((key, fut)) = &mut this.pending {
                let result = match fut.as_mut().poll(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(result) => result,
                };
                let key = std::mem::take(key);
                this.pending = None;

                match result {
                    Ok(enriched) => return Poll::Ready(Some(Ok(enriched))),
                    Err(e) if e.is_expected() => {
                        debug!(key = %key, code = ?e.code(), "Skipping unchanged object");
                        continue;
                    }
                    Err(e) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(from_storage(e))));
                    }
                }
            }

            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.upstream).poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(Some(Ok(entry))) => {
                    let key = entry.key.clone();
                    let fut = this.fetch(entry);
                    this.pending = Some((key, fut));
                }
            }
        }
    }
}

//! Reshape fetched entries into [`FileRecord`]s.

use remotefs_common::{FileContents, FileRecord, FileStat};

use crate::resolver::EnrichedEntry;

/// Pure transform from [`EnrichedEntry`] to [`FileRecord`].
#[derive(Debug, Clone, Default)]
pub struct RecordNormalizer {
    base: String,
    bucket: Option<String>,
}

impl RecordNormalizer {
    pub fn new(base: &str, bucket: Option<&str>) -> Self {
        Self { base: base.to_string(), bucket: bucket.map(str::to_string) }
    }

    pub fn normalize(&self, enriched: &EnrichedEntry) -> FileRecord {
        // Fetched headers are fresher than the listing
        let stat = FileStat {
            mtime: enriched.headers.last_modified.unwrap_or(enriched.entry.last_modified),
            size: enriched.headers.content_length.unwrap_or(enriched.entry.size),
        };

        let contents = match &enriched.body {
            FileContents::Stream(s) if s.len().is_none() => FileContents::Stream(s.with_len(stat.size)),
            other => other.clone(),
        };

        FileRecord {
            bucket: self.bucket.clone(),
            base: self.base.clone(),
            path: enriched.entry.key.clone(),
            contents,
            stat,
            content_type: enriched.headers.content_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use futures::StreamExt;

    use remotefs_common::{ContentStream, ObjectEntry, ObjectHeaders};

    use super::*;

    fn enriched(body: FileContents, headers: ObjectHeaders) -> EnrichedEntry {
        EnrichedEntry {
            entry: ObjectEntry {
                key: "docs/a.md".to_string(),
                last_modified: Utc.timestamp_opt(1_000, 0).single().unwrap(),
                size: 11,
            },
            headers,
            body,
        }
    }

    #[test]
    fn test_buffer_record() {
        let headers = ObjectHeaders {
            content_type: Some("text/markdown".to_string()),
            content_length: Some(11),
            last_modified: Some(Utc.timestamp_opt(2_000, 0).single().unwrap()),
        };
        let e = enriched(FileContents::Buffer(Bytes::from_static(b"hello world")), headers);
        let record = RecordNormalizer::new("docs", Some("bucket")).normalize(&e);

        assert_eq!(record.path, "docs/a.md");
        assert_eq!(record.base, "docs");
        assert_eq!(record.relative(), "a.md");
        assert_eq!(record.bucket.as_deref(), Some("bucket"));
        assert_eq!(record.stat.size, 11);
        assert_eq!(record.stat.mtime.timestamp(), 2_000);
        assert_eq!(record.content_type.as_deref(), Some("text/markdown"));
        assert_eq!(record.contents.len(), Some(11));
    }

    #[test]
    fn test_listing_metadata_fallback() {
        let e = enriched(FileContents::Null, ObjectHeaders::default());
        let record = RecordNormalizer::default().normalize(&e);
        assert!(record.is_null());
        assert_eq!(record.base, "");
        assert_eq!(record.stat.size, 11);
        assert_eq!(record.stat.mtime.timestamp(), 1_000);
        assert_eq!(record.content_type, None);
    }

    #[test]
    fn test_stream_length_backfilled() {
        let body = futures::stream::empty().boxed();
        let e = enriched(FileContents::Stream(ContentStream::new(body, None)), ObjectHeaders::default());
        let record = RecordNormalizer::default().normalize(&e);
        assert!(record.is_stream());
        assert_eq!(record.contents.len(), Some(11));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let normalizer = RecordNormalizer::new("docs", None);

        let e = enriched(FileContents::Buffer(Bytes::from_static(b"hello world")), ObjectHeaders::default());
        assert_eq!(normalizer.normalize(&e), normalizer.normalize(&e));

        let body = futures::stream::empty().boxed();
        let e = enriched(FileContents::Stream(ContentStream::new(body, None)), ObjectHeaders::default());
        assert_eq!(normalizer.normalize(&e), normalizer.normalize(&e));
    }
}

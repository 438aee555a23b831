//! File-style access to object storage.
//!
//! Objects in a bucket are treated as files in a tree: they can be listed,
//! read, written and copied, and selected with include/exclude globs through
//! a lazy, backpressure-respecting stream ([`RemoteFs::src`]).

pub mod backend;
pub mod config;
pub mod error;
pub mod fs;
pub mod normalize;
pub mod pattern;
pub mod pipeline;
pub mod resolver;
pub mod selector;

pub use error::{Error, Result};
pub use fs::{FileList, RemoteFs, WriteStream};
pub use pattern::{GlobSpec, PatternSet};
pub use pipeline::{src, RecordStream, SrcOptions};
pub use selector::ListingCursor;
pub use remotefs_common::{FileContents, FileRecord, FileStat, StorageError};

pub mod backend;
pub mod error;
pub mod keys;
pub mod record;

pub use backend::{
    BodyStream, ListPage, ObjectEntry, ObjectHandle, ObjectHeaders, ObjectLister, ObjectReader,
    ObjectStore, ObjectWriter, ReadConditions,
};
pub use error::StorageError;
pub use record::{ContentStream, FileContents, FileRecord, FileStat};

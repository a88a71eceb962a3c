#![warn(missing_docs)]

//! doclocale storage subsystem: document records, unique identity indexes and
//! the KV backends they live in.

pub mod docstore;
pub mod kvstore;
pub mod persistent;
pub mod types;

pub use docstore::DocumentStore;
pub use kvstore::{KvStore, MemoryKvStore};
pub use persistent::PersistentKvStore;
pub use types::{DocFilter, DocId, DocPatch, Document, Mode, StorageId, StoreError, UniqueIndex};

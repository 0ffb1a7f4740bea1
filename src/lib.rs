//! # Granite Storage Engine
//! A single-file paged storage engine: bitmap-extent page allocation, an LRU
//! buffer pool, a disk-resident B+ tree index, heap-organized tables, a page
//! backed catalog, and a logical write-ahead log with REDO/UNDO recovery.

/// The B+ tree index implementation.
pub mod btree;
/// The buffer pool manager.
pub mod buffer_pool;
/// The catalog mapping names to on-disk metadata.
pub mod catalog;
/// The disk manager for reading and writing pages of the database file.
pub mod disk_manager;
/// The assembly point wiring disk, buffer pool and catalog together.
pub mod engine;
/// Crate-level error type.
pub mod errors;
/// Heap-organized tables with variable-length tuples.
pub mod heap;
/// Raw page buffer and the typed page layouts.
pub mod page;
/// Columns, schemas, rows and row ids.
pub mod record;
/// The LRU replacement policy.
pub mod replacer;
/// REDO/UNDO recovery over the logical key-value model.
pub mod recovery;
/// Log records, the log manager and the on-disk log framing.
pub mod wal;

mod bitmap;

pub use bitmap::BitmapPage;
pub use buffer_pool::{BufferPoolManager, PageGuard};
pub use errors::EngineError;
pub use page::Page;

/// The size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// A logical identifier for a page in the database file.
pub type PageId = i32;
/// An index into the buffer pool's frame array.
pub type FrameId = usize;
/// A unique identifier for a table.
pub type TableId = i32;
/// A unique identifier for an index.
pub type IndexId = i32;
/// A unique identifier for a transaction.
pub type TxnId = i32;
/// A log sequence number.
pub type Lsn = i32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = -1;
/// Sentinel for "no log record".
pub const INVALID_LSN: Lsn = -1;

/// Logical page holding the serialized catalog metadata.
pub const CATALOG_META_PAGE_ID: PageId = 0;
/// Logical page mapping each index id to its root page id.
pub const INDEX_ROOTS_PAGE_ID: PageId = 1;

/// Shorthand for results produced by the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

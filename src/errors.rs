use thiserror::Error;

/// Error kinds surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Every frame in the buffer pool is pinned.
    #[error("buffer pool exhausted: all frames are pinned")]
    BufferPoolExhausted,

    /// A page could not be deleted because it is still pinned.
    #[error("page {0} is pinned")]
    PagePinned(crate::PageId),

    /// A page id outside the valid logical address space was used.
    #[error("invalid page id {0}")]
    InvalidPageId(crate::PageId),

    #[error("table {0:?} already exists")]
    TableAlreadyExists(String),

    #[error("table {0:?} does not exist")]
    TableNotFound(String),

    #[error("index {0:?} already exists")]
    IndexAlreadyExists(String),

    #[error("index {0:?} does not exist")]
    IndexNotFound(String),

    #[error("column {0:?} does not exist")]
    ColumnNotFound(String),

    /// A serialized tuple larger than any page can hold.
    #[error("tuple of {0} bytes exceeds page capacity")]
    TupleTooLarge(usize),

    /// A magic-number or checksum mismatch while deserializing on-disk state.
    #[error("corrupted data: {0}")]
    Corrupted(String),
}

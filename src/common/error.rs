use thiserror::Error;

use super::types::PageId;

/// Database error types
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid database file")]
    InvalidDatabaseFile,

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Header page is full")]
    HeaderFull,

    #[error("Index {0:?} already exists")]
    IndexAlreadyExists(String),

    #[error("Index {0:?} not found")]
    IndexNotFound(String),
}

pub type Result<T> = std::result::Result<T, StrataError>;

//! Error types for RiptideDB.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using RiptideError.
pub type Result<T> = std::result::Result<T, RiptideError>;

/// Errors that can occur in RiptideDB operations.
///
/// Expected negative outcomes of index operations (key not found, duplicate
/// pair, directory exhausted) are reported as boolean returns, not errors.
/// Only infrastructure failures surface here.
#[derive(Debug, Error)]
pub enum RiptideError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    // Storage errors
    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("Page corrupted: {page_id}, reason: {reason}")]
    PageCorrupted { page_id: PageId, reason: String },

    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

//! Error types for pagesync core.

use thiserror::Error;

/// Errors raised while validating page geometry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid page size {0}: must be a power of two between 512 and 32768")]
    InvalidPageSize(u32),

    #[error("invalid page size exponent {0}")]
    InvalidPageSizeLog2(u8),

    #[error("invalid page number {0}: page numbers start at 1")]
    InvalidPageNumber(u32),

    #[error("invalid fingerprint length {0}")]
    InvalidFingerprintLength(usize),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

//! Error types for H7A decompression

use thiserror::Error;

/// H7A operation result type
pub type H7aResult<T> = Result<T, H7aError>;

/// Errors raised while decoding H7A payloads
#[derive(Debug, Error)]
pub enum H7aError {
    /// Shift amount outside of the 16-bit token width
    #[error("Invalid H7A shift amount: {0}")]
    InvalidShift(u32),

    /// Payload too short to hold the sub-header
    #[error("H7A payload truncated: {actual} bytes, need at least {required}")]
    Truncated {
        /// Minimum number of bytes
        required: usize,
        /// Bytes available
        actual: usize,
    },

    /// Binary read error
    #[error("Binary format error: {0}")]
    BinRead(#[from] binrw::Error),
}

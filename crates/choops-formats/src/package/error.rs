//! Error types for texture package operations

use thiserror::Error;

/// Package operation result type
pub type PackageResult<T> = Result<T, PackageError>;

/// Errors raised while reading or writing texture packages
#[derive(Debug, Error)]
pub enum PackageError {
    /// Packages are stored as exactly two segments: header block and data block
    #[error("Package resource has {count} segments, expected 2")]
    UnsupportedSegmentCount {
        /// Segments found on the resource
        count: usize,
    },

    /// A header region runs past the end of the header block
    #[error("Package {what} at {offset:#x} runs past the header block ({length:#x} bytes)")]
    Truncated {
        /// Region being read
        what: &'static str,
        /// Offset of the region
        offset: u64,
        /// Header block length
        length: u64,
    },

    /// Package name is not valid UTF-16
    #[error("Package name is not valid UTF-16")]
    InvalidName,

    /// A texture data offset points outside the data block
    #[error("Texture {index} data offset {offset:#x} outside data block ({length:#x} bytes)")]
    TextureOutOfRange {
        /// Texture declaration index
        index: usize,
        /// One-based data offset as stored
        offset: u64,
        /// Data block length
        length: u64,
    },

    /// Binary read/write error
    #[error("Binary format error: {0}")]
    BinRead(#[from] binrw::Error),
}

impl PackageError {
    /// Whether the error comes from corrupt or foreign data rather than misuse
    pub fn is_data_corruption(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::InvalidName | Self::TextureOutOfRange { .. }
        )
    }
}

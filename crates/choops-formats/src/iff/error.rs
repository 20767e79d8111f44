//! Error types for IFF container operations

use thiserror::Error;

/// IFF operation result type
pub type IffResult<T> = Result<T, IffError>;

/// Errors raised while reading or writing IFF containers
#[derive(Debug, Error)]
pub enum IffError {
    /// Container magic did not match
    #[error("Malformed IFF header: magic {magic:#010x}, expected {expected:#010x}")]
    MalformedHeader {
        /// Magic found in the data
        magic: u32,
        /// Magic the reader expects
        expected: u32,
    },

    /// Header, directory or block positions contradict each other
    #[error("Invalid IFF layout: {0}")]
    InvalidLayout(String),

    /// A resource segment points outside its block
    #[error(
        "Segment {segment} of resource {resource} out of range: {offset:#x}+{length:#x} exceeds block length {block_length:#x}"
    )]
    SegmentOutOfRange {
        /// Resource index
        resource: usize,
        /// Segment (block) index
        segment: usize,
        /// Offset inside the block
        offset: u64,
        /// Segment length
        length: u64,
        /// Decoded block length
        block_length: u64,
    },

    /// Name table offsets point outside the name section
    #[error("Invalid name table: {0}")]
    InvalidNameTable(String),

    /// Rebuilt directory no longer fits in the declared header size
    #[error("Header overflow: {required:#x} bytes needed, header size is {header_size:#x}")]
    HeaderOverflow {
        /// Bytes needed for header, block table and directory
        required: u64,
        /// Declared header size
        header_size: u64,
    },

    /// No resource with the requested name or index
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Block decompression failed
    #[error("Block decompression failed: {0}")]
    Compression(#[from] crate::h7a::H7aError),

    /// Binary read/write error
    #[error("Binary format error: {0}")]
    BinRead(#[from] binrw::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IffError {
    /// Whether the error comes from corrupt or foreign data rather than misuse
    pub fn is_data_corruption(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader { .. }
                | Self::InvalidLayout(_)
                | Self::SegmentOutOfRange { .. }
                | Self::InvalidNameTable(_)
                | Self::Compression(_)
        )
    }
}

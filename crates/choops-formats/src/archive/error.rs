//! Error types for archive index operations

use thiserror::Error;

/// Archive operation result type
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Errors raised while reading or writing the archive index
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Header magic did not match
    #[error("Malformed archive header: magic {magic:#010x}, expected {expected:#010x}")]
    MalformedHeader {
        /// Magic found in the data
        magic: u32,
        /// Magic the reader expects
        expected: u32,
    },

    /// Entry starts beyond the end of the logical stream
    #[error(
        "Entry {id} ({name}) out of range: offset {offset:#x} size {size:#x}, stream is {total:#x} bytes"
    )]
    OffsetOutOfRange {
        /// Declaration index
        id: u32,
        /// Resolved or fallback name
        name: String,
        /// Logical offset
        offset: u64,
        /// Entry size
        size: u64,
        /// Total logical size of all slots
        total: u64,
    },

    /// Offset or size not a multiple of the alignment unit
    #[error("{what} {value:#x} is not a multiple of the alignment unit {alignment:#x}")]
    Unaligned {
        /// Which value
        what: &'static str,
        /// Offending value
        value: u64,
        /// Alignment unit
        alignment: u64,
    },

    /// Value does not fit its on-disk field
    #[error("{field} {value:#x} does not fit its 32-bit field")]
    FieldOverflow {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// Slot letters run from A to Z
    #[error("Slot index {0} has no file letter")]
    TooManySlots(usize),

    /// The sequential scanner was asked to go backwards
    #[error("Entry {id} at {offset:#x} lies behind scan position {position:#x}")]
    UnorderedScan {
        /// Declaration index
        id: u32,
        /// Logical offset
        offset: u64,
        /// Current stream position
        position: u64,
    },

    /// Binary read/write error
    #[error("Binary format error: {0}")]
    BinRead(#[from] binrw::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Check if this error is permanent for the given archive files
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader { .. } | Self::OffsetOutOfRange { .. } | Self::TooManySlots(_)
        )
    }
}

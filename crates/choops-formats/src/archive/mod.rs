//! Archive index for multi-file archive sets
//!
//! An archive set is one logical byte stream cut into slot files named `0A`,
//! `0B`, ... The start of `0A` holds the table of contents:
//!
//! ```text
//! +--------------------+  0x00
//! | header (0x18)      |  magic, alignment, slot count, entry count
//! +--------------------+  0x18
//! | slot records       |  0x10 each: size >> 11, reserved, UTF-16BE name
//! +--------------------+
//! | TOC records        |  per-title layout, see [`crate::schema`]
//! +--------------------+
//! | zero padding       |  up to the alignment unit
//! +--------------------+
//! ```
//!
//! An entry's logical offset is `raw_offset * alignment`. It is resolved to a
//! slot by walking the cumulative slot sizes; ranges that cross a slot
//! boundary continue at offset zero of the next slot.

mod entry;
mod error;
mod header;
mod index;
mod scan;

pub use entry::{EntryLocation, EntrySnapshot, SlotSpan, TocEntry, resolve_location, slot_spans};
pub use error::{ArchiveError, ArchiveResult};
pub use header::{ArchiveHeader, Slot, slot_file_name, table_length};
pub use index::ArchiveIndex;
pub use scan::TocScanner;

/// Archive header magic
pub const ARCHIVE_MAGIC: u32 = 0xAA00_B3BF;

/// Fixed header length
pub const ARCHIVE_HEADER_SIZE: usize = 0x18;

/// Length of one slot record
pub const SLOT_RECORD_SIZE: usize = 0x10;

/// Slot sizes are stored shifted right by this many bits
pub const SLOT_SIZE_SHIFT: u32 = 11;

/// Alignment unit used by every known title
pub const DEFAULT_ALIGNMENT: u64 = 0x800;

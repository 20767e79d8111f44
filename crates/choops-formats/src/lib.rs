//! Parsers and builders for 2K-era PS3 archive sets and their nested containers
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for binary operations
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::doc_markdown)] // Format names don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::similar_names)] // Domain-specific naming patterns
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::use_self)] // Type clarity
//! This crate provides symmetric (parser and builder) implementations for the
//! file formats found in the `USRDIR` of College Hoops 2K8 and its sibling
//! titles on the PS3.
//!
//! # Supported Formats
//!
//! - **Archive**: the table of contents stored at the start of the `0A` slot
//!   file, addressing one logical byte stream spread over `0A`, `0B`, ...
//! - **IFF**: the nested block container holding textures, scenes and audio
//! - **H7A**: the LZ-style block compression used inside IFF containers
//! - **Package**: the texture package nested inside SCNE resources
//! - **GTF**: texture header bridge for TXTR resources and package textures
//!
//! # Design Principles
//!
//! - **Symmetric Operations**: Both parsing and building supported
//! - **Declarative Schemas**: Per-title TOC layouts are data, not code paths
//! - **Explicit Dirty Tracking**: Edited buffers are flagged on replacement
//! - **Round-Trip Guarantee**: build(parse(data)) == data for uncompressed containers

#![warn(missing_docs)]

/// Archive index (header, slot table, TOC) and sequential stream scanner
///
/// See the [`archive`] module for the offset arithmetic and slot resolution rules.
pub mod archive;
/// GTF texture header bridge
pub mod gtf;
/// H7A block decompression
pub mod h7a;
/// IFF block and resource container
///
/// The container codec reads strictly forward and rewrites block payloads from
/// segment buffers in declaration order.
pub mod iff;
/// Hash to name lookup services
pub mod lookup;
/// Texture package nested in SCNE resources
pub mod package;
/// Per-title TOC record layouts
pub mod schema;
/// Dirty-tracked byte buffers shared by the container codecs
pub mod segment;

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
pub(crate) mod test_utils;

pub use lookup::{HashLookupTable, NameLookup, NoLookup};
pub use schema::{TitleProfile, TocSchema};
pub use segment::SegmentData;

/// Common format trait implemented by the container formats
pub trait ChoopsFormat: Sized {
    /// Parse from bytes
    fn parse(data: &[u8]) -> Result<Self, Box<dyn std::error::Error>>;

    /// Build to bytes
    fn build(&self) -> Result<Vec<u8>, Box<dyn std::error::Error>>;

    /// Verify round-trip correctness
    fn verify_round_trip(data: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
        let parsed = Self::parse(data)?;
        let rebuilt = parsed.build()?;
        if data != rebuilt.as_slice() {
            return Err("Round-trip verification failed".into());
        }
        Ok(())
    }
}

/// Round `value` up to the next multiple of `alignment`.
///
/// An alignment of zero leaves the value unchanged.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

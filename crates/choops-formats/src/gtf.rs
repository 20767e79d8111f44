//! GTF texture header bridge
//!
//! TXTR resources and package textures keep a 24-byte slice of a GTF texture
//! header at 0x58 of their header bytes. Export wraps that slice and the
//! pixel data in a single-texture GTF stream; import copies the header words
//! back and replaces the pixel data. Pixel formats are not converted.

use thiserror::Error;

use crate::iff::Resource;
use crate::package::PackageTexture;
use crate::package::read_be_u32;

/// Length of the GTF file and texture header emitted on export
pub const GTF_HEADER_SIZE: usize = 0x30;

/// GTF file version word
pub const GTF_VERSION: u32 = 0x0108_0000;

/// Offset of the texture header slice inside resource and texture headers
const HEADER_SLICE: std::ops::Range<usize> = 0x58..0x70;

/// Length of the embedded texture record skipped in single-segment resources
const EMBEDDED_RECORD_SIZE: usize = 0xB0;

/// GTF bridge result type
pub type GtfResult<T> = Result<T, GtfError>;

/// Errors raised while converting to or from GTF
#[derive(Debug, Error)]
pub enum GtfError {
    /// The resource has too few segments for the conversion
    #[error("Resource has {count} segments, at least {required} required")]
    MissingSegments {
        /// Segments found
        count: usize,
        /// Segments needed
        required: usize,
    },

    /// A buffer is shorter than the fields read from or written to it
    #[error("{what} is {length:#x} bytes, at least {required:#x} required")]
    TooShort {
        /// Which buffer
        what: &'static str,
        /// Actual length
        length: usize,
        /// Minimum length
        required: usize,
    },

    /// The GTF texture data offset points past the stream
    #[error("GTF texture data offset {offset:#x} past end of stream ({length:#x} bytes)")]
    DataOffsetOutOfRange {
        /// Offset read from 0x10
        offset: u32,
        /// Stream length
        length: usize,
    },
}

fn require(what: &'static str, bytes: &[u8], required: usize) -> GtfResult<()> {
    if bytes.len() < required {
        return Err(GtfError::TooShort {
            what,
            length: bytes.len(),
            required,
        });
    }
    Ok(())
}

fn gtf_stream(header: &[u8], data: &[u8]) -> GtfResult<Vec<u8>> {
    require("texture header", header, HEADER_SLICE.end)?;
    let texture_length = u32::try_from(data.len()).map_err(|_| GtfError::TooShort {
        what: "texture data",
        length: data.len(),
        required: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(GTF_HEADER_SIZE + data.len());
    for word in [
        GTF_VERSION,
        texture_length + GTF_HEADER_SIZE as u32,
        1,
        0,
        GTF_HEADER_SIZE as u32,
        texture_length,
    ] {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out.extend_from_slice(&header[HEADER_SLICE]);
    out.extend_from_slice(data);
    Ok(out)
}

/// Export a TXTR resource as a GTF stream.
///
/// Two-segment resources hold pixel data in segment 1. Single-segment
/// resources carry it in segment 0 after a 0xB0-byte record.
pub fn resource_to_gtf(resource: &Resource) -> GtfResult<Vec<u8>> {
    let header = resource.segment(0).ok_or(GtfError::MissingSegments {
        count: 0,
        required: 1,
    })?;
    let data = match resource.segment(1) {
        Some(data) => data,
        None => {
            require("single-segment texture", header, EMBEDDED_RECORD_SIZE)?;
            &header[EMBEDDED_RECORD_SIZE..]
        }
    };
    gtf_stream(header, data)
}

/// Export one package texture as a GTF stream
pub fn texture_to_gtf(texture: &PackageTexture) -> GtfResult<Vec<u8>> {
    gtf_stream(texture.header.bytes(), texture.data.bytes())
}

/// Copy the GTF texture header words into a resource or texture header.
///
/// Returns the pixel data slice of `gtf`.
fn merge_header<'a>(gtf: &'a [u8], header: &mut [u8]) -> GtfResult<&'a [u8]> {
    require("GTF stream", gtf, GTF_HEADER_SIZE)?;
    require("texture header", header, HEADER_SLICE.end)?;

    let word = |offset| read_be_u32(gtf, offset).unwrap_or(0);
    let remap = u32::from(u16::from_be_bytes([header[0x09], header[0x0A]]));

    for (offset, value) in [
        (0x4C, 0),
        (0x50, 0),
        (0x54, 0),
        (0x58, word(0x18)),
        (0x5C, remap),
        (0x60, word(0x20)),
        (0x64, word(0x24)),
        (0x68, word(0x28)),
        (0x6C, word(0x2C)),
    ] {
        header[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }

    let data_offset = word(0x10);
    gtf.get(data_offset as usize..)
        .ok_or(GtfError::DataOffsetOutOfRange {
            offset: data_offset,
            length: gtf.len(),
        })
}

/// Import a GTF stream into a two-segment TXTR resource, marking both
/// segments dirty.
pub fn import_into_resource(gtf: &[u8], resource: &mut Resource) -> GtfResult<()> {
    let count = resource.segments.len();
    if count < 2 {
        return Err(GtfError::MissingSegments { count, required: 2 });
    }

    let mut header = resource.segments[0].data.bytes().to_vec();
    let data = merge_header(gtf, &mut header)?.to_vec();
    resource.segments[0].data.replace(header);
    resource.segments[1].data.replace(data);
    Ok(())
}

/// Import a GTF stream into a package texture, marking it dirty.
pub fn import_into_texture(gtf: &[u8], texture: &mut PackageTexture) -> GtfResult<()> {
    let mut header = texture.header.bytes().to_vec();
    require("texture header", &header, 0x94)?;
    let data = merge_header(gtf, &mut header)?.to_vec();
    let format = read_be_u32(gtf, 0x20).unwrap_or(0);
    header[0x90..0x94].copy_from_slice(&format.to_be_bytes());

    texture.header.replace(header);
    texture.data.replace(data);
    Ok(())
}

//! H7A block decompression
//!
//! H7A is the LZ-style scheme used for compressed IFF blocks. A compressed
//! block starts with a 20-byte big-endian sub-header followed by the token
//! stream.
//!
//! # Token Stream
//!
//! ```text
//! descriptor(1) token token ... (up to 8 tokens per descriptor)
//!
//! descriptor bit (LSB first) = 0: literal, copy one byte
//! descriptor bit             = 1: back-reference, two bytes hi lo
//!     combined = hi << 8 | lo
//!     length   = ((combined >> shift) & ((1 << (16 - shift)) - 1)) + 2
//!     distance =   combined & ((1 << shift) - 1)
//!     copy length + 1 bytes from output[pos - distance], one at a time
//! ```
//!
//! The copy count is `length + 1`, not `length`. Files written by the games
//! depend on it, so it is kept as-is.
//!
//! Decoding is lenient about malformed streams in the same way the game
//! tooling is: missing input bytes read as zero, back-references before the
//! start of the output produce zero bytes, and anything past the target length
//! is dropped.
//!
//! There is no encoder. Rewritten blocks are always stored uncompressed.

mod error;

pub use error::{H7aError, H7aResult};

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};

/// Size of the block sub-header
pub const H7A_HEADER_SIZE: usize = 20;

/// Largest shift amount that still fits a 16-bit token
pub const MAX_SHIFT: u32 = 16;

/// Sub-header in front of every compressed block
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct H7aHeader {
    /// Format magic, not validated
    pub magic: u32,
    /// Length of the decoded payload
    pub uncompressed_length: u32,
    /// Length of the token stream
    pub compressed_length: u32,
    /// Unused
    pub reserved: u32,
    /// Bit position splitting length from distance in back-references
    pub shift: u32,
}

/// Decode a compressed block: sub-header followed by the token stream.
pub fn decompress_block(payload: &[u8]) -> H7aResult<Vec<u8>> {
    if payload.len() < H7A_HEADER_SIZE {
        return Err(H7aError::Truncated {
            required: H7A_HEADER_SIZE,
            actual: payload.len(),
        });
    }

    let header = H7aHeader::read(&mut Cursor::new(&payload[..H7A_HEADER_SIZE]))?;
    tracing::trace!(
        "H7A block: {} -> {} bytes, shift {}",
        header.compressed_length,
        header.uncompressed_length,
        header.shift
    );

    decompress(
        &payload[H7A_HEADER_SIZE..],
        header.uncompressed_length as usize,
        header.shift,
    )
}

/// Decode a raw token stream into exactly `decompressed_size` bytes.
pub fn decompress(input: &[u8], decompressed_size: usize, shift: u32) -> H7aResult<Vec<u8>> {
    if shift > MAX_SHIFT {
        return Err(H7aError::InvalidShift(shift));
    }

    let length_mask = (1u32 << (MAX_SHIFT - shift)) - 1;
    let distance_mask = (1u32 << shift) - 1;
    let byte_at = |index: usize| input.get(index).copied().unwrap_or(0);

    let mut output = vec![0u8; decompressed_size];
    let mut src = 0usize;
    let mut pos = 0usize;

    while pos < decompressed_size {
        let mut descriptor = byte_at(src);
        src += 1;

        for _ in 0..8 {
            if pos >= decompressed_size {
                break;
            }

            if descriptor & 1 == 0 {
                output[pos] = byte_at(src);
                src += 1;
                pos += 1;
            } else {
                let combined = (u32::from(byte_at(src)) << 8) | u32::from(byte_at(src + 1));
                src += 2;

                let length = ((combined >> shift) & length_mask) + 2;
                let distance = (combined & distance_mask) as usize;

                for _ in 0..=length {
                    let value = pos
                        .checked_sub(distance)
                        .and_then(|index| output.get(index))
                        .copied()
                        .unwrap_or(0);
                    if let Some(slot) = output.get_mut(pos) {
                        *slot = value;
                    }
                    pos += 1;
                }
            }

            descriptor >>= 1;
        }

        if src >= input.len() {
            break;
        }
    }

    Ok(output)
}

impl H7aHeader {
    /// Serialize the sub-header
    pub fn to_bytes(&self) -> H7aResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::with_capacity(H7A_HEADER_SIZE));
        self.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

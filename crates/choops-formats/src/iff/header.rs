//! IFF header and block descriptor structures

use binrw::io::{Read, Seek, Write};
use binrw::{BinRead, BinResult, BinWrite, Endian};

use super::IFF_MAGIC;
use super::error::IffError;

/// Size of the fixed container header
pub const IFF_HEADER_SIZE: usize = 0x20;

/// Size of one block descriptor
pub const BLOCK_DESCRIPTOR_SIZE: usize = 0x20;

/// Fixed container header
///
/// Every field follows the container endianness except `file_length`, which
/// is always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IffHeader {
    /// Container magic (0xFF3BEF94)
    pub magic: u32,
    /// Bytes covered by header, block table, offset table and directory
    pub header_size: u32,
    /// Offset of the end of the last block
    pub file_length: u32,
    /// Always zero in observed files
    pub reserved: u32,
    /// Number of block descriptors
    pub block_count: u32,
    /// Unknown
    pub unknown_14: u32,
    /// Number of resources
    pub file_count: u32,
    /// Unknown
    pub unknown_1c: u32,
}

impl BinRead for IffHeader {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let magic = u32::read_options(reader, endian, ())?;

        if magic != IFF_MAGIC {
            return Err(binrw::Error::Custom {
                pos,
                err: Box::new(IffError::MalformedHeader {
                    magic,
                    expected: IFF_MAGIC,
                }),
            });
        }

        Ok(Self {
            magic,
            header_size: u32::read_options(reader, endian, ())?,
            file_length: u32::read_options(reader, Endian::Big, ())?,
            reserved: u32::read_options(reader, endian, ())?,
            block_count: u32::read_options(reader, endian, ())?,
            unknown_14: u32::read_options(reader, endian, ())?,
            file_count: u32::read_options(reader, endian, ())?,
            unknown_1c: u32::read_options(reader, endian, ())?,
        })
    }
}

impl BinWrite for IffHeader {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        self.magic.write_options(writer, endian, ())?;
        self.header_size.write_options(writer, endian, ())?;
        self.file_length.write_options(writer, Endian::Big, ())?;
        self.reserved.write_options(writer, endian, ())?;
        self.block_count.write_options(writer, endian, ())?;
        self.unknown_14.write_options(writer, endian, ())?;
        self.file_count.write_options(writer, endian, ())?;
        self.unknown_1c.write_options(writer, endian, ())?;
        Ok(())
    }
}

/// Block descriptor
///
/// A block is compressed when its compressed and uncompressed lengths differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
pub struct BlockDescriptor {
    /// Block name hash
    pub name: u32,
    /// Block type hash
    pub tag: u32,
    /// Unknown
    pub unknown_08: u32,
    /// Decoded payload length
    pub uncompressed_length: u32,
    /// Unknown
    pub unknown_10: u32,
    /// Absolute offset of the payload inside the container
    pub start_offset: u32,
    /// Stored payload length
    pub compressed_length: u32,
    /// Index flag
    pub is_indexed: u32,
}

impl BlockDescriptor {
    /// Whether the stored payload is H7A-compressed
    pub fn is_compressed(&self) -> bool {
        self.uncompressed_length != self.compressed_length
    }

    /// Number of payload bytes stored in the container
    pub fn stored_length(&self) -> u32 {
        if self.is_compressed() {
            self.compressed_length
        } else {
            self.uncompressed_length
        }
    }
}

//! Fixed package header

use binrw::{BinRead, BinWrite};

/// Length of the fixed header
pub const PACKAGE_HEADER_SIZE: usize = 0x54;

/// Length of one texture header record
pub const TEXTURE_HEADER_SIZE: usize = 0xB0;

/// Offset of the one-based data offset inside a texture header record
pub const TEXTURE_DATA_OFFSET_FIELD: usize = 0xA4;

/// Bias added to the stored texture table offset
const TEXTURE_OFFSET_BIAS: u32 = 0x23;

/// Bias added to the stored model part table offset
const MODEL_PARTS_OFFSET_BIAS: u32 = 0x47;

/// Big-endian header at the start of the package header block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct PackageHeader {
    /// One-based offset of the UTF-16BE package name
    pub name_offset: u32,
    /// Unknown words 0x04..0x20
    pub unknown_04: [u32; 7],
    /// Number of texture header records
    pub texture_count: u32,
    /// Texture table offset minus 0x23
    pub relative_texture_offset: u32,
    /// Unknown words 0x28..0x44
    pub unknown_28: [u32; 7],
    /// Number of model parts
    pub model_part_count: u32,
    /// Model part table offset minus 0x47
    pub relative_model_parts_offset: u32,
    /// Unknown words 0x4C..0x54
    pub unknown_4c: [u32; 2],
}

impl PackageHeader {
    /// Absolute offset of the first texture header record
    pub const fn texture_offset(&self) -> u64 {
        self.relative_texture_offset as u64 + TEXTURE_OFFSET_BIAS as u64
    }

    /// Absolute offset of the model part table
    pub const fn model_parts_offset(&self) -> u64 {
        self.relative_model_parts_offset as u64 + MODEL_PARTS_OFFSET_BIAS as u64
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use binrw::io::Cursor;

    #[test]
    fn test_header_layout() {
        let mut bytes = vec![0u8; PACKAGE_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&0x2A1u32.to_be_bytes());
        bytes[0x20..0x24].copy_from_slice(&3u32.to_be_bytes());
        bytes[0x24..0x28].copy_from_slice(&0x6Du32.to_be_bytes());
        bytes[0x44..0x48].copy_from_slice(&2u32.to_be_bytes());
        bytes[0x48..0x4C].copy_from_slice(&0x100u32.to_be_bytes());
        bytes[0x50..0x54].copy_from_slice(&0xDEAD_BEEFu32.to_be_bytes());

        let header = PackageHeader::read(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(header.name_offset, 0x2A1);
        assert_eq!(header.texture_count, 3);
        assert_eq!(header.texture_offset(), 0x90);
        assert_eq!(header.model_part_count, 2);
        assert_eq!(header.model_parts_offset(), 0x147);
        assert_eq!(header.unknown_4c, [0, 0xDEAD_BEEF]);

        let mut out = Cursor::new(Vec::new());
        header.write(&mut out).unwrap();
        assert_eq!(out.into_inner(), bytes);
    }
}

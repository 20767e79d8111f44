//! Texture package nested in SCNE resources
//!
//! A scene resource stores its textures as a package split over the two
//! segments of the resource: a header block and a data block.
//!
//! ```text
//! header block
//! 0x00   fixed header (0x54)       name offset, texture count, table offset
//! 0x54   header trailer            opaque, kept verbatim
//! tex    texture headers (0xB0)    one-based data offset at 0xA4
//!        post-table bytes          opaque, kept verbatim
//! name   UTF-16BE name, NUL
//!        post-name bytes           opaque, kept verbatim
//!
//! data block
//!        leading bytes             before the first texture, kept verbatim
//!        texture payloads          in data offset order
//! ```
//!
//! Payload lengths are not stored: each texture runs to the next higher data
//! offset, the last one to the end of the block. On write, unedited payloads
//! keep their relative order and edited payloads are appended after them in
//! declaration order. Every data offset is recomputed to match.

mod error;
mod header;

pub use error::{PackageError, PackageResult};
pub use header::{
    PACKAGE_HEADER_SIZE, PackageHeader, TEXTURE_DATA_OFFSET_FIELD, TEXTURE_HEADER_SIZE,
};

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};

use crate::iff::Resource;
use crate::segment::SegmentData;

/// Number of segments a package resource must have
pub const PACKAGE_SEGMENT_COUNT: usize = 2;

/// One texture: its header record and its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageTexture {
    /// Declaration index
    pub index: usize,
    /// 0xB0-byte header record
    pub header: SegmentData,
    /// Payload bytes
    pub data: SegmentData,
}

impl PackageTexture {
    /// One-based data offset stored in the header record
    pub fn data_offset(&self) -> u32 {
        read_be_u32(self.header.bytes(), TEXTURE_DATA_OFFSET_FIELD).unwrap_or(0)
    }

    /// Whether the header or payload was modified
    pub fn is_dirty(&self) -> bool {
        self.header.is_dirty() || self.data.is_dirty()
    }
}

/// Serialized package, one buffer per resource segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageBlocks {
    /// Segment 0
    pub header: Vec<u8>,
    /// Segment 1
    pub data: Vec<u8>,
}

/// Parsed texture package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenePackage {
    /// Fixed header as read
    pub header: PackageHeader,
    /// Bytes between the fixed header and the texture table
    pub header_trailer: Vec<u8>,
    /// Bytes between the texture table and the name
    pub post_texture_headers: Vec<u8>,
    /// Bytes after the name terminator
    pub post_name: Vec<u8>,
    /// Textures in declaration order
    pub textures: Vec<PackageTexture>,
    name: String,
    name_dirty: bool,
    leading: Vec<u8>,
    data_order: Vec<usize>,
}

impl ScenePackage {
    /// Parse a package from its header and data blocks
    pub fn parse(header_block: &[u8], data_block: &[u8]) -> PackageResult<Self> {
        let block_length = header_block.len() as u64;
        let truncated = |what, offset: u64| PackageError::Truncated {
            what,
            offset,
            length: block_length,
        };

        if header_block.len() < PACKAGE_HEADER_SIZE {
            return Err(truncated("header", 0));
        }
        let header = PackageHeader::read(&mut Cursor::new(header_block))?;

        let table_start = header.texture_offset() as usize;
        let table_end = table_start + header.texture_count as usize * TEXTURE_HEADER_SIZE;
        if table_start < PACKAGE_HEADER_SIZE || table_end > header_block.len() {
            return Err(truncated("texture table", table_start as u64));
        }

        let name_start = (header.name_offset as usize)
            .checked_sub(1)
            .filter(|&start| start >= table_end && start <= header_block.len())
            .ok_or_else(|| truncated("name", u64::from(header.name_offset)))?;

        let mut units = Vec::new();
        let mut cursor = name_start;
        loop {
            let unit = header_block
                .get(cursor..cursor + 2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .ok_or_else(|| truncated("name", name_start as u64))?;
            cursor += 2;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        let name = String::from_utf16(&units).map_err(|_| PackageError::InvalidName)?;

        let headers: Vec<&[u8]> = header_block[table_start..table_end]
            .chunks_exact(TEXTURE_HEADER_SIZE)
            .collect();
        let offsets: Vec<u32> = headers
            .iter()
            .map(|record| read_be_u32(record, TEXTURE_DATA_OFFSET_FIELD).unwrap_or(0))
            .collect();

        let mut data_order: Vec<usize> = (0..headers.len()).collect();
        data_order.sort_by_key(|&index| offsets[index]);

        let out_of_range = |index: usize| PackageError::TextureOutOfRange {
            index,
            offset: u64::from(offsets[index]),
            length: data_block.len() as u64,
        };

        let mut payloads = vec![Vec::new(); headers.len()];
        for (position, &index) in data_order.iter().enumerate() {
            let start = (offsets[index] as usize)
                .checked_sub(1)
                .filter(|&start| start <= data_block.len())
                .ok_or_else(|| out_of_range(index))?;
            let end = match data_order.get(position + 1) {
                Some(&next) => (offsets[next] as usize - 1).min(data_block.len()),
                None => data_block.len(),
            };
            payloads[index] = data_block[start..end].to_vec();
        }

        let leading_end = data_order
            .first()
            .map_or(data_block.len(), |&first| offsets[first] as usize - 1);

        let textures = headers
            .into_iter()
            .zip(payloads)
            .enumerate()
            .map(|(index, (record, data))| PackageTexture {
                index,
                header: SegmentData::new(record.to_vec()),
                data: SegmentData::new(data),
            })
            .collect();

        Ok(Self {
            header,
            header_trailer: header_block[PACKAGE_HEADER_SIZE..table_start].to_vec(),
            post_texture_headers: header_block[table_end..name_start].to_vec(),
            post_name: header_block[cursor..].to_vec(),
            textures,
            name,
            name_dirty: false,
            leading: data_block[..leading_end].to_vec(),
            data_order,
        })
    }

    /// Parse the package held by a two-segment resource
    pub fn from_resource(resource: &Resource) -> PackageResult<Self> {
        match resource.segments.as_slice() {
            [header, data] => Self::parse(header.data.bytes(), data.data.bytes()),
            segments => Err(PackageError::UnsupportedSegmentCount {
                count: segments.len(),
            }),
        }
    }

    /// Package name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the package
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.name_dirty = true;
    }

    /// Texture by declaration index
    pub fn texture(&self, index: usize) -> Option<&PackageTexture> {
        self.textures.get(index)
    }

    /// Mutable texture by declaration index
    pub fn texture_mut(&mut self, index: usize) -> Option<&mut PackageTexture> {
        self.textures.get_mut(index)
    }

    /// Whether anything was modified since parse or the last commit
    pub fn is_dirty(&self) -> bool {
        self.name_dirty || self.textures.iter().any(PackageTexture::is_dirty)
    }

    /// Payload order and one-based data offsets for the next write
    fn data_layout(&self) -> PackageResult<(Vec<usize>, Vec<u32>)> {
        let mut order: Vec<usize> = self
            .data_order
            .iter()
            .copied()
            .filter(|&index| !self.textures[index].data.is_dirty())
            .collect();
        order.extend(
            self.textures
                .iter()
                .filter(|texture| texture.data.is_dirty())
                .map(|texture| texture.index),
        );

        let mut offsets = vec![0u32; self.textures.len()];
        let mut cursor = self.leading.len() + 1;
        for &index in &order {
            offsets[index] = u32::try_from(cursor).map_err(|_| PackageError::TextureOutOfRange {
                index,
                offset: cursor as u64,
                length: u64::from(u32::MAX),
            })?;
            cursor += self.textures[index].data.len();
        }
        Ok((order, offsets))
    }

    /// Serialize into header and data blocks
    pub fn build(&self) -> PackageResult<PackageBlocks> {
        let (order, offsets) = self.data_layout()?;

        let table_start = PACKAGE_HEADER_SIZE + self.header_trailer.len();
        let name_start = table_start
            + self.textures.len() * TEXTURE_HEADER_SIZE
            + self.post_texture_headers.len();

        let header = PackageHeader {
            name_offset: to_u32(name_start + 1)?,
            texture_count: to_u32(self.textures.len())?,
            relative_texture_offset: to_u32(table_start)? - 0x23,
            ..self.header
        };

        let mut cursor = Cursor::new(Vec::new());
        header.write(&mut cursor)?;
        let mut out = cursor.into_inner();
        out.extend_from_slice(&self.header_trailer);

        for (texture, offset) in self.textures.iter().zip(&offsets) {
            out.extend_from_slice(&texture_header(texture, *offset)?);
        }

        out.extend_from_slice(&self.post_texture_headers);
        out.extend(
            self.name
                .encode_utf16()
                .chain(std::iter::once(0))
                .flat_map(u16::to_be_bytes),
        );
        out.extend_from_slice(&self.post_name);

        let mut data = self.leading.clone();
        for index in order {
            data.extend_from_slice(self.textures[index].data.bytes());
        }

        Ok(PackageBlocks { header: out, data })
    }

    /// Write the package into the two segments of `resource`, marking them
    /// dirty.
    pub fn apply_to(&self, resource: &mut Resource) -> PackageResult<()> {
        let count = resource.segments.len();
        if count != PACKAGE_SEGMENT_COUNT {
            return Err(PackageError::UnsupportedSegmentCount { count });
        }
        let blocks = self.build()?;
        resource.segments[0].data.replace(blocks.header);
        resource.segments[1].data.replace(blocks.data);
        Ok(())
    }

    /// Adopt the written layout and clear dirty flags.
    pub fn commit(&mut self) -> PackageResult<()> {
        let (order, offsets) = self.data_layout()?;
        for (texture, offset) in self.textures.iter_mut().zip(offsets) {
            let record = texture_header(texture, offset)?;
            texture.header = SegmentData::new(record);
            texture.data.mark_clean();
        }
        self.data_order = order;
        self.name_dirty = false;
        Ok(())
    }
}

fn texture_header(texture: &PackageTexture, offset: u32) -> PackageResult<Vec<u8>> {
    let mut record = texture.header.bytes().to_vec();
    if record.len() != TEXTURE_HEADER_SIZE {
        return Err(PackageError::Truncated {
            what: "texture header",
            offset: texture.index as u64,
            length: record.len() as u64,
        });
    }
    record[TEXTURE_DATA_OFFSET_FIELD..TEXTURE_DATA_OFFSET_FIELD + 4]
        .copy_from_slice(&offset.to_be_bytes());
    Ok(record)
}

fn to_u32(value: usize) -> PackageResult<u32> {
    u32::try_from(value).map_err(|_| PackageError::Truncated {
        what: "header block",
        offset: value as u64,
        length: u64::from(u32::MAX),
    })
}

pub(crate) fn read_be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|word| u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::iff::{ResourceType, Segment};
    use crate::test_utils::{package_fixture, pattern};
    use pretty_assertions::assert_eq;

    fn textures() -> Vec<Vec<u8>> {
        vec![pattern(0x40, 1), pattern(0x100, 2), pattern(0x18, 3)]
    }

    fn resource(segments: Vec<Vec<u8>>) -> Resource {
        Resource {
            index: 0,
            id: 0x10,
            type_raw: 0x20,
            kind: ResourceType::Scne,
            name: "hi_shoe1".to_string(),
            segments: segments
                .into_iter()
                .map(|bytes| Segment {
                    offset: 0,
                    data: SegmentData::new(bytes),
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_fixture() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0x20);
        let package = ScenePackage::parse(&fixture.header_block, &fixture.data_block).unwrap();

        assert_eq!(package.name(), "hi_shoe1");
        assert_eq!(package.header.texture_offset(), 0x90);
        assert_eq!(package.header_trailer.len(), 0x3C);
        assert_eq!(package.post_texture_headers.len(), 0x10);
        assert_eq!(package.post_name.len(), 0x20);
        assert_eq!(package.textures.len(), 3);

        for (texture, expected) in package.textures.iter().zip(&fixture.textures) {
            assert_eq!(texture.data.bytes(), expected.as_slice());
            assert_eq!(texture.data_offset(), fixture.data_offsets[texture.index]);
        }
        assert!(!package.is_dirty());
    }

    #[test]
    fn test_unmodified_round_trip() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0x20);
        let package = ScenePackage::parse(&fixture.header_block, &fixture.data_block).unwrap();
        let blocks = package.build().unwrap();

        assert_eq!(blocks.header, fixture.header_block);
        assert_eq!(blocks.data, fixture.data_block);
    }

    #[test]
    fn test_edited_texture_is_appended() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0x20);
        let mut package = ScenePackage::parse(&fixture.header_block, &fixture.data_block).unwrap();

        // fixture stores payloads in reverse: 2, 1, 0
        package.texture_mut(1).unwrap().data.replace(vec![0xEE; 0x80]);
        assert!(package.is_dirty());

        let blocks = package.build().unwrap();
        let mut expected = fixture.data_block[..0x20].to_vec();
        expected.extend_from_slice(&fixture.textures[2]);
        expected.extend_from_slice(&fixture.textures[0]);
        expected.extend_from_slice(&[0xEE; 0x80]);
        assert_eq!(blocks.data, expected);
        assert_eq!(blocks.header.len(), fixture.header_block.len());

        let reparsed = ScenePackage::parse(&blocks.header, &blocks.data).unwrap();
        assert_eq!(reparsed.texture(0).unwrap().data.bytes(), fixture.textures[0].as_slice());
        assert_eq!(reparsed.texture(1).unwrap().data.bytes(), &[0xEE; 0x80]);
        assert_eq!(reparsed.texture(2).unwrap().data.bytes(), fixture.textures[2].as_slice());
        assert_eq!(reparsed.texture(1).unwrap().data_offset(), 0x20 + 0x18 + 0x40 + 1);

        package.commit().unwrap();
        assert!(!package.is_dirty());
        assert_eq!(package.build().unwrap(), blocks);
    }

    #[test]
    fn test_rename_moves_post_name() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0);
        let mut package = ScenePackage::parse(&fixture.header_block, &fixture.data_block).unwrap();
        package.set_name("lo_shoe12");
        assert!(package.is_dirty());

        let blocks = package.build().unwrap();
        assert_eq!(blocks.header.len(), fixture.header_block.len() + 2);
        assert_eq!(blocks.data, fixture.data_block);

        let reparsed = ScenePackage::parse(&blocks.header, &blocks.data).unwrap();
        assert_eq!(reparsed.name(), "lo_shoe12");
        assert_eq!(reparsed.post_name, package.post_name);
    }

    #[test]
    fn test_resource_bridge() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0x20);
        let mut scene = resource(vec![fixture.header_block.clone(), fixture.data_block.clone()]);

        let mut package = ScenePackage::from_resource(&scene).unwrap();
        package.texture_mut(2).unwrap().data.replace(vec![1, 2, 3]);
        package.apply_to(&mut scene).unwrap();

        assert!(scene.is_dirty());
        let reparsed = ScenePackage::from_resource(&scene).unwrap();
        assert_eq!(reparsed.texture(2).unwrap().data.bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_segment_count_must_be_two() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0);
        let scene = resource(vec![fixture.header_block]);

        let err = ScenePackage::from_resource(&scene).unwrap_err();
        assert!(matches!(err, PackageError::UnsupportedSegmentCount { count: 1 }));
    }

    #[test]
    fn test_texture_offset_past_data() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0);
        let err = ScenePackage::parse(&fixture.header_block, &fixture.data_block[..0x10])
            .unwrap_err();
        assert!(matches!(err, PackageError::TextureOutOfRange { .. }));
        assert!(err.is_data_corruption());
    }

    #[test]
    fn test_truncated_header() {
        let fixture = package_fixture("hi_shoe1", &textures(), 0);
        let err = ScenePackage::parse(&fixture.header_block[..0x100], &fixture.data_block)
            .unwrap_err();
        assert!(matches!(err, PackageError::Truncated { .. }));
    }
}

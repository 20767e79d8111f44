//! IFF resource container
//!
//! Most archive entries are IFF containers: a header, a table of blocks, a
//! directory of resources that each own one byte range (segment) per block,
//! the block payloads, and a trailing name table.
//!
//! # Layout
//!
//! ```text
//! 0x00  header (0x20)               magic, header size, file length, counts
//! 0x20  block descriptors (0x20 each)
//!       offset table (4 per resource, opaque, kept verbatim)
//!       directory: id, type hash, segment count, segment offsets...
//! hs    block payloads (raw, or H7A with a 20-byte sub-header)
//!       name section: magic, LE size, name table
//! ```
//!
//! Header fields follow the container endianness (big-endian on the PS3),
//! except the file length which is always big-endian.
//!
//! # Reading and Writing
//!
//! Parsing is a single forward pass. Segment lengths are derived per block by
//! sorting the resources that use it by offset. Writing concatenates segments
//! in declaration order and recomputes every offset and length, so an
//! unmodified container whose segments were already in declaration order is
//! rebuilt byte-for-byte (compressed blocks come back uncompressed).
//!
//! ```rust
//! use choops_formats::iff::IffFile;
//! # fn example(bytes: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let mut container = IffFile::parse(bytes)?;
//! if let Some(resource) = container.resource_mut("hi_shoe1") {
//!     resource.replace_segment(0, vec![0u8; 16])?;
//! }
//! let rebuilt = container.build()?;
//! # let _ = rebuilt;
//! # Ok(())
//! # }
//! ```

mod error;
mod header;
mod names;
mod reader;
mod resource;
mod writer;

pub use error::{IffError, IffResult};
pub use header::{BLOCK_DESCRIPTOR_SIZE, BlockDescriptor, IFF_HEADER_SIZE, IffHeader};
pub use names::{NAME_SECTION_HEADER_SIZE, NameRecord, decode_name_table};
pub use resource::{Resource, ResourceType, Segment};
pub use writer::ContainerLayout;

use binrw::Endian;

use crate::ChoopsFormat;
use crate::lookup::{NameLookup, NoLookup};

/// Container magic
pub const IFF_MAGIC: u32 = 0xFF3B_EF94;

/// Parsed IFF container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IffFile {
    /// Endianness of header, descriptors and directory
    pub endian: Endian,
    /// Fixed header as read
    pub header: IffHeader,
    /// Block descriptors, ordered by start offset
    pub blocks: Vec<BlockDescriptor>,
    /// Opaque per-resource offset table
    pub offset_table: Vec<u8>,
    /// Resources in declaration order
    pub resources: Vec<Resource>,
    /// Name section including its 8-byte prefix; empty when absent
    pub name_section: Vec<u8>,
}

impl IffFile {
    /// Parse a big-endian container without name lookup
    pub fn parse(data: &[u8]) -> IffResult<Self> {
        reader::read_container(data, Endian::Big, &NoLookup)
    }

    /// Parse with explicit endianness, resolving unknown type tags through
    /// `lookup`
    pub fn parse_with(data: &[u8], endian: Endian, lookup: &dyn NameLookup) -> IffResult<Self> {
        reader::read_container(data, endian, lookup)
    }

    /// Whether `data` starts with the container magic (big-endian)
    pub fn is_container(data: &[u8]) -> bool {
        data.get(0..4)
            .is_some_and(|magic| magic == IFF_MAGIC.to_be_bytes())
    }

    /// Layout the next [`build`](Self::build) will use
    pub fn layout(&self) -> IffResult<ContainerLayout> {
        ContainerLayout::compute(self)
    }

    /// Serialize with recomputed block offsets, lengths and file length
    pub fn build(&self) -> IffResult<Vec<u8>> {
        let layout = self.layout()?;
        writer::write_container(self, &layout)
    }

    /// Adopt the recomputed layout and clear dirty flags, after the bytes
    /// from [`build`](Self::build) were persisted.
    pub fn commit(&mut self) -> IffResult<()> {
        let layout = self.layout()?;
        for (resource, offsets) in self.resources.iter_mut().zip(&layout.segment_offsets) {
            for (segment, &offset) in resource.segments.iter_mut().zip(offsets) {
                segment.offset = offset;
            }
            resource.mark_clean();
        }
        self.header.file_length = layout.file_length;
        self.blocks = layout.blocks;
        Ok(())
    }

    /// Whether any resource segment was modified
    pub fn is_dirty(&self) -> bool {
        self.resources.iter().any(Resource::is_dirty)
    }

    /// Resource by name (case-sensitive, as stored)
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    /// Mutable resource by name
    pub fn resource_mut(&mut self, name: &str) -> Option<&mut Resource> {
        self.resources
            .iter_mut()
            .find(|resource| resource.name == name)
    }

    /// Resources of one type
    pub fn resources_of(&self, kind: ResourceType) -> impl Iterator<Item = &Resource> {
        self.resources
            .iter()
            .filter(move |resource| resource.kind == kind)
    }
}

impl ChoopsFormat for IffFile {
    fn parse(data: &[u8]) -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self::parse(data)?)
    }

    fn build(&self) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        Ok(Self::build(self)?)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lookup::HashLookupTable;
    use crate::test_utils::{IffBuilder, hi_shoe1_builder, pattern};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hi_shoe1() {
        let bytes = hi_shoe1_builder().build();
        let container = IffFile::parse(&bytes).unwrap();

        assert_eq!(container.header.magic, IFF_MAGIC);
        assert_eq!(container.header.header_size, 0x54);
        assert_eq!(container.blocks.len(), 1);
        assert_eq!(container.blocks[0].uncompressed_length, 0x5956);
        assert_eq!(container.offset_table, 5u32.to_be_bytes().to_vec());

        let resource = &container.resources[0];
        assert_eq!(resource.name, "hi_shoe1");
        assert_eq!(resource.kind, ResourceType::Scne);
        assert_eq!(resource.id, 0xCFE5_8145);
        assert_eq!(resource.type_raw, 0xE26C_9B5D);
        assert_eq!(resource.segments[0].data.len(), 0x5956);
        assert!(!container.is_dirty());
    }

    #[test]
    fn test_round_trip_hi_shoe1() {
        let bytes = hi_shoe1_builder().build();
        let container = IffFile::parse(&bytes).unwrap();
        let rebuilt = container.build().unwrap();

        assert_eq!(rebuilt.len(), 0x5A0E);
        assert_eq!(&rebuilt[8..12], &0x59AAu32.to_be_bytes());
        assert_eq!(&rebuilt[0x54..0x54 + 0x5956], &bytes[0x54..0x54 + 0x5956]);
        assert!(rebuilt == bytes);
        <IffFile as ChoopsFormat>::verify_round_trip(&bytes).unwrap();
    }

    #[test]
    fn test_compressed_block_written_uncompressed() {
        let plain = hi_shoe1_builder().build();
        let compressed = hi_shoe1_builder().compressed(true).build();
        assert_ne!(plain.len(), compressed.len());

        let container = IffFile::parse(&compressed).unwrap();
        assert!(!container.blocks[0].is_compressed());
        assert_eq!(container.resources[0].segments[0].data.len(), 0x5956);

        assert_eq!(container.build().unwrap(), plain);
    }

    #[test]
    fn test_segment_lengths_follow_offset_order() {
        // resource 1 sits before resource 0 in both blocks
        let bytes = IffBuilder::new()
            .block(pattern(0x30, 1))
            .block(pattern(0x20, 2))
            .resource(10, 0, &[0x10, 0x08])
            .resource(11, 0, &[0x00, 0x00])
            .resource(12, 0, &[0x28])
            .name("a", "TXTR")
            .name("b", "TXTR")
            .name("c", "AUDO")
            .build();

        let container = IffFile::parse(&bytes).unwrap();
        let lengths: Vec<Vec<usize>> = container
            .resources
            .iter()
            .map(|r| r.segments.iter().map(|s| s.data.len()).collect())
            .collect();

        assert_eq!(lengths, vec![vec![0x18, 0x18], vec![0x10, 0x08], vec![0x08]]);
        assert_eq!(container.resources[2].kind, ResourceType::Audo);

        let block0 = pattern(0x30, 1);
        assert_eq!(container.resources[1].segment(0), Some(&block0[0..0x10]));
        assert_eq!(container.resources[0].segment(0), Some(&block0[0x10..0x28]));
    }

    #[test]
    fn test_write_uses_declaration_order() {
        let bytes = IffBuilder::new()
            .block(pattern(0x30, 1))
            .resource(10, 0, &[0x10])
            .resource(11, 0, &[0x00])
            .name("late", "TXTR")
            .name("early", "TXTR")
            .build();

        let container = IffFile::parse(&bytes).unwrap();
        let layout = container.layout().unwrap();
        assert_eq!(layout.segment_offsets, vec![vec![0x00], vec![0x20]]);

        let rebuilt = container.build().unwrap();
        let reparsed = IffFile::parse(&rebuilt).unwrap();
        assert_eq!(
            reparsed.resource("late").unwrap().data(),
            container.resource("late").unwrap().data()
        );
        assert_eq!(
            reparsed.resource("early").unwrap().data(),
            container.resource("early").unwrap().data()
        );

        // a second cycle keeps the same layout
        assert_eq!(reparsed.build().unwrap(), rebuilt);
    }

    #[test]
    fn test_replace_segment_grows_block() {
        let bytes = hi_shoe1_builder().build();
        let mut container = IffFile::parse(&bytes).unwrap();

        container
            .resource_mut("hi_shoe1")
            .unwrap()
            .replace_segment(0, vec![0xAB; 0x6000])
            .unwrap();
        assert!(container.is_dirty());

        let rebuilt = container.build().unwrap();
        assert_eq!(rebuilt.len(), 0x54 + 0x6000 + 100);
        assert_eq!(&rebuilt[8..12], &(0x54u32 + 0x6000).to_be_bytes());

        container.commit().unwrap();
        assert!(!container.is_dirty());
        assert_eq!(container.blocks[0].uncompressed_length, 0x6000);
        assert_eq!(container.header.file_length, 0x6054);

        let reparsed = IffFile::parse(&rebuilt).unwrap();
        assert_eq!(reparsed.resources[0].data(), vec![0xAB; 0x6000]);
    }

    #[test]
    fn test_empty_name_section_uses_indices() {
        let bytes = IffBuilder::new()
            .block(pattern(0x10, 1))
            .resource(1, 0x1234, &[0])
            .resource(2, 0x5678, &[0x8])
            .empty_name_section()
            .build();

        let container = IffFile::parse(&bytes).unwrap();
        assert_eq!(container.resources[0].name, "0");
        assert_eq!(container.resources[1].name, "1");
        assert_eq!(container.resources[0].kind, ResourceType::Unknown);
        assert_eq!(container.name_section.len(), NAME_SECTION_HEADER_SIZE);
        assert_eq!(container.build().unwrap(), bytes);
    }

    #[test]
    fn test_missing_name_section() {
        let bytes = IffBuilder::new()
            .block(pattern(0x10, 1))
            .resource(1, 0x1234, &[0])
            .without_name_section()
            .build();

        let container = IffFile::parse(&bytes).unwrap();
        assert_eq!(container.resources[0].name, "0");
        assert!(container.name_section.is_empty());
        assert_eq!(container.build().unwrap(), bytes);
    }

    #[test]
    fn test_type_falls_back_to_lookup() {
        let bytes = IffBuilder::new()
            .block(pattern(0x10, 1))
            .resource(1, 0x1234, &[0])
            .empty_name_section()
            .build();

        let mut lookup = HashLookupTable::new();
        lookup.insert(0x1234, "TXTR");

        let container = IffFile::parse_with(&bytes, Endian::Big, &lookup).unwrap();
        assert_eq!(container.resources[0].kind, ResourceType::Txtr);
    }

    #[test]
    fn test_wrong_magic() {
        let mut bytes = hi_shoe1_builder().build();
        bytes[0] = 0;

        let err = IffFile::parse(&bytes).unwrap_err();
        assert!(matches!(err, IffError::MalformedHeader { .. }));
        assert!(err.is_data_corruption());
        assert!(!IffFile::is_container(&bytes));
    }

    #[test]
    fn test_truncated_block() {
        let bytes = hi_shoe1_builder().build();
        let err = IffFile::parse(&bytes[..0x100]).unwrap_err();
        assert!(matches!(err, IffError::InvalidLayout(_)));
    }
}

//! IFF serializer
//!
//! Block payloads are rebuilt from the current segment bytes. Within a block,
//! segments are concatenated in resource declaration order, not in the offset
//! order they were read in, so repeated edit/write cycles produce the same
//! layout. Blocks are always written uncompressed.

use binrw::BinWrite;
use binrw::io::Cursor;

use super::IffFile;
use super::error::{IffError, IffResult};
use super::header::{BlockDescriptor, IffHeader};

/// Recomputed bookkeeping for one serialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLayout {
    /// Block descriptors with new offsets and lengths
    pub blocks: Vec<BlockDescriptor>,
    /// New intra-block offset of every segment, per resource
    pub segment_offsets: Vec<Vec<u32>>,
    /// End of the last block
    pub file_length: u32,
}

fn to_u32(value: usize, what: &str) -> IffResult<u32> {
    u32::try_from(value)
        .map_err(|_| IffError::InvalidLayout(format!("{what} {value:#x} exceeds 32 bits")))
}

impl ContainerLayout {
    /// Compute the layout `file` would be written with
    pub fn compute(file: &IffFile) -> IffResult<Self> {
        let mut segment_offsets: Vec<Vec<u32>> = file
            .resources
            .iter()
            .map(|resource| vec![0; resource.segments.len()])
            .collect();
        let mut blocks = Vec::with_capacity(file.blocks.len());
        let mut start = file.header.header_size as usize;

        for (block_index, descriptor) in file.blocks.iter().enumerate() {
            let mut length = 0usize;
            for (resource_index, resource) in file.resources.iter().enumerate() {
                if let Some(segment) = resource.segments.get(block_index) {
                    segment_offsets[resource_index][block_index] = to_u32(length, "segment offset")?;
                    length += segment.data.len();
                }
            }

            let length = to_u32(length, "block length")?;
            blocks.push(BlockDescriptor {
                start_offset: to_u32(start, "block offset")?,
                uncompressed_length: length,
                compressed_length: length,
                ..*descriptor
            });
            start += length as usize;
        }

        Ok(Self {
            blocks,
            segment_offsets,
            file_length: to_u32(start, "file length")?,
        })
    }
}

pub(super) fn write_container(file: &IffFile, layout: &ContainerLayout) -> IffResult<Vec<u8>> {
    let header_size = file.header.header_size as usize;
    let endian = file.endian;

    let header = IffHeader {
        file_length: layout.file_length,
        block_count: to_u32(layout.blocks.len(), "block count")?,
        file_count: to_u32(file.resources.len(), "resource count")?,
        ..file.header
    };

    let mut cursor = Cursor::new(Vec::with_capacity(
        layout.file_length as usize + file.name_section.len(),
    ));
    header.write_options(&mut cursor, endian, ())?;
    for block in &layout.blocks {
        block.write_options(&mut cursor, endian, ())?;
    }

    let mut out = cursor.into_inner();
    out.extend_from_slice(&file.offset_table);

    for (resource, offsets) in file.resources.iter().zip(&layout.segment_offsets) {
        for word in [
            resource.id,
            resource.type_raw,
            to_u32(resource.segments.len(), "segment count")?,
        ]
        .into_iter()
        .chain(offsets.iter().copied())
        {
            match endian {
                binrw::Endian::Big => out.extend_from_slice(&word.to_be_bytes()),
                binrw::Endian::Little => out.extend_from_slice(&word.to_le_bytes()),
            }
        }
    }

    if out.len() > header_size {
        return Err(IffError::HeaderOverflow {
            required: out.len() as u64,
            header_size: header_size as u64,
        });
    }
    out.resize(header_size, 0);

    for block_index in 0..layout.blocks.len() {
        for resource in &file.resources {
            if let Some(segment) = resource.segments.get(block_index) {
                out.extend_from_slice(segment.data.bytes());
            }
        }
    }

    out.extend_from_slice(&file.name_section);
    Ok(out)
}

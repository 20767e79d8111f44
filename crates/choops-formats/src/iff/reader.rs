//! Sequential IFF parser

use binrw::io::{Cursor, Seek};
use binrw::{BinRead, Endian};
use tracing::{debug, trace};

use super::error::{IffError, IffResult};
use super::header::{BlockDescriptor, IffHeader};
use super::names::{NAME_SECTION_HEADER_SIZE, decode_name_table};
use super::resource::{Resource, ResourceType, Segment};
use super::IffFile;
use crate::h7a;
use crate::lookup::NameLookup;
use crate::segment::SegmentData;

struct DirectoryRecord {
    id: u32,
    type_raw: u32,
    offsets: Vec<u32>,
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize, what: &str) -> IffResult<&'a [u8]> {
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            IffError::InvalidLayout(format!(
                "{what} at {:#x} needs {len:#x} bytes, container is {:#x} bytes",
                *pos,
                data.len()
            ))
        })?;
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

fn read_u32(bytes: &[u8], endian: Endian) -> u32 {
    let word = [bytes[0], bytes[1], bytes[2], bytes[3]];
    match endian {
        Endian::Big => u32::from_be_bytes(word),
        Endian::Little => u32::from_le_bytes(word),
    }
}

fn header_error(err: binrw::Error) -> IffError {
    match err {
        binrw::Error::Custom { err, .. } => match err.downcast::<IffError>() {
            Ok(inner) => *inner,
            Err(other) => IffError::InvalidLayout(format!("{other:?}")),
        },
        other => IffError::BinRead(other),
    }
}

/// Segment lengths for every (resource, block) pair.
///
/// Within a block, resources are ordered by offset and each length runs up to
/// the next offset; the last one runs to the end of the block.
fn segment_lengths(
    blocks: &[BlockDescriptor],
    records: &[DirectoryRecord],
) -> IffResult<Vec<Vec<u32>>> {
    let mut lengths: Vec<Vec<u32>> = records
        .iter()
        .map(|record| vec![0; record.offsets.len()])
        .collect();

    for (block_index, block) in blocks.iter().enumerate() {
        let mut users: Vec<usize> = (0..records.len())
            .filter(|&i| records[i].offsets.len() > block_index)
            .collect();
        users.sort_by_key(|&i| records[i].offsets[block_index]);

        for (rank, &resource) in users.iter().enumerate() {
            let offset = records[resource].offsets[block_index];
            let end = users
                .get(rank + 1)
                .map_or(block.uncompressed_length, |&next| {
                    records[next].offsets[block_index]
                });
            lengths[resource][block_index] = end.checked_sub(offset).ok_or_else(|| {
                IffError::SegmentOutOfRange {
                    resource,
                    segment: block_index,
                    offset: u64::from(offset),
                    length: 0,
                    block_length: u64::from(block.uncompressed_length),
                }
            })?;
        }
    }

    Ok(lengths)
}

pub(super) fn read_container(
    data: &[u8],
    endian: Endian,
    lookup: &dyn NameLookup,
) -> IffResult<IffFile> {
    let mut cursor = Cursor::new(data);
    let header = IffHeader::read_options(&mut cursor, endian, ()).map_err(header_error)?;

    let mut blocks = Vec::with_capacity(header.block_count as usize);
    for _ in 0..header.block_count {
        blocks.push(BlockDescriptor::read_options(&mut cursor, endian, ())?);
    }
    blocks.sort_by_key(|block| block.start_offset);

    let mut pos = cursor.stream_position()? as usize;
    let offset_table = take(data, &mut pos, header.file_count as usize * 4, "offset table")?.to_vec();

    let mut records = Vec::with_capacity(header.file_count as usize);
    for index in 0..header.file_count as usize {
        let fixed = take(data, &mut pos, 12, "directory record")?;
        let id = read_u32(&fixed[0..4], endian);
        let type_raw = read_u32(&fixed[4..8], endian);
        let count = read_u32(&fixed[8..12], endian) as usize;

        if count > blocks.len() {
            return Err(IffError::InvalidLayout(format!(
                "resource {index} has {count} segments but the container has {} blocks",
                blocks.len()
            )));
        }

        let offsets = take(data, &mut pos, count * 4, "segment offsets")?
            .chunks_exact(4)
            .map(|word| read_u32(word, endian))
            .collect();
        records.push(DirectoryRecord {
            id,
            type_raw,
            offsets,
        });
    }

    let header_size = header.header_size as usize;
    if pos > header_size {
        return Err(IffError::InvalidLayout(format!(
            "directory ends at {pos:#x}, past header size {header_size:#x}"
        )));
    }
    pos = header_size;

    let lengths = segment_lengths(&blocks, &records)?;

    let mut payloads = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.iter_mut().enumerate() {
        let start = block.start_offset as usize;
        if start < pos {
            return Err(IffError::InvalidLayout(format!(
                "block {index} starts at {start:#x}, before the current position {pos:#x}"
            )));
        }
        pos = start;

        let stored = take(data, &mut pos, block.stored_length() as usize, "block payload")?;
        let payload = if block.is_compressed() {
            trace!(
                "Decompressing block {index}: {:#x} -> {:#x} bytes",
                block.compressed_length, block.uncompressed_length
            );
            let decoded = h7a::decompress_block(stored)?;
            block.compressed_length = block.uncompressed_length;
            decoded
        } else {
            stored.to_vec()
        };
        payloads.push(payload);
    }

    let (name_section, names) = if data.len().saturating_sub(pos) >= NAME_SECTION_HEADER_SIZE {
        let prefix = take(data, &mut pos, NAME_SECTION_HEADER_SIZE, "name section")?;
        let size = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;
        let body = take(data, &mut pos, size, "name table")?;

        let mut section = Vec::with_capacity(NAME_SECTION_HEADER_SIZE + size);
        section.extend_from_slice(prefix);
        section.extend_from_slice(body);

        let names = if size > 0 {
            Some(decode_name_table(body)?)
        } else {
            None
        };
        (section, names)
    } else {
        (Vec::new(), None)
    };

    if let Some(names) = &names
        && names.len() > records.len()
    {
        return Err(IffError::InvalidNameTable(format!(
            "{} names for {} resources",
            names.len(),
            records.len()
        )));
    }

    let mut resources = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let mut segments = Vec::with_capacity(record.offsets.len());
        for (block_index, &offset) in record.offsets.iter().enumerate() {
            let length = lengths[index][block_index];
            let payload = &payloads[block_index];
            let start = offset as usize;
            let end = start + length as usize;
            let bytes = payload
                .get(start..end)
                .ok_or(IffError::SegmentOutOfRange {
                    resource: index,
                    segment: block_index,
                    offset: u64::from(offset),
                    length: u64::from(length),
                    block_length: payload.len() as u64,
                })?;
            segments.push(Segment {
                offset,
                data: SegmentData::new(bytes.to_vec()),
            });
        }

        let named = names.as_ref().and_then(|names| names.get(index));
        let mut kind = named.map_or(ResourceType::Unknown, |n| ResourceType::from_tag(&n.tag));
        if kind == ResourceType::Unknown
            && let Some(tag) = lookup.lookup(record.type_raw)
        {
            kind = ResourceType::from_tag(tag);
        }

        resources.push(Resource {
            index,
            id: record.id,
            type_raw: record.type_raw,
            kind,
            name: named.map_or_else(|| index.to_string(), |n| n.name.clone()),
            segments,
        });
    }

    debug!(
        "Parsed IFF container: {} blocks, {} resources, {} bytes",
        blocks.len(),
        resources.len(),
        data.len()
    );

    Ok(IffFile {
        endian,
        header,
        blocks,
        offset_table,
        resources,
        name_section,
    })
}

//! Archive index parsing and building

use binrw::io::{Cursor, Read, Seek};
use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ARCHIVE_MAGIC;
use super::entry::{EntryLocation, SlotSpan, TocEntry, resolve_location, slot_spans};
use super::error::{ArchiveError, ArchiveResult};
use super::header::{ArchiveHeader, Slot, table_length};
use crate::align_up;
use crate::lookup::NameLookup;
use crate::schema::{TitleProfile, TocField};

/// Parsed archive header, slot table and TOC
///
/// Entries are kept sorted by logical offset. Their `id` keeps the TOC
/// declaration order, which [`build`](Self::build) restores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveIndex {
    /// Title whose record layout is used
    pub profile: TitleProfile,
    /// Fixed header as read
    pub header: ArchiveHeader,
    /// Slot files in logical order
    pub slots: Vec<Slot>,
    /// Entries ordered by logical offset
    pub entries: Vec<TocEntry>,
}

impl ArchiveIndex {
    /// Parse from a reader positioned at the start of the primary slot file
    pub fn parse<R: Read + Seek>(
        reader: &mut R,
        profile: TitleProfile,
        lookup: &dyn NameLookup,
    ) -> ArchiveResult<Self> {
        let header = ArchiveHeader::read(reader)?;
        if header.magic != ARCHIVE_MAGIC {
            return Err(ArchiveError::MalformedHeader {
                magic: header.magic,
                expected: ARCHIVE_MAGIC,
            });
        }

        let mut slots = Vec::with_capacity(header.slot_count as usize);
        for _ in 0..header.slot_count {
            slots.push(Slot::read(reader)?);
        }

        let schema = profile.schema();
        let alignment = u64::from(header.alignment);
        let total: u64 = slots.iter().map(Slot::size).sum();
        let mut record = vec![0u8; schema.record_size];
        let mut entries = Vec::with_capacity(header.entry_count as usize);
        let mut unnamed = 0usize;

        for id in 0..header.entry_count {
            reader.read_exact(&mut record)?;
            let field = |f| schema.read_field(&record, f).unwrap_or(0);

            let name_hash = field(TocField::NameHash) as u32;
            let raw_offset = field(TocField::RawOffset) as u32;
            let reserved = field(TocField::Reserved) as u32;
            let offset = u64::from(raw_offset) * alignment;
            let size = if schema.scales_size {
                field(TocField::Size) * alignment
            } else {
                field(TocField::Size)
            };

            let (name, is_named) = match lookup.lookup(name_hash) {
                Some(name) => (name.to_string(), true),
                None => {
                    unnamed += 1;
                    (id.to_string(), false)
                }
            };

            let location = resolve_location(&slots, offset, size).ok_or_else(|| {
                ArchiveError::OffsetOutOfRange {
                    id,
                    name: name.clone(),
                    offset,
                    size,
                    total,
                }
            })?;

            let mut entry = TocEntry {
                id,
                name_hash,
                name,
                is_named,
                raw_offset,
                offset,
                size,
                reserved,
                location,
                original: Default::default(),
            };
            entry.original = entry.snapshot();
            entries.push(entry);
        }

        entries.sort_by_key(|entry| entry.offset);

        debug!(
            "Parsed archive index: {} slots, {} entries ({} unnamed), {:#x} logical bytes",
            slots.len(),
            entries.len(),
            unnamed,
            total
        );

        Ok(Self {
            profile,
            header,
            slots,
            entries,
        })
    }

    /// Parse from bytes holding at least the header, slot table and TOC
    pub fn parse_bytes(
        data: &[u8],
        profile: TitleProfile,
        lookup: &dyn NameLookup,
    ) -> ArchiveResult<Self> {
        Self::parse(&mut Cursor::new(data), profile, lookup)
    }

    /// Bytes per raw offset unit
    pub fn alignment(&self) -> u64 {
        u64::from(self.header.alignment)
    }

    /// Serialized TOC length, padded to the alignment unit
    pub fn toc_length(&self) -> u64 {
        align_up(
            table_length(self.slots.len(), self.entries.len(), &self.profile.schema()),
            self.alignment(),
        )
    }

    /// Sum of all slot sizes
    pub fn total_size(&self) -> u64 {
        self.slots.iter().map(Slot::size).sum()
    }

    /// Logical offset where slot `index` begins
    pub fn slot_start(&self, index: usize) -> u64 {
        self.slots.iter().take(index).map(Slot::size).sum()
    }

    /// Resolve a logical range against the current slots
    pub fn resolve(&self, offset: u64, size: u64) -> Option<EntryLocation> {
        resolve_location(&self.slots, offset, size)
    }

    /// Per-slot reads covering `entry`
    pub fn spans(&self, entry: &TocEntry) -> ArchiveResult<Vec<SlotSpan>> {
        slot_spans(&self.slots, &entry.location, entry.size).ok_or_else(|| {
            ArchiveError::OffsetOutOfRange {
                id: entry.id,
                name: entry.name.clone(),
                offset: entry.offset,
                size: entry.size,
                total: self.total_size(),
            }
        })
    }

    /// Entry by declaration index
    pub fn entry(&self, id: u32) -> Option<&TocEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Entry by name, ignoring ASCII case
    pub fn entry_by_name(&self, name: &str) -> Option<&TocEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }

    /// Move an entry to a new logical range and re-resolve it.
    pub fn relocate(&mut self, id: u32, offset: u64, size: u64) -> ArchiveResult<()> {
        let alignment = self.alignment();
        if alignment == 0 || offset % alignment != 0 {
            return Err(ArchiveError::Unaligned {
                what: "entry offset",
                value: offset,
                alignment,
            });
        }
        let raw_offset =
            u32::try_from(offset / alignment).map_err(|_| ArchiveError::FieldOverflow {
                field: "raw offset",
                value: offset / alignment,
            })?;
        let total = self.total_size();
        let location = self.resolve(offset, size);

        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(ArchiveError::OffsetOutOfRange {
                id,
                name: id.to_string(),
                offset,
                size,
                total,
            })?;
        entry.location = location.ok_or_else(|| ArchiveError::OffsetOutOfRange {
            id,
            name: entry.name.clone(),
            offset,
            size,
            total,
        })?;
        entry.raw_offset = raw_offset;
        entry.offset = offset;
        entry.size = size;
        Ok(())
    }

    /// Restore ascending logical offset order
    pub fn sort_entries(&mut self) {
        self.entries.sort_by_key(|entry| entry.offset);
    }

    /// Serialize header, slot table and TOC records in declaration order,
    /// zero-padded to the alignment unit
    pub fn build(&self) -> ArchiveResult<Vec<u8>> {
        let schema = self.profile.schema();
        let alignment = self.alignment();
        let length = self.toc_length();

        let header = ArchiveHeader {
            slot_count: count_field("slot count", self.slots.len())?,
            entry_count: count_field("entry count", self.entries.len())?,
            ..self.header
        };

        let mut cursor = Cursor::new(Vec::with_capacity(length as usize));
        header.write(&mut cursor)?;
        for slot in &self.slots {
            slot.write(&mut cursor)?;
        }
        let mut out = cursor.into_inner();

        let mut ordered: Vec<&TocEntry> = self.entries.iter().collect();
        ordered.sort_by_key(|entry| entry.id);

        let mut record = vec![0u8; schema.record_size];
        for entry in ordered {
            let size = if schema.scales_size && alignment > 0 {
                entry.size.div_ceil(alignment)
            } else {
                entry.size
            };
            if size > u64::from(u32::MAX) {
                return Err(ArchiveError::FieldOverflow {
                    field: "entry size",
                    value: size,
                });
            }

            record.fill(0);
            schema.write_field(&mut record, TocField::NameHash, u64::from(entry.name_hash));
            schema.write_field(&mut record, TocField::RawOffset, u64::from(entry.raw_offset));
            schema.write_field(&mut record, TocField::Reserved, u64::from(entry.reserved));
            schema.write_field(&mut record, TocField::Size, size);
            out.extend_from_slice(&record);
        }

        out.resize(length as usize, 0);
        Ok(out)
    }
}

fn count_field(field: &'static str, value: usize) -> ArchiveResult<u32> {
    u32::try_from(value).map_err(|_| ArchiveError::FieldOverflow {
        field,
        value: value as u64,
    })
}

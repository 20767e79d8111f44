//! TOC entries and slot resolution

use serde::{Deserialize, Serialize};

use super::header::Slot;

/// Where an entry's bytes start in the physical slot files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryLocation {
    /// Slot holding the first byte
    pub slot: usize,
    /// Offset of the first byte inside that slot
    pub offset_in_slot: u64,
    /// Whether the range continues past the end of the slot
    pub is_split: bool,
    /// Bytes beyond the end of the first slot
    pub split_second_file_size: u64,
}

/// A contiguous piece of an entry inside one slot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpan {
    /// Slot index
    pub slot: usize,
    /// Offset inside the slot
    pub offset: u64,
    /// Bytes to read
    pub length: u64,
}

/// Immutable copy of an entry's placement, taken when the archive is first read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    /// Raw offset in alignment units
    pub raw_offset: u32,
    /// Logical offset in bytes
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    /// Resolved location
    pub location: EntryLocation,
}

/// One table of contents entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Declaration index in the TOC
    pub id: u32,
    /// Hash of the entry name
    pub name_hash: u32,
    /// Name from the lookup table, or the id as a string
    pub name: String,
    /// Whether the name came from the lookup table
    pub is_named: bool,
    /// Offset in alignment units
    pub raw_offset: u32,
    /// Logical offset in bytes
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    /// Reserved record word, written back unchanged
    pub reserved: u32,
    /// Resolved location in the current slot layout
    pub location: EntryLocation,
    /// Placement at first load
    pub original: EntrySnapshot,
}

impl TocEntry {
    /// Current placement as a snapshot
    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            raw_offset: self.raw_offset,
            offset: self.offset,
            size: self.size,
            location: self.location,
        }
    }

    /// Whether the entry no longer lives where it was first read
    pub fn is_relocated(&self) -> bool {
        self.location != self.original.location
    }
}

/// Resolve a logical byte range against the slot layout.
///
/// Walks the cumulative slot sizes to the slot containing `offset`. The range
/// is split when it runs past the end of that slot. Returns `None` when
/// `offset` lies beyond every slot; a zero-length range at the very end
/// resolves to the end of the last slot.
pub fn resolve_location(slots: &[Slot], offset: u64, size: u64) -> Option<EntryLocation> {
    let mut start = 0u64;
    for (index, slot) in slots.iter().enumerate() {
        let slot_size = slot.size();
        if offset < start + slot_size {
            let offset_in_slot = offset - start;
            let is_split = offset_in_slot + size > slot_size;
            return Some(EntryLocation {
                slot: index,
                offset_in_slot,
                is_split,
                split_second_file_size: if is_split {
                    size - (slot_size - offset_in_slot)
                } else {
                    0
                },
            });
        }
        start += slot_size;
    }

    let last = slots.len().checked_sub(1)?;
    (size == 0 && offset == start).then(|| EntryLocation {
        slot: last,
        offset_in_slot: slots[last].size(),
        is_split: false,
        split_second_file_size: 0,
    })
}

/// Break a range starting at `location` into per-slot reads.
///
/// Ranges may cover any number of slots. Returns `None` if the range runs
/// past the last slot.
pub fn slot_spans(slots: &[Slot], location: &EntryLocation, size: u64) -> Option<Vec<SlotSpan>> {
    let mut spans = Vec::new();
    let mut remaining = size;
    let mut slot = location.slot;
    let mut offset = location.offset_in_slot;

    while remaining > 0 {
        let available = slots.get(slot)?.size().checked_sub(offset)?;
        let length = remaining.min(available);
        if length > 0 {
            spans.push(SlotSpan {
                slot,
                offset,
                length,
            });
        }
        remaining -= length;
        slot += 1;
        offset = 0;
    }

    Some(spans)
}

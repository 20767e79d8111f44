//! Archive header and slot records

use binrw::{BinRead, BinWrite};
use serde::{Deserialize, Serialize};

use super::error::{ArchiveError, ArchiveResult};
use super::{ARCHIVE_HEADER_SIZE, SLOT_RECORD_SIZE, SLOT_SIZE_SHIFT};
use crate::schema::TocSchema;

/// Fixed archive header at the start of the primary slot file
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite, Serialize, Deserialize)]
#[brw(big)]
pub struct ArchiveHeader {
    /// Archive magic (0xAA00B3BF)
    pub magic: u32,
    /// Bytes per raw offset unit
    pub alignment: u32,
    /// Number of slot records
    pub slot_count: u32,
    /// Unused
    pub reserved_0c: u32,
    /// Number of TOC records
    pub entry_count: u32,
    /// Unused
    pub reserved_14: u32,
}

impl ArchiveHeader {
    /// Unpadded length of header, slot table and TOC records
    pub fn table_length(&self, schema: &TocSchema) -> u64 {
        table_length(self.slot_count as usize, self.entry_count as usize, schema)
    }
}

/// Unpadded length of a TOC with `slots` slot records and `entries` records
pub fn table_length(slots: usize, entries: usize, schema: &TocSchema) -> u64 {
    (ARCHIVE_HEADER_SIZE + slots * SLOT_RECORD_SIZE + entries * schema.record_size) as u64
}

/// One physical slot file as recorded in the archive header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite, Serialize, Deserialize)]
#[brw(big)]
pub struct Slot {
    /// Size in units of `1 << SLOT_SIZE_SHIFT` bytes
    pub size_raw: u32,
    /// Unused
    pub reserved: u32,
    /// UTF-16BE file name, NUL padded
    pub name: [u8; 8],
}

impl Slot {
    /// Slot record for position `index` with a byte size
    pub fn named(index: usize, size: u64) -> ArchiveResult<Self> {
        let mut slot = Self {
            size_raw: 0,
            reserved: 0,
            name: slot_name_bytes(index)?,
        };
        slot.set_size(size)?;
        Ok(slot)
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        u64::from(self.size_raw) << SLOT_SIZE_SHIFT
    }

    /// Set the size in bytes
    pub fn set_size(&mut self, bytes: u64) -> ArchiveResult<()> {
        let unit = 1u64 << SLOT_SIZE_SHIFT;
        if bytes % unit != 0 {
            return Err(ArchiveError::Unaligned {
                what: "slot size",
                value: bytes,
                alignment: unit,
            });
        }
        self.size_raw = u32::try_from(bytes >> SLOT_SIZE_SHIFT).map_err(|_| {
            ArchiveError::FieldOverflow {
                field: "slot size",
                value: bytes,
            }
        })?;
        Ok(())
    }

    /// Decoded file name, hex when it is not UTF-16BE text
    pub fn file_name(&self) -> String {
        let units: Vec<u16> = self
            .name
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0)
            .collect();
        match String::from_utf16(&units) {
            Ok(name) if !name.is_empty() => name,
            _ => hex::encode(self.name),
        }
    }
}

/// File name of slot `index`: `0A`, `0B`, ...
pub fn slot_file_name(index: usize) -> ArchiveResult<String> {
    let letter = u8::try_from(index)
        .ok()
        .filter(|&i| i < 26)
        .ok_or(ArchiveError::TooManySlots(index))?;
    Ok(format!("0{}", char::from(b'A' + letter)))
}

fn slot_name_bytes(index: usize) -> ArchiveResult<[u8; 8]> {
    let mut name = [0u8; 8];
    for (i, unit) in slot_file_name(index)?.encode_utf16().enumerate() {
        name[i * 2..i * 2 + 2].copy_from_slice(&unit.to_be_bytes());
    }
    Ok(name)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use binrw::io::Cursor;

    #[test]
    fn test_slot_record_layout() {
        let data = [
            0x00, 0x08, 0x00, 0x00, // 1 GiB
            0x00, 0x00, 0x00, 0x00, // reserved
            0x00, 0x30, 0x00, 0x41, 0x00, 0x00, 0x00, 0x00, // "0A"
        ];
        let slot = Slot::read(&mut Cursor::new(&data)).unwrap();

        assert_eq!(slot.size(), 0x4000_0000);
        assert_eq!(slot.file_name(), "0A");
        assert_eq!(slot, Slot::named(0, 0x4000_0000).unwrap());
    }

    #[test]
    fn test_slot_names() {
        assert_eq!(slot_file_name(0).unwrap(), "0A");
        assert_eq!(slot_file_name(6).unwrap(), "0G");
        assert!(matches!(slot_file_name(26), Err(ArchiveError::TooManySlots(26))));
        assert_eq!(Slot::named(7, 0).unwrap().file_name(), "0H");
    }

    #[test]
    fn test_slot_size_must_be_aligned() {
        let mut slot = Slot::named(1, 0).unwrap();
        assert!(slot.set_size(0x801).is_err());
        slot.set_size(0xD800).unwrap();
        assert_eq!(slot.size_raw, 0x1B);
    }

    #[test]
    fn test_non_text_name_is_hex() {
        let slot = Slot {
            size_raw: 0,
            reserved: 0,
            name: [0xD8, 0x00, 0, 0, 0, 0, 0, 0],
        };
        assert_eq!(slot.file_name(), "d800000000000000");
    }
}

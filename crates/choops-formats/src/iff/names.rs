//! Trailing name section
//!
//! ```text
//! magic(4)  size(4, little-endian)  body(size)
//!
//! body:
//!   0x00  name count                     (LE u32)
//!   0x04  rel -> first pointer slot      (LE u32)
//!   slot i: rel -> record                (LE u32)
//!   record: rel -> UTF-16LE name, rel -> UTF-16LE tag
//! ```
//!
//! Every relative offset is counted from its own position minus one.

use super::error::{IffError, IffResult};

/// Size of the magic + size prefix
pub const NAME_SECTION_HEADER_SIZE: usize = 8;

/// Bytes of UTF-16LE tag text read per record (four characters and a NUL)
const TAG_BYTES: usize = 10;

/// Decoded name table record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    /// Resource name without its terminating character
    pub name: String,
    /// Four-character type tag, NULs stripped
    pub tag: String,
}

fn read_u32_le(body: &[u8], offset: usize) -> IffResult<u32> {
    body.get(offset..offset + 4)
        .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .ok_or_else(|| {
            IffError::InvalidNameTable(format!(
                "offset {offset:#x} outside section of {:#x} bytes",
                body.len()
            ))
        })
}

/// Follow a relative pointer stored at `at`.
fn follow(body: &[u8], at: usize) -> IffResult<usize> {
    let relative = read_u32_le(body, at)? as usize;
    (relative + at).checked_sub(1).ok_or_else(|| {
        IffError::InvalidNameTable(format!("pointer at {at:#x} resolves before section start"))
    })
}

fn utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Decode the name table body (without the 8-byte prefix)
pub fn decode_name_table(body: &[u8]) -> IffResult<Vec<NameRecord>> {
    let count = read_u32_le(body, 0)? as usize;
    let mut slot = follow(body, 4)?;
    let mut records = Vec::with_capacity(count.min(body.len() / 4));

    for _ in 0..count {
        let record = follow(body, slot)?;
        let name_start = follow(body, record)?;
        let tag_start = follow(body, record + 4)?;

        if tag_start < name_start || tag_start > body.len() {
            return Err(IffError::InvalidNameTable(format!(
                "name range {name_start:#x}..{tag_start:#x} invalid in section of {:#x} bytes",
                body.len()
            )));
        }

        // The last character is the terminator, whatever its value.
        let mut name = utf16le(&body[name_start..tag_start]);
        name.pop();

        let tag_end = (tag_start + TAG_BYTES).min(body.len());
        let tag = utf16le(&body[tag_start..tag_end])
            .trim_end_matches('\0')
            .to_string();

        records.push(NameRecord { name, tag });
        slot += 4;
    }

    Ok(records)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::name_table_body;

    #[test]
    fn test_single_name() {
        let body = name_table_body(&[("hi_shoe1", "SCNE")]);
        let records = decode_name_table(&body).unwrap();

        assert_eq!(
            records,
            vec![NameRecord {
                name: "hi_shoe1".to_string(),
                tag: "SCNE".to_string(),
            }]
        );
    }

    #[test]
    fn test_multiple_names() {
        let body = name_table_body(&[("floor", "TXTR"), ("intro", "AUDO"), ("credits", "TXT")]);
        let records = decode_name_table(&body).unwrap();

        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        let tags: Vec<_> = records.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(names, vec!["floor", "intro", "credits"]);
        assert_eq!(tags, vec!["TXTR", "AUDO", "TXT"]);
    }

    #[test]
    fn test_last_name_character_is_dropped() {
        let mut body = name_table_body(&[("logo", "TXTR")]);
        // Replace the NUL after "logo" with 'x'.
        let terminator = 8 + 4 + 8 + 8;
        body[terminator..terminator + 2].copy_from_slice(&[b'x', 0]);

        let records = decode_name_table(&body).unwrap();
        assert_eq!(records[0].name, "logo");
        assert_eq!(records[0].tag, "TXTR");
    }

    #[test]
    fn test_truncated_table() {
        let body = name_table_body(&[("floor", "TXTR")]);
        assert!(matches!(
            decode_name_table(&body[..6]),
            Err(IffError::InvalidNameTable(_))
        ));
    }
}

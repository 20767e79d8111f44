//! Per-title TOC record layouts
//!
//! Every title stores the same four TOC fields but at different byte offsets,
//! and some titles store sizes in alignment units instead of bytes. A
//! [`TocSchema`] describes one layout declaratively; the archive index reads
//! and writes records by walking the schema instead of branching per title.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logical field stored in a TOC record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TocField {
    /// 32-bit hash of the entry name
    NameHash,
    /// Offset in alignment units
    RawOffset,
    /// Word with no known meaning, preserved on write
    Reserved,
    /// Entry size in bytes or alignment units
    Size,
}

/// Placement of one field inside a TOC record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Which field
    pub field: TocField,
    /// Byte offset inside the record
    pub offset: usize,
    /// Width in bytes
    pub width: usize,
}

impl FieldSpec {
    const fn word(field: TocField, offset: usize) -> Self {
        Self {
            field,
            offset,
            width: 4,
        }
    }
}

/// Declarative TOC record layout for one title
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocSchema {
    /// Size of one record in bytes
    pub record_size: usize,
    /// Fields present in the record, in byte order
    pub fields: &'static [FieldSpec],
    /// Whether the size field counts alignment units instead of bytes
    pub scales_size: bool,
}

impl TocSchema {
    /// Location of `field` in the record, if the title stores it
    pub fn field(&self, field: TocField) -> Option<&FieldSpec> {
        self.fields.iter().find(|spec| spec.field == field)
    }

    /// Read one field from a record, big-endian
    pub fn read_field(&self, record: &[u8], field: TocField) -> Option<u64> {
        let spec = self.field(field)?;
        let bytes = record.get(spec.offset..spec.offset + spec.width)?;
        Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Write one field into a record, big-endian. Fields the title does not
    /// store are ignored.
    pub fn write_field(&self, record: &mut [u8], field: TocField, value: u64) {
        let Some(spec) = self.field(field) else {
            return;
        };
        if let Some(slot) = record.get_mut(spec.offset..spec.offset + spec.width) {
            for (i, byte) in slot.iter_mut().rev().enumerate() {
                *byte = (value >> (i * 8)) as u8;
            }
        }
    }
}

const DEFAULT_FIELDS: &[FieldSpec] = &[
    FieldSpec::word(TocField::NameHash, 0),
    FieldSpec::word(TocField::RawOffset, 4),
    FieldSpec::word(TocField::Reserved, 8),
    FieldSpec::word(TocField::Size, 12),
];

const NBA2K8_FIELDS: &[FieldSpec] = &[
    FieldSpec::word(TocField::NameHash, 0),
    FieldSpec::word(TocField::RawOffset, 4),
    FieldSpec::word(TocField::Size, 12),
];

const NBA2K9_FIELDS: &[FieldSpec] = &[
    FieldSpec::word(TocField::Reserved, 0),
    FieldSpec::word(TocField::Size, 4),
    FieldSpec::word(TocField::NameHash, 8),
    FieldSpec::word(TocField::RawOffset, 12),
];

const APF2K8_FIELDS: &[FieldSpec] = &[
    FieldSpec::word(TocField::NameHash, 0),
    FieldSpec::word(TocField::RawOffset, 4),
    FieldSpec::word(TocField::Size, 8),
];

/// Game title whose archive layout is being read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitleProfile {
    /// Layout shared by titles without a dedicated profile
    #[default]
    Default,
    /// College Hoops 2K8
    Choops2k8,
    /// NBA 2K8
    Nba2k8,
    /// NBA 2K9
    Nba2k9,
    /// All-Pro Football 2K8
    Apf2k8,
}

impl TitleProfile {
    /// Every known profile
    pub const ALL: [Self; 5] = [
        Self::Default,
        Self::Choops2k8,
        Self::Nba2k8,
        Self::Nba2k9,
        Self::Apf2k8,
    ];

    /// TOC record layout for this title
    pub const fn schema(self) -> TocSchema {
        match self {
            Self::Default | Self::Choops2k8 => TocSchema {
                record_size: 16,
                fields: DEFAULT_FIELDS,
                scales_size: false,
            },
            // hash(0) offset(4) unused(8) size(12): the size word at 12 ends
            // the record at 16, so bytes 8..12 are written as zero.
            Self::Nba2k8 => TocSchema {
                record_size: 16,
                fields: NBA2K8_FIELDS,
                scales_size: true,
            },
            Self::Nba2k9 => TocSchema {
                record_size: 16,
                fields: NBA2K9_FIELDS,
                scales_size: false,
            },
            Self::Apf2k8 => TocSchema {
                record_size: 12,
                fields: APF2K8_FIELDS,
                scales_size: true,
            },
        }
    }

    /// Short name, used as the cache key
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Choops2k8 => "choops2k8",
            Self::Nba2k8 => "nba2k8",
            Self::Nba2k9 => "nba2k9",
            Self::Apf2k8 => "apf2k8",
        }
    }
}

impl fmt::Display for TitleProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TitleProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|profile| profile.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown title profile: {s}"))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_fit_in_record() {
        for profile in TitleProfile::ALL {
            let schema = profile.schema();
            for spec in schema.fields {
                assert!(
                    spec.offset + spec.width <= schema.record_size,
                    "{profile}: {:?} overruns record",
                    spec.field
                );
            }
            assert!(schema.field(TocField::NameHash).is_some());
            assert!(schema.field(TocField::RawOffset).is_some());
            assert!(schema.field(TocField::Size).is_some());
        }
    }

    #[test]
    fn test_nba2k9_field_order() {
        let schema = TitleProfile::Nba2k9.schema();
        let record = [
            0, 0, 0, 7, // reserved
            0, 0, 0x10, 0, // size
            0xDE, 0xAD, 0xBE, 0xEF, // name hash
            0, 0, 0, 0x1B, // raw offset
        ];

        assert_eq!(schema.read_field(&record, TocField::Reserved), Some(7));
        assert_eq!(schema.read_field(&record, TocField::Size), Some(0x1000));
        assert_eq!(
            schema.read_field(&record, TocField::NameHash),
            Some(0xDEAD_BEEF)
        );
        assert_eq!(schema.read_field(&record, TocField::RawOffset), Some(0x1B));
    }

    #[test]
    fn test_nba2k8_record_leaves_gap_before_size() {
        let schema = TitleProfile::Nba2k8.schema();
        let mut record = vec![0u8; schema.record_size];
        schema.write_field(&mut record, TocField::NameHash, 0x0A0B_0C0D);
        schema.write_field(&mut record, TocField::RawOffset, 0x20);
        schema.write_field(&mut record, TocField::Size, 0x30);

        assert_eq!(schema.record_size, 16);
        assert_eq!(
            record,
            vec![0xA, 0xB, 0xC, 0xD, 0, 0, 0, 0x20, 0, 0, 0, 0, 0, 0, 0, 0x30]
        );
        assert_eq!(schema.read_field(&record, TocField::Size), Some(0x30));
    }

    #[test]
    fn test_write_field_skips_missing() {
        let schema = TitleProfile::Apf2k8.schema();
        let mut record = vec![0u8; schema.record_size];
        schema.write_field(&mut record, TocField::Reserved, 0xFFFF_FFFF);
        schema.write_field(&mut record, TocField::Size, 0x0102_0304);
        assert_eq!(record, vec![0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_profile_from_str() {
        assert_eq!(
            "CHOOPS2K8".parse::<TitleProfile>().unwrap(),
            TitleProfile::Choops2k8
        );
        assert!("madden".parse::<TitleProfile>().is_err());
    }
}

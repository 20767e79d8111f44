//! Resources and their per-block segments

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{IffError, IffResult};
use crate::segment::SegmentData;

/// Resource type decoded from the four-character tag in the name table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// Tag missing or not recognised
    #[default]
    Unknown,
    /// `TXTR` texture
    Txtr,
    /// `SCNE` scene, carries a texture package
    Scne,
    /// `AUDO` audio
    Audo,
    /// `LAYT` layout
    Layt,
    /// `MRKS` markers
    Mrks,
    /// `PRIV`
    Priv,
    /// `TXT` text
    Txt,
    /// `DRCT`
    Drct,
    /// `CLTH` cloth
    Clth,
    /// `AMBO` ambient occlusion
    Ambo,
    /// `HILT` highlight
    Hilt,
}

impl ResourceType {
    /// Decode a tag. Trailing NULs are ignored.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim_end_matches('\0') {
            "TXTR" => Self::Txtr,
            "SCNE" => Self::Scne,
            "AUDO" => Self::Audo,
            "LAYT" => Self::Layt,
            "MRKS" => Self::Mrks,
            "PRIV" => Self::Priv,
            "TXT" => Self::Txt,
            "DRCT" => Self::Drct,
            "CLTH" => Self::Clth,
            "AMBO" => Self::Ambo,
            "HILT" => Self::Hilt,
            _ => Self::Unknown,
        }
    }

    /// Four-character tag, `UNKNOWN` for unrecognised types
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Txtr => "TXTR",
            Self::Scne => "SCNE",
            Self::Audo => "AUDO",
            Self::Layt => "LAYT",
            Self::Mrks => "MRKS",
            Self::Priv => "PRIV",
            Self::Txt => "TXT",
            Self::Drct => "DRCT",
            Self::Clth => "CLTH",
            Self::Ambo => "AMBO",
            Self::Hilt => "HILT",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A resource's byte range inside one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Offset inside the decoded block, as last read or committed
    pub offset: u32,
    /// Current bytes
    pub data: SegmentData,
}

/// A named sub-resource of a container
///
/// Segment `j` lives in block `j` (blocks ordered by start offset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Declaration index in the directory
    pub index: usize,
    /// Resource id hash
    pub id: u32,
    /// Raw type hash from the directory
    pub type_raw: u32,
    /// Decoded type
    pub kind: ResourceType,
    /// Name from the name table, or the index as a string
    pub name: String,
    /// One segment per contributing block
    pub segments: Vec<Segment>,
}

impl Resource {
    /// Whether any segment was modified
    pub fn is_dirty(&self) -> bool {
        self.segments.iter().any(|segment| segment.data.is_dirty())
    }

    /// Bytes of segment `index`
    pub fn segment(&self, index: usize) -> Option<&[u8]> {
        self.segments.get(index).map(|segment| segment.data.bytes())
    }

    /// Replace the bytes of segment `index`, marking it dirty.
    pub fn replace_segment(&mut self, index: usize, bytes: Vec<u8>) -> IffResult<()> {
        let count = self.segments.len();
        let segment = self.segments.get_mut(index).ok_or_else(|| {
            IffError::ResourceNotFound(format!(
                "segment {index} of {} ({count} segments)",
                self.name
            ))
        })?;
        segment.data.replace(bytes);
        Ok(())
    }

    /// Concatenation of every segment, in block order
    pub fn data(&self) -> Vec<u8> {
        self.segments
            .iter()
            .flat_map(|segment| segment.data.bytes().iter().copied())
            .collect()
    }

    /// Clear the dirty flag on every segment
    pub fn mark_clean(&mut self) {
        for segment in &mut self.segments {
            segment.data.mark_clean();
        }
    }
}

//! Test utilities for choops-rs
//!
//! Provides byte-level builders for synthetic archive sets and IFF containers,
//! and discovery of a real `USRDIR` for tests that want retail data.
//!
//! The builders deliberately do not use `choops-formats`, so the codecs are
//! tested against independently produced bytes.

#![allow(clippy::cast_possible_truncation)]

use std::io;
use std::path::{Path, PathBuf};

/// Archive header magic
pub const ARCHIVE_MAGIC: u32 = 0xAA00_B3BF;
/// IFF container magic
pub const IFF_MAGIC: u32 = 0xFF3B_EF94;
/// Name section magic seen in retail containers
pub const NAME_SECTION_MAGIC: u32 = 0xAA17_1516;
/// Alignment unit used by every retail archive
pub const ALIGNMENT: u64 = 0x800;
/// Environment variable pointing at a College Hoops 2K8 `USRDIR`
pub const GAME_DIR_ENV: &str = "CHOOPS2K8_USRDIR";

/// Locate a real game directory through [`GAME_DIR_ENV`]
pub fn find_game_dir() -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var(GAME_DIR_ENV).ok()?);
    is_valid_game_dir(&path).then_some(path)
}

/// Check if a directory holds an archive set
pub fn is_valid_game_dir(path: &Path) -> bool {
    path.is_dir() && path.join("0A").is_file()
}

/// Print instructions for tests that need retail data
pub fn print_setup_instructions() {
    println!("Set {GAME_DIR_ENV} to a PS3_GAME/USRDIR directory containing 0A, 0B, ...");
}

/// Deterministic filler bytes
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Name of slot file `index` (`0A`, `0B`, ...)
pub fn slot_file_name(index: usize) -> String {
    format!("0{}", char::from(b'A' + index as u8))
}

fn align(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

// --- H7A -------------------------------------------------------------------

/// Encode `data` as an H7A token stream made only of literals
pub fn h7a_literal_stream(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8 + 1);
    for chunk in data.chunks(8) {
        out.push(0x00);
        out.extend_from_slice(chunk);
    }
    out
}

/// Literal-only H7A block including the 20-byte sub-header
pub fn h7a_block(data: &[u8], shift: u32) -> Vec<u8> {
    let stream = h7a_literal_stream(data);
    let mut out = Vec::with_capacity(stream.len() + 20);
    out.extend_from_slice(&0x4837_4100u32.to_be_bytes());
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&(stream.len() as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&shift.to_be_bytes());
    out.extend_from_slice(&stream);
    out
}

// --- IFF -------------------------------------------------------------------

fn utf16le_z(text: &str, min_units: usize) -> Vec<u8> {
    let mut units: Vec<u16> = text.encode_utf16().collect();
    units.push(0);
    while units.len() < min_units {
        units.push(0);
    }
    units.iter().flat_map(|unit| unit.to_le_bytes()).collect()
}

fn put_u32_le(buf: &mut [u8], at: usize, value: usize) {
    buf[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes());
}

/// Build a name table body for `(name, tag)` pairs
///
/// Layout: count, pointer to the slot array, one slot per record, one
/// 8-byte record per name, then the UTF-16LE strings. Tags are padded to five
/// code units.
pub fn name_table_body(names: &[(&str, &str)]) -> Vec<u8> {
    let slots_start = 8;
    let records_start = slots_start + names.len() * 4;
    let strings_start = records_start + names.len() * 8;

    let mut strings = Vec::new();
    let mut positions = Vec::with_capacity(names.len());
    for (name, tag) in names {
        let name_at = strings_start + strings.len();
        strings.extend_from_slice(&utf16le_z(name, 0));
        let tag_at = strings_start + strings.len();
        strings.extend_from_slice(&utf16le_z(tag, 5));
        positions.push((name_at, tag_at));
    }

    let mut body = vec![0u8; strings_start];
    put_u32_le(&mut body, 0, names.len());
    put_u32_le(&mut body, 4, slots_start - 4 + 1);
    for (i, (name_at, tag_at)) in positions.into_iter().enumerate() {
        let slot = slots_start + i * 4;
        let record = records_start + i * 8;
        put_u32_le(&mut body, slot, record - slot + 1);
        put_u32_le(&mut body, record, name_at - record + 1);
        put_u32_le(&mut body, record + 4, tag_at - (record + 4) + 1);
    }
    body.extend_from_slice(&strings);
    body
}

#[derive(Debug, Clone)]
struct FixtureResource {
    id: u32,
    type_raw: u32,
    offsets: Vec<u32>,
}

/// Byte-level IFF container builder
#[derive(Debug, Clone, Default)]
pub struct IffBuilder {
    blocks: Vec<Vec<u8>>,
    resources: Vec<FixtureResource>,
    names: Vec<(String, String)>,
    name_section: NameSection,
    compress: bool,
}

#[derive(Debug, Clone, Copy, Default)]
enum NameSection {
    #[default]
    Table,
    Padded(usize),
    Empty,
    Absent,
}

impl IffBuilder {
    /// Start an empty container
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a block with its decoded payload
    #[must_use]
    pub fn block(mut self, payload: Vec<u8>) -> Self {
        self.blocks.push(payload);
        self
    }

    /// Add a resource with one intra-block offset per block it uses
    #[must_use]
    pub fn resource(mut self, id: u32, type_raw: u32, offsets: &[u32]) -> Self {
        self.resources.push(FixtureResource {
            id,
            type_raw,
            offsets: offsets.to_vec(),
        });
        self
    }

    /// Add a name table record for the next resource
    #[must_use]
    pub fn name(mut self, name: &str, tag: &str) -> Self {
        self.names.push((name.to_string(), tag.to_string()));
        self
    }

    /// Zero-pad the name table body to `size` bytes
    #[must_use]
    pub fn name_section_size(mut self, size: usize) -> Self {
        self.name_section = NameSection::Padded(size);
        self
    }

    /// Emit a name section header with size zero
    #[must_use]
    pub fn empty_name_section(mut self) -> Self {
        self.name_section = NameSection::Empty;
        self
    }

    /// Omit the name section entirely
    #[must_use]
    pub fn without_name_section(mut self) -> Self {
        self.name_section = NameSection::Absent;
        self
    }

    /// Store every block H7A-compressed (literal tokens only)
    #[must_use]
    pub fn compressed(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Header size implied by the blocks and resources
    pub fn header_size(&self) -> usize {
        0x20 + self.blocks.len() * 0x20
            + self.resources.len() * 4
            + self
                .resources
                .iter()
                .map(|r| 12 + r.offsets.len() * 4)
                .sum::<usize>()
    }

    /// Serialize the container, big-endian
    pub fn build(&self) -> Vec<u8> {
        let header_size = self.header_size();
        let stored: Vec<Vec<u8>> = self
            .blocks
            .iter()
            .map(|payload| {
                if self.compress {
                    h7a_block(payload, 8)
                } else {
                    payload.clone()
                }
            })
            .collect();
        let file_length = header_size + stored.iter().map(Vec::len).sum::<usize>();

        let mut out = Vec::with_capacity(file_length + 0x100);
        for word in [
            IFF_MAGIC,
            header_size as u32,
            file_length as u32,
            0,
            self.blocks.len() as u32,
            0xD,
            self.resources.len() as u32,
            0x25,
        ] {
            out.extend_from_slice(&word.to_be_bytes());
        }

        let mut start = header_size;
        for (payload, stored) in self.blocks.iter().zip(&stored) {
            for word in [
                0xBB05_A9C1,
                0xBB05_A9C1,
                0x80,
                payload.len() as u32,
                7,
                start as u32,
                stored.len() as u32,
                0,
            ] {
                out.extend_from_slice(&word.to_be_bytes());
            }
            start += stored.len();
        }

        for i in 0..self.resources.len() {
            out.extend_from_slice(&(i as u32 + 5).to_be_bytes());
        }

        for resource in &self.resources {
            out.extend_from_slice(&resource.id.to_be_bytes());
            out.extend_from_slice(&resource.type_raw.to_be_bytes());
            out.extend_from_slice(&(resource.offsets.len() as u32).to_be_bytes());
            for offset in &resource.offsets {
                out.extend_from_slice(&offset.to_be_bytes());
            }
        }

        for block in &stored {
            out.extend_from_slice(block);
        }

        let names: Vec<(&str, &str)> = self
            .names
            .iter()
            .map(|(name, tag)| (name.as_str(), tag.as_str()))
            .collect();
        let body = match self.name_section {
            NameSection::Absent => return out,
            NameSection::Empty => Vec::new(),
            NameSection::Table => {
                let mut body = name_table_body(&names);
                body.resize(align(body.len() as u64, 4) as usize, 0);
                body
            }
            NameSection::Padded(size) => {
                let mut body = name_table_body(&names);
                body.resize(size.max(body.len()), 0);
                body
            }
        };

        out.extend_from_slice(&NAME_SECTION_MAGIC.to_be_bytes());
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// Decoded block length of the `hi_shoe1` scene container
pub const HI_SHOE1_BLOCK_LENGTH: usize = 0x5956;

/// Single-block, single-resource scene container modelled on `hi_shoe1`
///
/// Header size 0x54, block length 0x5956, a 92-byte name table. Serialized
/// length is 0x5A0E.
pub fn hi_shoe1_builder() -> IffBuilder {
    IffBuilder::new()
        .block(pattern(HI_SHOE1_BLOCK_LENGTH, 0x11))
        .resource(0xCFE5_8145, 0xE26C_9B5D, &[0])
        .name("hi_shoe1", "SCNE")
        .name_section_size(92)
}

// --- Texture packages --------------------------------------------------------

/// Header and data blocks of a scene package
#[derive(Debug, Clone)]
pub struct PackageFixture {
    /// Header block (segment 0)
    pub header_block: Vec<u8>,
    /// Data block (segment 1)
    pub data_block: Vec<u8>,
    /// Texture payloads in header order
    pub textures: Vec<Vec<u8>>,
    /// 1-based data offsets in header order
    pub data_offsets: Vec<u32>,
}

/// Build a package with the given texture payloads
///
/// Payloads are stored in the data block in reverse header order after
/// `pre_data` unreferenced bytes, so read order differs from header order.
pub fn package_fixture(name: &str, textures: &[Vec<u8>], pre_data: usize) -> PackageFixture {
    const HEADER: usize = 0x54;
    const TEXTURE_HEADER: usize = 0xB0;
    let trailer = 0x3C;
    let texture_offset = HEADER + trailer;
    let post_headers = 0x10;

    let name_at = texture_offset + textures.len() * TEXTURE_HEADER + post_headers;
    let name_units: Vec<u8> = name
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_be_bytes)
        .collect();
    let post_name = 0x20;

    let mut data_block = pattern(pre_data, 0x5A);
    let mut data_offsets = vec![0u32; textures.len()];
    for (i, texture) in textures.iter().enumerate().rev() {
        data_offsets[i] = data_block.len() as u32 + 1;
        data_block.extend_from_slice(texture);
    }

    let mut header_block = vec![0u8; HEADER];
    header_block[0..4].copy_from_slice(&(name_at as u32 + 1).to_be_bytes());
    header_block[0x20..0x24].copy_from_slice(&(textures.len() as u32).to_be_bytes());
    header_block[0x24..0x28].copy_from_slice(&((texture_offset - 0x23) as u32).to_be_bytes());
    header_block.extend_from_slice(&pattern(trailer, 0x21));

    for (i, offset) in data_offsets.iter().enumerate() {
        let mut record = pattern(TEXTURE_HEADER, i as u8);
        record[0xA4..0xA8].copy_from_slice(&offset.to_be_bytes());
        header_block.extend_from_slice(&record);
    }

    header_block.extend_from_slice(&pattern(post_headers, 0x33));
    header_block.extend_from_slice(&name_units);
    header_block.extend_from_slice(&pattern(post_name, 0x44));

    PackageFixture {
        header_block,
        data_block,
        textures: textures.to_vec(),
        data_offsets,
    }
}

// --- Archive sets --------------------------------------------------------------

/// One entry stored in a synthetic archive set
#[derive(Debug, Clone)]
pub struct FixtureEntry {
    /// Name hash written to the TOC
    pub name_hash: u32,
    /// Entry payload
    pub data: Vec<u8>,
}

/// Where an entry landed in the logical stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLayout {
    /// Name hash
    pub name_hash: u32,
    /// Logical offset in bytes
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

/// Result of writing an archive set
#[derive(Debug, Clone)]
pub struct ArchiveLayout {
    /// Serialized TOC length, padded to the alignment unit
    pub toc_length: u64,
    /// Byte size of each slot file
    pub slot_sizes: Vec<u64>,
    /// Entries in layout order
    pub entries: Vec<EntryLayout>,
}

/// Writes a pristine archive set with the default 16-byte TOC records
///
/// The TOC sits at the start of `0A`, entries follow aligned to 0x800 in the
/// order they were added, and the logical stream is cut into slot files of
/// `slot_size` bytes. Entries that straddle a cut become split entries.
#[derive(Debug, Clone)]
pub struct ArchiveSetBuilder {
    slot_size: u64,
    entries: Vec<FixtureEntry>,
    reverse_toc: bool,
}

impl ArchiveSetBuilder {
    /// Builder cutting slots every `slot_size` bytes (multiple of 0x800)
    pub fn new(slot_size: u64) -> Self {
        Self {
            slot_size,
            entries: Vec::new(),
            reverse_toc: false,
        }
    }

    /// Append an entry
    #[must_use]
    pub fn entry(mut self, name_hash: u32, data: Vec<u8>) -> Self {
        self.entries.push(FixtureEntry { name_hash, data });
        self
    }

    /// Declare TOC records in reverse layout order
    #[must_use]
    pub fn reverse_toc(mut self, reverse: bool) -> Self {
        self.reverse_toc = reverse;
        self
    }

    /// Write `0A`, `0B`, ... into `dir`
    pub fn write_to(&self, dir: &Path) -> io::Result<ArchiveLayout> {
        let toc_length = align(0x18 + 0x10 * 26 + 0x10 * self.entries.len() as u64, ALIGNMENT);

        let mut stream = vec![0u8; toc_length as usize];
        let mut entries = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let offset = stream.len() as u64;
            stream.extend_from_slice(&entry.data);
            stream.resize(align(stream.len() as u64, ALIGNMENT) as usize, 0);
            entries.push(EntryLayout {
                name_hash: entry.name_hash,
                offset,
                size: entry.data.len() as u64,
            });
        }

        let slot_sizes: Vec<u64> = stream
            .chunks(self.slot_size as usize)
            .map(|chunk| chunk.len() as u64)
            .collect();

        let mut toc = Vec::with_capacity(toc_length as usize);
        for word in [
            ARCHIVE_MAGIC,
            ALIGNMENT as u32,
            slot_sizes.len() as u32,
            0,
            entries.len() as u32,
            0,
        ] {
            toc.extend_from_slice(&word.to_be_bytes());
        }
        for (i, size) in slot_sizes.iter().enumerate() {
            toc.extend_from_slice(&((size >> 11) as u32).to_be_bytes());
            toc.extend_from_slice(&0u32.to_be_bytes());
            let letter = b'A' + i as u8;
            toc.extend_from_slice(&[0, b'0', 0, letter, 0, 0, 0, 0]);
        }

        let order: Vec<&EntryLayout> = if self.reverse_toc {
            entries.iter().rev().collect()
        } else {
            entries.iter().collect()
        };
        for entry in order {
            toc.extend_from_slice(&entry.name_hash.to_be_bytes());
            toc.extend_from_slice(&((entry.offset / ALIGNMENT) as u32).to_be_bytes());
            toc.extend_from_slice(&0u32.to_be_bytes());
            toc.extend_from_slice(&(entry.size as u32).to_be_bytes());
        }
        toc.resize(toc_length as usize, 0);
        stream[..toc_length as usize].copy_from_slice(&toc);

        for (i, chunk) in stream.chunks(self.slot_size as usize).enumerate() {
            std::fs::write(dir.join(slot_file_name(i)), chunk)?;
        }

        Ok(ArchiveLayout {
            toc_length,
            slot_sizes,
            entries,
        })
    }

    /// Write into a fresh temporary directory
    pub fn write_temp(&self) -> io::Result<(tempfile::TempDir, ArchiveLayout)> {
        let dir = tempfile::tempdir()?;
        let layout = self.write_to(dir.path())?;
        Ok((dir, layout))
    }
}

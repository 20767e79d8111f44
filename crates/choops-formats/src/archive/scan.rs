//! Sequential scan over the logical archive stream

use std::io::{self, Read};

use super::entry::TocEntry;
use super::error::{ArchiveError, ArchiveResult};
use super::index::ArchiveIndex;

/// Reads every entry in logical offset order from one forward-only stream.
///
/// The reader must yield the slot files back to back, starting at logical
/// offset zero. Gaps between entries are skipped. Entries that alias bytes
/// already delivered are served from the previous buffer; anything else
/// behind the cursor is an [`ArchiveError::UnorderedScan`].
pub struct TocScanner<'a, R> {
    reader: R,
    entries: std::slice::Iter<'a, TocEntry>,
    position: u64,
    last: Option<(u64, Vec<u8>)>,
}

impl<'a, R: Read> TocScanner<'a, R> {
    /// Scan the entries of `index` from `reader`
    pub fn new(index: &'a ArchiveIndex, reader: R) -> Self {
        Self {
            reader,
            entries: index.entries.iter(),
            position: 0,
            last: None,
        }
    }

    /// Logical offset of the next unread byte
    pub const fn position(&self) -> u64 {
        self.position
    }

    fn aliased(&self, entry: &TocEntry) -> Option<Vec<u8>> {
        let (start, data) = self.last.as_ref()?;
        let begin = usize::try_from(entry.offset.checked_sub(*start)?).ok()?;
        let end = begin.checked_add(usize::try_from(entry.size).ok()?)?;
        data.get(begin..end).map(<[u8]>::to_vec)
    }

    fn read_entry(&mut self, entry: &TocEntry) -> ArchiveResult<Vec<u8>> {
        if entry.offset < self.position {
            return self.aliased(entry).ok_or(ArchiveError::UnorderedScan {
                id: entry.id,
                offset: entry.offset,
                position: self.position,
            });
        }

        let gap = entry.offset - self.position;
        if gap > 0 {
            let skipped = io::copy(&mut (&mut self.reader).take(gap), &mut io::sink())?;
            if skipped != gap {
                return Err(unexpected_eof(entry).into());
            }
        }

        let mut data = vec![0u8; entry.size as usize];
        self.reader
            .read_exact(&mut data)
            .map_err(|err| match err.kind() {
                io::ErrorKind::UnexpectedEof => unexpected_eof(entry),
                _ => err,
            })?;

        self.position = entry.offset + entry.size;
        self.last = Some((entry.offset, data.clone()));
        Ok(data)
    }
}

fn unexpected_eof(entry: &TocEntry) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!(
            "stream ended inside entry {} ({}) at {:#x}",
            entry.id, entry.name, entry.offset
        ),
    )
}

impl<'a, R: Read> Iterator for TocScanner<'a, R> {
    type Item = ArchiveResult<(&'a TocEntry, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.entries.next()?;
        Some(self.read_entry(entry).map(|data| (entry, data)))
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::archive::ARCHIVE_MAGIC;
    use crate::lookup::NoLookup;
    use crate::schema::TitleProfile;
    use std::io::Cursor;

    fn stream(records: &[(u32, u32)], fill: usize) -> (ArchiveIndex, Vec<u8>) {
        let mut out = Vec::new();
        for word in [ARCHIVE_MAGIC, 0x800, 1, 0, records.len() as u32, 0] {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(&8u32.to_be_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&[0, b'0', 0, b'A', 0, 0, 0, 0]);
        for (i, (raw_offset, size)) in records.iter().enumerate() {
            for word in [i as u32, *raw_offset, 0, *size] {
                out.extend_from_slice(&word.to_be_bytes());
            }
        }
        out.resize(0x800, 0);
        out.extend((0..fill).map(|i| (i % 251) as u8));

        let index = ArchiveIndex::parse_bytes(&out, TitleProfile::Default, &NoLookup).unwrap();
        (index, out)
    }

    #[test]
    fn test_scan_in_offset_order() {
        let (index, data) = stream(&[(3, 0x10), (1, 0x20), (2, 0x800)], 0x3000);
        let scanned: Vec<_> = TocScanner::new(&index, Cursor::new(&data))
            .collect::<ArchiveResult<_>>()
            .unwrap();

        let ids: Vec<u32> = scanned.iter().map(|(entry, _)| entry.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);
        for (entry, bytes) in scanned {
            let start = entry.offset as usize;
            assert_eq!(bytes, &data[start..start + entry.size as usize]);
        }
    }

    #[test]
    fn test_aliased_entries_reuse_buffer() {
        let (index, data) = stream(&[(1, 0x1000), (1, 0x1000), (2, 0x10)], 0x2000);
        let scanned: Vec<_> = TocScanner::new(&index, Cursor::new(&data))
            .collect::<ArchiveResult<_>>()
            .unwrap();

        assert_eq!(scanned.len(), 3);
        assert_eq!(scanned[0].1, scanned[1].1);
        assert_eq!(scanned[2].1, &data[0x1000..0x1010]);
    }

    #[test]
    fn test_overlap_outside_last_buffer() {
        let (index, data) = stream(&[(1, 0x1000), (2, 0x10), (2, 0x900)], 0x2000);
        let results: Vec<_> = TocScanner::new(&index, Cursor::new(&data)).collect();

        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(
            results[2],
            Err(ArchiveError::UnorderedScan { id: 2, .. })
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let (index, data) = stream(&[(1, 0x100)], 0x10);
        let mut scanner = TocScanner::new(&index, Cursor::new(&data));
        assert!(matches!(scanner.next(), Some(Err(ArchiveError::Io(_)))));
    }
}

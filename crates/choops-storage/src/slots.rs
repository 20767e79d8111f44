//! Physical slot files
//!
//! Slot `i` of an archive set is the file named `0` followed by the letter
//! `A + i` in the game directory. These helpers read spans, probe access and
//! move slot files around; they know nothing about the TOC.

use choops_formats::archive::{SlotSpan, slot_file_name};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::{Result, StorageError};

/// Highest slot count the naming scheme supports
pub const MAX_SLOTS: usize = 26;

/// Path of slot `index` inside `dir`
///
/// # Errors
///
/// Returns an archive error if `index` has no file letter.
pub fn slot_path(dir: &Path, index: usize) -> Result<PathBuf> {
    Ok(dir.join(slot_file_name(index)?))
}

/// Existing slot files in letter order, stopping at the first gap
///
/// # Errors
///
/// Returns error if the directory cannot be inspected.
pub async fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for index in 0..MAX_SLOTS {
        let path = slot_path(dir, index)?;
        if !fs::try_exists(&path).await? {
            break;
        }
        found.push(path);
    }
    Ok(found)
}

/// Open every file for reading and writing without changing it.
///
/// # Errors
///
/// Returns [`StorageError::LockedFilesystem`] for the first file that cannot
/// be opened.
pub async fn probe_access(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|source| StorageError::LockedFilesystem {
                path: path.clone(),
                source,
            })?;
    }
    debug!("Access probe passed for {} slot files", paths.len());
    Ok(())
}

/// Read one span from its slot file
///
/// # Errors
///
/// Returns error if the slot file is missing or shorter than the span.
pub async fn read_span(dir: &Path, span: &SlotSpan) -> Result<Vec<u8>> {
    let mut file = File::open(slot_path(dir, span.slot)?).await?;
    file.seek(SeekFrom::Start(span.offset)).await?;
    let mut data = vec![0u8; span.length as usize];
    file.read_exact(&mut data).await?;
    Ok(data)
}

/// Read the first `length` bytes of slot `index`
///
/// # Errors
///
/// Returns error if the slot file is missing or shorter than `length`.
pub async fn read_prefix(dir: &Path, index: usize, length: usize) -> Result<Vec<u8>> {
    let mut file = File::open(slot_path(dir, index)?).await?;
    let mut data = vec![0u8; length];
    file.read_exact(&mut data).await?;
    Ok(data)
}

/// Rename slot `from` to slot `to`
///
/// # Errors
///
/// Returns [`StorageError::PartialWrite`] if the rename fails.
pub async fn rename(dir: &Path, from: usize, to: usize) -> Result<()> {
    let source = slot_path(dir, from)?;
    let target = slot_path(dir, to)?;
    debug!("Renaming {} -> {}", source.display(), target.display());
    fs::rename(&source, &target)
        .await
        .map_err(|err| partial_write(&source, err))
}

/// Delete slot `index` if it exists
///
/// # Errors
///
/// Returns [`StorageError::PartialWrite`] if the file exists but cannot be
/// removed.
pub async fn remove(dir: &Path, index: usize) -> Result<()> {
    let path = slot_path(dir, index)?;
    match fs::remove_file(&path).await {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(partial_write(&path, err)),
    }
}

/// Write a slot file from pieces placed at increasing offsets, zero-filling
/// gaps and the tail up to `size`.
///
/// # Errors
///
/// Returns [`StorageError::PartialWrite`] on any I/O failure, or
/// [`StorageError::Layout`] if the pieces overlap or overrun `size`.
pub async fn write_slot(path: &Path, pieces: &[(u64, &[u8])], size: u64) -> Result<()> {
    let file = File::create(path)
        .await
        .map_err(|err| partial_write(path, err))?;
    let mut writer = BufWriter::new(file);
    let mut position = 0u64;

    for &(offset, data) in pieces {
        if offset < position {
            return Err(StorageError::Layout(format!(
                "piece at {offset:#x} overlaps previous data in {}",
                path.display()
            )));
        }
        write_zeros(&mut writer, offset - position)
            .await
            .map_err(|err| partial_write(path, err))?;
        writer
            .write_all(data)
            .await
            .map_err(|err| partial_write(path, err))?;
        position = offset + data.len() as u64;
    }

    if position > size {
        return Err(StorageError::Layout(format!(
            "{} needs {position:#x} bytes, slot size is {size:#x}",
            path.display()
        )));
    }
    write_zeros(&mut writer, size - position)
        .await
        .map_err(|err| partial_write(path, err))?;
    writer
        .flush()
        .await
        .map_err(|err| partial_write(path, err))?;
    Ok(())
}

async fn write_zeros(writer: &mut BufWriter<File>, mut count: u64) -> io::Result<()> {
    const ZEROS: [u8; 0x800] = [0; 0x800];
    while count > 0 {
        let chunk = count.min(ZEROS.len() as u64) as usize;
        writer.write_all(&ZEROS[..chunk]).await?;
        count -= chunk as u64;
    }
    Ok(())
}

fn partial_write(path: &Path, source: io::Error) -> StorageError {
    StorageError::PartialWrite {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover_stops_at_gap() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["0A", "0B", "0D"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let found = discover(dir.path()).await.unwrap();
        assert_eq!(found, vec![dir.path().join("0A"), dir.path().join("0B")]);
    }

    #[tokio::test]
    async fn test_write_and_read_slot() {
        let dir = tempfile::tempdir().unwrap();
        let path = slot_path(dir.path(), 2).unwrap();

        write_slot(&path, &[(0, &[1u8, 2, 3][..]), (0x800, &[4u8, 5][..])], 0x1000)
            .await
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 0x1000);
        assert_eq!(&bytes[0..4], &[1, 2, 3, 0]);
        assert_eq!(&bytes[0x800..0x803], &[4, 5, 0]);

        let span = SlotSpan {
            slot: 2,
            offset: 0x800,
            length: 2,
        };
        assert_eq!(read_span(dir.path(), &span).await.unwrap(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_write_slot_rejects_overrun() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0C");

        let err = write_slot(&path, &[(0, &[0u8; 0x10][..])], 0x8).await.unwrap_err();
        assert!(matches!(err, StorageError::Layout(_)));
    }

    #[tokio::test]
    async fn test_rename_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0A"), b"a").unwrap();

        rename(dir.path(), 0, 1).await.unwrap();
        assert!(!dir.path().join("0A").exists());
        assert_eq!(std::fs::read(dir.path().join("0B")).unwrap(), b"a");

        remove(dir.path(), 1).await.unwrap();
        remove(dir.path(), 1).await.unwrap();
        assert!(!dir.path().join("0B").exists());
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = probe_access(&[dir.path().join("0A")]).await.unwrap_err();
        assert!(matches!(err, StorageError::LockedFilesystem { .. }));
    }
}

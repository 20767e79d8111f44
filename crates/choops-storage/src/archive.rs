//! Archive session over one game directory

use binrw::BinRead;
use binrw::io::Cursor;
use choops_formats::NameLookup;
use choops_formats::archive::{
    ARCHIVE_HEADER_SIZE, ARCHIVE_MAGIC, ArchiveError, ArchiveHeader, ArchiveIndex, EntrySnapshot,
    TocEntry, TocScanner,
};
use choops_formats::iff::IffFile;
use choops_formats::package::{PackageError, ScenePackage};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::slots;
use crate::snapshot::{ArchiveSnapshot, DiskSnapshotStore, SnapshotStore};
use crate::{Result, StorageError};

/// An opened archive set
///
/// Holds the current and pristine index, plus every container and package
/// that was opened for editing. Edits stay in memory until
/// [`repack`](Self::repack) writes them out. A session assumes it is the only
/// writer of its game directory.
pub struct GameArchive {
    pub(crate) config: StoreConfig,
    pub(crate) index: ArchiveIndex,
    pub(crate) pristine: ArchiveIndex,
    pub(crate) containers: HashMap<u32, IffFile>,
    pub(crate) packages: HashMap<(u32, usize), ScenePackage>,
    lookup: Arc<dyn NameLookup + Send + Sync>,
    pub(crate) snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl std::fmt::Debug for GameArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameArchive")
            .field("game_dir", &self.config.game_dir)
            .field("profile", &self.config.profile)
            .field("slots", &self.index.slots.len())
            .field("entries", &self.index.entries.len())
            .field("containers", &self.containers.len())
            .field("packages", &self.packages.len())
            .finish_non_exhaustive()
    }
}

impl GameArchive {
    /// Open the archive set described by `config`.
    ///
    /// Uses a disk snapshot store when `config.cache_dir` is set. Without a
    /// snapshot, a migrated set gets its pristine layout back from the
    /// original TOC heading slot `0B`.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the TOC cannot be read.
    pub async fn open(
        config: StoreConfig,
        lookup: Arc<dyn NameLookup + Send + Sync>,
    ) -> Result<Self> {
        let store = config
            .cache_dir
            .as_ref()
            .map(|dir| Arc::new(DiskSnapshotStore::new(dir)) as Arc<dyn SnapshotStore>);
        Self::open_with_store(config, lookup, store).await
    }

    /// Open with an explicit snapshot store
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the TOC cannot be read.
    pub async fn open_with_store(
        config: StoreConfig,
        lookup: Arc<dyn NameLookup + Send + Sync>,
        snapshots: Option<Arc<dyn SnapshotStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let cached = match (&snapshots, config.rebuild_cache) {
            (Some(store), false) => match store.get(&config.cache_key()).await {
                Ok(Some(snapshot)) if snapshot.current.profile == config.profile => Some(snapshot),
                Ok(Some(_)) => {
                    warn!("Snapshot profile mismatch, re-parsing archive");
                    None
                }
                Ok(None) => None,
                Err(err) => {
                    warn!("Failed to load snapshot, re-parsing archive: {}", err);
                    None
                }
            },
            _ => None,
        };

        let (index, pristine, from_snapshot) = match cached {
            Some(snapshot) => (snapshot.current, snapshot.pristine, true),
            None => {
                let mut index = read_index(&config, 0, lookup.as_ref()).await?;
                let pristine = if is_toc_only(&config, &index) {
                    recover_pristine(&config, &mut index, lookup.as_ref())
                        .await
                        .unwrap_or_else(|| index.clone())
                } else {
                    index.clone()
                };
                (index, pristine, false)
            }
        };

        let archive = Self {
            config,
            index,
            pristine,
            containers: HashMap::new(),
            packages: HashMap::new(),
            lookup,
            snapshots,
        };

        info!(
            "Opened archive {}{}: {} slots, {} entries",
            archive.config.game_dir.display(),
            if from_snapshot { " from snapshot" } else { "" },
            archive.index.slots.len(),
            archive.index.entries.len()
        );
        if from_snapshot {
            return Ok(archive);
        }

        if archive.is_migrated() && !archive.has_pristine_layout() {
            warn!(
                "Archive {} was migrated before and its pristine layout could not be recovered",
                archive.config.game_dir.display()
            );
        }
        let unnamed = archive.index.entries.iter().filter(|e| !e.is_named).count();
        if unnamed > 0 {
            debug!("{} entries have no known name", unnamed);
        }

        archive.save_snapshot().await;
        Ok(archive)
    }

    pub(crate) async fn save_snapshot(&self) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let snapshot = ArchiveSnapshot {
            current: self.index.clone(),
            pristine: self.pristine.clone(),
        };
        if let Err(err) = store.put(&self.config.cache_key(), &snapshot).await {
            warn!("Failed to store snapshot: {}", err);
        }
    }

    /// Configuration the archive was opened with
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current index
    pub const fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// Index as first read from the untouched slot files
    pub const fn pristine(&self) -> &ArchiveIndex {
        &self.pristine
    }

    /// Entries in logical offset order
    pub fn entries(&self) -> &[TocEntry] {
        &self.index.entries
    }

    /// Entry by name, ignoring ASCII case
    pub fn entry_by_name(&self, name: &str) -> Option<&TocEntry> {
        self.index.entry_by_name(name)
    }

    /// Whether the primary slot holds only the TOC
    pub fn is_migrated(&self) -> bool {
        is_toc_only(&self.config, &self.index)
    }

    /// Whether the pristine index describes an unmigrated layout
    ///
    /// False only for a migrated set opened without a snapshot whose
    /// original TOC could not be read back.
    pub fn has_pristine_layout(&self) -> bool {
        holds_game_data(&self.config, &self.pristine)
    }

    fn entry(&self, id: u32) -> Result<&TocEntry> {
        self.index
            .entry(id)
            .ok_or_else(|| StorageError::NotFound(format!("entry {id}")))
    }

    /// Read an entry's bytes from the slot files
    ///
    /// # Errors
    ///
    /// Returns error if the entry range lies outside the slots or a slot file
    /// cannot be read.
    pub async fn read_raw(&self, entry: &TocEntry) -> Result<Vec<u8>> {
        let spans = self.index.spans(entry)?;
        let mut data = Vec::with_capacity(entry.size as usize);
        for span in &spans {
            data.extend(slots::read_span(&self.config.game_dir, span).await?);
        }
        Ok(data)
    }

    /// Read several entries concurrently, in the order given
    ///
    /// # Errors
    ///
    /// Returns the first error of any read.
    pub async fn read_many(&self, ids: &[u32]) -> Result<Vec<Vec<u8>>> {
        let entries = ids
            .iter()
            .map(|&id| self.entry(id))
            .collect::<Result<Vec<_>>>()?;
        try_join_all(entries.into_iter().map(|entry| self.read_raw(entry))).await
    }

    async fn load_container(&self, id: u32) -> Result<IffFile> {
        let entry = self.entry(id)?;
        let bytes = self.read_raw(entry).await?;
        if !IffFile::is_container(&bytes) {
            return Err(StorageError::NotAContainer {
                name: entry.name.clone(),
            });
        }
        debug!("Parsing container {} ({:#x} bytes)", entry.name, bytes.len());
        Ok(IffFile::parse_with(
            &bytes,
            binrw::Endian::Big,
            self.lookup.as_ref(),
        )?)
    }

    async fn ensure_container(&mut self, id: u32) -> Result<()> {
        if !self.containers.contains_key(&id) {
            let container = self.load_container(id).await?;
            self.containers.insert(id, container);
        }
        Ok(())
    }

    /// Parsed container of entry `id`, loaded on first use
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotAContainer`] if the entry is not an IFF
    /// container, or any read or parse error.
    pub async fn container(&mut self, id: u32) -> Result<&IffFile> {
        self.ensure_container(id).await?;
        self.containers
            .get(&id)
            .ok_or_else(|| StorageError::NotFound(format!("container {id}")))
    }

    /// Mutable container of entry `id`; edits are written by the next repack
    ///
    /// # Errors
    ///
    /// Same as [`container`](Self::container).
    pub async fn container_mut(&mut self, id: u32) -> Result<&mut IffFile> {
        self.ensure_container(id).await?;
        self.containers
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("container {id}")))
    }

    /// Texture package of resource `resource` in entry `id`
    ///
    /// The package is folded back into its resource on the next repack.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnsupportedSegmentCount`] unless the resource
    /// has exactly two segments, or any container error.
    pub async fn package_mut(&mut self, id: u32, resource: usize) -> Result<&mut ScenePackage> {
        let key = (id, resource);
        if !self.packages.contains_key(&key) {
            self.ensure_container(id).await?;
            let entry_name = self.entry(id)?.name.clone();
            let container = self
                .containers
                .get(&id)
                .ok_or_else(|| StorageError::NotFound(format!("container {id}")))?;
            let source = container.resources.get(resource).ok_or_else(|| {
                StorageError::NotFound(format!("resource {resource} of {entry_name}"))
            })?;
            let package = ScenePackage::from_resource(source)
                .map_err(|err| package_error(err, &entry_name, &source.name))?;
            self.packages.insert(key, package);
        }
        self.packages
            .get_mut(&key)
            .ok_or_else(|| StorageError::NotFound(format!("package {id}/{resource}")))
    }

    /// Apply every dirty package to its container resource
    pub(crate) fn fold_packages(&mut self) -> Result<()> {
        for (&(id, resource), package) in &self.packages {
            if !package.is_dirty() {
                continue;
            }
            let entry_name = self
                .index
                .entry(id)
                .map_or_else(|| id.to_string(), |entry| entry.name.clone());
            let container = self
                .containers
                .get_mut(&id)
                .ok_or_else(|| StorageError::NotFound(format!("container {id}")))?;
            let target = container.resources.get_mut(resource).ok_or_else(|| {
                StorageError::NotFound(format!("resource {resource} of {entry_name}"))
            })?;
            let name = target.name.clone();
            package
                .apply_to(target)
                .map_err(|err| package_error(err, &entry_name, &name))?;
        }
        Ok(())
    }

    /// Stream every entry in logical order through `visit`.
    ///
    /// This reads the slot files front to back with blocking I/O and should
    /// run on a blocking-capable thread for large sets. Returns the number of
    /// entries visited.
    ///
    /// # Errors
    ///
    /// Returns error if a slot file cannot be read, or the first error
    /// returned by `visit`.
    pub fn scan<F>(&self, mut visit: F) -> Result<usize>
    where
        F: FnMut(&TocEntry, Vec<u8>) -> Result<()>,
    {
        let mut reader: Box<dyn Read> = Box::new(std::io::empty());
        for index in 0..self.index.slots.len() {
            let file = std::fs::File::open(slots::slot_path(&self.config.game_dir, index)?)?;
            reader = Box::new(reader.chain(BufReader::new(file)));
        }

        let mut visited = 0;
        for item in TocScanner::new(&self.index, reader) {
            let (entry, data) = item?;
            visit(entry, data)?;
            visited += 1;
        }
        debug!("Scanned {} entries", visited);
        Ok(visited)
    }
}

fn is_toc_only(config: &StoreConfig, index: &ArchiveIndex) -> bool {
    index
        .slots
        .first()
        .is_some_and(|slot| slot.size() <= config.pristine_threshold)
}

fn holds_game_data(config: &StoreConfig, index: &ArchiveIndex) -> bool {
    index
        .slots
        .first()
        .is_some_and(|slot| slot.size() > config.pristine_threshold)
}

/// Read the TOC at the head of slot file `slot`
async fn read_index(
    config: &StoreConfig,
    slot: usize,
    lookup: &dyn NameLookup,
) -> Result<ArchiveIndex> {
    let dir = &config.game_dir;
    let head = slots::read_prefix(dir, slot, ARCHIVE_HEADER_SIZE).await?;
    let header = ArchiveHeader::read(&mut Cursor::new(&head)).map_err(ArchiveError::from)?;
    if header.magic != ARCHIVE_MAGIC {
        return Err(ArchiveError::MalformedHeader {
            magic: header.magic,
            expected: ARCHIVE_MAGIC,
        }
        .into());
    }

    let length = header.table_length(&config.profile.schema());
    let table = slots::read_prefix(dir, slot, length as usize).await?;
    Ok(ArchiveIndex::parse_bytes(&table, config.profile, lookup)?)
}

/// Read back the pristine index of a migrated set.
///
/// Migration only renames the pristine slot files, so the original TOC
/// still heads slot 1 and its slot list must match slots `1..=n` of the
/// current index. On success every current entry gets its original
/// placement back, moved up one slot, so entries already in the modded
/// region count as relocated.
async fn recover_pristine(
    config: &StoreConfig,
    current: &mut ArchiveIndex,
    lookup: &dyn NameLookup,
) -> Option<ArchiveIndex> {
    let pristine = match read_index(config, 1, lookup).await {
        Ok(index) => index,
        Err(err) => {
            debug!("No original TOC in slot 1: {}", err);
            return None;
        }
    };

    let count = pristine.slots.len();
    let matches = holds_game_data(config, &pristine)
        && current.slots.len() > count
        && current.entries.len() == pristine.entries.len()
        && pristine
            .slots
            .iter()
            .zip(&current.slots[1..=count])
            .all(|(original, moved)| original.size() == moved.size());
    if !matches {
        debug!("Original TOC in slot 1 does not match the migrated slot list");
        return None;
    }

    let alignment = current.alignment();
    let starts: Vec<u64> = (0..current.slots.len())
        .map(|slot| current.slot_start(slot))
        .collect();
    let mut originals = Vec::with_capacity(current.entries.len());
    for entry in &current.entries {
        let source = pristine.entry(entry.id)?;
        let mut location = source.location;
        location.slot += 1;
        let offset = starts.get(location.slot)? + location.offset_in_slot;
        let raw_offset = offset
            .checked_div(alignment)
            .and_then(|raw| u32::try_from(raw).ok())?;
        originals.push(EntrySnapshot {
            raw_offset,
            offset,
            size: source.size,
            location,
        });
    }
    for (entry, original) in current.entries.iter_mut().zip(originals) {
        entry.original = original;
    }

    info!(
        "Recovered pristine layout of {} slots from the original TOC",
        count
    );
    Some(pristine)
}

fn package_error(err: PackageError, entry: &str, resource: &str) -> StorageError {
    match err {
        PackageError::UnsupportedSegmentCount { count } => StorageError::UnsupportedSegmentCount {
            entry: entry.to_string(),
            resource: resource.to_string(),
            count,
        },
        other => other.into(),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use choops_formats::{HashLookupTable, NoLookup};
    use choops_test_utils::{ArchiveSetBuilder, IffBuilder, package_fixture, pattern};

    fn scene_container() -> Vec<u8> {
        let fixture = package_fixture("hi_shoe1", &[pattern(0x40, 1), pattern(0x60, 2)], 0);
        IffBuilder::new()
            .block(fixture.header_block)
            .block(fixture.data_block)
            .resource(0x10, 0x20, &[0, 0])
            .name("hi_shoe1", "SCNE")
            .build()
    }

    #[tokio::test]
    async fn test_open_and_read() {
        let (dir, layout) = ArchiveSetBuilder::new(0x4000)
            .entry(0x1111, pattern(0x900, 1))
            .entry(0x2222, pattern(0x4000, 2))
            .write_temp()
            .unwrap();

        let mut lookup = HashLookupTable::new();
        lookup.insert(0x2222, "global.iff");
        let config = StoreConfig::new(dir.path()).with_pristine_threshold(0x800);
        let archive = GameArchive::open(config, Arc::new(lookup)).await.unwrap();

        assert_eq!(archive.entries().len(), 2);
        assert!(!archive.is_migrated());

        let global = archive.entry_by_name("GLOBAL.IFF").unwrap();
        assert_eq!(global.offset, layout.entries[1].offset);
        assert!(global.location.is_split);
        assert_eq!(archive.read_raw(global).await.unwrap(), pattern(0x4000, 2));

        let many = archive.read_many(&[1, 0]).await.unwrap();
        assert_eq!(many, vec![pattern(0x4000, 2), pattern(0x900, 1)]);
        assert!(matches!(
            archive.read_many(&[9]).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_container_and_package() {
        let (dir, _) = ArchiveSetBuilder::new(0x10000)
            .entry(1, pattern(0x100, 1))
            .entry(2, scene_container())
            .write_temp()
            .unwrap();
        let mut archive = GameArchive::open(StoreConfig::new(dir.path()), Arc::new(NoLookup))
            .await
            .unwrap();

        assert!(matches!(
            archive.container(0).await,
            Err(StorageError::NotAContainer { .. })
        ));

        let container = archive.container(1).await.unwrap();
        assert_eq!(container.resources[0].name, "hi_shoe1");

        let package = archive.package_mut(1, 0).await.unwrap();
        assert_eq!(package.name(), "hi_shoe1");
        package.texture_mut(0).unwrap().data.replace(vec![7; 0x10]);

        archive.fold_packages().unwrap();
        assert!(archive.containers[&1].is_dirty());
        assert!(archive.package_mut(1, 3).await.is_err());
    }

    #[tokio::test]
    async fn test_single_segment_package_rejected() {
        let container = IffBuilder::new()
            .block(pattern(0x40, 1))
            .resource(0x10, 0x20, &[0])
            .name("flat", "SCNE")
            .build();
        let (dir, _) = ArchiveSetBuilder::new(0x10000)
            .entry(1, container)
            .write_temp()
            .unwrap();
        let mut archive = GameArchive::open(StoreConfig::new(dir.path()), Arc::new(NoLookup))
            .await
            .unwrap();

        let err = archive.package_mut(0, 0).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedSegmentCount { count: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_scan_visits_in_offset_order() {
        let (dir, _) = ArchiveSetBuilder::new(0x1000)
            .entry(1, pattern(0x1800, 1))
            .entry(2, pattern(0x10, 2))
            .reverse_toc(true)
            .write_temp()
            .unwrap();
        let archive = GameArchive::open(StoreConfig::new(dir.path()), Arc::new(NoLookup))
            .await
            .unwrap();

        let mut seen = Vec::new();
        let count = archive
            .scan(|entry, data| {
                seen.push((entry.name_hash, data));
                Ok(())
            })
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(seen, vec![(1, pattern(0x1800, 1)), (2, pattern(0x10, 2))]);
    }

    #[tokio::test]
    async fn test_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0A"), vec![0u8; 0x800]).unwrap();

        let err = GameArchive::open(StoreConfig::new(dir.path()), Arc::new(NoLookup))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Archive(ArchiveError::MalformedHeader { .. })
        ));
        assert!(err.is_permanent());
    }
}

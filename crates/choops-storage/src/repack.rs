//! Repack engine
//!
//! Writes every modified entry into slot files appended after the pristine
//! ones, then rewrites the TOC in `0A`. The pristine slot files are only ever
//! renamed, never written.
//!
//! The first repack of a pristine set migrates it: every slot file moves up
//! one letter and a new `0A` holding only the TOC takes its place. Existing
//! entries keep their slot-relative position, so only their logical offsets
//! change.
//!
//! Every repack rebuilds the modded region from scratch: entries that were
//! relocated by an earlier repack are placed again along with newly changed
//! ones, in TOC offset order.

use choops_formats::align_up;
use choops_formats::archive::{ArchiveIndex, EntryLocation, Slot};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::archive::GameArchive;
use crate::slots;
use crate::{Result, StorageError};

/// Slot sizes are stored in units of this many bytes
const SLOT_UNIT: u64 = 1 << 11;

/// Outcome of one repack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepackReport {
    /// Whether this repack migrated a pristine set
    pub migrated: bool,
    /// Entries written to modded slots, in placement order
    pub relocated: Vec<u32>,
    /// Number of modded slot files written
    pub mod_slots: usize,
    /// Length of the TOC written to `0A`
    pub toc_length: u64,
}

/// Position of one entry in the modded region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Entry id
    pub id: u32,
    /// Modded slot, counted from the first modded slot
    pub slot: usize,
    /// Offset inside that slot
    pub offset_in_slot: u64,
    /// Payload length
    pub size: u64,
}

/// Placements and the resulting modded slot sizes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotPlan {
    /// One placement per entry, in input order
    pub placements: Vec<Placement>,
    /// Byte size of each modded slot
    pub slot_sizes: Vec<u64>,
}

/// Place payloads of the given sizes into slots of at most `capacity` bytes.
///
/// Each payload is padded to `alignment`. A new slot is started whenever the
/// next padded payload would overflow the current one, so payloads are never
/// split across slot boundaries unless a single payload is larger than
/// `capacity`; such a payload starts a fresh slot and continues through as
/// many full slots as it needs.
pub fn plan_placements(sizes: &[(u32, u64)], capacity: u64, alignment: u64) -> SlotPlan {
    let mut plan = SlotPlan::default();
    let mut slot = 0usize;
    let mut cursor = 0u64;

    for &(id, size) in sizes {
        let padded = align_up(size, alignment);
        if cursor > 0 && cursor + padded > capacity {
            plan.slot_sizes.push(align_up(cursor, SLOT_UNIT));
            slot += 1;
            cursor = 0;
        }

        plan.placements.push(Placement {
            id,
            slot,
            offset_in_slot: cursor,
            size,
        });
        cursor += padded;

        while cursor > capacity {
            plan.slot_sizes.push(capacity);
            slot += 1;
            cursor -= capacity;
        }
    }

    if cursor > 0 || (plan.slot_sizes.len() == slot && !plan.placements.is_empty()) {
        plan.slot_sizes.push(align_up(cursor, SLOT_UNIT));
    }
    plan
}

/// Shift the slot list up by one for a pristine set: slot 0 becomes the
/// TOC-only slot and every entry moves with its file.
fn migrate_layout(index: &mut ArchiveIndex) -> Result<()> {
    let mut shifted = Vec::with_capacity(index.slots.len() + 1);
    shifted.push(Slot::named(0, 0)?);
    for (position, slot) in index.slots.iter().enumerate() {
        shifted.push(Slot::named(position + 1, slot.size())?);
    }
    index.slots = shifted;

    for entry in &mut index.entries {
        entry.location.slot += 1;
        entry.original.location.slot += 1;
    }
    Ok(())
}

/// Logical offset of a slot-relative location under the current slot list
fn logical_offset(index: &ArchiveIndex, location: &EntryLocation) -> u64 {
    index.slot_start(location.slot) + location.offset_in_slot
}

fn raw_offset(index: &ArchiveIndex, offset: u64) -> Result<u32> {
    let alignment = index.alignment();
    if alignment == 0 {
        return Err(StorageError::Layout("archive alignment is zero".to_string()));
    }
    u32::try_from(offset / alignment).map_err(|_| {
        StorageError::Layout(format!("offset {offset:#x} does not fit a raw offset"))
    })
}

/// Recompute logical and raw offsets of every entry, and of its original
/// placement, from their slot-relative locations.
fn rebase_offsets(index: &mut ArchiveIndex) -> Result<()> {
    let rebased = index
        .entries
        .iter()
        .map(|entry| {
            let offset = logical_offset(index, &entry.location);
            let original = logical_offset(index, &entry.original.location);
            Ok((
                offset,
                raw_offset(index, offset)?,
                original,
                raw_offset(index, original)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    for (entry, (offset, raw, original, original_raw)) in index.entries.iter_mut().zip(rebased) {
        entry.offset = offset;
        entry.raw_offset = raw;
        entry.original.offset = original;
        entry.original.raw_offset = original_raw;
    }
    Ok(())
}

/// Cut every payload into the per-slot pieces it occupies, following its
/// placement into as many slots as it spans.
fn slot_pieces<'a>(
    plan: &SlotPlan,
    payloads: &'a [Vec<u8>],
    capacity: u64,
) -> Vec<Vec<(u64, &'a [u8])>> {
    let mut pieces: Vec<Vec<(u64, &[u8])>> = vec![Vec::new(); plan.slot_sizes.len()];
    for (placement, payload) in plan.placements.iter().zip(payloads) {
        let mut slot = placement.slot;
        let mut offset = placement.offset_in_slot;
        let mut remaining = payload.as_slice();
        loop {
            let room = capacity.saturating_sub(offset) as usize;
            let (head, tail) = remaining.split_at(room.min(remaining.len()));
            if let Some(target) = pieces.get_mut(slot) {
                target.push((offset, head));
            }
            if tail.is_empty() {
                break;
            }
            remaining = tail;
            slot += 1;
            offset = 0;
        }
    }
    pieces
}

impl GameArchive {
    /// Ids of entries that must be written, in TOC offset order
    fn changed_entries(&self) -> Vec<u32> {
        let packaged: HashSet<u32> = self
            .packages
            .iter()
            .filter(|(_, package)| package.is_dirty())
            .map(|(&(id, _), _)| id)
            .collect();

        self.index
            .entries
            .iter()
            .filter(|entry| {
                entry.is_relocated()
                    || packaged.contains(&entry.id)
                    || self
                        .containers
                        .get(&entry.id)
                        .is_some_and(|container| container.is_dirty())
            })
            .map(|entry| entry.id)
            .collect()
    }

    /// Write all pending edits to the archive set.
    ///
    /// Does nothing, and touches no file, when no entry changed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Layout`] if the set is migrated but its
    /// pristine layout is unknown, [`StorageError::LockedFilesystem`] before
    /// any mutation if a slot file is not writable,
    /// [`StorageError::UnsupportedSegmentCount`] if an edited package cannot be
    /// folded back, and [`StorageError::PartialWrite`] if writing fails after
    /// files were changed. There is no rollback for partial writes.
    pub async fn repack(&mut self) -> Result<RepackReport> {
        self.fold_packages()?;

        let changed = self.changed_entries();
        if changed.is_empty() {
            debug!("Nothing to repack");
            return Ok(RepackReport {
                migrated: false,
                relocated: Vec::new(),
                mod_slots: 0,
                toc_length: self.index.toc_length(),
            });
        }

        let mod_base = self.pristine.slots.len() + 1;
        if self.is_migrated() && (!self.has_pristine_layout() || self.index.slots.len() < mod_base)
        {
            return Err(StorageError::Layout(format!(
                "pristine layout of {} unknown, refusing to repack",
                self.config.game_dir.display()
            )));
        }

        let mut payloads = Vec::with_capacity(changed.len());
        for &id in &changed {
            let payload = match self.containers.get(&id) {
                Some(container) if container.is_dirty() => container.build()?,
                _ => {
                    let entry = self
                        .index
                        .entry(id)
                        .ok_or_else(|| StorageError::NotFound(format!("entry {id}")))?;
                    self.read_raw(entry).await?
                }
            };
            payloads.push(payload);
        }

        let migrate = !self.is_migrated();
        let mut next = self.index.clone();
        if migrate {
            migrate_layout(&mut next)?;
        }

        next.slots.truncate(mod_base);

        let sizes: Vec<(u32, u64)> = changed
            .iter()
            .zip(&payloads)
            .map(|(&id, payload)| (id, payload.len() as u64))
            .collect();
        let plan = plan_placements(&sizes, self.config.slot_capacity, next.alignment());
        for (position, &size) in plan.slot_sizes.iter().enumerate() {
            next.slots.push(Slot::named(mod_base + position, size)?);
        }

        let toc_length = next.toc_length();
        next.slots[0].set_size(toc_length)?;
        rebase_offsets(&mut next)?;

        for placement in &plan.placements {
            let slot = mod_base + placement.slot;
            let offset = next.slot_start(slot) + placement.offset_in_slot;
            next.relocate(placement.id, offset, placement.size)?;
            if let Some(entry) = next.entry(placement.id) {
                debug!(
                    "Placing {} ({}) at slot {} offset {:#x}, {:#x} bytes",
                    entry.name,
                    hex::encode(entry.name_hash.to_be_bytes()),
                    slot,
                    placement.offset_in_slot,
                    placement.size
                );
            }
        }
        next.sort_entries();
        let toc = next.build()?;

        let dir = self.config.game_dir.clone();
        let existing: Vec<PathBuf> = (0..self.index.slots.len())
            .map(|index| slots::slot_path(&dir, index))
            .collect::<Result<_>>()?;
        slots::probe_access(&existing).await?;

        if migrate {
            info!(
                "Migrating archive {}: moving {} slot files up one letter",
                dir.display(),
                existing.len()
            );
            for index in (0..existing.len()).rev() {
                slots::rename(&dir, index, index + 1).await?;
            }
        }

        for stale in next.slots.len()..slots::MAX_SLOTS {
            slots::remove(&dir, stale).await?;
        }

        let pieces = slot_pieces(&plan, &payloads, self.config.slot_capacity);
        for (slot, (slot_data, &size)) in pieces.iter().zip(&plan.slot_sizes).enumerate() {
            let path = slots::slot_path(&dir, mod_base + slot)?;
            slots::write_slot(&path, slot_data, size).await?;
        }

        let primary = slots::slot_path(&dir, 0)?;
        slots::write_slot(&primary, &[(0, toc.as_slice())], toc_length).await?;

        for container in self.containers.values_mut() {
            if container.is_dirty() {
                container.commit()?;
            }
        }
        for package in self.packages.values_mut() {
            if package.is_dirty() {
                package.commit()?;
            }
        }

        self.index = next;
        self.save_snapshot().await;

        info!(
            "Repacked {} entries into {} modded slots (TOC {:#x} bytes{})",
            changed.len(),
            plan.slot_sizes.len(),
            toc_length,
            if migrate { ", migrated" } else { "" }
        );

        Ok(RepackReport {
            migrated: migrate,
            relocated: changed,
            mod_slots: plan.slot_sizes.len(),
            toc_length,
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GIB: u64 = 0x4000_0000;

    #[test]
    fn test_plan_fills_slots_in_order() {
        let plan = plan_placements(&[(3, 0x10), (1, 0x900), (2, 0x800)], 0x1800, 0x800);

        assert_eq!(
            plan.placements,
            vec![
                Placement { id: 3, slot: 0, offset_in_slot: 0, size: 0x10 },
                Placement { id: 1, slot: 0, offset_in_slot: 0x800, size: 0x900 },
                Placement { id: 2, slot: 1, offset_in_slot: 0, size: 0x800 },
            ]
        );
        assert_eq!(plan.slot_sizes, vec![0x1800, 0x800]);
    }

    #[test]
    fn test_plan_slot_count_is_total_over_capacity() {
        let sizes: Vec<(u32, u64)> = (0..3).map(|id| (id, 0x2000_0000)).collect();
        let plan = plan_placements(&sizes, GIB, 0x800);

        let total: u64 = sizes.iter().map(|(_, size)| size).sum();
        assert_eq!(plan.slot_sizes.len() as u64, total.div_ceil(GIB));
        assert_eq!(plan.slot_sizes, vec![GIB, 0x2000_0000]);

        let sizes: Vec<(u32, u64)> = (0..8).map(|id| (id, 0x1000_0000)).collect();
        let plan = plan_placements(&sizes, GIB, 0x800);
        assert_eq!(plan.slot_sizes, vec![GIB, GIB]);
    }

    #[test]
    fn test_plan_keeps_entries_whole_when_total_is_uneven() {
        let sizes: Vec<(u32, u64)> = (0..5).map(|id| (id, 0x1800_0000)).collect();
        let plan = plan_placements(&sizes, GIB, 0x800);

        // Two entries per slot; the leftover space is not filled by halves.
        assert_eq!(plan.slot_sizes.len(), 3);
        assert!(plan.slot_sizes.iter().all(|&size| size <= GIB));
        for placement in &plan.placements {
            assert!(placement.offset_in_slot + placement.size <= GIB);
        }
        let slots: Vec<usize> = plan.placements.iter().map(|p| p.slot).collect();
        assert_eq!(slots, vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_plan_oversized_payload_spans_slots() {
        let plan = plan_placements(&[(1, 0x100), (2, 0x2800), (3, 0x10)], 0x1000, 0x800);

        assert_eq!(plan.placements[1].slot, 1);
        assert_eq!(plan.placements[1].offset_in_slot, 0);
        assert_eq!(plan.placements[2].slot, 3);
        assert_eq!(plan.placements[2].offset_in_slot, 0x800);
        assert_eq!(plan.slot_sizes, vec![0x800, 0x1000, 0x1000, 0x1000]);
    }

    #[test]
    fn test_plan_empty() {
        assert_eq!(plan_placements(&[], GIB, 0x800), SlotPlan::default());
    }

    proptest! {
        #[test]
        fn prop_placements_fit_their_slot(
            sizes in proptest::collection::vec(1u64..0x6000, 1..40),
        ) {
            let capacity = 0x8000;
            let input: Vec<(u32, u64)> = sizes.iter().enumerate().map(|(i, &s)| (i as u32, s)).collect();
            let plan = plan_placements(&input, capacity, 0x800);

            prop_assert_eq!(plan.placements.len(), input.len());
            for placement in &plan.placements {
                prop_assert!(placement.offset_in_slot % 0x800 == 0);
                prop_assert!(placement.offset_in_slot + placement.size <= plan.slot_sizes[placement.slot]);
            }
            prop_assert!(plan.slot_sizes.iter().all(|&size| size <= capacity && size % 0x800 == 0));
        }
    }
}

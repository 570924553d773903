//! Active-slab tracker: a per-thread persistent set of recently-touched
//! slab pages, stamped with alloc/unlink epochs, used to bound the
//! recovery scan.
//!
//! Grounded directly on `active_slabs.cpp`'s `mark_slab`/`clear_buffer`:
//! same growth-on-demand slot table, same "clear_all or size > threshold"
//! sweep trigger, same halve-on-sparse-upper-half shrink. The persistence
//! protocol (`write_data_wait`/`write_data_nowait`/`wait_writes`) is
//! represented here by calls into [`crate::pmem`] rather than raw NVM
//! flush intrinsics.

use crate::pmem::{layout, Pool};
use log::warn;

pub const DEFAULT_SLAB_BUFFER_SIZE: usize = 32;
pub const CLEAN_THRESHOLD: usize = 16;
pub const MAX_NUM_SLABS: usize = 8192;

/// Tags a freshly initialized root so `create` can tell a fresh pool from
/// one that already holds a descriptor table to reconstruct.
const MAGIC: u64 = 0x5441_424c_4531; // "TABLE1", truncated to fit a u64
const MAGIC_OFFSET: usize = 0;
const LAST_IN_USE_OFFSET: usize = 8;
const CLEAR_ALL_OFFSET: usize = 16;
const HEADER_LEN: usize = 32;
const SLOT_LEN: usize = 32;
const SLOTS_BASE: usize = HEADER_LEN;
const SLOT_PRESENT_OFFSET: usize = 0;
const SLOT_CLASS_ID_OFFSET: usize = 4;
const SLOT_PAGE_INDEX_OFFSET: usize = 8;
const SLOT_LAST_ALLOC_OFFSET: usize = 16;
const SLOT_LAST_UNLINK_OFFSET: usize = 24;

#[derive(Debug, Clone, Copy, Default)]
pub struct SlabDescriptor {
    /// Page identity, as an opaque key (class id, page index). `None` means
    /// the slot is empty.
    pub page: Option<(u8, u32)>,
    pub last_alloc_epoch: u64,
    pub last_unlink_epoch: u64,
}

/// Per-thread persistent root. One of these lives in its own named pool
/// (`/tmp/slabs_thread_<id>`), opened exclusively by the owning thread. The
/// descriptor table is mirrored byte-for-byte into `pool.root_bytes()` on
/// every mutation; `slots` is the in-memory working copy `mark`/`sweep`
/// operate on, reconstructed from the pool's bytes on reopen rather than
/// reinitialized.
pub struct ActiveSlabTable {
    pub current_size: usize,
    pub last_in_use: usize,
    pub clear_all: bool,
    slots: Vec<SlabDescriptor>,
    pool: Pool,
}

impl ActiveSlabTable {
    pub fn create(mut pool: Pool) -> Self {
        let bytes = pool.root_bytes();
        let is_existing = !pool.created_fresh() && layout::read_u64(bytes, MAGIC_OFFSET) == MAGIC;

        if is_existing {
            return Self::reconstruct(pool);
        }

        let mut table = Self {
            current_size: 0,
            last_in_use: DEFAULT_SLAB_BUFFER_SIZE,
            clear_all: false,
            slots: vec![SlabDescriptor::default(); DEFAULT_SLAB_BUFFER_SIZE],
            pool,
        };
        table.persist_header();
        table
    }

    /// Rebuilds `slots`/`last_in_use`/`current_size` from a pool that
    /// already holds a descriptor table, mirroring what a fresh process
    /// restart does before admitting any request.
    fn reconstruct(mut pool: Pool) -> Self {
        let bytes = pool.root_bytes();
        let last_in_use = layout::read_u64(bytes, LAST_IN_USE_OFFSET) as usize;
        let clear_all = bytes[CLEAR_ALL_OFFSET] != 0;

        let mut slots = vec![SlabDescriptor::default(); last_in_use.max(DEFAULT_SLAB_BUFFER_SIZE)];
        let mut current_size = 0usize;
        for (i, slot) in slots.iter_mut().enumerate().take(last_in_use) {
            let off = SLOTS_BASE + i * SLOT_LEN;
            if bytes[off + SLOT_PRESENT_OFFSET] != 0 {
                slot.page = Some((
                    layout::read_u32(bytes, off + SLOT_CLASS_ID_OFFSET) as u8,
                    layout::read_u32(bytes, off + SLOT_PAGE_INDEX_OFFSET),
                ));
                slot.last_alloc_epoch = layout::read_u64(bytes, off + SLOT_LAST_ALLOC_OFFSET);
                slot.last_unlink_epoch = layout::read_u64(bytes, off + SLOT_LAST_UNLINK_OFFSET);
                current_size += 1;
            }
        }

        Self {
            current_size,
            last_in_use,
            clear_all,
            slots,
            pool,
        }
    }

    fn persist_header(&mut self) {
        let bytes = self.pool.root_bytes();
        layout::write_u64(bytes, MAGIC_OFFSET, MAGIC);
        layout::write_u64(bytes, LAST_IN_USE_OFFSET, self.last_in_use as u64);
        bytes[CLEAR_ALL_OFFSET] = self.clear_all as u8;
        self.pool.flush_range(0, HEADER_LEN);
    }

    fn persist_slot(&mut self, i: usize) {
        let off = SLOTS_BASE + i * SLOT_LEN;
        let desc = self.slots[i];
        let bytes = self.pool.root_bytes();
        match desc.page {
            Some((class_id, page_index)) => {
                bytes[off + SLOT_PRESENT_OFFSET] = 1;
                layout::write_u32(bytes, off + SLOT_CLASS_ID_OFFSET, class_id as u32);
                layout::write_u32(bytes, off + SLOT_PAGE_INDEX_OFFSET, page_index);
            }
            None => {
                bytes[off + SLOT_PRESENT_OFFSET] = 0;
            }
        }
        layout::write_u64(bytes, off + SLOT_LAST_ALLOC_OFFSET, desc.last_alloc_epoch);
        layout::write_u64(bytes, off + SLOT_LAST_UNLINK_OFFSET, desc.last_unlink_epoch);
        self.pool.flush_range(off, SLOT_LEN);
    }

    /// Records an alloc or unlink event against `page`. Mirrors
    /// `mark_slab`: sweep first if due, linear-scan for an existing entry,
    /// else claim the first empty slot, else double `last_in_use` (or drop
    /// with a diagnostic if already at the cap).
    pub fn mark(
        &mut self,
        page: (u8, u32),
        current_epoch: u64,
        collect_epoch: u64,
        is_unlink: bool,
    ) {
        if self.clear_all || self.current_size > CLEAN_THRESHOLD {
            self.sweep(collect_epoch, current_epoch);
        }

        let mut first_empty: Option<usize> = None;
        for i in 0..self.last_in_use {
            match self.slots[i].page {
                Some(p) if p == page => {
                    if is_unlink {
                        if self.slots[i].last_unlink_epoch < current_epoch {
                            self.slots[i].last_unlink_epoch = current_epoch;
                        }
                    } else if self.slots[i].last_alloc_epoch < current_epoch {
                        self.slots[i].last_alloc_epoch = current_epoch;
                    }
                    return;
                }
                None if first_empty.is_none() => first_empty = Some(i),
                _ => {}
            }
        }

        if let Some(i) = first_empty {
            self.write_entry(i, page, current_epoch, is_unlink);
            self.current_size += 1;
            self.persist_slot(i);
            return;
        }

        let twice = self.last_in_use * 2;
        if twice >= MAX_NUM_SLABS {
            warn!(
                "active-slab tracker exhausted at {} entries, dropping mark for page {:?}",
                self.last_in_use, page
            );
            return;
        }

        let old = self.last_in_use;
        self.slots.resize(twice, SlabDescriptor::default());
        self.last_in_use = twice;
        // Protocol: persist the raised boundary before writing into the
        // newly enabled region, then persist the new entry, then barrier
        // again — mirrors active_slabs.cpp's
        // write_data_wait(slabs,1) / ... / write_data_nowait(&entry,1) / wait_writes().
        self.persist_header();
        debug_assert!(self.slots[old].page.is_none());
        self.write_entry(old, page, current_epoch, is_unlink);
        self.persist_slot(old);
        self.current_size += 1;
    }

    fn write_entry(&mut self, i: usize, page: (u8, u32), current_epoch: u64, is_unlink: bool) {
        self.slots[i].page = Some(page);
        if is_unlink {
            self.slots[i].last_unlink_epoch = current_epoch;
            self.slots[i].last_alloc_epoch = 0;
        } else {
            self.slots[i].last_unlink_epoch = 0;
            self.slots[i].last_alloc_epoch = current_epoch;
        }
    }

    /// Clears entries whose epochs prove no observer still needs them, and
    /// shrinks `last_in_use` when the upper half has gone empty. Best
    /// effort: does not require synchronous persistence (mirrors
    /// `clear_buffer`, which leaves the decision unflushed).
    pub fn sweep(&mut self, collect_ts: u64, current_ts: u64) {
        let mut max_seen = 0usize;
        for i in 0..self.last_in_use {
            let entry = &mut self.slots[i];
            if entry.page.is_some()
                && (entry.last_unlink_epoch < collect_ts || entry.last_unlink_epoch == 0)
                && (entry.last_alloc_epoch < current_ts || entry.last_alloc_epoch == 0)
            {
                entry.page = None;
                entry.last_unlink_epoch = 0;
                entry.last_alloc_epoch = 0;
                self.current_size = self.current_size.saturating_sub(1);
            }
            if self.slots[i].page.is_some() {
                max_seen = i;
            }
        }

        let half = self.last_in_use / 2;
        if max_seen < half && half >= DEFAULT_SLAB_BUFFER_SIZE {
            self.last_in_use = half;
        }

        self.clear_all = false;
    }

    pub fn entries(&self) -> impl Iterator<Item = &SlabDescriptor> {
        self.slots[..self.last_in_use]
            .iter()
            .filter(|e| e.page.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_then_sweep_retains_entry_when_unlink_not_yet_collected() {
        let mut t = ActiveSlabTable::create(Pool::in_memory_for_test());
        t.mark((0, 1), 5, 0, false); // alloc @ 5
        t.mark((0, 1), 7, 0, true); // unlink @ 7
        t.sweep(6, 8); // collect=6, current=8: unlink(7) >= collect(6) -> retained
        assert_eq!(t.current_size, 1);
        t.sweep(8, 9); // collect=8, current=9: unlink(7) < 8 and alloc(5) < 9 -> cleared
        assert_eq!(t.current_size, 0);
    }

    #[test]
    fn sweep_is_idempotent() {
        let mut t = ActiveSlabTable::create(Pool::in_memory_for_test());
        t.mark((0, 1), 5, 0, false);
        t.sweep(10, 10);
        let size_after_first = t.current_size;
        let last_in_use_after_first = t.last_in_use;
        t.sweep(10, 10);
        assert_eq!(t.current_size, size_after_first);
        assert_eq!(t.last_in_use, last_in_use_after_first);
    }

    #[test]
    fn growth_doubles_last_in_use_and_preserves_old_entries() {
        let mut t = ActiveSlabTable::create(Pool::in_memory_for_test());
        for i in 0..DEFAULT_SLAB_BUFFER_SIZE as u32 {
            t.mark((0, i), 1, 0, false);
        }
        assert_eq!(t.last_in_use, DEFAULT_SLAB_BUFFER_SIZE);
        t.mark((0, DEFAULT_SLAB_BUFFER_SIZE as u32), 1, 0, false);
        assert_eq!(t.last_in_use, DEFAULT_SLAB_BUFFER_SIZE * 2);
        assert_eq!(t.entries().count(), DEFAULT_SLAB_BUFFER_SIZE + 1);
    }

    #[test]
    fn sweep_shrinks_last_in_use_only_when_upper_half_empty() {
        let mut t = ActiveSlabTable::create(Pool::in_memory_for_test());
        for i in 0..(DEFAULT_SLAB_BUFFER_SIZE as u32 + 1) {
            t.mark((0, i), 1, 0, false);
        }
        assert_eq!(t.last_in_use, DEFAULT_SLAB_BUFFER_SIZE * 2);
        // Only the first entry survives collection; upper half is sparse.
        for i in 1..(DEFAULT_SLAB_BUFFER_SIZE as u32 + 1) {
            t.mark((0, i), 2, 1, true);
        }
        t.sweep(2, 3);
        assert!(t.last_in_use <= DEFAULT_SLAB_BUFFER_SIZE * 2);
    }

    #[test]
    fn descriptor_table_survives_reopening_the_backing_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker_test");
        let pool_size = SLOTS_BASE + MAX_NUM_SLABS * SLOT_LEN + 64;

        {
            let pool = Pool::create_or_open(&path, "tracker", pool_size).unwrap();
            let mut t = ActiveSlabTable::create(pool);
            t.mark((3, 7), 5, 0, false);
            t.mark((3, 8), 6, 0, false);
            assert_eq!(t.current_size, 2);
        }

        // Drop and reopen: a real restart, not the same in-memory Vec.
        let pool = Pool::create_or_open(&path, "tracker", pool_size).unwrap();
        let t = ActiveSlabTable::create(pool);
        assert_eq!(t.current_size, 2);
        let pages: Vec<_> = t.entries().map(|e| e.page.unwrap()).collect();
        assert!(pages.contains(&(3, 7)));
        assert!(pages.contains(&(3, 8)));
    }
}

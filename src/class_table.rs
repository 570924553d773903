//! The frozen-after-init table of slab classes.
//!
//! Grounded on `slabs.cpp`'s class-sizing loop: class `POWER_SMALLEST` seeds
//! at `sizeof(item) + chunk_size`, each subsequent class multiplies by
//! `growth_factor` and rounds up to `CHUNK_ALIGN_BYTES`, and the final slot
//! is forced to exactly `item_size_max` with `perslab = 1` regardless of
//! where the geometric progression landed.

use crate::class::SlabClass;
use crate::config::{Config, CHUNK_ALIGN_BYTES, MAX_NUMBER_OF_SLAB_CLASSES, POWER_SMALLEST};
use crate::item::{ItemFlags, ItemHeader};
use crate::pmem::{layout, Pool, Transaction};
use std::sync::Mutex;

fn align_up(size: usize, align: usize) -> usize {
    size.div_ceil(align) * align
}

/// On-disk log of pages a class has ever installed, and a bump-allocated
/// region of one flag byte per chunk — together the durable half of the
/// class table's dynamic state, living in the slab pool's root bytes.
/// Class *shape* (chunk_size/perslab per id) is never persisted here: it's
/// a pure function of `Config`, recomputed identically by `ClassTable::init`
/// on every start.
///
/// Layout of `Pool::root_bytes()`:
///   [0..8)                         page_log_count: u64
///   [8..16)                        flags_bump: u64 (next free byte in the flags region)
///   [PAGE_LOG_BASE..FLAGS_BASE)     up to MAX_PAGE_LOG_ENTRIES fixed-size entries
///   [FLAGS_BASE..)                  flags region, one byte per chunk ever installed
///
/// Each page-log entry (24 bytes): class_id: u32, pad: u32, base_offset: u64,
/// flags_offset: u64.
pub const PAGE_LOG_COUNT_OFFSET: usize = 0;
pub const FLAGS_BUMP_OFFSET: usize = 8;
pub const PAGE_LOG_BASE: usize = 16;
pub const PAGE_LOG_ENTRY_SIZE: usize = 24;
/// Fixed capacity: a trade-off against a growable on-disk directory, chosen
/// the way `Heap`'s bump pointer trades dynamic sizing for simplicity. At
/// 24 bytes/entry this reserves 96 KiB up front regardless of how many
/// pages a run actually installs.
pub const MAX_PAGE_LOG_ENTRIES: usize = 4096;
pub const FLAGS_BASE: usize = PAGE_LOG_BASE + MAX_PAGE_LOG_ENTRIES * PAGE_LOG_ENTRY_SIZE;

/// Reserves flags-region bytes for a freshly installed page (all SLABBED)
/// and appends its page-log entry, all inside one transaction. Returns the
/// new page's `flags_offset`. Called from `Allocator::grow_class`.
pub fn record_new_page(
    tx: &mut Transaction,
    class_id: u8,
    base_offset: usize,
    perslab: usize,
) -> u64 {
    let bump = layout::read_u64(tx.bytes(), FLAGS_BUMP_OFFSET);

    tx.add_range(FLAGS_BASE + bump as usize, perslab);
    let bytes = tx.bytes();
    for i in 0..perslab {
        bytes[FLAGS_BASE + bump as usize + i] = ItemFlags::SLABBED.bits();
    }

    tx.add_range(FLAGS_BUMP_OFFSET, 8);
    layout::write_u64(tx.bytes(), FLAGS_BUMP_OFFSET, bump + perslab as u64);

    let count = layout::read_u64(tx.bytes(), PAGE_LOG_COUNT_OFFSET) as usize;
    assert!(count < MAX_PAGE_LOG_ENTRIES, "page log exhausted");
    let entry_off = PAGE_LOG_BASE + count * PAGE_LOG_ENTRY_SIZE;
    tx.add_range(entry_off, PAGE_LOG_ENTRY_SIZE);
    let bytes = tx.bytes();
    layout::write_u32(bytes, entry_off, class_id as u32);
    layout::write_u32(bytes, entry_off + 4, 0);
    layout::write_u64(bytes, entry_off + 8, base_offset as u64);
    layout::write_u64(bytes, entry_off + 16, bump);

    tx.add_range(PAGE_LOG_COUNT_OFFSET, 8);
    layout::write_u64(tx.bytes(), PAGE_LOG_COUNT_OFFSET, (count + 1) as u64);

    bump
}

/// Persists one chunk's flag byte transactionally. A no-op for pages the
/// mover donated between classes (`crate::class::UNBACKED_FLAGS_OFFSET`),
/// which were never logged here.
pub fn persist_chunk_flag(tx: &mut Transaction, flags_offset: u64, local_slot: usize, flags: ItemFlags) {
    if flags_offset == crate::class::UNBACKED_FLAGS_OFFSET {
        return;
    }
    let off = FLAGS_BASE + flags_offset as usize + local_slot;
    tx.add_range(off, 1);
    tx.bytes()[off] = flags.bits();
}

pub struct ClassTable {
    /// Index 0 is an unused sentinel, matching `classid_for`'s "no class"
    /// return value; real classes start at `POWER_SMALLEST`.
    pub classes: Vec<Mutex<SlabClass>>,
    pub largest_active_class: u8,
}

impl ClassTable {
    pub fn init(config: &Config) -> Self {
        let mut classes = Vec::with_capacity(MAX_NUMBER_OF_SLAB_CLASSES);
        classes.push(Mutex::new(SlabClass::new(0, 0, 0)));

        let mut size = align_up(
            std::mem::size_of::<ItemHeader>() + config.chunk_size,
            CHUNK_ALIGN_BYTES,
        );
        let mut id = POWER_SMALLEST;

        while (id as usize) < MAX_NUMBER_OF_SLAB_CLASSES - 1
            && (size as f64) <= (config.item_size_max as f64 / config.growth_factor)
        {
            let perslab = config.item_size_max / size;
            classes.push(Mutex::new(SlabClass::new(id, size, perslab)));
            size = align_up((size as f64 * config.growth_factor) as usize, CHUNK_ALIGN_BYTES);
            id += 1;
        }

        // Final class is forced to item_size_max with exactly one chunk
        // per page, regardless of where the geometric progression landed.
        classes.push(Mutex::new(SlabClass::new(id, config.item_size_max, 1)));

        Self {
            classes,
            largest_active_class: id,
        }
    }

    /// Smallest class whose chunk size >= bytes; 0 if bytes == 0 or exceeds
    /// the largest class.
    pub fn classid_for(&self, bytes: usize) -> u8 {
        if bytes == 0 {
            return 0;
        }
        for class in &self.classes[POWER_SMALLEST as usize..=self.largest_active_class as usize] {
            let c = class.lock().unwrap();
            if c.chunk_size >= bytes {
                return c.id;
            }
        }
        0
    }

    pub fn class(&self, id: u8) -> Option<&Mutex<SlabClass>> {
        if id == 0 || id as usize >= self.classes.len() {
            return None;
        }
        self.classes.get(id as usize)
    }

    pub fn num_classes(&self) -> usize {
        self.largest_active_class as usize
    }

    /// Replays the slab pool's page log against this (already shape-built)
    /// table: reinstalls every logged page's chunks from its persisted flag
    /// bytes, and returns the total bytes those pages reserved from `Heap`
    /// so the caller can restore its committed-bytes accounting. Only
    /// called when the pool was reopened rather than freshly created.
    pub fn restore_dynamic_state(&self, pool: &mut Pool, config: &Config) -> usize {
        let snapshot = pool.root_bytes().to_vec();
        let count = (layout::read_u64(&snapshot, PAGE_LOG_COUNT_OFFSET) as usize)
            .min(MAX_PAGE_LOG_ENTRIES);

        let mut total_reserved = 0usize;
        for i in 0..count {
            let entry_off = PAGE_LOG_BASE + i * PAGE_LOG_ENTRY_SIZE;
            let class_id = layout::read_u32(&snapshot, entry_off) as u8;
            let base_offset = layout::read_u64(&snapshot, entry_off + 8) as usize;
            let flags_offset = layout::read_u64(&snapshot, entry_off + 16);

            let Some(class_mutex) = self.class(class_id) else {
                continue;
            };
            let mut class = class_mutex.lock().unwrap();
            let perslab = class.perslab;
            let flags_start = FLAGS_BASE + flags_offset as usize;
            let flag_bytes = &snapshot[flags_start..flags_start + perslab];

            class.bitmap.grow((class.pages.len() + 1) * perslab);
            class.restore_page(base_offset, flags_offset, flag_bytes);

            total_reserved += if config.slab_reassign {
                config.item_size_max
            } else {
                class.chunk_size * perslab
            };
        }

        total_reserved
    }
}

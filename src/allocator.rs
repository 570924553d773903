//! The `Allocator`: single explicit owner of the class table, heap header,
//! and slab pool, per Design Notes ("global mutable state becomes an
//! explicit value threaded through the core... no hidden singletons").
//! Where the teacher crate implements `GlobalAlloc` against module-level
//! statics, this core hands callers a value they own and pass around —
//! there is no process-wide singleton to reach for.

use crate::class_table::ClassTable;
use crate::config::Config;
use crate::error::{SlabError, SlabResult};
use crate::heap::Heap;
use crate::pmem::{transaction, Pool};
use crate::stats::ClassStats;
use crate::tracker::ActiveSlabTable;
use log::debug;
use std::sync::Mutex;

/// Return codes for `reassign`, matching the external interface's `enum
/// reassign_result_type` one-to-one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassignResult {
    Ok,
    Running,
    BadClass,
    NoSpare,
    SrcDstSame,
}

pub struct Allocator {
    pub config: Config,
    pub table: ClassTable,
    pub heap: Mutex<Heap>,
    pub pool: Mutex<Pool>,
    pub rebalance_lock: Mutex<()>,
    pub class_stats: Vec<ClassStats>,
}

impl Allocator {
    pub fn init(config: Config) -> SlabResult<Self> {
        config.validate()?;
        let table = ClassTable::init(&config);
        let mut heap = Heap::init(&config)?;
        let mut pool =
            Pool::create_or_open(&config.slab_pool_path(), "slabs", 10 * 1024 * 1024 * 1024)?;

        if !pool.created_fresh() {
            let restored_bytes = table.restore_dynamic_state(&mut pool, &config);
            heap.restore_committed(restored_bytes);
            debug!(
                "reopened slab pool at {:?}, restored {} bytes across logged pages",
                config.slab_pool_path(),
                restored_bytes
            );
        }

        let num_classes = table.classes.len();
        Ok(Self {
            config,
            table,
            heap: Mutex::new(heap),
            pool: Mutex::new(pool),
            rebalance_lock: Mutex::new(()),
            class_stats: (0..num_classes).map(|_| ClassStats::default()).collect(),
        })
    }

    pub fn classid_for(&self, bytes: usize) -> u8 {
        self.table.classid_for(bytes)
    }

    /// Acquires the class's lock; grows a new page if the free list is
    /// empty and budget allows; pops the free-list head; marks the event
    /// in the caller's tracker.
    pub fn alloc(
        &self,
        bytes: usize,
        id: u8,
        tracker: &mut ActiveSlabTable,
        current_epoch: u64,
        collect_epoch: u64,
    ) -> SlabResult<(u32, usize)> {
        let class_mutex = self.table.class(id).ok_or(SlabError::BadClass(id))?;
        let mut class = class_mutex.lock().unwrap();

        if class.free_head == crate::item::NIL {
            let mut heap = self.heap.lock().unwrap();
            if heap.would_exceed(self.config.item_size_max) && !class.pages.is_empty() {
                heap.mem_limit_reached = true;
                return Err(SlabError::Capacity {
                    committed: heap.committed,
                    requested: self.config.item_size_max,
                    limit: heap.memory_limit,
                });
            }
            self.grow_class(&mut class, &mut heap)?;
        }

        let slot = class.pop_free().expect("free list just populated");
        let page_index = class.chunk(slot).page_index;
        let total_chunks = class.total_chunks();
        self.persist_chunk_flag(&class, slot)?;
        drop(class);

        tracker.mark((id, page_index), current_epoch, collect_epoch, false);
        let _ = bytes; // accounting happens via adjust_requested once linked
        Ok((slot, total_chunks))
    }

    /// New-slab procedure (§4.1): grows the page vector, the clock bitmap,
    /// reserves backing bytes, installs the page. All under one
    /// transaction so a crash mid-procedure leaves no partial page, and a
    /// reopened pool's page log names exactly the pages that committed.
    fn grow_class(&self, class: &mut crate::class::SlabClass, heap: &mut Heap) -> SlabResult<()> {
        // §4.1/slabs.cpp's do_slabs_newslab: slab_reassign selects whether a
        // fresh page always costs item_size_max, or only the class's own
        // chunk_size * perslab.
        let reserve_bytes = if self.config.slab_reassign {
            self.config.item_size_max
        } else {
            class.chunk_size * class.perslab
        };
        let perslab = class.perslab;
        let class_id = class.id;
        let mut pool = self.pool.lock().unwrap();

        let offset = heap
            .reserve_page(reserve_bytes)
            .map_err(SlabError::Pool)?;

        transaction(&mut pool, |tx| {
            let flags_offset = crate::class_table::record_new_page(tx, class_id, offset, perslab);
            class.bitmap.grow((class.pages.len() + 1) * perslab);
            class.install_new_page(offset, flags_offset);
            Ok(())
        })?;

        debug!(
            "class {} grew to {} pages ({} chunks each, {} bytes/page)",
            class.id,
            class.pages.len(),
            perslab,
            reserve_bytes,
        );
        Ok(())
    }

    /// Persists `slot`'s current flag byte against the page it lives on.
    fn persist_chunk_flag(&self, class: &crate::class::SlabClass, slot: u32) -> SlabResult<()> {
        let page_index = class.chunk(slot).page_index;
        let flags_offset = class.pages[page_index as usize].flags_offset;
        let local_slot = slot as usize % class.perslab;
        let flags = class.chunk(slot).flags;
        let mut pool = self.pool.lock().unwrap();
        transaction(&mut pool, |tx| {
            crate::class_table::persist_chunk_flag(tx, flags_offset, local_slot, flags);
            Ok(())
        })
    }

    /// Clears `class_id`, sets SLABBED, pushes onto the free-list head,
    /// decrements `requested`.
    pub fn free(&self, slot: u32, bytes: usize, id: u8) -> SlabResult<()> {
        let class_mutex = self.table.class(id).ok_or(SlabError::BadClass(id))?;
        let mut class = class_mutex.lock().unwrap();
        class.push_free(slot);
        class.requested = class.requested.saturating_sub(bytes);
        self.persist_chunk_flag(&class, slot)?;
        Ok(())
    }

    /// Marks a chunk LINKED and persists the flag, once the caller (the
    /// index, out of this crate's scope) has made the item reachable.
    pub fn mark_linked(&self, slot: u32, id: u8) -> SlabResult<()> {
        let class_mutex = self.table.class(id).ok_or(SlabError::BadClass(id))?;
        let mut class = class_mutex.lock().unwrap();
        class.chunk_mut(slot).flags.insert(crate::item::ItemFlags::LINKED);
        self.persist_chunk_flag(&class, slot)?;
        Ok(())
    }

    /// Clears LINKED and persists the flag, once the caller has unlinked
    /// the item from the index but before the chunk rejoins the free list.
    pub fn mark_unlinked(&self, slot: u32, id: u8) -> SlabResult<()> {
        let class_mutex = self.table.class(id).ok_or(SlabError::BadClass(id))?;
        let mut class = class_mutex.lock().unwrap();
        class.chunk_mut(slot).flags.remove(crate::item::ItemFlags::LINKED);
        self.persist_chunk_flag(&class, slot)?;
        Ok(())
    }

    pub fn adjust_requested(&self, id: u8, old: usize, new: usize) -> SlabResult<()> {
        let class_mutex = self.table.class(id).ok_or(SlabError::BadClass(id))?;
        let mut class = class_mutex.lock().unwrap();
        class.requested = class.requested.saturating_sub(old) + new;
        Ok(())
    }

    pub fn available_chunks(&self, id: u8) -> SlabResult<(usize, bool, usize)> {
        let class_mutex = self.table.class(id).ok_or(SlabError::BadClass(id))?;
        let class = class_mutex.lock().unwrap();
        let heap = self.heap.lock().unwrap();
        Ok((
            class.available_chunks(),
            heap.mem_limit_reached,
            class.total_chunks(),
        ))
    }

    pub fn touch(&self, id: u8, slot: u32) {
        if let Some(class_mutex) = self.table.class(id) {
            let mut class = class_mutex.lock().unwrap();
            class.bitmap.touch(slot as usize);
        }
    }

    /// Advances the clock hand and returns the victim slot, under the
    /// class lock.
    pub fn victim(&self, id: u8) -> SlabResult<u32> {
        let class_mutex = self.table.class(id).ok_or(SlabError::BadClass(id))?;
        let mut class = class_mutex.lock().unwrap();
        class
            .bitmap
            .victim()
            .map(|s| s as u32)
            .ok_or(SlabError::BadClass(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            memory_limit: 8 * 1024 * 1024,
            growth_factor: 1.25,
            prealloc: false,
            item_size_max: 64 * 1024,
            chunk_size: 48,
            pool_dir: dir.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn alloc_creates_exactly_one_page_on_first_call() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = Allocator::init(test_config(dir.path())).unwrap();
        let id = alloc.classid_for(100);
        let mut tracker = ActiveSlabTable::create(Pool::in_memory_for_test());
        let (_slot, _total) = alloc.alloc(100, id, &mut tracker, 1, 0).unwrap();
        let class = alloc.table.class(id).unwrap().lock().unwrap();
        assert_eq!(class.pages.len(), 1);
    }

    #[test]
    fn alloc_then_free_then_alloc_reuses_the_same_slot() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = Allocator::init(test_config(dir.path())).unwrap();
        let id = alloc.classid_for(100);
        let mut tracker = ActiveSlabTable::create(Pool::in_memory_for_test());
        let (slot1, _) = alloc.alloc(100, id, &mut tracker, 1, 0).unwrap();
        alloc.free(slot1, 100, id).unwrap();
        let (slot2, _) = alloc.alloc(100, id, &mut tracker, 2, 0).unwrap();
        assert_eq!(slot1, slot2);
    }

    #[test]
    fn classid_for_zero_bytes_is_bad_class() {
        let dir = tempfile::tempdir().unwrap();
        let alloc = Allocator::init(test_config(dir.path())).unwrap();
        assert_eq!(alloc.classid_for(0), 0);
        let mut tracker = ActiveSlabTable::create(Pool::in_memory_for_test());
        assert!(alloc.alloc(0, 0, &mut tracker, 1, 0).is_err());
    }
}

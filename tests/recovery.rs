//! Integration coverage for concrete scenario 5: recovering after a crash
//! simulated by dropping the process's in-memory state and reopening the
//! same on-disk pools, before the orphaned chunk was ever linked into the
//! index.

use pmemslab::config::Config;
use pmemslab::index::{BucketHandle, Index};
use pmemslab::pmem::Pool;
use pmemslab::recovery::recover;
use pmemslab::tracker::ActiveSlabTable;
use pmemslab::Allocator;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Default)]
struct TestIndex {
    members: Mutex<HashSet<usize>>,
}

impl TestIndex {
    fn link(&self, chunk_addr: usize) {
        self.members.lock().unwrap().insert(chunk_addr);
    }
}

impl Index for TestIndex {
    fn hash(&self, _key: &[u8]) -> BucketHandle {
        0
    }

    fn try_lock_bucket(&self, _bucket: BucketHandle) -> bool {
        true
    }

    fn unlock_bucket(&self, _bucket: BucketHandle) {}

    fn bucket_contains(&self, _bucket: BucketHandle, chunk_addr: usize) -> bool {
        self.members.lock().unwrap().contains(&chunk_addr)
    }

    fn unlink(&self, _bucket: BucketHandle, chunk_addr: usize) {
        self.members.lock().unwrap().remove(&chunk_addr);
    }
}

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        memory_limit: 4 * 1024 * 1024,
        growth_factor: 1.25,
        prealloc: false,
        item_size_max: 64 * 1024,
        chunk_size: 48,
        pool_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

/// Kills the process mid-`alloc` (scenario 5): the orphaned chunk never
/// reaches LINKED, then everything gets dropped and reopened from the same
/// on-disk pools, the way a real restart would reconstruct from the slab
/// pool and the thread's tracker pool.
#[test]
fn recovery_restores_orphaned_in_transit_chunk_across_a_real_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let tracker_path = config.tracker_pool_path(1);

    let id;
    let linked_slot;
    let orphan_slot;
    {
        let alloc = Allocator::init(config.clone()).unwrap();
        id = alloc.classid_for(100);
        let mut tracker =
            ActiveSlabTable::create(Pool::create_or_open(&tracker_path, "tracker", 1 << 20).unwrap());

        // A normal, successfully linked item: survives recovery untouched.
        let (slot, _) = alloc.alloc(100, id, &mut tracker, 1, 0).unwrap();
        linked_slot = slot;
        alloc.mark_linked(linked_slot, id).unwrap();

        // An item whose alloc crashed before the caller ever linked it into
        // the index: holds neither SLABBED nor LINKED.
        let (slot, _) = alloc.alloc(100, id, &mut tracker, 2, 0).unwrap();
        orphan_slot = slot;
        {
            let class_mutex = alloc.table.class(id).unwrap();
            let mut class = class_mutex.lock().unwrap();
            class.chunk_mut(orphan_slot).flags = pmemslab::item::ItemFlags::empty();
        }
        // alloc/pool/tracker all drop here, as if the process had died.
    }

    // Reopen: a fresh Allocator and a fresh tracker, both backed by the
    // same on-disk pools the first process wrote to.
    let alloc = Allocator::init(config).unwrap();
    let tracker =
        ActiveSlabTable::create(Pool::create_or_open(&tracker_path, "tracker", 1 << 20).unwrap());

    let page_count_before = alloc.table.class(id).unwrap().lock().unwrap().pages.len();
    assert!(page_count_before >= 1);

    let index = TestIndex::default();
    index.link(linked_slot as usize);

    let repaired = recover(&alloc, &tracker, &index);
    assert_eq!(repaired.len(), 1);
    assert_eq!(repaired[0].slot, orphan_slot);

    let class_mutex = alloc.table.class(id).unwrap();
    let class = class_mutex.lock().unwrap();
    assert!(class.chunk(orphan_slot).is_slabbed());
    assert!(class.chunk(linked_slot).is_linked());
    assert_eq!(class.pages.len(), page_count_before);

    assert!(index.bucket_contains(0, linked_slot as usize));
}

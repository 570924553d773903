//! Integration coverage for concrete scenario 4: the mover drains a whole
//! page from a source class and donates it to a destination class.

use pmemslab::config::Config;
use pmemslab::index::{BucketHandle, Index};
use pmemslab::rebalance::Rebalancer;
use pmemslab::pmem::Pool;
use pmemslab::tracker::ActiveSlabTable;
use pmemslab::{Allocator, ReassignResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct TestIndex {
    locked: Mutex<bool>,
    members: Mutex<HashSet<usize>>,
}

impl Index for TestIndex {
    fn hash(&self, _key: &[u8]) -> BucketHandle {
        0
    }

    fn try_lock_bucket(&self, _bucket: BucketHandle) -> bool {
        let mut locked = self.locked.lock().unwrap();
        if *locked {
            false
        } else {
            *locked = true;
            true
        }
    }

    fn unlock_bucket(&self, _bucket: BucketHandle) {
        *self.locked.lock().unwrap() = false;
    }

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
        item_size_max: 4096,
        chunk_size: 48,
        pool_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

#[test]
fn mover_completes_a_src_to_dst_page_transfer() {
    let dir = tempfile::tempdir().unwrap();
    let alloc = Arc::new(Allocator::init(test_config(dir.path())).unwrap());

    let src_id = 1u8;
    let dst_id = 2u8;
    assert_ne!(src_id, dst_id);

    let perslab = {
        let class = alloc.table.class(src_id).unwrap().lock().unwrap();
        class.perslab
    };

    // Force a second page in src by allocating one more chunk than one
    // page holds, then free everything so every chunk is SLABBED (on the
    // free list) rather than left in the unlinked limbo the mover ignores.
    let mut tracker = ActiveSlabTable::create(Pool::in_memory_for_test());
    let mut slots = Vec::new();
    for i in 0..=perslab {
        let (slot, _) = alloc
            .alloc(1, src_id, &mut tracker, i as u64 + 1, 0)
            .unwrap();
        slots.push(slot);
    }
    assert_eq!(alloc.table.class(src_id).unwrap().lock().unwrap().pages.len(), 2);
    for slot in slots {
        alloc.free(slot, 1, src_id).unwrap();
    }

    let dst_pages_before = alloc.table.class(dst_id).unwrap().lock().unwrap().pages.len();

    let rebalancer = Rebalancer::new(4);
    let index = Arc::new(TestIndex::default());

    let mover_alloc = alloc.clone();
    let mover_rebalancer = rebalancer.clone();
    let mover_index = index.clone();
    let handle = std::thread::spawn(move || {
        mover_rebalancer.run_mover(&mover_alloc, &*mover_index);
    });

    let result = rebalancer.signal_move(&alloc, src_id as i32, dst_id as i32);
    assert_eq!(result, ReassignResult::Ok);

    let mut waited = Duration::ZERO;
    loop {
        let src_pages = alloc.table.class(src_id).unwrap().lock().unwrap().pages.len();
        if src_pages == 1 || waited > Duration::from_secs(2) {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
        waited += Duration::from_millis(5);
    }

    assert_eq!(alloc.table.class(src_id).unwrap().lock().unwrap().pages.len(), 1);
    assert_eq!(
        alloc.table.class(dst_id).unwrap().lock().unwrap().pages.len(),
        dst_pages_before + 1
    );

    rebalancer.request_stop();
    handle.join().unwrap();
}

#[test]
fn signal_move_rejects_src_equal_to_dst() {
    let dir = tempfile::tempdir().unwrap();
    let alloc = Allocator::init(test_config(dir.path())).unwrap();
    let rebalancer = Rebalancer::new(1);
    assert_eq!(
        rebalancer.signal_move(&alloc, 3, 3),
        ReassignResult::SrcDstSame
    );
}

#[test]
fn signal_move_rejects_src_with_fewer_than_two_pages() {
    let dir = tempfile::tempdir().unwrap();
    let alloc = Allocator::init(test_config(dir.path())).unwrap();
    let rebalancer = Rebalancer::new(1);
    // class 1 owns zero pages at init; NoSpare since it can't supply a
    // page to drain.
    assert_eq!(
        rebalancer.signal_move(&alloc, 1, 2),
        ReassignResult::NoSpare
    );
}

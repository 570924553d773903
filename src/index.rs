//! Contract for the external string hash table (out of scope; this core
//! only depends on its shape). The mover needs to trylock a bucket and
//! unlink an item by key; the recovery scanner needs to test reachability
//! by walking a bucket chain for pointer equality.

/// An opaque handle a real hash table implementation would resolve to a
/// bucket; the core never interprets it beyond equality and locking.
pub type BucketHandle = u64;

pub trait Index {
    /// Hashes `key` to a bucket handle.
    fn hash(&self, key: &[u8]) -> BucketHandle;

    /// Attempts to lock the bucket without blocking. `false` means busy.
    fn try_lock_bucket(&self, bucket: BucketHandle) -> bool;

    fn unlock_bucket(&self, bucket: BucketHandle);

    /// Walks the bucket chain looking for a node whose payload pointer
    /// equals `chunk_addr`. Used by the recovery scanner to decide whether
    /// a non-SLABBED chunk is actually reachable.
    fn bucket_contains(&self, bucket: BucketHandle, chunk_addr: usize) -> bool;

    /// Removes the item at `chunk_addr` from the bucket chain. Called by
    /// the mover only after it holds the bucket lock and has confirmed the
    /// item is otherwise unreferenced (refcount == 2: one for the index,
    /// one for the mover's own probe).
    fn unlink(&self, bucket: BucketHandle, chunk_addr: usize);
}

/// A trivial in-process `Index` for tests: a `HashSet`-backed fake bucket
/// table keyed by a single handle (every key hashes to bucket 0). Good
/// enough to exercise the mover's and recovery scanner's control flow
/// without a real concurrent hash table.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeIndex {
        locked: Mutex<bool>,
        members: Mutex<HashSet<usize>>,
    }

    impl FakeIndex {
        pub fn link(&self, chunk_addr: usize) {
            self.members.lock().unwrap().insert(chunk_addr);
        }
    }

    impl Index for FakeIndex {
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
}

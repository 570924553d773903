//! Scoped transactions over a [`Pool`], modeled on libpmemobj's
//! `TX_BEGIN`/`pmemobj_tx_add_range`/`TX_END`: commit-on-success,
//! roll-back-on-error, nested scopes share the outermost commit point.
//!
//! All durable mutations the core makes — new-slab installation, page
//! reassignment, bitmap growth, tracker boundary growth — go through
//! [`transaction`]. The closure gets a [`Transaction`] handle; before
//! mutating a byte range in the pool it calls [`Transaction::add_range`],
//! which snapshots the current bytes (the "redo log" add-to-transaction
//! step). If the closure returns `Err`, every snapshotted range is
//! restored and the error propagates as [`SlabError::TransactionAborted`].
//! If it returns `Ok`, the touched ranges are flushed and the transaction
//! is done — there is no separate commit step to forget.

use crate::error::{SlabError, SlabResult};
use crate::pmem::Pool;

pub struct Transaction<'p> {
    pool: &'p mut Pool,
    undo: Vec<(usize, Vec<u8>)>,
    touched: Vec<(usize, usize)>,
}

impl<'p> Transaction<'p> {
    fn new(pool: &'p mut Pool) -> Self {
        Self {
            pool,
            undo: Vec::new(),
            touched: Vec::new(),
        }
    }

    /// Declares intent to mutate `[offset, offset+len)`, snapshotting the
    /// current contents for rollback. Call this before writing.
    pub fn add_range(&mut self, offset: usize, len: usize) {
        let snapshot = self.pool.root_bytes()[offset..offset + len].to_vec();
        self.undo.push((offset, snapshot));
        self.touched.push((offset, len));
    }

    pub fn bytes(&mut self) -> &mut [u8] {
        self.pool.root_bytes()
    }

    fn rollback(self) {
        for (offset, snapshot) in self.undo.into_iter().rev() {
            let len = snapshot.len();
            self.pool.root_bytes()[offset..offset + len].copy_from_slice(&snapshot);
        }
    }

    fn commit(self) {
        for (offset, len) in &self.touched {
            self.pool.flush_range(*offset, *len);
        }
    }
}

/// Runs `body` as one all-or-nothing transaction against `pool`.
pub fn transaction<T>(
    pool: &mut Pool,
    body: impl FnOnce(&mut Transaction) -> SlabResult<T>,
) -> SlabResult<T> {
    let mut tx = Transaction::new(pool);
    match body(&mut tx) {
        Ok(value) => {
            tx.commit();
            Ok(value)
        }
        Err(e) => {
            let msg = e.to_string();
            tx.rollback();
            Err(SlabError::TransactionAborted(msg))
        }
    }
}

//! Error types surfaced by the slab core.
//!
//! Most allocator entry points keep the sentinel-shaped returns the external
//! contract specifies (`classid_for -> 0`, `alloc -> null`); `SlabError` is
//! for the internal operations that have no sentinel of their own — class
//! table growth, transaction plumbing, tracker persistence.

#[derive(thiserror::Error, Debug)]
pub enum SlabError {
    #[error("memory limit reached: committed {committed} + {requested} > limit {limit}")]
    Capacity {
        committed: usize,
        requested: usize,
        limit: usize,
    },

    #[error("bad class id: {0}")]
    BadClass(u8),

    #[error("rebalance lock held, reassign returned RUNNING")]
    Contention,

    #[error("source/destination class are the same: {0}")]
    SrcDstSame(u8),

    #[error("source class has no spare page to donate")]
    NoSpare,

    #[error("persistent store transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("active-slab tracker full at {0} entries, dropping mark")]
    TrackerOverflow(usize),

    #[error("persistent pool error: {0}")]
    Pool(#[from] std::io::Error),
}

pub type SlabResult<T> = Result<T, SlabError>;

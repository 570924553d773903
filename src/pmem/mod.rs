//! Persistent-store adapter: the platform contract §6 requires (open-or-
//! create a pool, fetch its root, transact, close, delete) modeled as a
//! small Rust API rather than an FFI binding to an actual PMDK/libpmemobj
//! shared library — no such crate appears anywhere in the retrieval pack,
//! and fabricating a vendored binding would be worse than writing the real
//! mmap-based thing it wraps.

pub mod layout;
pub mod pool;
pub mod tx;

pub use pool::Pool;
pub use tx::{transaction, Transaction};

//! pmemslab: a crash-consistent slab allocator for an in-memory key/value
//! cache, backed by persistent memory, with epoch-based concurrent
//! reclamation of slab metadata.
//!
//! Sized chunks come from a fixed table of size classes (see
//! [`class_table`]), themselves built of pages drawn from a reserved heap
//! (see [`heap`]). Every slab-layout mutation — growing a class, freeing a
//! chunk, moving a page between classes — is wrapped in a [`pmem`]
//! transaction so a crash mid-procedure never leaves the free list or the
//! clock bitmap in a state recovery can't reconcile (see [`recovery`]), and
//! the page log and per-chunk flags those mutations touch live in the slab
//! pool's root bytes, so a reopened pool reconstructs the same class/page/
//! free-list shape a live process had. Per-thread [`tracker`]s record which
//! pages were recently touched, stamped with [`epoch`] values, bounding how
//! far the recovery scan has to look; their descriptor tables persist the
//! same way and reconstruct on reopen.
//!
//! What does *not* survive a restart: item payload bytes themselves. [`heap`]
//! backs chunk storage with anonymous memory, not the pool, so recovery can
//! only reconcile metadata (which chunks are free, linked, or orphaned) —
//! never the bytes an orphaned chunk held. That is consistent with scenario
//! 5's contract, which only asks that an interrupted alloc's chunk rejoin the
//! free list safely, not that its would-be payload survive.
//!
//! # Usage
//!
//! ```ignore
//! use pmemslab::{Allocator, Config};
//!
//! let alloc = Allocator::init(Config::default())?;
//! let class_id = alloc.classid_for(128);
//! ```

pub mod allocator;
pub mod class;
pub mod class_table;
pub mod clock;
pub mod config;
pub mod epoch;
pub mod error;
pub mod heap;
pub mod index;
pub mod item;
pub mod platform;
pub mod pmem;
pub mod rebalance;
pub mod recovery;
pub mod stats;
pub mod sync;
pub mod tracker;

pub use allocator::{Allocator, ReassignResult};
pub use config::Config;
pub use error::{SlabError, SlabResult};

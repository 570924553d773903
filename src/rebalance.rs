//! The rebalancer: a decider that samples eviction pressure per class, and
//! a mover that drains a whole page from a source class and donates it to
//! a destination class.
//!
//! Maps the coroutine-style C mover loop onto an explicit state machine
//! (`MoverState`) driven by a channel carrying `(src, dst)` work items, per
//! Design Notes. The decider and mover run as two `std::thread`s sharing a
//! `Mutex`/`Condvar` pair, matching the teacher crate's preference for
//! explicit OS threads over an async runtime (there is none in this stack).

use crate::allocator::{Allocator, ReassignResult};
use crate::index::Index;
use crate::item::CLASS_ID_TRANSIT;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoverState {
    Idle,
    Start,
    Scanning,
    Finish,
}

struct Signal {
    state: MoverState,
    src: i32,
    dst: i32,
}

pub struct Rebalancer {
    signal: Mutex<Signal>,
    condvar: Condvar,
    stop: std::sync::atomic::AtomicBool,
    slab_bulk_check: u32,
}

/// Per-class sample the decider keeps between ticks.
#[derive(Default)]
struct ClassSample {
    evictions_prev: u64,
    zero_evict_streak: u32,
    top_evictor_streak: u32,
}

impl Rebalancer {
    pub fn new(slab_bulk_check: u32) -> Arc<Self> {
        Arc::new(Self {
            signal: Mutex::new(Signal {
                state: MoverState::Idle,
                src: -1,
                dst: -1,
            }),
            condvar: Condvar::new(),
            stop: std::sync::atomic::AtomicBool::new(false),
            slab_bulk_check,
        })
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Signals the mover with a candidate pair. Validates eagerly (§4.4
    /// START) and returns the same result code `reassign` would.
    pub fn signal_move(&self, alloc: &Allocator, src: i32, dst: i32) -> ReassignResult {
        let guard = match alloc.rebalance_lock.try_lock() {
            Ok(g) => g,
            Err(_) => return ReassignResult::Running,
        };

        let mut signal = self.signal.lock().unwrap();
        if signal.state != MoverState::Idle {
            return ReassignResult::Running;
        }

        let num_classes = alloc.table.num_classes() as i32;
        if dst < 1 || dst > num_classes || (src != -1 && (src < 1 || src > num_classes)) {
            return ReassignResult::BadClass;
        }
        if src == dst {
            return ReassignResult::SrcDstSame;
        }

        let resolved_src = if src == -1 {
            (1..=num_classes)
                .find(|&c| c != dst && alloc.table.class(c as u8).is_some_and(|m| m.lock().unwrap().pages.len() >= 2))
        } else {
            Some(src)
        };

        let Some(resolved_src) = resolved_src else {
            return ReassignResult::NoSpare;
        };

        {
            let class = alloc.table.class(resolved_src as u8).unwrap().lock().unwrap();
            if class.pages.len() < 2 {
                return ReassignResult::NoSpare;
            }
        }

        signal.src = resolved_src;
        signal.dst = dst;
        signal.state = MoverState::Start;
        drop(guard);
        self.condvar.notify_all();
        ReassignResult::Ok
    }

    /// The mover's run loop: blocks on the condvar while idle, otherwise
    /// drives the state machine to completion for one (src, dst) pair at a
    /// time.
    pub fn run_mover<I: Index>(self: &Arc<Self>, alloc: &Allocator, index: &I) {
        loop {
            let (src, dst) = {
                let mut signal = self.signal.lock().unwrap();
                while signal.state == MoverState::Idle && !self.should_stop() {
                    signal = self.condvar.wait(signal).unwrap();
                }
                if self.should_stop() {
                    return;
                }
                (signal.src, signal.dst)
            };

            self.drive_mover(alloc, index, src as u8, dst as u8);

            let mut signal = self.signal.lock().unwrap();
            signal.state = MoverState::Idle;
            signal.src = -1;
            signal.dst = -1;
        }
    }

    fn drive_mover<I: Index>(&self, alloc: &Allocator, index: &I, src: u8, dst: u8) {
        let src_mutex = alloc.table.class(src).unwrap();
        let dst_mutex = alloc.table.class(dst).unwrap();

        let draining_page = {
            let mut src_class = src_mutex.lock().unwrap();
            let page_index = src_class.pages.len() - 1;
            src_class.killing = page_index + 1;
            page_index
        };

        loop {
            let mut busy_items = 0usize;
            let mut src_class = src_mutex.lock().unwrap();
            let perslab = src_class.perslab;
            let first_slot = draining_page * perslab;

            let mut checked = 0u32;
            let mut slot = first_slot as u32;
            while checked < self.slab_bulk_check && (slot as usize) < first_slot + perslab {
                let class_id = src_class.chunk(slot).class_id;
                if class_id == CLASS_ID_TRANSIT {
                    slot += 1;
                    checked += 1;
                    continue;
                }

                let is_slabbed = src_class.chunk(slot).is_slabbed();
                if is_slabbed {
                    src_class.unlink_free(slot);
                    let chunk = src_class.chunk_mut(slot);
                    chunk.mark_in_transit();
                } else if src_class.chunk(slot).is_linked() {
                    let bucket = index.hash(&[]); // key bytes owned by caller's item; opaque here
                    if index.try_lock_bucket(bucket) {
                        src_class.chunk_mut(slot).refcount += 1;
                        let still_linked = src_class.chunk(slot).is_linked();
                        if still_linked && src_class.chunk(slot).refcount == 2 {
                            drop(src_class);
                            index.unlink(bucket, slot as usize);
                            src_class = src_mutex.lock().unwrap();
                            let chunk = src_class.chunk_mut(slot);
                            chunk.mark_in_transit();
                        } else {
                            busy_items += 1;
                        }
                        index.unlock_bucket(bucket);
                    } else {
                        busy_items += 1;
                    }
                }

                slot += 1;
                checked += 1;
            }
            drop(src_class);

            if busy_items > 0 {
                std::thread::sleep(Duration::from_micros(50));
                continue;
            }
            break;
        }

        self.finish_move(alloc, &src_mutex, &dst_mutex, draining_page);
    }

    fn finish_move(
        &self,
        _alloc: &Allocator,
        src_mutex: &Mutex<crate::class::SlabClass>,
        dst_mutex: &Mutex<crate::class::SlabClass>,
        draining_page: usize,
    ) {
        let mut src_class = src_mutex.lock().unwrap();
        let mut dst_class = dst_mutex.lock().unwrap();

        let page = src_class.pages.swap_remove(draining_page);
        src_class.killing = 0;

        // Re-index the donated page into dst's numbering scheme (Open
        // Question 2): `install_new_page` rebuilds fresh chunk headers
        // sized for dst's perslab, since the page's byte size is fixed
        // (always `item_size_max`) but the chunk count per page differs
        // between src and dst. The page log isn't updated here (see
        // `crate::class::UNBACKED_FLAGS_OFFSET`), so a donated page's chunk
        // flags don't survive a restart until the mover is wired into it.
        dst_class
            .bitmap
            .grow((dst_class.pages.len() + 1) * dst_class.perslab);
        dst_class.install_new_page(page.base_offset, crate::class::UNBACKED_FLAGS_OFFSET);

        debug!(
            "rebalanced page from class {} to class {}",
            src_class.id, dst_class.id
        );
    }
}

/// Tracks per-class eviction deltas over 10s windows and signals the mover
/// once a source/destination pair agrees for three consecutive samples.
pub struct Decider {
    samples: Mutex<Vec<ClassSample>>,
    eviction_counters: Vec<AtomicU64>,
}

impl Decider {
    pub fn new(num_classes: usize) -> Self {
        Self {
            samples: Mutex::new((0..=num_classes).map(|_| ClassSample::default()).collect()),
            eviction_counters: (0..=num_classes).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn record_eviction(&self, class_id: u8) {
        if let Some(c) = self.eviction_counters.get(class_id as usize) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One decider tick: returns `Some((src, dst))` once both sides have
    /// three consecutive agreeing samples, else `None`.
    pub fn tick(&self, alloc: &Allocator) -> Option<(i32, i32)> {
        let mut samples = self.samples.lock().unwrap();
        let mut source_candidate = None;
        let mut highest_slab = None;
        let mut max_delta = 0u64;

        for id in 1..=alloc.table.num_classes() {
            let counter = &self.eviction_counters[id];
            let sample = &mut samples[id];
            let current = counter.load(Ordering::Relaxed);
            let delta = current.saturating_sub(sample.evictions_prev);
            sample.evictions_prev = current;

            let pages = alloc
                .table
                .class(id as u8)
                .map(|m| m.lock().unwrap().pages.len())
                .unwrap_or(0);

            if delta == 0 && pages >= 3 {
                sample.zero_evict_streak += 1;
                if sample.zero_evict_streak >= 3 {
                    source_candidate = Some(id as i32);
                }
            } else {
                sample.zero_evict_streak = 0;
            }

            if delta > max_delta {
                max_delta = delta;
                highest_slab = Some(id);
            }
        }

        // A class only becomes the destination candidate once it has been
        // this tick's top evictor for three consecutive ticks in a row,
        // mirroring slab_automove_decision's slab_winner/slab_wins.
        let mut dest_candidate = None;
        for id in 1..=alloc.table.num_classes() {
            let sample = &mut samples[id];
            if max_delta > 0 && highest_slab == Some(id) {
                sample.top_evictor_streak += 1;
                if sample.top_evictor_streak >= 3 {
                    dest_candidate = Some(id as i32);
                }
            } else {
                sample.top_evictor_streak = 0;
            }
        }

        match (source_candidate, dest_candidate) {
            (Some(src), Some(dst)) if src != dst => Some((src, dst)),
            _ => None,
        }
    }

    pub fn run<I: Index>(
        self: Arc<Self>,
        alloc: Arc<Allocator>,
        rebalancer: Arc<Rebalancer>,
        index: Arc<I>,
        stop: Arc<std::sync::atomic::AtomicBool>,
    ) where
        I: Send + Sync + 'static,
    {
        let _ = &index;
        while !stop.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_secs(10));
            if let Some((src, dst)) = self.tick(&alloc) {
                match rebalancer.signal_move(&alloc, src, dst) {
                    ReassignResult::Ok => {}
                    other => warn!("decider's candidate pair ({src},{dst}) rejected: {other:?}"),
                }
            }
        }
    }
}

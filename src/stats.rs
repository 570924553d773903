//! Stats surface: per-class counters plus the text key/value dump described
//! in the external interfaces.
//!
//! Counters use `Relaxed` ordering, same rationale as the teacher crate's
//! stats module: they're observational, the class locks already provide the
//! ordering that matters for correctness.

use crate::class_table::ClassTable;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-class counters not already captured on `SlabClass` itself (which
/// only tracks structural state: pages, free list, requested bytes).
#[derive(Default)]
pub struct ClassStats {
    pub get_hits: AtomicU64,
    pub cmd_set: AtomicU64,
    pub delete_hits: AtomicU64,
    pub incr_hits: AtomicU64,
    pub decr_hits: AtomicU64,
    pub cas_hits: AtomicU64,
    pub cas_badval: AtomicU64,
    pub touch_hits: AtomicU64,
}

/// Receives one key/value pair at a time; the out-of-scope text/binary
/// protocol front-end supplies the real implementation. A `Vec` works for
/// tests and for callers that just want the whole dump at once.
pub trait StatsAppender {
    fn add_stat(&mut self, key: &str, value: String);
}

impl StatsAppender for Vec<(String, String)> {
    fn add_stat(&mut self, key: &str, value: String) {
        self.push((key.to_string(), value));
    }
}

/// Emits the per-class and terminal stat lines described in the external
/// interfaces. `class_stats` supplies the per-command hit counters indexed
/// by class id; classes with no pages are skipped.
pub fn emit<A: StatsAppender>(
    table: &ClassTable,
    class_stats: &[ClassStats],
    total_malloced: usize,
    appender: &mut A,
) {
    let mut active_slabs = 0u64;

    for id in 1..=table.largest_active_class {
        let class = table.class(id).unwrap().lock().unwrap();
        if class.pages.is_empty() {
            continue;
        }
        active_slabs += 1;

        let prefix = format!("{id}:");
        let total_chunks = class.total_chunks();
        let used_chunks = total_chunks - class.free_list_len;
        appender.add_stat(&format!("{prefix}chunk_size"), class.chunk_size.to_string());
        appender.add_stat(&format!("{prefix}chunks_per_page"), class.perslab.to_string());
        appender.add_stat(&format!("{prefix}total_pages"), class.pages.len().to_string());
        appender.add_stat(&format!("{prefix}total_chunks"), total_chunks.to_string());
        appender.add_stat(&format!("{prefix}used_chunks"), used_chunks.to_string());
        appender.add_stat(&format!("{prefix}free_chunks"), class.free_list_len.to_string());
        appender.add_stat(&format!("{prefix}free_chunks_end"), "0".to_string());
        appender.add_stat(&format!("{prefix}mem_requested"), class.requested.to_string());

        if let Some(cs) = class_stats.get(id as usize) {
            appender.add_stat(&format!("{prefix}get_hits"), cs.get_hits.load(Ordering::Relaxed).to_string());
            appender.add_stat(&format!("{prefix}cmd_set"), cs.cmd_set.load(Ordering::Relaxed).to_string());
            appender.add_stat(&format!("{prefix}delete_hits"), cs.delete_hits.load(Ordering::Relaxed).to_string());
            appender.add_stat(&format!("{prefix}incr_hits"), cs.incr_hits.load(Ordering::Relaxed).to_string());
            appender.add_stat(&format!("{prefix}decr_hits"), cs.decr_hits.load(Ordering::Relaxed).to_string());
            appender.add_stat(&format!("{prefix}cas_hits"), cs.cas_hits.load(Ordering::Relaxed).to_string());
            appender.add_stat(&format!("{prefix}cas_badval"), cs.cas_badval.load(Ordering::Relaxed).to_string());
            appender.add_stat(&format!("{prefix}touch_hits"), cs.touch_hits.load(Ordering::Relaxed).to_string());
        }
    }

    appender.add_stat("active_slabs", active_slabs.to_string());
    appender.add_stat("total_malloced", total_malloced.to_string());
}

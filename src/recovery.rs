//! Startup recovery scan (§4.5): walks every tracker pool's non-null
//! entries and reconciles each referenced page's chunks against the index,
//! repairing whatever a crash mid-procedure could have left inconsistent.
//!
//! Grounded on `active_slabs.cpp`'s `clear_buffer`/`mark_slab` persist
//! protocol: a tracker entry names a page that was being allocated,
//! unlinked, or moved at some point, and recovery must decide whether that
//! page's chunks ended up SLABBED (safe to leave in the free list) or
//! LINKED (safe to leave live), or whether it needs repair because neither
//! holds.

use crate::allocator::Allocator;
use crate::index::Index;
use crate::tracker::ActiveSlabTable;
use log::warn;

/// One page found inconsistent and repaired, for the caller's diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct RepairedChunk {
    pub class_id: u8,
    pub slot: u32,
}

/// Scans every descriptor in `tracker`, reconciling chunks in the page it
/// names against `index`. Chunks that are neither reachable through the
/// index nor already on the free list are spliced back onto the free list
/// — the only safe default, since a crash can only have interrupted an
/// alloc or unlink, never fabricated a live item out of nothing.
///
/// Returns the chunks it had to repair.
pub fn recover<I: Index>(alloc: &Allocator, tracker: &ActiveSlabTable, index: &I) -> Vec<RepairedChunk> {
    let mut repaired = Vec::new();

    for descriptor in tracker.entries() {
        let Some((class_id, page_index)) = descriptor.page else {
            continue;
        };

        let Some(class_mutex) = alloc.table.class(class_id) else {
            // The tracker names a class that no longer exists in this
            // table (e.g. config shrank MAX_NUMBER_OF_SLAB_CLASSES between
            // runs). Nothing to reconcile; drop with a diagnostic.
            warn!(
                "recovery: tracker entry names unknown class {class_id}, dropping"
            );
            continue;
        };

        let mut class = class_mutex.lock().unwrap();
        if page_index as usize >= class.pages.len() {
            warn!(
                "recovery: tracker entry names page {page_index} past class {class_id}'s extent, dropping"
            );
            continue;
        }

        let perslab = class.perslab;
        let first_slot = page_index as usize * perslab;
        for offset in 0..perslab {
            let slot = (first_slot + offset) as u32;
            let chunk = class.chunk(slot);

            if chunk.class_id != class_id {
                // Open Question 3: a chunk's recorded class_id disagrees
                // with the page it physically lives on (a reassignment was
                // interrupted mid-flight). Drop the stale tracker view of
                // this chunk rather than guess which side is current.
                warn!(
                    "recovery: chunk at class {class_id} slot {slot} claims class {}, dropping",
                    chunk.class_id
                );
                continue;
            }

            if chunk.is_slabbed() || chunk.is_linked() {
                // Already in a consistent state; nothing to repair. A
                // SLABBED chunk is assumed to already be on the free list
                // since `install_new_page`/`push_free` are the only
                // writers of that flag and both update the list in the
                // same transaction.
                continue;
            }

            // Neither flag holds: this chunk was mid-transit when the
            // crash happened (mover's SCANNING state, or an alloc that
            // popped the free list but never reached LINKED). The index is
            // the source of truth for whether it's actually live.
            let bucket = index.hash(&[]);
            let is_live = index.bucket_contains(bucket, slot as usize);
            if is_live {
                class.chunk_mut(slot).flags.insert(crate::item::ItemFlags::LINKED);
            } else {
                // push_free overwrites prev/next/flags unconditionally, so
                // it's safe to call here whether or not the chunk was ever
                // actually threaded into the list before the crash.
                class.push_free(slot);
                repaired.push(RepairedChunk { class_id, slot });
            }
        }
    }

    repaired
}

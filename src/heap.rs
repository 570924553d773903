//! Global heap header and memory reservation.
//!
//! Two reservation strategies, selected by `Config::prealloc`: a bump
//! pointer into one big anonymous mapping reserved at init (`platform.rs`),
//! or on-demand persistent allocations against the slab pool, one page at a
//! time, up to `memory_limit`. Either way, `Heap` is the single owner of
//! "how many bytes are committed" — the class table consults it, never
//! tracks its own global total.

use crate::config::Config;
use crate::platform;
use std::io;

enum Reservation {
    Bump {
        base: *mut u8,
        size: usize,
        offset: usize,
    },
    OnDemand,
}

unsafe impl Send for Reservation {}

pub struct Heap {
    pub memory_limit: usize,
    pub committed: usize,
    pub mem_limit_reached: bool,
    pub largest_active_class: u8,
    reservation: Reservation,
}

impl Heap {
    pub fn init(config: &Config) -> io::Result<Self> {
        let reservation = if config.prealloc && config.memory_limit > 0 {
            let base = unsafe { platform::page_alloc(config.memory_limit)? };
            Reservation::Bump {
                base,
                size: config.memory_limit,
                offset: 0,
            }
        } else {
            Reservation::OnDemand
        };

        Ok(Self {
            memory_limit: config.memory_limit,
            committed: Config::initial_malloc_seed(),
            mem_limit_reached: false,
            largest_active_class: 0,
            reservation,
        })
    }

    /// True if committing one more `item_size_max`-sized page would exceed
    /// the limit. `memory_limit == 0` means unlimited.
    pub fn would_exceed(&self, item_size_max: usize) -> bool {
        self.memory_limit != 0 && self.committed + item_size_max > self.memory_limit
    }

    /// Reserves `item_size_max` bytes for a new page: either bumps the
    /// pre-reserved region forward, or asks the OS for a fresh anonymous
    /// mapping (in lieu of a true on-demand persistent allocation, which
    /// would instead carve from the open slab `Pool`).
    pub fn reserve_page(&mut self, item_size_max: usize) -> io::Result<usize> {
        match &mut self.reservation {
            Reservation::Bump { size, offset, .. } => {
                if *offset + item_size_max > *size {
                    return Err(io::Error::new(
                        io::ErrorKind::OutOfMemory,
                        "bump region exhausted",
                    ));
                }
                let at = *offset;
                *offset += item_size_max;
                self.committed += item_size_max;
                Ok(at)
            }
            Reservation::OnDemand => {
                // Each on-demand page is its own anonymous mapping,
                // addressed by an opaque offset handle understood only by
                // `page_base`.
                let base = unsafe { platform::page_alloc(item_size_max)? };
                self.committed += item_size_max;
                Ok(base as usize)
            }
        }
    }

    /// Advances committed-bytes accounting (and, in `Bump` mode, the bump
    /// offset) to reflect pages reinstalled from a reopened pool's page log.
    /// Those pages' `base_offset`s are replayed as-is from the log; this
    /// only keeps `would_exceed`'s budget math and future `reserve_page`
    /// calls consistent with what's already considered reserved.
    pub fn restore_committed(&mut self, bytes: usize) {
        self.committed += bytes;
        if let Reservation::Bump { offset, .. } = &mut self.reservation {
            *offset += bytes;
        }
    }

    /// Resolves an offset handle returned by `reserve_page` back to a base
    /// pointer into the reservation.
    ///
    /// # Safety
    /// `offset` must have been returned by `reserve_page` on this `Heap`.
    pub unsafe fn page_base(&self, offset: usize) -> *mut u8 {
        match &self.reservation {
            Reservation::Bump { base, .. } => unsafe { base.add(offset) },
            Reservation::OnDemand => offset as *mut u8,
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Reservation::Bump { base, size, .. } = &self.reservation {
            unsafe { platform::page_dealloc(*base, *size) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prealloc_bump_reservation_advances_offset() {
        let config = Config {
            memory_limit: 4096 * 4,
            prealloc: true,
            ..Config::default()
        };
        let mut heap = Heap::init(&config).unwrap();
        let a = heap.reserve_page(4096).unwrap();
        let b = heap.reserve_page(4096).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 4096);
        assert_eq!(heap.committed, 8192);
    }

    #[test]
    fn would_exceed_respects_zero_as_unlimited() {
        let config = Config {
            memory_limit: 0,
            ..Config::default()
        };
        let heap = Heap::init(&config).unwrap();
        assert!(!heap.would_exceed(usize::MAX / 2));
    }
}

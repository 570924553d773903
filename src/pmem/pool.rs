//! A persistent, memory-mapped pool: the Rust-side stand-in for a PMDK
//! `pmemobj` pool (`pmemobj_create`/`pmemobj_open`, `POBJ_ROOT`).
//!
//! Every durable structure this core owns — the slab pool, each thread's
//! tracker — lives behind one of these. The mapping is backed by a regular
//! file via `mmap`, sized up front; on real persistent memory the same
//! `mmap` call lands directly on NVDIMM-backed pages, which is why PMDK
//! itself is just a very disciplined `mmap` wrapper. Durability here is
//! approximated with `msync` the way PMDK falls back to `msync` on a
//! non-pmem-aware filesystem.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

pub struct Pool {
    path: PathBuf,
    layout: &'static str,
    base: *mut u8,
    len: usize,
    created_fresh: bool,
}

unsafe impl Send for Pool {}

impl Pool {
    /// Opens `path` if it exists with the expected layout already written,
    /// else creates and zero-initializes a new pool of `size` bytes.
    /// Mirrors `allocate_ast`/`pmemobj_create`'s open-or-create branch.
    pub fn create_or_open(path: &Path, layout: &'static str, size: usize) -> io::Result<Self> {
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if is_new {
            file.set_len(size as u64)?;
        }
        let len = file.metadata()?.len() as usize;

        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        if is_new {
            unsafe { std::ptr::write_bytes(base as *mut u8, 0, len) };
            let mut pool = Self {
                path: path.to_path_buf(),
                layout,
                base: base as *mut u8,
                len,
                created_fresh: true,
            };
            pool.flush_all();
            write_layout_tag(&mut pool);
            Ok(pool)
        } else {
            Ok(Self {
                path: path.to_path_buf(),
                layout,
                base: base as *mut u8,
                len,
                created_fresh: false,
            })
        }
    }

    /// True if this call created the pool's backing file; false if it
    /// reopened one that already existed. Callers that reconstruct dynamic
    /// state from `root_bytes` use this to decide whether there is anything
    /// to reconstruct.
    pub fn created_fresh(&self) -> bool {
        self.created_fresh
    }

    /// An unbacked pool for unit tests that don't want to touch the
    /// filesystem — a plain heap buffer standing in for the mapping.
    #[cfg(test)]
    pub fn in_memory_for_test() -> Self {
        let len = 1 << 20;
        let layout: Box<[u8]> = vec![0u8; len].into_boxed_slice();
        let base = Box::into_raw(layout) as *mut u8;
        Self {
            path: PathBuf::new(),
            layout: "test",
            base,
            len,
            created_fresh: true,
        }
    }

    pub fn layout(&self) -> &'static str {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Raw root bytes, past the reserved layout-tag header.
    pub fn root_bytes(&mut self) -> &mut [u8] {
        let header = layout_header_len();
        unsafe { std::slice::from_raw_parts_mut(self.base.add(header), self.len - header) }
    }

    /// Flush a byte range durably. Approximated with `msync`; a real
    /// libpmemobj binding would use `pmem_persist` directly on NVDIMM.
    pub fn flush_range(&self, offset: usize, len: usize) {
        if self.path.as_os_str().is_empty() {
            return; // in-memory test pool, nothing to sync
        }
        let page = page_align_down(offset);
        let extent = (offset + len) - page;
        unsafe {
            libc::msync(
                self.base.add(page) as *mut libc::c_void,
                extent,
                libc::MS_SYNC,
            );
        }
    }

    pub fn flush_all(&self) {
        self.flush_range(0, self.len);
    }

    /// Closes and removes the pool file, mirroring
    /// `destroy_active_slab_table`'s `pmemobj_close` + `remove`.
    pub fn destroy(self) -> io::Result<()> {
        let path = self.path.clone();
        drop(self);
        if !path.as_os_str().is_empty() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if self.path.as_os_str().is_empty() {
            unsafe {
                drop(Box::from_raw(std::slice::from_raw_parts_mut(
                    self.base, self.len,
                )));
            }
        } else {
            unsafe {
                libc::munmap(self.base as *mut libc::c_void, self.len);
            }
        }
    }
}

fn layout_header_len() -> usize {
    64
}

fn write_layout_tag(pool: &mut Pool) {
    let tag = pool.layout.as_bytes();
    let n = tag.len().min(layout_header_len());
    unsafe {
        std::ptr::copy_nonoverlapping(tag.as_ptr(), pool.base, n);
    }
    pool.flush_range(0, layout_header_len());
}

fn page_align_down(offset: usize) -> usize {
    let page = 4096;
    offset - (offset % page)
}

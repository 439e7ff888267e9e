//! Read-only file mapping with region reuse.
//!
//! [`MappedFile::map_region`] hands out buffers that view a file through
//! `mmap`. Regions stay mapped while any buffer views them and are looked up
//! again for later requests that fall inside them, so sequential small reads
//! share one mapping instead of each costing a fresh page-aligned mapping.

use super::{MemorySegment, MemoryType};
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use rustix::fd::OwnedFd;
use rustix::fs::{Mode, OFlags};
use rustix::mm::{MapFlags, ProtFlags};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Default minimum mapping size.
pub const DEFAULT_MAP_BLOCK: usize = 64 * 1024;

struct FileInner {
    fd: OwnedFd,
    path: PathBuf,
    len: u64,
    page_size: u64,
    /// Live regions keyed by file offset.
    regions: Mutex<BTreeMap<u64, Weak<MappedRegion>>>,
    maps_created: AtomicU64,
}

/// One live `mmap` of part of a file.
struct MappedRegion {
    file: Arc<FileInner>,
    ptr: NonNull<u8>,
    offset: u64,
    len: usize,
}

// SAFETY: the mapping is read-only and lives until Drop unmaps it.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MemorySegment for MappedRegion {
    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&self) -> Option<*mut u8> {
        None
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::MappedFile
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        {
            let mut regions = self.file.regions.lock();
            if regions
                .get(&self.offset)
                .is_some_and(|w| w.strong_count() == 0)
            {
                regions.remove(&self.offset);
            }
        }
        // SAFETY: ptr/len describe a mapping created in MappedFile::map.
        if let Err(err) = unsafe { rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len) } {
            tracing::warn!(path = %self.file.path.display(), %err, "munmap failed");
        }
    }
}

/// A file opened for zero-copy region mapping.
#[derive(Clone)]
pub struct MappedFile {
    inner: Arc<FileInner>,
    block_size: usize,
}

impl MappedFile {
    /// Open `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fd = rustix::fs::open(path, OFlags::RDONLY | OFlags::CLOEXEC, Mode::empty())?;
        let stat = rustix::fs::fstat(&fd)?;
        let len = u64::try_from(stat.st_size)
            .map_err(|_| Error::InvalidSegment("negative file size".into()))?;
        let page_size = rustix::param::page_size() as u64;
        Ok(Self {
            inner: Arc::new(FileInner {
                fd,
                path: path.to_path_buf(),
                len,
                page_size,
                regions: Mutex::new(BTreeMap::new()),
                maps_created: AtomicU64::new(0),
            }),
            block_size: DEFAULT_MAP_BLOCK,
        })
    }

    /// Map at least `block_size` bytes per new mapping.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// File length in bytes.
    pub fn len(&self) -> u64 {
        self.inner.len
    }

    /// True for an empty file.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Number of `mmap` calls made so far.
    pub fn mappings_created(&self) -> u64 {
        self.inner.maps_created.load(Ordering::Relaxed)
    }

    /// Number of regions currently mapped.
    pub fn live_regions(&self) -> usize {
        self.inner
            .regions
            .lock()
            .values()
            .filter(|w| w.strong_count() > 0)
            .count()
    }

    /// Buffer viewing bytes `[offset, offset + size)` of the file.
    ///
    /// Reuses a live region containing the range when one exists. Otherwise
    /// maps a page-aligned region around the range, at least `block_size`
    /// long, and returns a view into it.
    pub fn map_region(&self, offset: u64, size: usize) -> Result<Buffer> {
        let end = offset
            .checked_add(size as u64)
            .filter(|&end| end <= self.inner.len)
            .ok_or(Error::OutOfBounds {
                offset: offset as usize,
                size,
                len: self.inner.len as usize,
            })?;
        if size == 0 {
            return Err(Error::InvalidSegment("zero-sized mapping".into()));
        }

        if let Some(region) = self.find_region(offset, end) {
            return view(region, offset, size);
        }

        let page = self.inner.page_size;
        let start = offset - offset % page;
        let wanted = (end - start).max(self.block_size as u64);
        let map_end = (start + wanted).next_multiple_of(page).min(self.inner.len);
        let region = self.map(start, (map_end - start) as usize)?;
        view(region, offset, size)
    }

    fn find_region(&self, offset: u64, end: u64) -> Option<Arc<MappedRegion>> {
        // Upgraded handles must drop after the lock is released; a last
        // reference dropping here runs MappedRegion::drop, which locks again.
        let candidates: Vec<Arc<MappedRegion>> = {
            let regions = self.inner.regions.lock();
            regions
                .range(..=offset)
                .rev()
                .filter_map(|(_, weak)| weak.upgrade())
                .collect()
        };
        candidates
            .into_iter()
            .find(|r| r.offset + r.len as u64 >= end)
    }

    fn map(&self, offset: u64, len: usize) -> Result<Arc<MappedRegion>> {
        // SAFETY: fresh read-only shared mapping of a range inside the file.
        let ptr = unsafe {
            rustix::mm::mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ,
                MapFlags::SHARED,
                &self.inner.fd,
                offset,
            )?
        };
        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| Error::AllocationFailed("mmap returned null".into()))?;
        self.inner.maps_created.fetch_add(1, Ordering::Relaxed);

        let region = Arc::new(MappedRegion {
            file: self.inner.clone(),
            ptr,
            offset,
            len,
        });
        self.inner
            .regions
            .lock()
            .insert(offset, Arc::downgrade(&region));
        Ok(region)
    }
}

fn view(region: Arc<MappedRegion>, offset: u64, size: usize) -> Result<Buffer> {
    let rel = (offset - region.offset) as usize;
    let whole = Buffer::from_segment(region);
    if rel == 0 && size == whole.len() {
        return Ok(whole);
    }
    whole.create_sub(rel, size)
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.inner.path)
            .field("len", &self.inner.len)
            .field("block_size", &self.block_size)
            .finish()
    }
}

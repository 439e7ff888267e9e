//! Fixed-size buffer pool.
//!
//! Buffers handed out by a [`BufferPool`] are views into one slot of a
//! shared allocation. The slot goes back to the pool when the last buffer
//! (or sub-buffer) viewing it is dropped, so a slot is returned exactly once
//! no matter how many handles shared it.

use super::{AtomicBitmap, HeapSegment, MemorySegment, MemoryType};
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::observability::metrics;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Statistics about pool usage.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total slots in the pool.
    pub capacity: usize,
    /// Currently free slots.
    pub available: usize,
    /// Slots currently loaned out.
    pub in_use: usize,
    /// Total number of acquisitions.
    pub acquisitions: u64,
    /// Acquisitions that had to wait for a slot.
    pub waits: u64,
    /// Slots returned to the pool.
    pub releases: u64,
}

struct PoolInner {
    name: String,
    backing: HeapSegment,
    slot_size: usize,
    bitmap: AtomicBitmap,
    acquisitions: AtomicU64,
    waits: AtomicU64,
    releases: AtomicU64,
    lock: Mutex<()>,
    returned: Condvar,
}

impl PoolInner {
    fn release(&self, slot: usize) {
        if !self.bitmap.release_slot(slot) {
            tracing::error!(pool = %self.name, slot, "pool slot released twice");
            return;
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
        metrics::record_pool_available(&self.name, self.bitmap.count_free());
        let _guard = self.lock.lock();
        self.returned.notify_one();
    }
}

/// One loaned slot; returns itself to the pool on drop.
struct PoolSlot {
    pool: Arc<PoolInner>,
    index: usize,
}

impl MemorySegment for PoolSlot {
    fn as_ptr(&self) -> *const u8 {
        // SAFETY: index < capacity, so the slot lies inside the backing segment.
        unsafe { self.pool.backing.as_ptr().add(self.index * self.pool.slot_size) }
    }

    fn as_mut_ptr(&self) -> Option<*mut u8> {
        Some(self.as_ptr() as *mut u8)
    }

    fn len(&self) -> usize {
        self.pool.slot_size
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Pooled
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}

/// A pool of equally sized, reusable buffers.
///
/// ```rust
/// use padflow::memory::BufferPool;
///
/// let pool = BufferPool::new("frames", 4096, 2).unwrap();
/// let a = pool.try_acquire().unwrap();
/// let _b = pool.try_acquire().unwrap();
/// assert!(pool.try_acquire().is_none());
///
/// drop(a);
/// assert_eq!(pool.available(), 1);
/// ```
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool of `slot_count` slots of `slot_size` bytes.
    pub fn new(name: &str, slot_size: usize, slot_count: usize) -> Result<Self> {
        if slot_size == 0 || slot_count == 0 {
            return Err(Error::AllocationFailed(
                "pool needs a non-zero slot size and count".into(),
            ));
        }
        let total = slot_size
            .checked_mul(slot_count)
            .ok_or_else(|| Error::AllocationFailed("pool size overflows".into()))?;
        let backing = HeapSegment::new(total)?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                name: name.to_string(),
                backing,
                slot_size,
                bitmap: AtomicBitmap::new(slot_count),
                acquisitions: AtomicU64::new(0),
                waits: AtomicU64::new(0),
                releases: AtomicU64::new(0),
                lock: Mutex::new(()),
                returned: Condvar::new(),
            }),
        })
    }

    /// Take a free slot without blocking.
    pub fn try_acquire(&self) -> Option<Buffer> {
        let index = self.inner.bitmap.acquire_slot()?;
        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
        metrics::record_pool_available(&self.inner.name, self.inner.bitmap.count_free());
        let slot = PoolSlot {
            pool: self.inner.clone(),
            index,
        };
        Some(Buffer::from_segment(Arc::new(slot)))
    }

    /// Take a free slot, blocking until one is returned.
    pub fn acquire(&self) -> Buffer {
        if let Some(buffer) = self.try_acquire() {
            return buffer;
        }
        self.inner.waits.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.inner.lock.lock();
        loop {
            if let Some(buffer) = self.try_acquire() {
                return buffer;
            }
            self.inner.returned.wait(&mut guard);
        }
    }

    /// Take a free slot, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no slot came back in time.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Buffer> {
        if let Some(buffer) = self.try_acquire() {
            return Ok(buffer);
        }
        self.inner.waits.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.lock.lock();
        loop {
            if let Some(buffer) = self.try_acquire() {
                return Ok(buffer);
            }
            if self
                .inner
                .returned
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.try_acquire().ok_or(Error::PoolExhausted);
            }
        }
    }

    /// Size of each slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.inner.slot_size
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.inner.bitmap.capacity()
    }

    /// Number of free slots.
    pub fn available(&self) -> usize {
        self.inner.bitmap.count_free()
    }

    /// Usage counters.
    pub fn stats(&self) -> PoolStats {
        let capacity = self.capacity();
        let available = self.available();
        PoolStats {
            capacity,
            available,
            in_use: capacity - available,
            acquisitions: self.inner.acquisitions.load(Ordering::Relaxed),
            waits: self.inner.waits.load(Ordering::Relaxed),
            releases: self.inner.releases.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("slot_size", &self.inner.slot_size)
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_zero_sized_pool_rejected() {
        assert!(BufferPool::new("p", 0, 4).is_err());
        assert!(BufferPool::new("p", 64, 0).is_err());
    }

    #[test]
    fn test_slots_do_not_overlap() {
        let pool = BufferPool::new("p", 8, 2).unwrap();
        let mut a = pool.try_acquire().unwrap();
        let mut b = pool.try_acquire().unwrap();
        a.as_mut_bytes().unwrap().fill(0xAA);
        b.as_mut_bytes().unwrap().fill(0xBB);
        assert!(a.as_bytes().iter().all(|&x| x == 0xAA));
        assert!(b.as_bytes().iter().all(|&x| x == 0xBB));
        assert_eq!(a.memory_type(), MemoryType::Pooled);
    }

    #[test]
    fn test_sub_buffer_keeps_slot_loaned() {
        let pool = BufferPool::new("p", 16, 1).unwrap();
        let parent = pool.try_acquire().unwrap();
        let sub = parent.create_sub(4, 4).unwrap();

        drop(parent);
        assert_eq!(pool.available(), 0);

        drop(sub);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.stats().releases, 1);
    }

    #[test]
    fn test_acquire_timeout_exhausted() {
        let pool = BufferPool::new("p", 16, 1).unwrap();
        let _held = pool.try_acquire().unwrap();
        let err = pool.acquire_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, Error::PoolExhausted));
    }

    #[test]
    fn test_blocking_acquire_wakes_on_release() {
        let pool = BufferPool::new("p", 16, 1).unwrap();
        let held = pool.try_acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire().len())
        };
        thread::sleep(Duration::from_millis(30));
        drop(held);

        assert_eq!(waiter.join().unwrap(), 16);
        let stats = pool.stats();
        assert_eq!(stats.waits, 1);
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.available, 1);
    }
}

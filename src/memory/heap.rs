//! Heap-backed memory segment.

use super::{MemorySegment, MemoryType};
use crate::error::{Error, Result};
use std::ptr::NonNull;

/// A memory segment owning a heap allocation.
///
/// ```rust
/// use padflow::memory::{HeapSegment, MemorySegment};
///
/// let segment = HeapSegment::new(1024).unwrap();
/// assert_eq!(segment.len(), 1024);
/// ```
pub struct HeapSegment {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the allocation is uniquely owned by the segment; concurrent access
// is coordinated by the buffers viewing it.
unsafe impl Send for HeapSegment {}
unsafe impl Sync for HeapSegment {}

impl HeapSegment {
    /// Allocate `size` zeroed bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if size is 0.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::AllocationFailed(
                "size must be greater than 0".into(),
            ));
        }
        Ok(Self::from_vec(vec![0u8; size]))
    }

    /// Take ownership of existing bytes without copying.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let boxed = data.into_boxed_slice();
        let len = boxed.len();
        let raw = Box::into_raw(boxed) as *mut u8;
        // SAFETY: Box::into_raw never returns null, even for empty slices.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        Self { ptr, len }
    }
}

impl Drop for HeapSegment {
    fn drop(&mut self) {
        let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        // SAFETY: ptr/len came from Box::into_raw in from_vec.
        drop(unsafe { Box::from_raw(slice) });
    }
}

impl MemorySegment for HeapSegment {
    fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    fn as_mut_ptr(&self) -> Option<*mut u8> {
        Some(self.ptr.as_ptr())
    }

    fn len(&self) -> usize {
        self.len
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert!(HeapSegment::new(0).is_err());
    }

    #[test]
    fn test_from_vec_keeps_bytes() {
        let seg = HeapSegment::from_vec(b"abc".to_vec());
        assert_eq!(seg.len(), 3);
        let bytes = unsafe { std::slice::from_raw_parts(seg.as_ptr(), seg.len()) };
        assert_eq!(bytes, b"abc");
        assert_eq!(seg.memory_type(), MemoryType::Heap);
    }

    #[test]
    fn test_empty_vec() {
        let seg = HeapSegment::from_vec(Vec::new());
        assert!(seg.is_empty());
    }
}

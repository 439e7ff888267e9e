//! Memory segment trait and types.

/// Type of memory backing a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryType {
    /// Private heap allocation.
    Heap,
    /// One slot of a [`BufferPool`](super::BufferPool).
    Pooled,
    /// Read-only window into a memory-mapped file.
    MappedFile,
}

/// Trait for memory segment backends.
///
/// A segment is a contiguous region that one or more buffers view. It lives
/// as long as the last `Arc` pointing at it, and its `Drop` returns the
/// memory to wherever it came from (allocator, pool slot, `munmap`).
///
/// # Safety
///
/// Implementations must keep the pointer valid and the length unchanged for
/// the lifetime of the segment.
pub trait MemorySegment: Send + Sync {
    /// Pointer to the first byte.
    fn as_ptr(&self) -> *const u8;

    /// Mutable pointer, `None` for read-only memory.
    fn as_mut_ptr(&self) -> Option<*mut u8>;

    /// Size in bytes.
    fn len(&self) -> usize;

    /// True if the segment holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The type of memory backing this segment.
    fn memory_type(&self) -> MemoryType;
}

//! Buffer types for zero-copy data passing.
//!
//! A [`Buffer`] is a view (`offset`, `len`) into a reference-counted
//! [`MemorySegment`] plus per-buffer [`Metadata`] and optional [`Caps`].
//! Cloning a buffer or taking a sub-buffer shares the segment; the segment is
//! released exactly once, when the last view of it is dropped.

use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::error::{Error, Result};
use crate::memory::{HeapSegment, MemorySegment, MemoryType};
use crate::metadata::{BufferFlags, Metadata};
use std::sync::Arc;

/// Handle to a memory region within a segment.
///
/// This is cheap to clone (just Arc increment + copy of offset/len).
#[derive(Clone)]
pub struct MemoryHandle {
    segment: Arc<dyn MemorySegment>,
    offset: usize,
    len: usize,
}

impl MemoryHandle {
    /// Handle covering an entire segment.
    pub fn from_segment(segment: Arc<dyn MemorySegment>) -> Self {
        let len = segment.len();
        Self {
            segment,
            offset: 0,
            len,
        }
    }

    /// Pointer to the first byte of this view.
    pub fn as_ptr(&self) -> *const u8 {
        // SAFETY: offset <= segment.len() is upheld by every constructor.
        unsafe { self.segment.as_ptr().add(self.offset) }
    }

    /// Length of this view.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length view.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of this view within its segment.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The backing segment.
    pub fn segment(&self) -> &Arc<dyn MemorySegment> {
        &self.segment
    }

    /// The bytes of this view.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the view lies inside the segment, which outlives `self`.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Sub-view, or [`Error::OutOfBounds`] if it does not fit.
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(Self {
                segment: Arc::clone(&self.segment),
                offset: self.offset + offset,
                len,
            }),
            _ => Err(Error::OutOfBounds {
                offset,
                size: len,
                len: self.len,
            }),
        }
    }

    fn same_segment(&self, other: &MemoryHandle) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.segment), Arc::as_ptr(&other.segment))
    }
}

impl std::fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("memory_type", &self.segment.memory_type())
            .finish()
    }
}

/// A buffer of bytes with timing metadata and optional caps.
///
/// ```rust
/// use padflow::buffer::Buffer;
///
/// let parent = Buffer::from_vec(b"hello world".to_vec());
/// let sub = parent.create_sub(6, 5).unwrap();
/// assert_eq!(sub.as_bytes(), b"world");
/// assert_eq!(parent.ref_count(), 2);
/// ```
#[derive(Clone)]
pub struct Buffer {
    memory: MemoryHandle,
    metadata: Metadata,
    caps: Option<Caps>,
}

impl Buffer {
    /// Buffer viewing a whole segment.
    pub fn from_segment(segment: Arc<dyn MemorySegment>) -> Self {
        Self::from_handle(MemoryHandle::from_segment(segment), Metadata::default())
    }

    /// Buffer from a memory handle and metadata.
    pub fn from_handle(memory: MemoryHandle, metadata: Metadata) -> Self {
        Self {
            memory,
            metadata,
            caps: None,
        }
    }

    /// Buffer owning `data` without copying it.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::from_segment(Arc::new(HeapSegment::from_vec(data)))
    }

    /// Buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Buffer of `size` zero bytes.
    pub fn with_size(size: usize) -> Result<Self> {
        Ok(Self::from_segment(Arc::new(HeapSegment::new(size)?)))
    }

    /// Attach caps (builder style).
    pub fn with_caps(mut self, caps: Caps) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Attach metadata (builder style).
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.memory.as_slice()
    }

    /// Mutable bytes, or `None` while the memory is shared with another
    /// buffer or read-only.
    pub fn as_mut_bytes(&mut self) -> Option<&mut [u8]> {
        if Arc::strong_count(&self.memory.segment) != 1 {
            return None;
        }
        let ptr = self.memory.segment.as_mut_ptr()?;
        // SAFETY: this buffer holds the only handle on a writable segment.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.add(self.memory.offset), self.memory.len) })
    }

    /// True if [`as_mut_bytes`](Self::as_mut_bytes) would succeed.
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.memory.segment) == 1 && self.memory.segment.as_mut_ptr().is_some()
    }

    /// Copy the bytes into private heap memory unless already writable.
    pub fn make_writable(&mut self) {
        if !self.is_writable() {
            let copy = HeapSegment::from_vec(self.as_bytes().to_vec());
            self.memory = MemoryHandle::from_segment(Arc::new(copy));
        }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.memory.len
    }

    /// True for an empty buffer.
    pub fn is_empty(&self) -> bool {
        self.memory.len == 0
    }

    /// Bytes available from this buffer's start to the end of its segment.
    pub fn maxsize(&self) -> usize {
        self.memory.segment.len() - self.memory.offset
    }

    /// Memory handle.
    pub fn memory(&self) -> &MemoryHandle {
        &self.memory
    }

    /// Backing memory type.
    pub fn memory_type(&self) -> MemoryType {
        self.memory.segment.memory_type()
    }

    /// Number of handles (buffers and sub-buffers) sharing the segment.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.memory.segment)
    }

    /// Buffer viewing `[offset, offset + size)` of this one, sharing memory.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfBounds`] if the range does not fit.
    pub fn create_sub(&self, offset: usize, size: usize) -> Result<Buffer> {
        let memory = self.memory.slice(offset, size)?;
        let metadata = self.metadata.for_sub_range(offset, size, self.len());
        Ok(Buffer {
            memory,
            metadata,
            caps: self.caps.clone(),
        })
    }

    /// Whether `other` directly follows this buffer in the same segment, so
    /// [`span`](Self::span) can join them without copying.
    pub fn is_span_fast(&self, other: &Buffer) -> bool {
        self.memory.same_segment(&other.memory)
            && self.memory.offset + self.memory.len == other.memory.offset
    }

    /// Concatenate `len` bytes starting `offset` bytes into `self`, continuing
    /// into `other`. Zero-copy when the two are contiguous in one segment.
    pub fn span(&self, offset: usize, other: &Buffer, len: usize) -> Result<Buffer> {
        let total = self.len() + other.len();
        if offset.checked_add(len).is_none_or(|end| end > total) {
            return Err(Error::OutOfBounds {
                offset,
                size: len,
                len: total,
            });
        }

        let memory = if self.is_span_fast(other) {
            MemoryHandle {
                segment: self.memory.segment.clone(),
                offset: self.memory.offset + offset,
                len,
            }
        } else {
            let mut joined = Vec::with_capacity(total);
            joined.extend_from_slice(self.as_bytes());
            joined.extend_from_slice(other.as_bytes());
            joined.truncate(offset + len);
            joined.drain(..offset);
            MemoryHandle::from_segment(Arc::new(HeapSegment::from_vec(joined)))
        };

        let mut metadata = Metadata::with_sequence(self.metadata.sequence);
        if offset == 0 {
            metadata.timestamp = self.metadata.timestamp;
            metadata.offset = self.metadata.offset;
            if len == total && self.metadata.duration.is_some() && other.metadata.duration.is_some() {
                metadata.duration = self.metadata.duration + other.metadata.duration;
                metadata.offset_end = other.metadata.offset_end;
            }
        }
        Ok(Buffer {
            memory,
            metadata,
            caps: self.caps.clone(),
        })
    }

    /// Metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Presentation timestamp.
    pub fn timestamp(&self) -> ClockTime {
        self.metadata.timestamp
    }

    /// Set the presentation timestamp.
    pub fn set_timestamp(&mut self, timestamp: ClockTime) {
        self.metadata.timestamp = timestamp;
    }

    /// Duration.
    pub fn duration(&self) -> ClockTime {
        self.metadata.duration
    }

    /// Set the duration.
    pub fn set_duration(&mut self, duration: ClockTime) {
        self.metadata.duration = duration;
    }

    /// Source offset of the first byte.
    pub fn offset(&self) -> Option<u64> {
        self.metadata.offset
    }

    /// Flags.
    pub fn flags(&self) -> BufferFlags {
        self.metadata.flags
    }

    /// Caps describing the content, if attached.
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    /// Attach or clear caps.
    pub fn set_caps(&mut self, caps: Option<Caps>) {
        self.caps = caps;
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("timestamp", &self.metadata.timestamp)
            .field("memory", &self.memory)
            .field("caps", &self.caps)
            .finish()
    }
}

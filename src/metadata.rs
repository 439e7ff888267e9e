//! Buffer metadata types.

use crate::clock::ClockTime;

/// Flags describing a buffer's place in the stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    /// First buffer after a discontinuity (seek, flush, dropped data).
    pub discont: bool,
    /// Buffer carries no meaningful data, only advances time.
    pub gap: bool,
    /// Buffer cannot be decoded on its own.
    pub delta_unit: bool,
    /// Buffer arrived during preroll.
    pub preroll: bool,
}

/// Metadata associated with a buffer.
///
/// Timing uses [`ClockTime::NONE`] for "unset"; byte offsets use `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Presentation timestamp.
    pub timestamp: ClockTime,
    /// Duration of this buffer's content.
    pub duration: ClockTime,
    /// Byte (or sample) offset of the first byte in the source.
    pub offset: Option<u64>,
    /// Offset just past the last byte.
    pub offset_end: Option<u64>,
    /// Monotonic sequence number within a stream.
    pub sequence: u64,
    /// Buffer flags.
    pub flags: BufferFlags,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            timestamp: ClockTime::NONE,
            duration: ClockTime::NONE,
            offset: None,
            offset_end: None,
            sequence: 0,
            flags: BufferFlags::default(),
        }
    }
}

impl Metadata {
    /// Metadata with everything unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create metadata with a sequence number.
    pub fn with_sequence(sequence: u64) -> Self {
        Self {
            sequence,
            ..Default::default()
        }
    }

    /// Set the presentation timestamp.
    pub fn with_timestamp(mut self, timestamp: ClockTime) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: ClockTime) -> Self {
        self.duration = duration;
        self
    }

    /// Set the byte range in the source.
    pub fn with_offsets(mut self, offset: u64, offset_end: u64) -> Self {
        self.offset = Some(offset);
        self.offset_end = Some(offset_end);
        self
    }

    /// Metadata for a sub-range `[offset, offset + size)` of a buffer of
    /// `parent_len` bytes carrying `self`.
    ///
    /// Timestamp and start offset only survive for a sub-range starting at
    /// zero; duration and end offset only for the full range.
    pub(crate) fn for_sub_range(&self, offset: usize, size: usize, parent_len: usize) -> Self {
        let mut meta = Metadata::with_sequence(self.sequence);
        if offset == 0 {
            meta.timestamp = self.timestamp;
            meta.offset = self.offset;
            meta.flags.discont = self.flags.discont;
            if size == parent_len {
                meta.duration = self.duration;
                meta.offset_end = self.offset_end;
            }
        }
        meta.flags.delta_unit = self.flags.delta_unit;
        meta
    }
}

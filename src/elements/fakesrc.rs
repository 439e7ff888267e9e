//! Loop-based test source.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockTime;
use crate::element::{Element, ElementImpl, StateChange, StateChangeError, StateChangeSuccess};
use crate::error::{ErrorDomain, Result};
use crate::event::Event;
use crate::memory::BufferPool;
use crate::metadata::Metadata;
use crate::observability::trace_buffer;
use crate::pad::{FlowError, FlowResult, Pad, PadTemplate};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Source producing numbered buffers of a fixed size.
///
/// Each loop iteration pushes one buffer out of the `src` pad. After
/// `num_buffers` buffers the source pushes EOS and its loop ends. Buffers
/// come from a [`BufferPool`] created on Ready to Paused; when the pool is
/// exhausted (downstream is holding on to everything) a heap buffer is used
/// instead.
///
/// ```rust
/// use padflow::elements::FakeSrc;
///
/// let src = FakeSrc::builder().num_buffers(2).size(16).build("src")?;
/// assert_eq!(src.src_pads().len(), 1);
/// # Ok::<(), padflow::Error>(())
/// ```
pub struct FakeSrc {
    num_buffers: Option<u64>,
    size: usize,
    pool_slots: usize,
    caps: Option<Caps>,
    duration: ClockTime,
    pool: Mutex<Option<BufferPool>>,
    produced: AtomicU64,
    eos_sent: AtomicBool,
}

/// Settings for a [`FakeSrc`].
#[derive(Debug, Clone)]
pub struct FakeSrcBuilder {
    num_buffers: Option<u64>,
    size: usize,
    pool_slots: usize,
    caps: Option<Caps>,
    duration: ClockTime,
}

impl Default for FakeSrcBuilder {
    fn default() -> Self {
        Self {
            num_buffers: None,
            size: 4096,
            pool_slots: 8,
            caps: None,
            duration: ClockTime::NONE,
        }
    }
}

impl FakeSrcBuilder {
    /// Stop after `n` buffers. Unlimited by default.
    pub fn num_buffers(mut self, n: u64) -> Self {
        self.num_buffers = Some(n);
        self
    }

    /// Bytes per buffer (4096 by default).
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Slots in the buffer pool (8 by default).
    pub fn pool_slots(mut self, slots: usize) -> Self {
        self.pool_slots = slots.max(1);
        self
    }

    /// Fixed caps for the source pad; every buffer carries them.
    pub fn caps(mut self, caps: Caps) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Timestamp buffers `duration` apart, starting at zero.
    pub fn duration(mut self, duration: ClockTime) -> Self {
        self.duration = duration;
        self
    }

    /// Create the element.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn build(self, name: impl Into<String>) -> Result<Element> {
        let template = PadTemplate::src("src", self.caps.clone().unwrap_or_else(Caps::any));
        let mut pad = Pad::builder_from_template(&template, "src");
        if let Some(caps) = &self.caps {
            pad = pad.fixed_caps(caps.clone());
        }
        let imp = FakeSrc {
            num_buffers: self.num_buffers,
            size: self.size,
            pool_slots: self.pool_slots,
            caps: self.caps,
            duration: self.duration,
            pool: Mutex::new(None),
            produced: AtomicU64::new(0),
            eos_sent: AtomicBool::new(false),
        };
        Element::builder(name, imp).pad(pad.build()).build()
    }
}

impl FakeSrc {
    /// Start configuring a source.
    pub fn builder() -> FakeSrcBuilder {
        FakeSrcBuilder::default()
    }

    /// Buffers pushed since the last Ready to Paused, for a `FakeSrc`
    /// element.
    pub fn buffers_produced(element: &Element) -> u64 {
        element
            .downcast_imp::<FakeSrc>()
            .map_or(0, |src| src.produced.load(Ordering::Acquire))
    }

    fn next_buffer(&self, element: &Element, sequence: u64) -> std::result::Result<Buffer, FlowError> {
        let pooled = self.pool.lock().as_ref().and_then(BufferPool::try_acquire);
        let mut buffer = match pooled {
            Some(buffer) => buffer,
            None => Buffer::with_size(self.size).map_err(|err| {
                element.post_error(
                    ErrorDomain::Resource,
                    "could not allocate buffer",
                    Some(err.to_string()),
                );
                FlowError::Error
            })?,
        };
        if let Some(bytes) = buffer.as_mut_bytes() {
            bytes.fill(sequence as u8);
        }
        let mut meta = Metadata::with_sequence(sequence);
        if self.duration.is_some() {
            meta = meta
                .with_timestamp(self.duration.saturating_mul(sequence))
                .with_duration(self.duration);
        }
        let offset = sequence * self.size as u64;
        meta = meta.with_offsets(offset, offset + self.size as u64);
        meta.flags.discont = sequence == 0;
        buffer = buffer.with_metadata(meta);
        if let Some(caps) = &self.caps {
            buffer = buffer.with_caps(caps.clone());
        }
        Ok(buffer)
    }
}

impl ElementImpl for FakeSrc {
    fn change_state(
        &self,
        element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        match transition {
            StateChange::ReadyToPaused => {
                if self.size > 0 {
                    let pool = BufferPool::new(element.name(), self.size, self.pool_slots)
                        .map_err(|err| StateChangeError::new(element.name(), transition, err.to_string()))?;
                    *self.pool.lock() = Some(pool);
                }
                self.produced.store(0, Ordering::Release);
                self.eos_sent.store(false, Ordering::Release);
            }
            StateChange::PausedToReady => {
                self.pool.lock().take();
            }
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::src(
            "src",
            self.caps.clone().unwrap_or_else(Caps::any),
        )]
    }

    fn is_loop_based(&self) -> bool {
        true
    }

    fn iterate(&self, element: &Element) -> FlowResult {
        let pad = element.pad("src").ok_or(FlowError::Error)?;
        let sequence = self.produced.load(Ordering::Acquire);
        if self.num_buffers.is_some_and(|n| sequence >= n) {
            if !self.eos_sent.swap(true, Ordering::AcqRel) {
                pad.push_event(Event::Eos);
            }
            return Err(FlowError::Eos);
        }
        let buffer = self.next_buffer(element, sequence)?;
        trace_buffer(&pad.path(), buffer.len(), sequence);
        let result = pad.push(buffer);
        if result.is_ok() {
            self.produced.fetch_add(1, Ordering::AcqRel);
        }
        result
    }
}

impl std::fmt::Debug for FakeSrc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSrc")
            .field("num_buffers", &self.num_buffers)
            .field("size", &self.size)
            .field("produced", &self.produced.load(Ordering::Relaxed))
            .finish()
    }
}

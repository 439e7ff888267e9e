//! Counting test sink.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock::ClockReturn;
use crate::element::{Element, ElementImpl, StateChange, StateChangeError, StateChangeSuccess};
use crate::error::Result;
use crate::event::Event;
use crate::observability::trace_eos;
use crate::pad::{FlowError, FlowResult, FlowSuccess, Pad, PadHandler, PadTemplate};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Callback run for every buffer a [`FakeSink`] receives.
pub type HandoffCallback = Arc<dyn Fn(&Element, &Buffer) + Send + Sync>;

#[derive(Default)]
struct SinkStats {
    buffers: AtomicU64,
    bytes: AtomicU64,
    eos: AtomicBool,
}

/// Sink that counts and drops what it receives.
///
/// With `sync` enabled the sink asks for the pipeline clock and waits until
/// each buffer's timestamp before accepting it. End-of-stream is posted on
/// the bus.
pub struct FakeSink {
    stats: Arc<SinkStats>,
    sync: bool,
    caps: Caps,
}

struct FakeSinkPad {
    stats: Arc<SinkStats>,
    sync: bool,
    handoff: Option<HandoffCallback>,
}

impl PadHandler for FakeSinkPad {
    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        let element = pad.parent_element().ok_or(FlowError::Error)?;
        if self.sync && buffer.timestamp().is_some() {
            match element.clock_wait(buffer.timestamp()) {
                ClockReturn::Unscheduled => return Err(FlowError::Flushing),
                ret => tracing::trace!(element = %element.name(), ?ret, "synced"),
            }
        }
        if let Some(handoff) = &self.handoff {
            handoff(&element, &buffer);
        }
        self.stats.buffers.fetch_add(1, Ordering::AcqRel);
        self.stats
            .bytes
            .fetch_add(buffer.len() as u64, Ordering::AcqRel);
        Ok(FlowSuccess::Ok)
    }

    fn event(&self, pad: &Pad, event: Event) -> bool {
        match event {
            Event::Eos => {
                self.stats.eos.store(true, Ordering::Release);
                if let Some(element) = pad.parent_element() {
                    trace_eos(element.name());
                    element.post_eos();
                }
                true
            }
            Event::FlushStop => {
                self.stats.eos.store(false, Ordering::Release);
                true
            }
            other => pad.event_default(other),
        }
    }
}

/// Settings for a [`FakeSink`].
#[derive(Default)]
pub struct FakeSinkBuilder {
    sync: bool,
    caps: Option<Caps>,
    handoff: Option<HandoffCallback>,
}

impl FakeSinkBuilder {
    /// Wait for each buffer's timestamp on the pipeline clock.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Only accept `caps` (any by default).
    pub fn caps(mut self, caps: Caps) -> Self {
        self.caps = Some(caps);
        self
    }

    /// Call `f` for every received buffer.
    pub fn on_buffer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Element, &Buffer) + Send + Sync + 'static,
    {
        self.handoff = Some(Arc::new(f));
        self
    }

    /// Create the element.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn build(self, name: impl Into<String>) -> Result<Element> {
        let caps = self.caps.unwrap_or_else(Caps::any);
        let stats = Arc::new(SinkStats::default());
        let pad = Pad::builder_from_template(&PadTemplate::sink("sink", caps.clone()), "sink")
            .handler(Arc::new(FakeSinkPad {
                stats: Arc::clone(&stats),
                sync: self.sync,
                handoff: self.handoff,
            }))
            .build();
        let imp = FakeSink {
            stats,
            sync: self.sync,
            caps,
        };
        Element::builder(name, imp).pad(pad).build()
    }
}

impl FakeSink {
    /// Sink with default settings.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn new(name: impl Into<String>) -> Result<Element> {
        Self::builder().build(name)
    }

    /// Start configuring a sink.
    pub fn builder() -> FakeSinkBuilder {
        FakeSinkBuilder::default()
    }

    fn stats(element: &Element) -> Option<&SinkStats> {
        element.downcast_imp::<FakeSink>().map(|s| s.stats.as_ref())
    }

    /// Buffers received since the last Ready to Paused.
    pub fn buffers_received(element: &Element) -> u64 {
        Self::stats(element).map_or(0, |s| s.buffers.load(Ordering::Acquire))
    }

    /// Bytes received since the last Ready to Paused.
    pub fn bytes_received(element: &Element) -> u64 {
        Self::stats(element).map_or(0, |s| s.bytes.load(Ordering::Acquire))
    }

    /// Whether end-of-stream arrived.
    pub fn is_eos(element: &Element) -> bool {
        Self::stats(element).is_some_and(|s| s.eos.load(Ordering::Acquire))
    }
}

impl ElementImpl for FakeSink {
    fn change_state(
        &self,
        _element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        if transition == StateChange::ReadyToPaused {
            self.stats.buffers.store(0, Ordering::Release);
            self.stats.bytes.store(0, Ordering::Release);
            self.stats.eos.store(false, Ordering::Release);
        }
        Ok(StateChangeSuccess::Success)
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![PadTemplate::sink("sink", self.caps.clone())]
    }

    fn requires_clock(&self) -> bool {
        self.sync
    }
}

//! Queue element for decoupling producer and consumer.
//!
//! The sink side stores buffers and serialized events in a bounded FIFO;
//! the source side is a loop that pushes them on. Under a threaded
//! scheduler the two sides run on different threads and a full queue
//! blocks the producer. Under a cooperative scheduler nothing may block,
//! so a full queue forwards its oldest item in the producer's call instead.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::context::ContextConfig;
use crate::element::{Element, ElementImpl, StateChange, StateChangeError, StateChangeSuccess};
use crate::error::Result;
use crate::event::Event;
use crate::observability::metrics;
use crate::pad::{FlowError, FlowResult, FlowSuccess, Pad, PadHandler, PadTemplate};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;

/// What happens when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeakyMode {
    /// Wait for space (default).
    #[default]
    None,
    /// Drop the incoming buffer.
    Upstream,
    /// Drop the oldest queued buffer.
    Downstream,
}

/// Snapshot of a queue's fill level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    /// Buffers waiting.
    pub buffers: usize,
    /// Bytes waiting.
    pub bytes: usize,
    /// Highest buffer count seen since Ready to Paused.
    pub max_level: usize,
    /// Buffers dropped by a leaky queue.
    pub dropped: u64,
}

enum Item {
    Buffer(Buffer),
    Event(Event),
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Item>,
    stats: QueueStats,
    flushing: bool,
    wakeups: u64,
}

struct QueueShared {
    name: String,
    max_buffers: usize,
    max_bytes: usize,
    leaky: LeakyMode,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl QueueShared {
    fn is_full(&self, state: &QueueState) -> bool {
        (self.max_buffers > 0 && state.stats.buffers >= self.max_buffers)
            || (self.max_bytes > 0 && state.stats.bytes >= self.max_bytes)
    }

    fn pop(&self, state: &mut QueueState) -> Option<Item> {
        let item = state.items.pop_front()?;
        if let Item::Buffer(buffer) = &item {
            state.stats.buffers -= 1;
            state.stats.bytes -= buffer.len();
            metrics::record_queue_level(&self.name, state.stats.buffers);
        }
        self.not_full.notify_all();
        Some(item)
    }

    fn drop_oldest_buffer(&self, state: &mut QueueState) {
        if let Some(index) = state.items.iter().position(|i| matches!(i, Item::Buffer(_)))
            && let Some(Item::Buffer(buffer)) = state.items.remove(index)
        {
            state.stats.buffers -= 1;
            state.stats.bytes -= buffer.len();
            state.stats.dropped += 1;
        }
    }

    fn set_flushing(&self, flushing: bool) {
        let mut state = self.state.lock();
        state.flushing = flushing;
        if flushing {
            state.items.clear();
            state.stats.buffers = 0;
            state.stats.bytes = 0;
            metrics::record_queue_level(&self.name, 0);
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Release a source loop waiting on an empty queue without flushing.
    fn wake(&self) {
        self.state.lock().wakeups += 1;
        self.not_empty.notify_all();
    }

    fn enqueue(&self, mut state: MutexGuard<'_, QueueState>, item: Item) {
        if let Item::Buffer(buffer) = &item {
            state.stats.buffers += 1;
            state.stats.bytes += buffer.len();
            state.stats.max_level = state.stats.max_level.max(state.stats.buffers);
            metrics::record_queue_level(&self.name, state.stats.buffers);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
    }
}

fn is_threaded(pad: &Pad) -> bool {
    pad.parent_element()
        .and_then(|e| e.scheduler())
        .is_some_and(|s| s.is_threaded())
}

fn forward(src: &Pad, item: Item) -> FlowResult {
    match item {
        Item::Buffer(buffer) => src.push(buffer),
        Item::Event(Event::Eos) => {
            src.push_event(Event::Eos);
            Err(FlowError::Eos)
        }
        Item::Event(event) => {
            src.push_event(event);
            Ok(FlowSuccess::Ok)
        }
    }
}

fn src_pad_of(pad: &Pad) -> std::result::Result<Pad, FlowError> {
    pad.parent_element()
        .and_then(|e| e.pad("src"))
        .ok_or(FlowError::Error)
}

struct QueueSinkPad(Arc<QueueShared>);

impl PadHandler for QueueSinkPad {
    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        let shared = &self.0;
        let threaded = is_threaded(pad);
        let mut state = shared.state.lock();
        loop {
            if state.flushing {
                return Err(FlowError::Flushing);
            }
            if !shared.is_full(&state) {
                break;
            }
            match shared.leaky {
                LeakyMode::Upstream => {
                    state.stats.dropped += 1;
                    tracing::trace!(queue = %shared.name, "queue full, dropping new buffer");
                    return Ok(FlowSuccess::Ok);
                }
                LeakyMode::Downstream => shared.drop_oldest_buffer(&mut state),
                LeakyMode::None if threaded => shared.not_full.wait(&mut state),
                LeakyMode::None => {
                    let Some(item) = shared.pop(&mut state) else {
                        break;
                    };
                    drop(state);
                    match forward(&src_pad_of(pad)?, item) {
                        Ok(_) | Err(FlowError::Eos) => {}
                        Err(err) => return Err(err),
                    }
                    state = shared.state.lock();
                }
            }
        }
        shared.enqueue(state, Item::Buffer(buffer));
        Ok(FlowSuccess::Ok)
    }

    fn event(&self, pad: &Pad, event: Event) -> bool {
        let shared = &self.0;
        match event {
            Event::FlushStart => {
                shared.set_flushing(true);
                pad.event_default(Event::FlushStart)
            }
            Event::FlushStop => {
                shared.set_flushing(false);
                pad.event_default(Event::FlushStop)
            }
            event if event.is_serialized() => {
                let state = shared.state.lock();
                if state.flushing {
                    return false;
                }
                shared.enqueue(state, Item::Event(event));
                true
            }
            event => pad.event_default(event),
        }
    }

    fn get_caps(&self, pad: &Pad) -> Option<Caps> {
        src_pad_of(pad).ok()?.peer_query_caps()
    }
}

struct QueueSrcPad;

impl PadHandler for QueueSrcPad {
    fn get_caps(&self, pad: &Pad) -> Option<Caps> {
        pad.parent_element()?.pad("sink")?.peer_query_caps()
    }
}

/// Bounded FIFO between two parts of a pipeline.
///
/// ```rust
/// use padflow::elements::{LeakyMode, Queue};
///
/// let queue = Queue::builder().max_buffers(4).leaky(LeakyMode::Downstream).build("q")?;
/// assert!(queue.is_loop_based());
/// # Ok::<(), padflow::Error>(())
/// ```
pub struct Queue {
    shared: Arc<QueueShared>,
}

/// Settings for a [`Queue`].
#[derive(Debug, Clone)]
pub struct QueueBuilder {
    max_buffers: usize,
    max_bytes: usize,
    leaky: LeakyMode,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::from_config(&ContextConfig::default())
    }
}

impl QueueBuilder {
    /// Limits taken from a context configuration.
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            max_buffers: config.queue_max_buffers,
            max_bytes: config.queue_max_bytes,
            leaky: LeakyMode::None,
        }
    }

    /// Buffer limit, 0 for none.
    pub fn max_buffers(mut self, n: usize) -> Self {
        self.max_buffers = n;
        self
    }

    /// Byte limit, 0 for none.
    pub fn max_bytes(mut self, n: usize) -> Self {
        self.max_bytes = n;
        self
    }

    /// Behaviour when full.
    pub fn leaky(mut self, mode: LeakyMode) -> Self {
        self.leaky = mode;
        self
    }

    /// Create the element.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn build(self, name: impl Into<String>) -> Result<Element> {
        let name = name.into();
        let shared = Arc::new(QueueShared {
            name: name.clone(),
            max_buffers: self.max_buffers,
            max_bytes: self.max_bytes,
            leaky: self.leaky,
            state: Mutex::new(QueueState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });
        let sink = Pad::builder_from_template(&PadTemplate::sink("sink", Caps::any()), "sink")
            .handler(Arc::new(QueueSinkPad(Arc::clone(&shared))))
            .build();
        let src = Pad::builder_from_template(&PadTemplate::src("src", Caps::any()), "src")
            .handler(Arc::new(QueueSrcPad))
            .build();
        Element::builder(name, Queue { shared })
            .pad(sink)
            .pad(src)
            .build()
    }
}

impl Queue {
    /// Queue with the default limits.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn new(name: impl Into<String>) -> Result<Element> {
        Self::builder().build(name)
    }

    /// Start configuring a queue.
    pub fn builder() -> QueueBuilder {
        QueueBuilder::default()
    }

    /// Fill level of a `Queue` element.
    pub fn stats(element: &Element) -> QueueStats {
        element
            .downcast_imp::<Queue>()
            .map(|q| q.shared.state.lock().stats)
            .unwrap_or_default()
    }
}

impl ElementImpl for Queue {
    fn change_state(
        &self,
        _element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        match transition {
            StateChange::ReadyToPaused => {
                let mut state = self.shared.state.lock();
                *state = QueueState::default();
            }
            StateChange::PlayingToPaused => self.shared.wake(),
            StateChange::PausedToReady => self.shared.set_flushing(true),
            _ => {}
        }
        Ok(StateChangeSuccess::Success)
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::sink("sink", Caps::any()),
            PadTemplate::src("src", Caps::any()),
        ]
    }

    fn is_loop_based(&self) -> bool {
        true
    }

    fn iterate(&self, element: &Element) -> FlowResult {
        let src = element.pad("src").ok_or(FlowError::Error)?;
        let threaded = element.scheduler().is_some_and(|s| s.is_threaded());
        let shared = &self.shared;
        let item = {
            let mut state = shared.state.lock();
            let wakeups = state.wakeups;
            loop {
                if state.flushing {
                    return Err(FlowError::Flushing);
                }
                if let Some(item) = shared.pop(&mut state) {
                    break item;
                }
                if !threaded || state.wakeups != wakeups {
                    return Ok(FlowSuccess::Idle);
                }
                shared.not_empty.wait(&mut state);
            }
        };
        forward(&src, item)
    }

    fn unlock(&self, _element: &Element) {
        self.shared.set_flushing(true);
    }
}

//! Events and queries that travel between pads.
//!
//! Events are pushed along links: downstream events flow with the data
//! (EOS, segment), upstream events flow against it (seek, QoS), and flush
//! events may travel either way. Flush events are not serialized with
//! buffers; queues pass them straight through.
//!
//! ```rust
//! use padflow::event::Event;
//!
//! assert!(Event::Eos.is_downstream());
//! assert!(!Event::FlushStart.is_serialized());
//! ```

mod query;

pub use query::Query;

use crate::clock::ClockTime;

/// Events that flow through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Defines the playback segment of the following buffers.
    Segment(SegmentEvent),
    /// End of stream: no more data will follow.
    Eos,
    /// Seek request.
    Seek(SeekEvent),
    /// Quality-of-service feedback from a sink.
    Qos(QosEvent),
    /// Discard queued data and refuse new data until `FlushStop`.
    FlushStart,
    /// Resume after a flush.
    FlushStop,
    /// Application-defined event.
    Custom(CustomEvent),
}

impl Event {
    /// Flows with the data.
    pub fn is_downstream(&self) -> bool {
        match self {
            Event::Segment(_) | Event::Eos | Event::FlushStart | Event::FlushStop => true,
            Event::Custom(c) => c.downstream,
            Event::Seek(_) | Event::Qos(_) => false,
        }
    }

    /// Flows against the data.
    pub fn is_upstream(&self) -> bool {
        match self {
            Event::Seek(_) | Event::Qos(_) | Event::FlushStart | Event::FlushStop => true,
            Event::Custom(c) => !c.downstream,
            Event::Segment(_) | Event::Eos => false,
        }
    }

    /// Ordered with buffers (goes through queues).
    pub fn is_serialized(&self) -> bool {
        !matches!(self, Event::FlushStart | Event::FlushStop)
    }

    /// Name for logging.
    pub fn name(&self) -> &str {
        match self {
            Event::Segment(_) => "segment",
            Event::Eos => "eos",
            Event::Seek(_) => "seek",
            Event::Qos(_) => "qos",
            Event::FlushStart => "flush-start",
            Event::FlushStop => "flush-stop",
            Event::Custom(c) => &c.name,
        }
    }
}

/// Playback segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEvent {
    /// Playback rate (1.0 = normal speed).
    pub rate: f64,
    /// Segment start.
    pub start: ClockTime,
    /// Segment stop, NONE for open-ended.
    pub stop: ClockTime,
    /// Stream time of `start`.
    pub position: ClockTime,
}

impl Default for SegmentEvent {
    fn default() -> Self {
        Self {
            rate: 1.0,
            start: ClockTime::ZERO,
            stop: ClockTime::NONE,
            position: ClockTime::ZERO,
        }
    }
}

/// Seek request.
#[derive(Debug, Clone, PartialEq)]
pub struct SeekEvent {
    /// New playback rate.
    pub rate: f64,
    /// Target start position.
    pub start: ClockTime,
    /// Target stop, NONE for open-ended.
    pub stop: ClockTime,
    /// Flush the pipeline before seeking.
    pub flush: bool,
}

impl SeekEvent {
    /// Flushing seek to `start` at normal rate.
    pub fn to(start: ClockTime) -> Self {
        Self {
            rate: 1.0,
            start,
            stop: ClockTime::NONE,
            flush: true,
        }
    }
}

/// Quality-of-service report.
#[derive(Debug, Clone, PartialEq)]
pub struct QosEvent {
    /// Rate at which the sink renders relative to real time.
    pub proportion: f64,
    /// How late (positive) or early (negative) the last buffer was, in ns.
    pub jitter: i64,
    /// Timestamp of the buffer that produced this report.
    pub timestamp: ClockTime,
}

/// Application-defined event.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEvent {
    /// Event name.
    pub name: String,
    /// Direction of travel.
    pub downstream: bool,
}

impl CustomEvent {
    /// Custom downstream event.
    pub fn downstream(name: impl Into<String>) -> Event {
        Event::Custom(Self {
            name: name.into(),
            downstream: true,
        })
    }

    /// Custom upstream event.
    pub fn upstream(name: impl Into<String>) -> Event {
        Event::Custom(Self {
            name: name.into(),
            downstream: false,
        })
    }
}

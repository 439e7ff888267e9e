//! # padflow
//!
//! A pad-based streaming pipeline core.
//!
//! Elements expose typed [`Pad`](pad::Pad)s; linking two pads negotiates
//! [`Caps`](caps::Caps) so both ends agree on a media format. Data moves as
//! reference-counted [`Buffer`](buffer::Buffer)s whose memory can be shared
//! and sub-sliced without copying. Every element walks the same four-step
//! state machine (NULL, READY, PAUSED, PLAYING), and each
//! [`Bin`](element::Bin) owns a [`Scheduler`](scheduler::Scheduler) that
//! drives its loop-based children and distributes a clock.
//!
//! ## Features
//!
//! - **Caps negotiation**: property ranges, lists and fixation
//! - **Zero-copy buffers**: heap, pooled and memory-mapped backends
//! - **State machine**: per-step transitions with async preroll
//! - **Pluggable schedulers**: cooperative (`basic`) or thread per element (`threaded`)
//! - **Autoplugging**: ranked element factories fill in missing converters
//!
//! ## Quick Start
//!
//! ```rust
//! use padflow::prelude::*;
//!
//! let ctx = Context::new();
//! let pipeline = Pipeline::new(&ctx, "quickstart")?;
//! let src = FakeSrc::builder().num_buffers(4).size(16).build("src")?;
//! let queue = Queue::new("queue")?;
//! let sink = FakeSink::new("sink")?;
//! pipeline.add_many(&[&src, &queue, &sink])?;
//! src.link(&queue)?;
//! queue.link(&sink)?;
//!
//! pipeline.play()?;
//! while pipeline.iterate() {}
//! assert_eq!(FakeSink::bytes_received(&sink), 64);
//! pipeline.stop()?;
//! # Ok::<(), padflow::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod autoplug;
pub mod buffer;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod context;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod io;
pub mod memory;
pub mod metadata;
pub mod observability;
pub mod pad;
pub mod scheduler;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::autoplug::{ElementFactory, Registry};
    pub use crate::buffer::Buffer;
    pub use crate::bus::{Bus, Message};
    pub use crate::caps::Caps;
    pub use crate::clock::{Clock, ClockTime, SystemClock};
    pub use crate::context::{Context, ContextConfig};
    pub use crate::element::{Bin, Element, ElementImpl, Pipeline, State, StateChange};
    pub use crate::elements::{FakeSink, FakeSrc, FileSink, FileSrc, Identity, Queue};
    pub use crate::error::{Error, Result};
    pub use crate::event::Event;
    pub use crate::metadata::Metadata;
    pub use crate::pad::{FlowError, FlowSuccess, Pad, PadDirection, PadHandler, PadLinkReturn, PadTemplate};
}

pub use error::{Error, Result};

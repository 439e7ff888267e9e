//! Reference elements.
//!
//! Small elements that exercise the pad, state and scheduling contracts and
//! are handy in tests and examples:
//!
//! ## Sources
//! - [`FakeSrc`]: numbered buffers from a pool, then EOS (loop-based)
//! - [`FileSrc`]: file contents through memory mappings (push or pull)
//!
//! ## Sinks
//! - [`FakeSink`]: counts and drops, optionally synced to the clock
//! - [`FileSink`]: writes through a buffered output stream
//!
//! ## Transforms
//! - [`Identity`]: passes buffers through unchanged
//! - [`Queue`]: bounded FIFO decoupling its two sides (loop-based)

mod fakesink;
mod fakesrc;
mod file;
mod identity;
mod queue;

// Sources
pub use fakesrc::{FakeSrc, FakeSrcBuilder};
pub use file::{FileSrc, FileSrcBuilder};

// Sinks
pub use fakesink::{FakeSink, FakeSinkBuilder, HandoffCallback};
pub use file::FileSink;

// Transforms
pub use identity::{BufferCallback, Identity, IdentityBuilder};
pub use queue::{LeakyMode, Queue, QueueBuilder, QueueStats};

//! Cancellable buffered output.
//!
//! [`BufferedOutputStream`] is what [`FileSink`](crate::elements::FileSink)
//! writes through; a [`Cancellable`] lets a state change abort a write that
//! is stuck on a slow device.

mod cancellable;
mod output;

pub use cancellable::Cancellable;
pub use output::{AsyncOutputStream, BufferedOutputStream, DEFAULT_BUFFER_SIZE};

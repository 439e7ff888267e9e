use super::{FlowError, FlowResult, Pad, PadLinkReturn};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::event::{Event, Query};

/// Behaviour attached to a pad.
///
/// Every method has a default, so a handler only overrides what its pad
/// does: a sink pad implements [`chain`](Self::chain), a pull-capable
/// source pad [`get_range`](Self::get_range), and so on. Event and query
/// defaults forward to the pads on the other side of the parent element.
pub trait PadHandler: Send + Sync {
    /// Consume a buffer arriving on a sink pad.
    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        drop(buffer);
        tracing::warn!(pad = %pad.path(), "pad has no chain function");
        Err(FlowError::NotSupported)
    }

    /// Produce `size` bytes at `offset` for a downstream puller.
    fn get_range(&self, pad: &Pad, offset: u64, size: usize) -> Result<Buffer, FlowError> {
        tracing::debug!(pad = %pad.path(), offset, size, "pad does not support pulling");
        Err(FlowError::NotSupported)
    }

    /// Handle an event delivered to this pad.
    fn event(&self, pad: &Pad, event: Event) -> bool {
        pad.event_default(event)
    }

    /// Answer a query asked of this pad.
    fn query(&self, pad: &Pad, query: &mut Query) -> bool {
        pad.query_default(query)
    }

    /// Caps this pad can handle right now; `None` falls back to the pad's
    /// fixed caps or template.
    fn get_caps(&self, _pad: &Pad) -> Option<Caps> {
        None
    }

    /// Accept (true) or reject fixed caps for upcoming data.
    fn set_caps(&self, _pad: &Pad, _caps: &Caps) -> bool {
        true
    }

    /// Veto or delay a link to `peer`.
    fn link(&self, _pad: &Pad, _peer: &Pad) -> PadLinkReturn {
        PadLinkReturn::Ok
    }

    /// The pad was unlinked.
    fn unlink(&self, _pad: &Pad) {}

    /// The pad was added to an element.
    fn parent_set(&self, _pad: &Pad) {}

    /// The pad is about to be removed from its element.
    fn parent_unset(&self, _pad: &Pad) {}
}

/// Handler with every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl PadHandler for NoopHandler {}

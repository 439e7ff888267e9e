//! Pads: the typed connection points of elements.
//!
//! A source pad links to exactly one sink pad. Linking intersects the caps
//! both sides can handle; a fixed intersection is applied immediately
//! ([`PadLinkReturn::Ok`]), anything else leaves the link
//! [`Delayed`](PadLinkReturn::Delayed) until the first buffer carrying caps
//! or an explicit [`Pad::renegotiate`].
//!
//! Data moves by [`Pad::push`] (source side, calls the peer's chain handler)
//! or [`Pad::pull_range`] (sink side, calls the peer's get-range handler).
//! Pads hold their parent element and their peer weakly; elements own their
//! pads.

mod flow;
mod ghost;
mod handler;
mod template;

pub use flow::{FlowError, FlowResult, FlowSuccess, PadLinkReturn};
pub use ghost::GhostPad;
pub use handler::{NoopHandler, PadHandler};
pub use template::{PadDirection, PadPresence, PadTemplate};

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, WeakElement};
use crate::error::{Error, Result};
use crate::event::{Event, Query};
use crate::observability::metrics;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct LinkState {
    peer: Option<Weak<PadInner>>,
    /// Intersection computed at link time.
    allowed: Option<Caps>,
    /// Fixed caps both sides accepted.
    negotiated: Option<Caps>,
}

struct PadInner {
    name: String,
    direction: PadDirection,
    template: Option<PadTemplate>,
    handler: Arc<dyn PadHandler>,
    parent: Mutex<Option<WeakElement>>,
    link: Mutex<LinkState>,
    fixed_caps: Mutex<Option<Caps>>,
    flushing: AtomicBool,
    eos: AtomicBool,
}

/// A connection point of an element.
///
/// Cloning yields another handle to the same pad.
#[derive(Clone)]
pub struct Pad {
    inner: Arc<PadInner>,
}

/// Non-owning pad handle.
#[derive(Clone, Default)]
pub struct WeakPad(Weak<PadInner>);

impl WeakPad {
    /// The pad, if it still exists.
    pub fn upgrade(&self) -> Option<Pad> {
        self.0.upgrade().map(|inner| Pad { inner })
    }
}

/// Builder for [`Pad`].
#[must_use]
pub struct PadBuilder {
    name: String,
    direction: PadDirection,
    template: Option<PadTemplate>,
    handler: Arc<dyn PadHandler>,
    fixed_caps: Option<Caps>,
}

impl PadBuilder {
    /// Attach behaviour.
    pub fn handler(mut self, handler: Arc<dyn PadHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Record the template the pad was made from.
    pub fn template(mut self, template: PadTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Report these caps from caps queries regardless of the handler.
    pub fn fixed_caps(mut self, caps: Caps) -> Self {
        self.fixed_caps = Some(caps);
        self
    }

    /// Finish.
    pub fn build(self) -> Pad {
        Pad {
            inner: Arc::new(PadInner {
                name: self.name,
                direction: self.direction,
                template: self.template,
                handler: self.handler,
                parent: Mutex::new(None),
                link: Mutex::new(LinkState::default()),
                fixed_caps: Mutex::new(self.fixed_caps),
                flushing: AtomicBool::new(false),
                eos: AtomicBool::new(false),
            }),
        }
    }
}

impl Pad {
    /// Pad without behaviour.
    pub fn new(name: impl Into<String>, direction: PadDirection) -> Self {
        Self::builder(name, direction).build()
    }

    /// Start building a pad.
    pub fn builder(name: impl Into<String>, direction: PadDirection) -> PadBuilder {
        PadBuilder {
            name: name.into(),
            direction,
            template: None,
            handler: Arc::new(NoopHandler),
            fixed_caps: None,
        }
    }

    /// Start building a pad from a template.
    pub fn builder_from_template(template: &PadTemplate, name: impl Into<String>) -> PadBuilder {
        Self::builder(name, template.direction()).template(template.clone())
    }

    /// Name, unique within the parent element.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `element.pad`, or just the pad name while unparented.
    pub fn path(&self) -> String {
        match self.parent_element() {
            Some(parent) => format!("{}.{}", parent.name(), self.inner.name),
            None => self.inner.name.clone(),
        }
    }

    /// Direction.
    pub fn direction(&self) -> PadDirection {
        self.inner.direction
    }

    /// Template the pad was made from.
    pub fn template(&self) -> Option<&PadTemplate> {
        self.inner.template.as_ref()
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakPad {
        WeakPad(Arc::downgrade(&self.inner))
    }

    /// Owning element.
    pub fn parent_element(&self) -> Option<Element> {
        self.inner.parent.lock().as_ref().and_then(WeakElement::upgrade)
    }

    pub(crate) fn set_parent(&self, parent: Option<&Element>) -> Result<()> {
        let mut slot = self.inner.parent.lock();
        match (parent, slot.as_ref().and_then(WeakElement::upgrade)) {
            (Some(_), Some(existing)) => Err(Error::Pad(format!(
                "pad {} already belongs to {}",
                self.inner.name,
                existing.name()
            ))),
            (parent, _) => {
                *slot = parent.map(Element::downgrade);
                Ok(())
            }
        }
    }

    pub(crate) fn handler(&self) -> &Arc<dyn PadHandler> {
        &self.inner.handler
    }

    /// The linked peer.
    pub fn peer(&self) -> Option<Pad> {
        self.inner
            .link
            .lock()
            .peer
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Pad { inner })
    }

    /// Whether the pad has a live peer.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    /// Caps agreed on the current link.
    pub fn negotiated_caps(&self) -> Option<Caps> {
        self.inner.link.lock().negotiated.clone()
    }

    /// Caps computed at link time, before fixation.
    pub fn allowed_caps(&self) -> Option<Caps> {
        self.inner.link.lock().allowed.clone()
    }

    /// Caps of the template, ANY without one.
    pub fn template_caps(&self) -> Caps {
        self.inner
            .template
            .as_ref()
            .map_or_else(Caps::any, |t| t.caps().clone())
    }

    /// Pin the caps this pad reports, or unpin with `None`.
    pub fn set_fixed_caps(&self, caps: Option<Caps>) {
        *self.inner.fixed_caps.lock() = caps;
    }

    /// Caps this pad can handle: pinned caps, else the handler's answer,
    /// else the template caps.
    pub fn query_caps(&self) -> Caps {
        if let Some(caps) = self.inner.fixed_caps.lock().clone() {
            return caps;
        }
        if let Some(caps) = self.inner.handler.get_caps(self) {
            return caps;
        }
        self.template_caps()
    }

    /// Caps the peer can handle, `None` while unlinked.
    pub fn peer_query_caps(&self) -> Option<Caps> {
        self.peer().map(|p| p.query_caps())
    }

    fn apply_caps(&self, caps: &Caps) -> bool {
        if !self.inner.handler.set_caps(self, caps) {
            tracing::debug!(pad = %self.path(), %caps, "pad refused caps");
            return false;
        }
        self.inner.link.lock().negotiated = Some(caps.clone());
        true
    }

    /// Install `caps` on both ends of a link, or on neither: a refusal by
    /// `peer` restores what this pad had negotiated before.
    fn apply_link_caps(&self, peer: &Pad, caps: &Caps) -> bool {
        let previous = self.negotiated_caps();
        if !self.apply_caps(caps) {
            return false;
        }
        if peer.apply_caps(caps) {
            return true;
        }
        self.inner.link.lock().negotiated = previous;
        false
    }

    /// Link this source pad to `sink`.
    ///
    /// # Errors
    ///
    /// [`Error::Pad`] if the directions are wrong or either pad is already
    /// linked. Caps disagreement is not an error but
    /// [`PadLinkReturn::Refused`].
    pub fn link(&self, sink: &Pad) -> Result<PadLinkReturn> {
        let src = self;
        if src.direction() != PadDirection::Src || sink.direction() != PadDirection::Sink {
            return Err(Error::Pad(format!(
                "cannot link {} ({:?}) to {} ({:?})",
                src.path(),
                src.direction(),
                sink.path(),
                sink.direction()
            )));
        }
        if src.is_linked() || sink.is_linked() {
            return Err(Error::Pad(format!(
                "{} or {} is already linked",
                src.path(),
                sink.path()
            )));
        }

        let common = src.query_caps().intersect(&sink.query_caps());
        if common.is_empty() {
            tracing::debug!(src = %src.path(), sink = %sink.path(), "no common caps, link refused");
            return Ok(PadLinkReturn::Refused);
        }

        let mut ret = PadLinkReturn::Ok;
        let mut accepted: SmallVec<[&Pad; 2]> = SmallVec::new();
        for (pad, peer) in [(src, sink), (sink, src)] {
            match pad.inner.handler.link(pad, peer) {
                PadLinkReturn::Refused => {
                    tracing::debug!(pad = %pad.path(), "link function refused");
                    for pad in accepted {
                        pad.inner.handler.unlink(pad);
                    }
                    return Ok(PadLinkReturn::Refused);
                }
                PadLinkReturn::Delayed => ret = PadLinkReturn::Delayed,
                PadLinkReturn::Ok => {}
            }
            accepted.push(pad);
        }

        {
            let mut s = src.inner.link.lock();
            let mut k = sink.inner.link.lock();
            if s.peer.is_some() || k.peer.is_some() {
                return Err(Error::Pad(format!(
                    "{} or {} was linked concurrently",
                    src.path(),
                    sink.path()
                )));
            }
            s.peer = Some(Arc::downgrade(&sink.inner));
            k.peer = Some(Arc::downgrade(&src.inner));
            s.allowed = Some(common.clone());
            k.allowed = Some(common.clone());
        }

        if ret == PadLinkReturn::Ok && common.is_fixed() {
            if !src.apply_link_caps(sink, &common) {
                src.unlink();
                return Ok(PadLinkReturn::Refused);
            }
        } else {
            ret = PadLinkReturn::Delayed;
        }

        if let Some(scheduler) = src.parent_element().and_then(|e| e.scheduler()) {
            scheduler.pad_link(src, sink);
        }
        tracing::debug!(src = %src.path(), sink = %sink.path(), caps = %common, result = ?ret, "linked");
        Ok(ret)
    }

    /// Break the link, if any. Returns false if the pad was not linked.
    pub fn unlink(&self) -> bool {
        let weak = {
            let mut link = self.inner.link.lock();
            link.allowed = None;
            link.negotiated = None;
            link.peer.take()
        };
        let Some(weak) = weak else {
            return false;
        };

        let peer = weak.upgrade().map(|inner| Pad { inner });
        if let Some(peer) = &peer {
            let mut link = peer.inner.link.lock();
            if link
                .peer
                .as_ref()
                .is_some_and(|p| std::ptr::eq(p.as_ptr(), Arc::as_ptr(&self.inner)))
            {
                *link = LinkState::default();
            }
        }

        self.inner.handler.unlink(self);
        if let Some(peer) = &peer {
            peer.inner.handler.unlink(peer);
            let (src, sink) = match self.direction() {
                PadDirection::Src => (self, peer),
                PadDirection::Sink => (peer, self),
            };
            if let Some(scheduler) = src.parent_element().and_then(|e| e.scheduler()) {
                scheduler.pad_unlink(src, sink);
            }
            tracing::debug!(src = %src.path(), sink = %sink.path(), "unlinked");
        }
        true
    }

    /// Recompute caps on an existing link and fixate them (ranges to their
    /// minimum, lists to their first member).
    pub fn renegotiate(&self) -> PadLinkReturn {
        let Some(peer) = self.peer() else {
            return PadLinkReturn::Refused;
        };
        let (src, sink) = match self.direction() {
            PadDirection::Src => (self, &peer),
            PadDirection::Sink => (&peer, self),
        };
        let common = src.query_caps().intersect(&sink.query_caps());
        if common.is_empty() {
            tracing::debug!(src = %src.path(), sink = %sink.path(), "renegotiation found no common caps");
            return PadLinkReturn::Refused;
        }
        src.inner.link.lock().allowed = Some(common.clone());
        sink.inner.link.lock().allowed = Some(common.clone());

        let Some(fixed) = common.fixate() else {
            return PadLinkReturn::Delayed;
        };
        if src.apply_link_caps(sink, &fixed) {
            tracing::debug!(src = %src.path(), caps = %fixed, "renegotiated");
            PadLinkReturn::Ok
        } else {
            PadLinkReturn::Refused
        }
    }

    /// Settle caps for `buffer` on a link that is delayed or whose buffer
    /// carries new caps.
    fn negotiate_for_buffer(&self, peer: &Pad, buffer: &Buffer) -> std::result::Result<(), FlowError> {
        let (allowed, negotiated) = {
            let link = self.inner.link.lock();
            (link.allowed.clone(), link.negotiated.clone())
        };
        match buffer.caps() {
            Some(caps) if negotiated.as_ref() == Some(caps) => Ok(()),
            Some(caps) => {
                let allowed = allowed.unwrap_or_else(Caps::any);
                if !caps.is_fixed() || !Caps::check_compatibility(caps, &allowed) {
                    tracing::warn!(pad = %self.path(), %caps, %allowed, "buffer caps not acceptable on link");
                    return Err(FlowError::NotNegotiated);
                }
                if self.apply_link_caps(peer, caps) {
                    Ok(())
                } else {
                    Err(FlowError::NotNegotiated)
                }
            }
            None if negotiated.is_some() => Ok(()),
            None => match self.renegotiate() {
                PadLinkReturn::Refused => Err(FlowError::NotNegotiated),
                _ => Ok(()),
            },
        }
    }

    /// Push a buffer out of this source pad into its peer.
    pub fn push(&self, buffer: Buffer) -> FlowResult {
        if self.direction() != PadDirection::Src {
            tracing::error!(pad = %self.path(), "push on a sink pad");
            return Err(FlowError::Error);
        }
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        let Some(peer) = self.peer() else {
            tracing::trace!(pad = %self.path(), "push on unlinked pad");
            return Err(FlowError::NotLinked);
        };
        self.negotiate_for_buffer(&peer, &buffer)?;
        metrics::record_buffer_pushed(self.name(), buffer.len());
        let result = peer.chain(buffer);
        if let Err(err) = result
            && err.is_fatal()
        {
            metrics::record_flow_error(err);
        }
        result
    }

    /// Deliver a buffer to this sink pad's chain handler.
    pub fn chain(&self, buffer: Buffer) -> FlowResult {
        if self.direction() != PadDirection::Sink {
            tracing::error!(pad = %self.path(), "chain on a source pad");
            return Err(FlowError::Error);
        }
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        if self.inner.eos.load(Ordering::Acquire) {
            return Err(FlowError::Eos);
        }
        self.inner.handler.chain(self, buffer)
    }

    /// Pull `size` bytes at `offset` from the peer of this sink pad.
    pub fn pull_range(&self, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        if self.direction() != PadDirection::Sink {
            tracing::error!(pad = %self.path(), "pull on a source pad");
            return Err(FlowError::Error);
        }
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        let peer = self.peer().ok_or(FlowError::NotLinked)?;
        peer.get_range(offset, size)
    }

    /// Ask this source pad's get-range handler for data.
    pub fn get_range(&self, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        if self.direction() != PadDirection::Src {
            return Err(FlowError::Error);
        }
        if self.is_flushing() {
            return Err(FlowError::Flushing);
        }
        self.inner.handler.get_range(self, offset, size)
    }

    /// Send an event out of this pad to its peer. Downstream events leave
    /// through source pads, upstream events through sink pads.
    pub fn push_event(&self, event: Event) -> bool {
        let allowed = match self.direction() {
            PadDirection::Src => event.is_downstream(),
            PadDirection::Sink => event.is_upstream(),
        };
        if !allowed {
            tracing::warn!(pad = %self.path(), event = event.name(), "event pushed in the wrong direction");
            return false;
        }
        match self.peer() {
            Some(peer) => peer.send_event(event),
            None => {
                tracing::trace!(pad = %self.path(), event = event.name(), "event dropped on unlinked pad");
                false
            }
        }
    }

    /// Deliver an event to this pad's handler.
    pub fn send_event(&self, event: Event) -> bool {
        match &event {
            Event::FlushStart => self.set_flushing(true),
            Event::FlushStop => {
                self.set_flushing(false);
                self.inner.eos.store(false, Ordering::Release);
            }
            _ if self.is_flushing() && event.is_serialized() => {
                tracing::debug!(pad = %self.path(), event = event.name(), "dropping event while flushing");
                return false;
            }
            Event::Eos if self.direction() == PadDirection::Sink => {
                self.inner.eos.store(true, Ordering::Release);
            }
            _ => {}
        }
        tracing::trace!(pad = %self.path(), event = event.name(), "event");
        self.inner.handler.event(self, event)
    }

    /// Forward `event` through every pad of the parent element facing the
    /// other way. True if there was nowhere to forward to or any forward
    /// succeeded.
    pub fn event_default(&self, event: Event) -> bool {
        let Some(parent) = self.parent_element() else {
            return false;
        };
        let targets: Vec<Pad> = parent
            .pads()
            .into_iter()
            .filter(|p| p.direction() != self.direction())
            .collect();
        if targets.is_empty() {
            return true;
        }
        let mut handled = false;
        for pad in targets {
            handled |= pad.push_event(event.clone());
        }
        handled
    }

    /// Ask this pad a question.
    pub fn query(&self, query: &mut Query) -> bool {
        self.inner.handler.query(self, query)
    }

    /// Ask the peer a question.
    pub fn peer_query(&self, query: &mut Query) -> bool {
        self.peer().is_some_and(|peer| peer.query(query))
    }

    /// Caps queries are answered from [`query_caps`](Self::query_caps);
    /// others are passed to the peers of the parent's opposite pads until
    /// one answers.
    pub fn query_default(&self, query: &mut Query) -> bool {
        if let Query::Caps { .. } = query {
            query.set_caps_result(self.query_caps());
            return true;
        }
        let Some(parent) = self.parent_element() else {
            return false;
        };
        parent
            .pads()
            .into_iter()
            .filter(|p| p.direction() != self.direction())
            .any(|p| p.peer_query(query))
    }

    /// Refuse (true) or accept data.
    pub fn set_flushing(&self, flushing: bool) {
        self.inner.flushing.store(flushing, Ordering::Release);
    }

    /// Whether the pad refuses data.
    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::Acquire)
    }

    /// Whether EOS arrived on this sink pad.
    pub fn is_eos(&self) -> bool {
        self.inner.eos.load(Ordering::Acquire)
    }

    pub(crate) fn clear_eos(&self) {
        self.inner.eos.store(false, Ordering::Release);
    }

    pub(crate) fn same_as(&self, other: &Pad) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Pad {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for Pad {}

impl fmt::Debug for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pad")
            .field("path", &self.path())
            .field("direction", &self.inner.direction)
            .field("linked", &self.is_linked())
            .finish()
    }
}

//! Ghost pads expose a pad of an element inside a bin as a pad of the bin.
//!
//! A ghost pad is an ordinary [`Pad`] (the external pad) paired with a
//! hidden internal pad of the opposite direction. The internal pad is linked
//! to the target while the ghost pad has a parent; data and events crossing
//! the bin boundary hop between the two without being touched.

use super::{FlowResult, Pad, PadDirection, PadHandler, PadLinkReturn, PadTemplate, WeakPad};
use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::error::{Error, Result};
use crate::event::{Event, Query};
use crate::pad::FlowError;
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::{Arc, Weak};

struct GhostShared {
    external: Mutex<WeakPad>,
    internal: Pad,
    target: Mutex<Option<Pad>>,
}

impl GhostShared {
    fn external(&self) -> Option<Pad> {
        self.external.lock().upgrade()
    }

    fn target(&self) -> Option<Pad> {
        self.target.lock().clone()
    }

    fn link_internal(&self) -> Result<PadLinkReturn> {
        let Some(target) = self.target() else {
            return Ok(PadLinkReturn::Delayed);
        };
        if self.internal.is_linked() {
            return Ok(PadLinkReturn::Ok);
        }
        match self.internal.direction() {
            PadDirection::Src => self.internal.link(&target),
            PadDirection::Sink => target.link(&self.internal),
        }
    }
}

/// Behaviour of the external pad.
struct GhostHandler {
    shared: Arc<GhostShared>,
}

impl PadHandler for GhostHandler {
    fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.shared.internal.push(buffer)
    }

    fn get_range(&self, _pad: &Pad, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        self.shared.internal.pull_range(offset, size)
    }

    fn event(&self, _pad: &Pad, event: Event) -> bool {
        self.shared.internal.push_event(event)
    }

    fn query(&self, pad: &Pad, query: &mut Query) -> bool {
        match self.shared.target() {
            Some(target) => target.query(query),
            None => pad.query_default(query),
        }
    }

    fn get_caps(&self, _pad: &Pad) -> Option<Caps> {
        self.shared.target().map(|t| t.query_caps())
    }

    fn set_caps(&self, _pad: &Pad, caps: &Caps) -> bool {
        self.shared
            .target()
            .is_none_or(|t| Caps::check_compatibility(caps, &t.query_caps()))
    }

    fn link(&self, pad: &Pad, _peer: &Pad) -> PadLinkReturn {
        if pad.parent_element().is_none() {
            return PadLinkReturn::Ok;
        }
        match self.shared.link_internal() {
            Ok(PadLinkReturn::Refused) | Err(_) => PadLinkReturn::Refused,
            Ok(_) => PadLinkReturn::Ok,
        }
    }

    fn unlink(&self, _pad: &Pad) {
        self.shared.internal.unlink();
    }

    fn parent_set(&self, pad: &Pad) {
        if let Err(err) = self.shared.link_internal() {
            tracing::warn!(pad = %pad.path(), %err, "ghost pad could not link its target");
        }
    }

    fn parent_unset(&self, _pad: &Pad) {
        self.shared.internal.unlink();
    }
}

/// Behaviour of the internal pad: bounce everything to the external pad.
struct GhostInternalHandler {
    shared: Weak<GhostShared>,
}

impl GhostInternalHandler {
    fn external(&self) -> Option<Pad> {
        self.shared.upgrade().and_then(|s| s.external())
    }
}

impl PadHandler for GhostInternalHandler {
    fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
        match self.external() {
            Some(ext) => ext.push(buffer),
            None => Err(FlowError::NotLinked),
        }
    }

    fn get_range(&self, _pad: &Pad, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        match self.external() {
            Some(ext) => ext.pull_range(offset, size),
            None => Err(FlowError::NotLinked),
        }
    }

    fn event(&self, _pad: &Pad, event: Event) -> bool {
        self.external().is_some_and(|ext| ext.push_event(event))
    }

    fn query(&self, _pad: &Pad, query: &mut Query) -> bool {
        self.external().is_some_and(|ext| ext.peer_query(query))
    }

    fn get_caps(&self, _pad: &Pad) -> Option<Caps> {
        self.external().and_then(|ext| ext.peer_query_caps())
    }
}

/// A pad of a bin standing in for a pad of one of its children.
///
/// Dereferences to the external [`Pad`], which is what gets added to the
/// bin and linked from outside.
#[derive(Clone)]
pub struct GhostPad {
    pad: Pad,
    shared: Arc<GhostShared>,
}

impl GhostPad {
    /// Ghost pad with the direction and template of `target`.
    pub fn new(name: impl Into<String>, target: &Pad) -> Self {
        let ghost = Self::build(name.into(), target.direction(), target.template().cloned());
        *ghost.shared.target.lock() = Some(target.clone());
        ghost
    }

    /// Ghost pad without a target yet.
    pub fn new_no_target(name: impl Into<String>, direction: PadDirection) -> Self {
        Self::build(name.into(), direction, None)
    }

    /// Ghost pad without a target whose caps fall back to `template`.
    pub fn from_template(name: impl Into<String>, template: &PadTemplate) -> Self {
        Self::build(name.into(), template.direction(), Some(template.clone()))
    }

    fn build(name: String, direction: PadDirection, template: Option<PadTemplate>) -> Self {
        let internal_name = format!("{name}-internal");
        let shared = Arc::new_cyclic(|weak: &Weak<GhostShared>| GhostShared {
            external: Mutex::new(WeakPad::default()),
            internal: Pad::builder(internal_name, direction.opposite())
                .handler(Arc::new(GhostInternalHandler {
                    shared: weak.clone(),
                }))
                .build(),
            target: Mutex::new(None),
        });
        let mut builder = Pad::builder(name, direction).handler(Arc::new(GhostHandler {
            shared: Arc::clone(&shared),
        }));
        if let Some(template) = template {
            builder = builder.template(template);
        }
        let pad = builder.build();
        *shared.external.lock() = pad.downgrade();
        Self { pad, shared }
    }

    /// Retarget. The old internal link is dropped; a new one is made at
    /// once if the ghost pad already has a parent.
    ///
    /// # Errors
    ///
    /// [`Error::Pad`] if `target` faces the wrong way or the new internal
    /// link is refused.
    pub fn set_target(&self, target: Option<&Pad>) -> Result<()> {
        if let Some(t) = target
            && t.direction() != self.pad.direction()
        {
            return Err(Error::Pad(format!(
                "ghost pad {} cannot target {} of the opposite direction",
                self.pad.path(),
                t.path()
            )));
        }
        self.shared.internal.unlink();
        *self.shared.target.lock() = target.cloned();
        if self.pad.parent_element().is_some()
            && self.shared.link_internal()? == PadLinkReturn::Refused
        {
            return Err(Error::Pad(format!(
                "ghost pad {} refused by its target",
                self.pad.path()
            )));
        }
        Ok(())
    }

    /// Current target.
    pub fn target(&self) -> Option<Pad> {
        self.shared.target()
    }

    /// The hidden pad linked to the target.
    pub fn internal(&self) -> &Pad {
        &self.shared.internal
    }

    /// The external pad.
    pub fn pad(&self) -> &Pad {
        &self.pad
    }
}

impl Deref for GhostPad {
    type Target = Pad;

    fn deref(&self) -> &Pad {
        &self.pad
    }
}

impl std::fmt::Debug for GhostPad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostPad")
            .field("pad", &self.pad)
            .field("target", &self.target().map(|t| t.path()))
            .finish()
    }
}

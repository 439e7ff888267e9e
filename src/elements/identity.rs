//! Pass-through element.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, StateChange, StateChangeError, StateChangeSuccess};
use crate::error::{ErrorDomain, Result};
use crate::pad::{FlowError, FlowResult, Pad, PadDirection, PadHandler, PadTemplate};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback type for buffer inspection.
pub type BufferCallback = Arc<dyn Fn(&Buffer) + Send + Sync>;

#[derive(Default)]
struct IdentityState {
    buffers: AtomicU64,
    bytes: AtomicU64,
}

/// Element pushing every buffer it receives on `sink` out of `src`
/// unchanged.
///
/// Caps queries are answered by the peer on the other side, so an identity
/// in the middle of a link does not change what gets negotiated. With
/// `error_after(n)` the element fails the stream on buffer `n + 1`.
pub struct Identity {
    state: Arc<IdentityState>,
}

enum Side {
    Sink {
        state: Arc<IdentityState>,
        callback: Option<BufferCallback>,
        error_after: Option<u64>,
    },
    Src,
}

struct IdentityPad(Side);

impl IdentityPad {
    fn other(pad: &Pad) -> Option<Pad> {
        let element = pad.parent_element()?;
        match pad.direction() {
            PadDirection::Sink => element.pad("src"),
            PadDirection::Src => element.pad("sink"),
        }
    }
}

impl PadHandler for IdentityPad {
    fn chain(&self, pad: &Pad, buffer: Buffer) -> FlowResult {
        let Side::Sink {
            state,
            callback,
            error_after,
        } = &self.0
        else {
            return Err(FlowError::NotSupported);
        };
        let seen = state.buffers.fetch_add(1, Ordering::AcqRel);
        if error_after.is_some_and(|limit| seen >= limit) {
            if let Some(element) = pad.parent_element() {
                element.post_error(
                    ErrorDomain::Stream,
                    format!("failing after {seen} buffers"),
                    None,
                );
            }
            return Err(FlowError::Error);
        }
        state.bytes.fetch_add(buffer.len() as u64, Ordering::AcqRel);
        if let Some(callback) = callback {
            callback(&buffer);
        }
        Self::other(pad).ok_or(FlowError::Error)?.push(buffer)
    }

    fn get_range(&self, pad: &Pad, offset: u64, size: usize) -> std::result::Result<Buffer, FlowError> {
        match self.0 {
            Side::Src => Self::other(pad).ok_or(FlowError::Error)?.pull_range(offset, size),
            Side::Sink { .. } => Err(FlowError::NotSupported),
        }
    }

    fn get_caps(&self, pad: &Pad) -> Option<Caps> {
        Self::other(pad)?.peer_query_caps()
    }
}

/// Settings for an [`Identity`].
#[derive(Default)]
pub struct IdentityBuilder {
    callback: Option<BufferCallback>,
    error_after: Option<u64>,
}

impl IdentityBuilder {
    /// Call `f` for each buffer before pushing it on.
    pub fn on_buffer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Buffer) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// Fail with a stream error once `n` buffers went through.
    pub fn error_after(mut self, n: u64) -> Self {
        self.error_after = Some(n);
        self
    }

    /// Create the element.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn build(self, name: impl Into<String>) -> Result<Element> {
        let state = Arc::new(IdentityState::default());
        let sink = Pad::builder_from_template(&PadTemplate::sink("sink", Caps::any()), "sink")
            .handler(Arc::new(IdentityPad(Side::Sink {
                state: Arc::clone(&state),
                callback: self.callback,
                error_after: self.error_after,
            })))
            .build();
        let src = Pad::builder_from_template(&PadTemplate::src("src", Caps::any()), "src")
            .handler(Arc::new(IdentityPad(Side::Src)))
            .build();
        Element::builder(name, Identity { state })
            .pad(sink)
            .pad(src)
            .build()
    }
}

impl Identity {
    /// Identity with default settings.
    ///
    /// # Errors
    ///
    /// Propagates pad registration failures.
    pub fn new(name: impl Into<String>) -> Result<Element> {
        Self::builder().build(name)
    }

    /// Start configuring an identity.
    pub fn builder() -> IdentityBuilder {
        IdentityBuilder::default()
    }

    /// Buffers that went through an `Identity` element.
    pub fn buffer_count(element: &Element) -> u64 {
        element
            .downcast_imp::<Identity>()
            .map_or(0, |i| i.state.buffers.load(Ordering::Acquire))
    }

    /// Bytes that went through an `Identity` element.
    pub fn byte_count(element: &Element) -> u64 {
        element
            .downcast_imp::<Identity>()
            .map_or(0, |i| i.state.bytes.load(Ordering::Acquire))
    }
}

impl ElementImpl for Identity {
    fn change_state(
        &self,
        _element: &Element,
        transition: StateChange,
    ) -> std::result::Result<StateChangeSuccess, StateChangeError> {
        if transition == StateChange::ReadyToPaused {
            self.state.buffers.store(0, Ordering::Release);
            self.state.bytes.store(0, Ordering::Release);
        }
        Ok(StateChangeSuccess::Success)
    }

    fn pad_templates(&self) -> Vec<PadTemplate> {
        vec![
            PadTemplate::sink("sink", Caps::any()),
            PadTemplate::src("src", Caps::any()),
        ]
    }
}

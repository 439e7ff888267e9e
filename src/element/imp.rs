//! The trait element authors implement.

use super::{Element, StateChange, StateChangeError, StateChangeSuccess};
use crate::clock::Clock;
use crate::pad::{FlowError, FlowResult, Pad, PadTemplate};
use std::sync::Arc;

/// Element behaviour.
///
/// Pads carry the data-path behaviour (see
/// [`PadHandler`](crate::pad::PadHandler)); this trait covers what belongs
/// to the element as a whole: state transitions, clocking, request pads
/// and, for elements that drive the stream themselves, one loop iteration.
///
/// # Example
///
/// ```rust
/// use padflow::element::{Element, ElementImpl, State, StateChange, StateChangeError, StateChangeSuccess};
///
/// struct Opener;
///
/// impl ElementImpl for Opener {
///     fn change_state(
///         &self,
///         element: &Element,
///         transition: StateChange,
///     ) -> Result<StateChangeSuccess, StateChangeError> {
///         if transition == StateChange::ReadyToPaused {
///             return Err(StateChangeError::new(element.name(), transition, "nothing to open"));
///         }
///         Ok(StateChangeSuccess::Success)
///     }
/// }
///
/// let element = Element::new("opener", Opener);
/// assert!(element.set_state(State::Playing).is_err());
/// assert_eq!(element.state(), State::Ready);
/// ```
pub trait ElementImpl: Send + Sync + 'static {
    /// Side effects of one adjacent state step.
    fn change_state(
        &self,
        _element: &Element,
        _transition: StateChange,
    ) -> Result<StateChangeSuccess, StateChangeError> {
        Ok(StateChangeSuccess::Success)
    }

    /// Templates of the pads this element can have.
    fn pad_templates(&self) -> Vec<PadTemplate> {
        Vec::new()
    }

    /// Create a pad for a request template. The element adds it.
    fn request_new_pad(&self, _element: &Element, _template: &PadTemplate, _name: &str) -> Option<Pad> {
        None
    }

    /// A request pad is about to be removed.
    fn release_pad(&self, _element: &Element, _pad: &Pad) {}

    /// Whether [`provide_clock`](Self::provide_clock) returns a clock.
    fn provides_clock(&self) -> bool {
        false
    }

    /// The clock this element offers to the pipeline.
    fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        None
    }

    /// Preference among clock providers; higher wins.
    fn clock_priority(&self) -> u32 {
        0
    }

    /// Whether the element wants the pipeline clock.
    fn requires_clock(&self) -> bool {
        false
    }

    /// The pipeline clock was distributed (or withdrawn with `None`).
    fn set_clock(&self, _element: &Element, _clock: Option<&Arc<dyn Clock>>) {}

    /// Whether the scheduler should call [`iterate`](Self::iterate).
    fn is_loop_based(&self) -> bool {
        false
    }

    /// One step of the element's own loop: produce and push one buffer,
    /// or pull and consume one. An `Err` stops the loop.
    fn iterate(&self, _element: &Element) -> FlowResult {
        Err(FlowError::NotSupported)
    }

    /// Wake up anything blocked inside the element so its loop can be
    /// stopped.
    fn unlock(&self, _element: &Element) {}
}

/// Implementation with every default, for containers and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopElement;

impl ElementImpl for NoopElement {}

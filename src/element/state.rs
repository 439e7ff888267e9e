//! Element states and transitions.

use thiserror::Error;

/// Lifecycle state of an element. Ordered `Null < Ready < Paused < Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum State {
    /// Initial state; no resources held.
    #[default]
    Null,
    /// Resources allocated, no stream open.
    Ready,
    /// Stream open and prerolled; clock stopped.
    Paused,
    /// Data flowing; clock running.
    Playing,
}

impl State {
    /// The adjacent state one step toward `target`, `None` if already there.
    pub fn next_toward(self, target: State) -> Option<State> {
        use State::*;
        match self.cmp(&target) {
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Less => Some(match self {
                Null => Ready,
                Ready => Paused,
                Paused | Playing => Playing,
            }),
            std::cmp::Ordering::Greater => Some(match self {
                Playing => Paused,
                Paused => Ready,
                Ready | Null => Null,
            }),
        }
    }
}

/// A single adjacent step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateChange {
    /// Allocate resources.
    NullToReady,
    /// Open the stream, activate pads.
    ReadyToPaused,
    /// Start the clock.
    PausedToPlaying,
    /// Stop the clock.
    PlayingToPaused,
    /// Close the stream, flush pads, reset cursors.
    PausedToReady,
    /// Release resources.
    ReadyToNull,
}

impl StateChange {
    /// The step from `from` to the adjacent `to`; `None` if they are not
    /// adjacent.
    pub fn new(from: State, to: State) -> Option<Self> {
        use State::*;
        Some(match (from, to) {
            (Null, Ready) => StateChange::NullToReady,
            (Ready, Paused) => StateChange::ReadyToPaused,
            (Paused, Playing) => StateChange::PausedToPlaying,
            (Playing, Paused) => StateChange::PlayingToPaused,
            (Paused, Ready) => StateChange::PausedToReady,
            (Ready, Null) => StateChange::ReadyToNull,
            _ => return None,
        })
    }

    /// State before the step.
    pub fn current(self) -> State {
        match self {
            StateChange::NullToReady => State::Null,
            StateChange::ReadyToPaused | StateChange::ReadyToNull => State::Ready,
            StateChange::PausedToPlaying | StateChange::PausedToReady => State::Paused,
            StateChange::PlayingToPaused => State::Playing,
        }
    }

    /// State after the step.
    pub fn next(self) -> State {
        match self {
            StateChange::ReadyToNull => State::Null,
            StateChange::NullToReady | StateChange::PausedToReady => State::Ready,
            StateChange::ReadyToPaused | StateChange::PlayingToPaused => State::Paused,
            StateChange::PausedToPlaying => State::Playing,
        }
    }

    /// Whether the step moves toward `Playing`.
    pub fn is_upward(self) -> bool {
        self.next() > self.current()
    }
}

/// A state step that went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeSuccess {
    /// The step is complete.
    Success,
    /// The step completes later; call
    /// [`Element::continue_state`](super::Element::continue_state) when done.
    Async,
    /// The step is complete but the element cannot preroll (live source).
    NoPreroll,
}

/// A state step that failed. The element stays at its last reached state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("state change {transition:?} of {element} failed: {reason}")]
pub struct StateChangeError {
    /// Element that failed.
    pub element: String,
    /// Step that failed.
    pub transition: StateChange,
    /// Why.
    pub reason: String,
}

impl StateChangeError {
    /// Failure of `transition` on `element`.
    pub fn new(element: impl Into<String>, transition: StateChange, reason: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            transition,
            reason: reason.into(),
        }
    }
}

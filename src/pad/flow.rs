use thiserror::Error;

/// Successful outcome of pushing or chaining a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSuccess {
    /// The buffer was accepted.
    Ok,
    /// A loop step found nothing to do yet; try again later.
    Idle,
}

/// Why a buffer did not flow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowError {
    /// The pad has no peer.
    #[error("pad is not linked")]
    NotLinked,
    /// The pad is flushing or inactive.
    #[error("pad is flushing")]
    Flushing,
    /// The receiver already got end-of-stream.
    #[error("end of stream")]
    Eos,
    /// Caps could not be agreed for this buffer.
    #[error("not negotiated")]
    NotNegotiated,
    /// The pad cannot do this (e.g. pull on a push-only source).
    #[error("operation not supported")]
    NotSupported,
    /// Fatal element error; details are posted on the bus.
    #[error("element error")]
    Error,
}

impl FlowError {
    /// Short name for logs and metric labels.
    pub fn name(self) -> &'static str {
        match self {
            FlowError::NotLinked => "not-linked",
            FlowError::Flushing => "flushing",
            FlowError::Eos => "eos",
            FlowError::NotNegotiated => "not-negotiated",
            FlowError::NotSupported => "not-supported",
            FlowError::Error => "error",
        }
    }

    /// Whether streaming should stop with an error message, as opposed to a
    /// normal shutdown (EOS, flushing).
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            FlowError::NotLinked | FlowError::NotNegotiated | FlowError::Error
        )
    }
}

/// Result of moving one buffer.
pub type FlowResult = Result<FlowSuccess, FlowError>;

/// Outcome of a link attempt or renegotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadLinkReturn {
    /// Linked with fixed caps agreed on both sides.
    Ok,
    /// Linked, caps are not fixed yet; they will be settled by the first
    /// buffer carrying caps or by renegotiation.
    Delayed,
    /// No common caps, or a pad refused; the pads stay unlinked.
    Refused,
}

impl PadLinkReturn {
    /// True for `Ok` and `Delayed`.
    pub fn is_linked(self) -> bool {
        !matches!(self, PadLinkReturn::Refused)
    }
}

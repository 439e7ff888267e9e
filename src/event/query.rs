use crate::caps::Caps;
use crate::clock::ClockTime;

/// A question asked of a pad, answered in place.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Current stream position.
    Position {
        /// Answer.
        result: Option<ClockTime>,
    },
    /// Total stream duration.
    Duration {
        /// Answer.
        result: Option<ClockTime>,
    },
    /// Pipeline latency.
    Latency {
        /// Whether the upstream is live.
        live: bool,
        /// Minimum latency.
        min: ClockTime,
        /// Maximum latency, NONE for unbounded.
        max: ClockTime,
    },
    /// Caps a pad can handle.
    Caps {
        /// Restrict the answer to caps compatible with this.
        filter: Option<Caps>,
        /// Answer.
        result: Option<Caps>,
    },
}

impl Query {
    /// Ask for the position.
    pub fn position() -> Self {
        Query::Position { result: None }
    }

    /// Ask for the duration.
    pub fn duration() -> Self {
        Query::Duration { result: None }
    }

    /// Ask for the latency.
    pub fn latency() -> Self {
        Query::Latency {
            live: false,
            min: ClockTime::ZERO,
            max: ClockTime::NONE,
        }
    }

    /// Ask for caps, optionally filtered.
    pub fn caps(filter: Option<Caps>) -> Self {
        Query::Caps {
            filter,
            result: None,
        }
    }

    /// Name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Query::Position { .. } => "position",
            Query::Duration { .. } => "duration",
            Query::Latency { .. } => "latency",
            Query::Caps { .. } => "caps",
        }
    }

    /// The answered time of a position or duration query.
    pub fn time_result(&self) -> Option<ClockTime> {
        match self {
            Query::Position { result } | Query::Duration { result } => *result,
            _ => None,
        }
    }

    /// Answer a caps query, applying its filter.
    pub fn set_caps_result(&mut self, caps: Caps) {
        if let Query::Caps { filter, result } = self {
            *result = Some(match filter {
                Some(f) => f.intersect(&caps),
                None => caps,
            });
        }
    }

    /// The answered caps of a caps query.
    pub fn caps_result(&self) -> Option<&Caps> {
        match self {
            Query::Caps { result, .. } => result.as_ref(),
            _ => None,
        }
    }
}

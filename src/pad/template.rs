use crate::caps::Caps;

/// Direction of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data.
    Src,
    /// Consumes data.
    Sink,
}

impl PadDirection {
    /// The other direction.
    pub fn opposite(self) -> Self {
        match self {
            PadDirection::Src => PadDirection::Sink,
            PadDirection::Sink => PadDirection::Src,
        }
    }
}

/// Whether a pad is always present or created dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is always present on the element.
    Always,
    /// Pad appears while streaming (e.g. demuxers).
    Sometimes,
    /// Pad is created when requested.
    Request,
}

/// Template describing pads an element can have.
#[derive(Debug, Clone, PartialEq)]
pub struct PadTemplate {
    name: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Caps,
}

impl PadTemplate {
    /// Template accepting `caps`.
    pub fn new(
        name: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: Caps,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Always-present source template.
    pub fn src(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PadDirection::Src, PadPresence::Always, caps)
    }

    /// Always-present sink template.
    pub fn sink(name: impl Into<String>, caps: Caps) -> Self {
        Self::new(name, PadDirection::Sink, PadPresence::Always, caps)
    }

    /// Name or name pattern (`"src_%u"`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direction.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Presence.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Caps pads of this template accept.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Concrete pad name for the `index`th pad of this template.
    pub fn pad_name(&self, index: u32) -> String {
        if self.name.contains("%u") {
            self.name.replace("%u", &index.to_string())
        } else {
            self.name.clone()
        }
    }
}

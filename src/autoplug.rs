//! Element factories and single-hop autoplugging.
//!
//! An [`ElementFactory`] describes an element by name, rank and pad
//! templates, and knows how to create one. A [`Registry`] holds factories
//! ordered by rank. When two pads cannot be linked directly,
//! [`Bin::autoplug_link`] tries the factories ranked above
//! [`RANK_NONE`] whose templates fit between them, best rank first, and
//! keeps the first element that links on both sides.

use crate::caps::Caps;
use crate::element::{Bin, Element};
use crate::elements::{FakeSink, FakeSrc, Identity, Queue};
use crate::error::{Error, Result};
use crate::pad::{Pad, PadDirection, PadLinkReturn, PadTemplate};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Never picked by autoplugging.
pub const RANK_NONE: u32 = 0;
/// Picked only when nothing better exists.
pub const RANK_MARGINAL: u32 = 64;
/// Good, but not the first choice.
pub const RANK_SECONDARY: u32 = 128;
/// First choice.
pub const RANK_PRIMARY: u32 = 256;

/// Creates an element with the given name.
pub type ElementConstructor = Arc<dyn Fn(&str) -> Result<Element> + Send + Sync>;

/// A named, ranked recipe for an element.
#[derive(Clone)]
pub struct ElementFactory {
    name: String,
    rank: u32,
    templates: Vec<PadTemplate>,
    constructor: ElementConstructor,
}

impl ElementFactory {
    /// Factory `name` at `rank` calling `constructor`.
    pub fn new<F>(name: impl Into<String>, rank: u32, constructor: F) -> Self
    where
        F: Fn(&str) -> Result<Element> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            rank,
            templates: Vec::new(),
            constructor: Arc::new(constructor),
        }
    }

    /// Declare a pad template of the elements this factory makes.
    pub fn template(mut self, template: PadTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Factory name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Autoplug preference; higher wins.
    pub fn rank(&self) -> u32 {
        self.rank
    }

    /// Declared pad templates.
    pub fn templates(&self) -> &[PadTemplate] {
        &self.templates
    }

    fn accepts(&self, direction: PadDirection, caps: &Caps) -> bool {
        self.templates
            .iter()
            .filter(|t| t.direction() == direction)
            .any(|t| !t.caps().intersect(caps).is_empty())
    }

    /// Whether a sink template can take `caps`.
    pub fn can_sink_caps(&self, caps: &Caps) -> bool {
        self.accepts(PadDirection::Sink, caps)
    }

    /// Whether a source template can produce something `caps` accepts.
    pub fn can_src_caps(&self, caps: &Caps) -> bool {
        self.accepts(PadDirection::Src, caps)
    }

    /// Create an element named `name`.
    ///
    /// # Errors
    ///
    /// Whatever the constructor reports.
    pub fn create(&self, name: &str) -> Result<Element> {
        (self.constructor)(name)
    }
}

impl fmt::Debug for ElementFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementFactory")
            .field("name", &self.name)
            .field("rank", &self.rank)
            .field("templates", &self.templates.len())
            .finish()
    }
}

/// Element factories, best rank first.
#[derive(Default)]
pub struct Registry {
    factories: RwLock<Vec<ElementFactory>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the reference elements, all at [`RANK_NONE`].
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let any = Caps::any;
        registry.register(
            ElementFactory::new("fakesrc", RANK_NONE, |name| FakeSrc::builder().build(name))
                .template(PadTemplate::src("src", any())),
        );
        registry.register(
            ElementFactory::new("fakesink", RANK_NONE, |name: &str| FakeSink::new(name))
                .template(PadTemplate::sink("sink", any())),
        );
        registry.register(
            ElementFactory::new("identity", RANK_NONE, |name: &str| Identity::new(name))
                .template(PadTemplate::sink("sink", any()))
                .template(PadTemplate::src("src", any())),
        );
        registry.register(
            ElementFactory::new("queue", RANK_NONE, |name: &str| Queue::new(name))
                .template(PadTemplate::sink("sink", any()))
                .template(PadTemplate::src("src", any())),
        );
        registry
    }

    /// Add `factory`, replacing one with the same name.
    pub fn register(&self, factory: ElementFactory) {
        let mut factories = self.factories.write();
        factories.retain(|f| f.name != factory.name);
        let at = factories.partition_point(|f| f.rank >= factory.rank);
        factories.insert(at, factory);
    }

    /// Factory called `name`.
    pub fn get(&self, name: &str) -> Option<ElementFactory> {
        self.factories.read().iter().find(|f| f.name == name).cloned()
    }

    /// Factory names, best rank first.
    pub fn names(&self) -> Vec<String> {
        self.factories.read().iter().map(|f| f.name.clone()).collect()
    }

    /// Create element `element_name` from factory `factory`.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownFactory`] for an unregistered factory, otherwise
    /// whatever the constructor reports.
    pub fn make(&self, factory: &str, element_name: &str) -> Result<Element> {
        self.get(factory)
            .ok_or_else(|| Error::UnknownFactory(factory.to_string()))?
            .create(element_name)
    }

    /// Autopluggable factories that could sit between `src_caps` and
    /// `sink_caps`, best rank first.
    pub fn candidates(&self, src_caps: &Caps, sink_caps: &Caps) -> Vec<ElementFactory> {
        self.factories
            .read()
            .iter()
            .filter(|f| f.rank > RANK_NONE)
            .filter(|f| f.can_sink_caps(src_caps) && f.can_src_caps(sink_caps))
            .cloned()
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry").field("factories", &self.names()).finish()
    }
}

impl Bin {
    /// Link `src` to `sink`, both pads of children, inserting one element
    /// from `registry` when they do not link directly.
    ///
    /// Returns the link result of the direct link or of the inserted
    /// element's downstream link; [`PadLinkReturn::Refused`] when no
    /// candidate fits. The inserted element is brought to the bin's state.
    ///
    /// # Errors
    ///
    /// Contract violations of the underlying links (wrong direction, already
    /// linked) and failures adding or starting the inserted element.
    pub fn autoplug_link(&self, src: &Pad, sink: &Pad, registry: &Registry) -> Result<PadLinkReturn> {
        let direct = src.link(sink)?;
        if direct.is_linked() {
            return Ok(direct);
        }
        let src_caps = src.query_caps();
        let sink_caps = sink.query_caps();
        for factory in registry.candidates(&src_caps, &sink_caps) {
            let element = factory.create(&self.unique_child_name(factory.name()))?;
            self.add(&element)?;
            match self.try_insert(&element, src, sink)? {
                PadLinkReturn::Refused => {
                    tracing::debug!(bin = %self.name(), factory = factory.name(), "candidate did not fit");
                    self.remove(&element)?;
                }
                ret => {
                    element.set_state(self.state())?;
                    tracing::debug!(
                        bin = %self.name(),
                        src = %src.path(),
                        sink = %sink.path(),
                        inserted = element.name(),
                        "autoplugged"
                    );
                    return Ok(ret);
                }
            }
        }
        tracing::debug!(bin = %self.name(), src = %src.path(), sink = %sink.path(), "nothing to autoplug");
        Ok(PadLinkReturn::Refused)
    }

    fn try_insert(&self, element: &Element, src: &Pad, sink: &Pad) -> Result<PadLinkReturn> {
        let (Some(inner_sink), Some(inner_src)) = (
            element.sink_pads().into_iter().next(),
            element.src_pads().into_iter().next(),
        ) else {
            return Ok(PadLinkReturn::Refused);
        };
        if !src.link(&inner_sink)?.is_linked() {
            return Ok(PadLinkReturn::Refused);
        }
        let ret = inner_src.link(sink)?;
        if !ret.is_linked() {
            src.unlink();
        }
        Ok(ret)
    }

    fn unique_child_name(&self, base: &str) -> String {
        (0..)
            .map(|i| format!("{base}{i}"))
            .find(|name| self.child_by_name(name).is_none())
            .unwrap_or_else(|| base.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn caps(kind: &str) -> Caps {
        Caps::builder(kind).build()
    }

    #[test]
    fn test_rank_order_and_replace() {
        let registry = Registry::new();
        registry.register(ElementFactory::new("low", RANK_MARGINAL, |name: &str| Identity::new(name)));
        registry.register(ElementFactory::new("high", RANK_PRIMARY, |name: &str| Identity::new(name)));
        registry.register(ElementFactory::new("mid", RANK_SECONDARY, |name: &str| Identity::new(name)));
        assert_eq!(registry.names(), ["high", "mid", "low"]);

        registry.register(ElementFactory::new("low", RANK_PRIMARY + 1, |name: &str| Identity::new(name)));
        assert_eq!(registry.names(), ["low", "high", "mid"]);
    }

    #[test]
    fn test_make_unknown() {
        let registry = Registry::with_builtins();
        assert!(registry.make("identity", "id").is_ok());
        assert!(matches!(registry.make("nope", "x"), Err(Error::UnknownFactory(_))));
    }

    #[test]
    fn test_every_builtin_can_be_made() {
        let registry = Registry::with_builtins();
        for factory in ["fakesrc", "fakesink", "identity", "queue"] {
            let element = registry.make(factory, factory).unwrap();
            assert_eq!(element.name(), factory);
        }
    }

    #[test]
    fn test_candidates_skip_rank_none() {
        let registry = Registry::with_builtins();
        assert!(registry.candidates(&Caps::any(), &Caps::any()).is_empty());

        registry.register(
            ElementFactory::new("a2b", RANK_PRIMARY, |name: &str| Identity::new(name))
                .template(PadTemplate::sink("sink", caps("a")))
                .template(PadTemplate::src("src", caps("b"))),
        );
        let found = registry.candidates(&caps("a"), &caps("b"));
        assert_eq!(found.len(), 1);
        assert!(registry.candidates(&caps("b"), &caps("a")).is_empty());
    }

    #[test]
    fn test_unique_names() {
        let ctx = Context::new();
        let bin = Bin::new(&ctx, "bin").unwrap();
        bin.add(&Identity::new("conv0").unwrap()).unwrap();
        assert_eq!(bin.unique_child_name("conv"), "conv1");
    }
}

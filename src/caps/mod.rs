//! Media capabilities.
//!
//! A [`Caps`] is an ordered list of alternative [`Structure`]s, or one of the
//! two special values ANY and EMPTY. Each structure is a media type plus a
//! [`Props`] set of typed constraints.
//!
//! ```rust
//! use padflow::caps::Caps;
//!
//! let sink = Caps::builder("x/raw").field("width", 1..=100).build();
//! let src = Caps::builder("x/raw").field("width", 50).build();
//!
//! assert!(Caps::check_compatibility(&src, &sink));
//! assert!(src.intersect(&sink).is_fixed());
//! ```

mod props;

pub use props::{Fourcc, Props, PropsEntry};

use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Malformed capability description.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapsError {
    /// A list contains another list.
    #[error("property '{0}' nests a list inside a list")]
    NestedList(String),
    /// A list has no members.
    #[error("property '{0}' is an empty list")]
    EmptyList(String),
    /// A range with min above max.
    #[error("property '{name}' has an inverted range [{min}, {max}]")]
    InvertedRange {
        /// Property name.
        name: String,
        /// Lower bound as given.
        min: String,
        /// Upper bound as given.
        max: String,
    },
    /// A property without a name.
    #[error("property name must not be empty")]
    EmptyName,
    /// A structure without a media type.
    #[error("media type must not be empty")]
    EmptyMediaType,
}

/// A media type with its property constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct Structure {
    media_type: String,
    props: Props,
}

impl Structure {
    /// Structure with no properties.
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            props: Props::new(),
        }
    }

    /// Structure from an already validated property set.
    pub fn with_props(media_type: impl Into<String>, props: Props) -> Self {
        Self {
            media_type: media_type.into(),
            props,
        }
    }

    /// Media type, e.g. `"video/raw"`.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Property constraints.
    pub fn props(&self) -> &Props {
        &self.props
    }

    /// Mutable property constraints.
    pub fn props_mut(&mut self) -> &mut Props {
        &mut self.props
    }

    /// Look up a property.
    pub fn get(&self, name: &str) -> Option<&PropsEntry> {
        self.props.get(name)
    }

    /// True if every property is fixed.
    pub fn is_fixed(&self) -> bool {
        self.props.is_fixed()
    }

    /// Same media type and compatible properties.
    pub fn check_compatibility(from: &Structure, to: &Structure) -> bool {
        from.media_type == to.media_type && Props::check_compatibility(&from.props, &to.props)
    }

    /// Common structure, `None` if the media types differ or the properties
    /// share no value.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.media_type != other.media_type {
            return None;
        }
        self.props
            .intersect(&other.props)
            .map(|props| Structure::with_props(self.media_type.clone(), props))
    }

    /// Structure with every property fixated.
    pub fn fixate(&self) -> Structure {
        Structure::with_props(self.media_type.clone(), self.props.fixate())
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_type)?;
        if !self.props.is_empty() {
            write!(f, ", {}", self.props)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
enum CapsInner {
    Any,
    Structures(SmallVec<[Structure; 1]>),
}

/// Immutable, cheaply cloneable capability description.
///
/// Clones share storage; mutation goes through copy-on-write.
#[derive(Clone, PartialEq)]
pub struct Caps {
    inner: Arc<CapsInner>,
}

impl Caps {
    /// Caps accepting anything.
    pub fn any() -> Self {
        Self {
            inner: Arc::new(CapsInner::Any),
        }
    }

    /// Caps accepting nothing.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(CapsInner::Structures(SmallVec::new())),
        }
    }

    /// Caps with a single structure.
    pub fn from_structure(structure: Structure) -> Self {
        let mut structures = SmallVec::new();
        structures.push(structure);
        Self {
            inner: Arc::new(CapsInner::Structures(structures)),
        }
    }

    /// Register caps from a media type and `(name, entry)` pairs, validating
    /// the entries.
    pub fn register<I, N>(media_type: &str, entries: I) -> Result<Self, CapsError>
    where
        I: IntoIterator<Item = (N, PropsEntry)>,
        N: AsRef<str>,
    {
        if media_type.is_empty() {
            return Err(CapsError::EmptyMediaType);
        }
        let props = Props::register(entries)?;
        Ok(Self::from_structure(Structure::with_props(media_type, props)))
    }

    /// Start building single-structure caps.
    pub fn builder(media_type: impl Into<String>) -> CapsBuilder {
        CapsBuilder {
            structure: Structure::new(media_type),
        }
    }

    /// Append the alternatives of `other` (chaining). Appending to ANY is a
    /// no-op, appending ANY yields ANY.
    pub fn append(&mut self, other: Caps) {
        if self.is_any() {
            return;
        }
        if other.is_any() {
            *self = Caps::any();
            return;
        }
        let additions: Vec<Structure> = other.structures().to_vec();
        if let CapsInner::Structures(list) = Arc::make_mut(&mut self.inner) {
            for s in additions {
                if !list.contains(&s) {
                    list.push(s);
                }
            }
        }
    }

    /// True for ANY.
    pub fn is_any(&self) -> bool {
        matches!(*self.inner, CapsInner::Any)
    }

    /// True for EMPTY.
    pub fn is_empty(&self) -> bool {
        matches!(&*self.inner, CapsInner::Structures(list) if list.is_empty())
    }

    /// Exactly one structure, fully fixed.
    pub fn is_fixed(&self) -> bool {
        match &*self.inner {
            CapsInner::Structures(list) => list.len() == 1 && list[0].is_fixed(),
            CapsInner::Any => false,
        }
    }

    /// Alternatives; empty for ANY and EMPTY.
    pub fn structures(&self) -> &[Structure] {
        match &*self.inner {
            CapsInner::Structures(list) => list,
            CapsInner::Any => &[],
        }
    }

    /// The `index`th alternative.
    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.structures().get(index)
    }

    /// Mutable access to the `index`th alternative, copying shared storage.
    pub fn structure_mut(&mut self, index: usize) -> Option<&mut Structure> {
        match Arc::make_mut(&mut self.inner) {
            CapsInner::Structures(list) => list.get_mut(index),
            CapsInner::Any => None,
        }
    }

    /// Number of handles sharing this caps storage.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Whether everything `from` may describe is accepted by `to`.
    ///
    /// Some alternative of `from` must be compatible with some alternative
    /// of `to`. ANY on the `to` side accepts everything; ANY on the `from`
    /// side only fits ANY.
    pub fn check_compatibility(from: &Caps, to: &Caps) -> bool {
        if to.is_any() {
            return true;
        }
        if from.is_any() {
            return false;
        }
        from.structures().iter().any(|f| {
            to.structures()
                .iter()
                .any(|t| Structure::check_compatibility(f, t))
        })
    }

    /// Caps describing what both sides accept. EMPTY when nothing is shared.
    pub fn intersect(&self, other: &Caps) -> Caps {
        if self.is_any() {
            return other.clone();
        }
        if other.is_any() {
            return self.clone();
        }
        let mut out: SmallVec<[Structure; 1]> = SmallVec::new();
        for a in self.structures() {
            for b in other.structures() {
                if let Some(s) = a.intersect(b)
                    && !out.contains(&s)
                {
                    out.push(s);
                }
            }
        }
        Caps {
            inner: Arc::new(CapsInner::Structures(out)),
        }
    }

    /// First alternative with every property fixated; `None` for ANY and
    /// EMPTY.
    pub fn fixate(&self) -> Option<Caps> {
        self.structure(0)
            .map(|s| Caps::from_structure(s.fixate()))
    }
}

impl From<Structure> for Caps {
    fn from(structure: Structure) -> Self {
        Caps::from_structure(structure)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.inner {
            CapsInner::Any => f.write_str("ANY"),
            CapsInner::Structures(list) if list.is_empty() => f.write_str("EMPTY"),
            CapsInner::Structures(list) => {
                for (i, s) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{s}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Caps({self})")
    }
}

/// Builder for single-structure caps.
///
/// Fields are not checked as they are set. [`build`](Self::build) trusts
/// them, [`try_build`](Self::try_build) applies the same rules as
/// [`Caps::register`].
#[must_use]
pub struct CapsBuilder {
    structure: Structure,
}

impl CapsBuilder {
    /// Set a property. Unchecked.
    pub fn field(mut self, name: &str, value: impl Into<PropsEntry>) -> Self {
        self.structure.props.set(name, value);
        self
    }

    /// Finish without validation.
    pub fn build(self) -> Caps {
        Caps::from_structure(self.structure)
    }

    /// Finish, rejecting what [`Caps::register`] rejects.
    pub fn try_build(self) -> Result<Caps, CapsError> {
        let entries = self.structure.props.iter().map(|(name, entry)| (name, entry.clone()));
        Caps::register(self.structure.media_type(), entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_and_empty() {
        let raw = Caps::builder("x/raw").field("width", 10).build();
        assert!(Caps::check_compatibility(&raw, &Caps::any()));
        assert!(!Caps::check_compatibility(&Caps::any(), &raw));
        assert!(!Caps::check_compatibility(&raw, &Caps::empty()));
        assert_eq!(raw.intersect(&Caps::any()), raw);
        assert!(raw.intersect(&Caps::empty()).is_empty());
    }

    #[test]
    fn test_try_build_validates_fields() {
        let caps = Caps::builder("x/raw").field("width", 1..=100).try_build().unwrap();
        assert_eq!(caps, Caps::builder("x/raw").field("width", 1..=100).build());

        let inverted = Caps::builder("x/raw").field("width", PropsEntry::IntRange { min: 9, max: 1 });
        assert!(matches!(inverted.try_build(), Err(CapsError::InvertedRange { .. })));
        let empty = Caps::builder("x/raw").field("format", PropsEntry::List(Vec::new()));
        assert!(matches!(empty.try_build(), Err(CapsError::EmptyList(_))));
        assert!(matches!(
            Caps::builder("").field("width", 1).try_build(),
            Err(CapsError::EmptyMediaType)
        ));
    }

    #[test]
    fn test_media_type_must_match() {
        let a = Caps::builder("audio/raw").build();
        let b = Caps::builder("video/raw").build();
        assert!(!Caps::check_compatibility(&a, &b));
        assert!(a.intersect(&b).is_empty());
    }

    #[test]
    fn test_chained_alternatives() {
        let mut sink = Caps::builder("audio/raw").field("rate", 44100).build();
        sink.append(Caps::builder("audio/raw").field("rate", 48000).build());
        assert_eq!(sink.structures().len(), 2);

        let src = Caps::builder("audio/raw").field("rate", 48000).build();
        assert!(Caps::check_compatibility(&src, &sink));
        let common = src.intersect(&sink);
        assert!(common.is_fixed());
        assert_eq!(common.structure(0).unwrap().get("rate"), Some(&PropsEntry::Int(48000)));
    }

    #[test]
    fn test_register_validates() {
        let err = Caps::register(
            "x/raw",
            vec![("width", PropsEntry::List(vec![PropsEntry::List(vec![])]))],
        )
        .unwrap_err();
        assert_eq!(err, CapsError::NestedList("width".into()));
        assert_eq!(
            Caps::register("", Vec::<(&str, PropsEntry)>::new()).unwrap_err(),
            CapsError::EmptyMediaType
        );
    }

    #[test]
    fn test_copy_on_write() {
        let a = Caps::builder("x/raw").field("width", 1..=10).build();
        let mut b = a.clone();
        assert_eq!(a.ref_count(), 2);

        b.structure_mut(0).unwrap().props_mut().set("width", 5);
        assert_eq!(a.ref_count(), 1);
        assert!(!a.is_fixed());
        assert!(b.is_fixed());
    }

    #[test]
    fn test_fixate() {
        let caps = Caps::builder("x/raw")
            .field("width", 64..=128)
            .field("format", vec![PropsEntry::from("rgb"), PropsEntry::from("bgr")])
            .build();
        let fixed = caps.fixate().unwrap();
        assert!(fixed.is_fixed());
        assert_eq!(fixed.to_string(), "x/raw, format=(string)rgb, width=(int)64");
        assert!(Caps::any().fixate().is_none());
    }
}

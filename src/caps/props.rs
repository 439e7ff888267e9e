//! Typed property sets used inside caps.
//!
//! A [`Props`] is a set of named [`PropsEntry`] values kept sorted by name.
//! Sorted storage lets [`Props::check_compatibility`] walk both sides in one
//! linear merge.

use super::CapsError;
use std::cmp::Ordering;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// Four-character code, stored little-endian like the classic `MAKE_FOURCC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fourcc(pub u32);

impl Fourcc {
    /// Build from four ASCII bytes.
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_le_bytes(*code))
    }

    /// The four bytes.
    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// A single typed property value or constraint.
#[derive(Clone, Debug, PartialEq)]
pub enum PropsEntry {
    /// Exact integer.
    Int(i32),
    /// Inclusive integer range.
    IntRange {
        /// Lower bound.
        min: i32,
        /// Upper bound.
        max: i32,
    },
    /// Exact float.
    Float(f64),
    /// Inclusive float range.
    FloatRange {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Four-character code.
    Fourcc(Fourcc),
    /// Boolean.
    Bool(bool),
    /// String.
    String(String),
    /// Alternatives. Never nested.
    List(Vec<PropsEntry>),
}

impl PropsEntry {
    /// True unless the entry is a range or a list.
    pub fn is_fixed(&self) -> bool {
        !matches!(
            self,
            PropsEntry::IntRange { .. } | PropsEntry::FloatRange { .. } | PropsEntry::List(_)
        )
    }

    /// Pick one value: a range collapses to its minimum, a list to its first
    /// member.
    pub fn fixate(&self) -> PropsEntry {
        match self {
            PropsEntry::IntRange { min, .. } => PropsEntry::Int(*min),
            PropsEntry::FloatRange { min, .. } => PropsEntry::Float(*min),
            PropsEntry::List(items) => match items.first() {
                Some(first) => first.fixate(),
                None => self.clone(),
            },
            other => other.clone(),
        }
    }

    fn validate(&self, name: &str, nested: bool) -> Result<(), CapsError> {
        match self {
            PropsEntry::IntRange { min, max } if min > max => Err(CapsError::InvertedRange {
                name: name.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            }),
            PropsEntry::FloatRange { min, max } if min > max => Err(CapsError::InvertedRange {
                name: name.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            }),
            PropsEntry::List(_) if nested => Err(CapsError::NestedList(name.to_string())),
            PropsEntry::List(items) if items.is_empty() => {
                Err(CapsError::EmptyList(name.to_string()))
            }
            PropsEntry::List(items) => items.iter().try_for_each(|e| e.validate(name, true)),
            _ => Ok(()),
        }
    }
}

/// Whether a value described by `from` always satisfies `to`.
///
/// A list on the `from` side must hold for every member, a list on the `to`
/// side is satisfied by any member. A range on the `from` side never fits a
/// scalar on the `to` side.
pub(crate) fn entry_compatible(from: &PropsEntry, to: &PropsEntry) -> bool {
    use PropsEntry::*;
    match (from, to) {
        (List(items), _) => items.iter().all(|e| entry_compatible(e, to)),
        (_, List(items)) => items.iter().any(|e| entry_compatible(from, e)),
        (IntRange { min: a, max: b }, IntRange { min: c, max: d }) => c <= a && b <= d,
        (Int(v), IntRange { min, max }) => min <= v && v <= max,
        (Int(a), Int(b)) => a == b,
        (FloatRange { min: a, max: b }, FloatRange { min: c, max: d }) => c <= a && b <= d,
        (Float(v), FloatRange { min, max }) => min <= v && v <= max,
        (Float(a), Float(b)) => a == b,
        (Fourcc(a), Fourcc(b)) => a == b,
        (Bool(a), Bool(b)) => a == b,
        (String(a), String(b)) => a == b,
        _ => false,
    }
}

/// Common sub-constraint of two entries, `None` if they share no value.
pub(crate) fn entry_intersect(a: &PropsEntry, b: &PropsEntry) -> Option<PropsEntry> {
    use PropsEntry::*;
    match (a, b) {
        (List(items), other) | (other, List(items)) => {
            let mut common: Vec<PropsEntry> = Vec::new();
            for item in items {
                match entry_intersect(item, other) {
                    Some(List(inner)) => {
                        for e in inner {
                            if !common.contains(&e) {
                                common.push(e);
                            }
                        }
                    }
                    Some(e) => {
                        if !common.contains(&e) {
                            common.push(e);
                        }
                    }
                    None => {}
                }
            }
            match common.len() {
                0 => None,
                1 => common.pop(),
                _ => Some(List(common)),
            }
        }
        (Int(v), IntRange { min, max }) | (IntRange { min, max }, Int(v)) => {
            (min <= v && v <= max).then_some(Int(*v))
        }
        (IntRange { min: a0, max: a1 }, IntRange { min: b0, max: b1 }) => {
            let (lo, hi) = ((*a0).max(*b0), (*a1).min(*b1));
            match lo.cmp(&hi) {
                Ordering::Less => Some(IntRange { min: lo, max: hi }),
                Ordering::Equal => Some(Int(lo)),
                Ordering::Greater => None,
            }
        }
        (Float(v), FloatRange { min, max }) | (FloatRange { min, max }, Float(v)) => {
            (min <= v && v <= max).then_some(Float(*v))
        }
        (FloatRange { min: a0, max: a1 }, FloatRange { min: b0, max: b1 }) => {
            let (lo, hi) = (a0.max(*b0), a1.min(*b1));
            if lo < hi {
                Some(FloatRange { min: lo, max: hi })
            } else if lo == hi {
                Some(Float(lo))
            } else {
                None
            }
        }
        (x, y) if x.is_fixed() && x == y => Some(x.clone()),
        _ => None,
    }
}

impl fmt::Display for PropsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropsEntry::Int(v) => write!(f, "(int){v}"),
            PropsEntry::IntRange { min, max } => write!(f, "(int)[{min}, {max}]"),
            PropsEntry::Float(v) => write!(f, "(float){v}"),
            PropsEntry::FloatRange { min, max } => write!(f, "(float)[{min}, {max}]"),
            PropsEntry::Fourcc(c) => write!(f, "(fourcc){c}"),
            PropsEntry::Bool(b) => write!(f, "(boolean){b}"),
            PropsEntry::String(s) => write!(f, "(string){s}"),
            PropsEntry::List(items) => {
                f.write_str("{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(" }")
            }
        }
    }
}

impl From<i32> for PropsEntry {
    fn from(v: i32) -> Self {
        PropsEntry::Int(v)
    }
}

impl From<RangeInclusive<i32>> for PropsEntry {
    fn from(range: RangeInclusive<i32>) -> Self {
        let (min, max) = range.into_inner();
        PropsEntry::IntRange { min, max }
    }
}

impl From<f64> for PropsEntry {
    fn from(v: f64) -> Self {
        PropsEntry::Float(v)
    }
}

impl From<RangeInclusive<f64>> for PropsEntry {
    fn from(range: RangeInclusive<f64>) -> Self {
        let (min, max) = range.into_inner();
        PropsEntry::FloatRange { min, max }
    }
}

impl From<bool> for PropsEntry {
    fn from(v: bool) -> Self {
        PropsEntry::Bool(v)
    }
}

impl From<Fourcc> for PropsEntry {
    fn from(v: Fourcc) -> Self {
        PropsEntry::Fourcc(v)
    }
}

impl From<&str> for PropsEntry {
    fn from(v: &str) -> Self {
        PropsEntry::String(v.to_string())
    }
}

impl From<String> for PropsEntry {
    fn from(v: String) -> Self {
        PropsEntry::String(v)
    }
}

impl From<Vec<PropsEntry>> for PropsEntry {
    fn from(items: Vec<PropsEntry>) -> Self {
        PropsEntry::List(items)
    }
}

/// A sorted set of named property entries.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Props {
    entries: Vec<(Arc<str>, PropsEntry)>,
}

impl Props {
    /// Empty property set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a property set from `(name, entry)` pairs, rejecting nested
    /// lists, empty lists, inverted ranges and empty names. Later duplicates
    /// replace earlier ones.
    pub fn register<I, N>(entries: I) -> Result<Self, CapsError>
    where
        I: IntoIterator<Item = (N, PropsEntry)>,
        N: AsRef<str>,
    {
        let mut props = Props::new();
        for (name, entry) in entries {
            let name = name.as_ref();
            if name.is_empty() {
                return Err(CapsError::EmptyName);
            }
            entry.validate(name, false)?;
            props.set(name, entry);
        }
        Ok(props)
    }

    fn position(&self, name: &str) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|(key, _)| key.as_ref().cmp(name))
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&PropsEntry> {
        self.position(name).ok().map(|i| &self.entries[i].1)
    }

    /// Insert or replace an entry.
    pub fn set(&mut self, name: &str, entry: impl Into<PropsEntry>) {
        let entry = entry.into();
        match self.position(name) {
            Ok(i) => self.entries[i].1 = entry,
            Err(i) => self.entries.insert(i, (Arc::from(name), entry)),
        }
    }

    /// Remove an entry.
    pub fn remove(&mut self, name: &str) -> Option<PropsEntry> {
        self.position(name).ok().map(|i| self.entries.remove(i).1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropsEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v))
    }

    /// True if no entry is a range or list.
    pub fn is_fixed(&self) -> bool {
        self.entries.iter().all(|(_, e)| e.is_fixed())
    }

    /// Copy every entry of `from` into `self`; on a name clash the value from
    /// `from` wins.
    pub fn merge(&mut self, from: &Props) {
        for (name, entry) in from.iter() {
            self.set(name, entry.clone());
        }
    }

    /// Whether every value `from` can take satisfies `to`.
    ///
    /// Entries only present in `from` are ignored; an entry required by `to`
    /// but missing in `from` makes the pair incompatible.
    pub fn check_compatibility(from: &Props, to: &Props) -> bool {
        let mut src = from.entries.iter().peekable();
        let mut dst = to.entries.iter().peekable();
        loop {
            match (src.peek(), dst.peek()) {
                (Some((fk, fv)), Some((tk, tv))) => match fk.as_ref().cmp(tk.as_ref()) {
                    Ordering::Less => {
                        src.next();
                    }
                    Ordering::Greater => return false,
                    Ordering::Equal => {
                        if !entry_compatible(fv, tv) {
                            return false;
                        }
                        src.next();
                        dst.next();
                    }
                },
                (_, None) => return true,
                (None, Some(_)) => return false,
            }
        }
    }

    /// Constraint satisfied by both sides, `None` if some shared property has
    /// no common value. Properties present on only one side are carried over.
    pub fn intersect(&self, other: &Props) -> Option<Props> {
        let mut out = self.clone();
        for (name, entry) in other.iter() {
            let merged = match self.get(name) {
                Some(mine) => entry_intersect(mine, entry)?,
                None => entry.clone(),
            };
            out.set(name, merged);
        }
        Some(out)
    }

    /// Fixate every entry.
    pub fn fixate(&self) -> Props {
        Props {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.fixate()))
                .collect(),
        }
    }
}

impl fmt::Display for Props {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, entry)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={entry}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(entries: Vec<(&str, PropsEntry)>) -> Props {
        Props::register(entries).unwrap()
    }

    #[test]
    fn test_entries_sorted_by_name() {
        let p = props(vec![("width", 1.into()), ("height", 2.into()), ("depth", 3.into())]);
        let names: Vec<_> = p.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["depth", "height", "width"]);
    }

    #[test]
    fn test_register_rejects_nested_list() {
        let nested = PropsEntry::List(vec![PropsEntry::List(vec![1.into()])]);
        assert_eq!(
            Props::register(vec![("x", nested)]),
            Err(CapsError::NestedList("x".into()))
        );
        assert!(matches!(
            Props::register(vec![("r", PropsEntry::from(5..=1))]),
            Err(CapsError::InvertedRange { .. })
        ));
        assert_eq!(
            Props::register(vec![("", PropsEntry::Int(1))]),
            Err(CapsError::EmptyName)
        );
    }

    #[test]
    fn test_missing_property_is_asymmetric() {
        let a = props(vec![("width", 100.into())]);
        let b = props(vec![("width", 100.into()), ("height", 200.into())]);
        assert!(!Props::check_compatibility(&a, &b));
        assert!(Props::check_compatibility(&b, &a));
    }

    #[test]
    fn test_range_containment() {
        let narrow = props(vec![("rate", (8000..=16000).into())]);
        let wide = props(vec![("rate", (1..=96000).into())]);
        assert!(Props::check_compatibility(&narrow, &wide));
        assert!(!Props::check_compatibility(&wide, &narrow));

        let exact = props(vec![("rate", 44100.into())]);
        assert!(Props::check_compatibility(&exact, &wide));
        assert!(!Props::check_compatibility(&wide, &exact));
    }

    #[test]
    fn test_sink_list_is_disjunctive() {
        let i420 = Fourcc::new(b"I420");
        let yuy2 = Fourcc::new(b"YUY2");
        let from = props(vec![("format", i420.into())]);
        let to = props(vec![("format", vec![i420.into(), yuy2.into()].into())]);
        assert!(Props::check_compatibility(&from, &to));
    }

    #[test]
    fn test_source_list_is_conjunctive() {
        let from = props(vec![("width", vec![10.into(), 500.into()].into())]);
        let to = props(vec![("width", (1..=100).into())]);
        assert!(!Props::check_compatibility(&from, &to));

        let from = props(vec![("width", vec![10.into(), 50.into()].into())]);
        assert!(Props::check_compatibility(&from, &to));
    }

    #[test]
    fn test_type_mismatch_is_incompatible() {
        let from = props(vec![("x", 1.into())]);
        let to = props(vec![("x", "1".into())]);
        assert!(!Props::check_compatibility(&from, &to));
    }

    #[test]
    fn test_merge_from_wins() {
        let mut a = props(vec![("width", 1.into()), ("height", 2.into())]);
        let b = props(vec![("width", 9.into()), ("depth", 8.into())]);
        a.merge(&b);
        assert_eq!(a.get("width"), Some(&PropsEntry::Int(9)));
        assert_eq!(a.get("height"), Some(&PropsEntry::Int(2)));
        assert_eq!(a.get("depth"), Some(&PropsEntry::Int(8)));
    }

    #[test]
    fn test_intersect_and_fixate() {
        let a = props(vec![("width", (1..=100).into()), ("fps", 30.into())]);
        let b = props(vec![("width", vec![50.into(), 150.into(), 75.into()].into())]);
        let common = a.intersect(&b).unwrap();
        assert_eq!(
            common.get("width"),
            Some(&PropsEntry::List(vec![50.into(), 75.into()]))
        );
        assert!(!common.is_fixed());

        let fixed = common.fixate();
        assert!(fixed.is_fixed());
        assert_eq!(fixed.get("width"), Some(&PropsEntry::Int(50)));
        assert_eq!(fixed.get("fps"), Some(&PropsEntry::Int(30)));

        let c = props(vec![("width", (200..=300).into())]);
        assert!(a.intersect(&c).is_none());
    }

    #[test]
    fn test_range_intersection_collapses_to_scalar() {
        let a = PropsEntry::from(1..=10);
        let b = PropsEntry::from(10..=20);
        assert_eq!(entry_intersect(&a, &b), Some(PropsEntry::Int(10)));
    }

    #[test]
    fn test_display() {
        let p = props(vec![
            ("format", Fourcc::new(b"I420").into()),
            ("width", (1..=100).into()),
        ]);
        assert_eq!(p.to_string(), "format=(fourcc)I420, width=(int)[1, 100]");
    }
}

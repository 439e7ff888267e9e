//! Caps compatibility, intersection and fixation as seen from outside the
//! crate.

use padflow::caps::{CapsError, Fourcc, Props, PropsEntry};
use padflow::pad::FlowResult;
use padflow::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn props(entries: &[(&str, PropsEntry)]) -> Props {
    Props::register(entries.iter().map(|(k, v)| (*k, v.clone()))).unwrap()
}

fn range(min: i32, max: i32) -> PropsEntry {
    PropsEntry::IntRange { min, max }
}

#[test]
fn test_compatibility_is_not_symmetric() {
    let a = props(&[("width", PropsEntry::Int(100))]);
    let b = props(&[("width", PropsEntry::Int(100)), ("height", PropsEntry::Int(200))]);
    assert!(!Props::check_compatibility(&a, &b));
    assert!(Props::check_compatibility(&b, &a));
}

#[test]
fn test_range_containment() {
    let inner = props(&[("x", range(5, 10))]);
    assert!(Props::check_compatibility(&inner, &props(&[("x", range(0, 20))])));
    assert!(!Props::check_compatibility(&inner, &props(&[("x", range(6, 9))])));
}

#[test]
fn test_list_is_alternatives() {
    let i420 = PropsEntry::Fourcc(Fourcc::new(b"I420"));
    let yuy2 = PropsEntry::Fourcc(Fourcc::new(b"YUY2"));
    let from = props(&[("format", i420.clone())]);
    let to = props(&[("format", PropsEntry::List(vec![i420, yuy2.clone()]))]);
    assert!(Props::check_compatibility(&from, &to));

    let nv12 = props(&[("format", PropsEntry::Fourcc(Fourcc::new(b"NV12")))]);
    assert!(!Props::check_compatibility(&nv12, &to));
    assert!(Props::check_compatibility(&props(&[("format", yuy2)]), &to));
}

#[test]
fn test_register_rejects_malformed_entries() {
    let nested = PropsEntry::List(vec![PropsEntry::List(vec![PropsEntry::Int(1)])]);
    assert!(matches!(
        Props::register([("x", nested)]),
        Err(CapsError::NestedList(_))
    ));
    assert!(matches!(
        Props::register([("x", range(10, 1))]),
        Err(CapsError::InvertedRange { .. })
    ));
    assert!(matches!(
        Props::register([("", PropsEntry::Int(1))]),
        Err(CapsError::EmptyName)
    ));
}

#[test]
fn test_merge_from_wins() {
    let mut into = props(&[("width", PropsEntry::Int(1)), ("depth", PropsEntry::Int(8))]);
    let from = props(&[("width", PropsEntry::Int(2)), ("height", PropsEntry::Int(3))]);
    into.merge(&from);
    assert_eq!(into.len(), 3);
    assert_eq!(into.get("width"), Some(&PropsEntry::Int(2)));
    assert_eq!(into.get("depth"), Some(&PropsEntry::Int(8)));
    assert_eq!(into.get("height"), Some(&PropsEntry::Int(3)));
}

#[test]
fn test_media_types_must_agree() {
    let audio = Caps::builder("audio/raw").field("rate", 48000).build();
    let video = Caps::builder("video/raw").field("rate", 48000).build();
    assert!(!Caps::check_compatibility(&audio, &video));
    assert!(audio.intersect(&video).is_empty());
}

#[test]
fn test_any_and_empty() {
    let raw = Caps::builder("x/raw").field("width", 1..=10).build();
    assert!(Caps::check_compatibility(&raw, &Caps::any()));
    assert_eq!(raw.intersect(&Caps::any()), raw);
    assert!(raw.intersect(&Caps::empty()).is_empty());
}

#[test]
fn test_alternatives_pick_a_match() {
    let mut sink = Caps::builder("audio/raw").field("rate", 44100).build();
    sink.append(Caps::builder("audio/raw").field("rate", 48000).build());
    let src = Caps::builder("audio/raw").field("rate", 48000).build();
    assert!(Caps::check_compatibility(&src, &sink));

    let common = src.intersect(&sink);
    assert!(common.is_fixed());
    assert_eq!(common.structure(0).unwrap().get("rate"), Some(&PropsEntry::Int(48000)));
}

#[test]
fn test_fixate_picks_minimum_and_first() {
    let caps = Caps::builder("video/raw")
        .field("width", 320..=1920)
        .field(
            "format",
            PropsEntry::List(vec![
                PropsEntry::Fourcc(Fourcc::new(b"I420")),
                PropsEntry::Fourcc(Fourcc::new(b"NV12")),
            ]),
        )
        .field("framerate", 25.0..=60.0)
        .build();
    assert!(!caps.is_fixed());

    let fixed = caps.fixate().unwrap();
    assert!(fixed.is_fixed());
    let s = fixed.structure(0).unwrap();
    assert_eq!(s.get("width"), Some(&PropsEntry::Int(320)));
    assert_eq!(s.get("format"), Some(&PropsEntry::Fourcc(Fourcc::new(b"I420"))));
    assert_eq!(s.get("framerate"), Some(&PropsEntry::Float(25.0)));
}

#[test]
fn test_identity_is_transparent_to_negotiation() {
    let src = FakeSrc::builder()
        .caps(Caps::builder("x/raw").field("width", 64).build())
        .build("src")
        .unwrap();
    let identity = Identity::new("identity").unwrap();
    let sink = FakeSink::builder()
        .caps(Caps::builder("x/raw").field("width", 1..=32).build())
        .build("sink")
        .unwrap();

    assert!(identity.link(&sink).unwrap().is_linked());
    assert_eq!(src.link(&identity).unwrap(), PadLinkReturn::Refused);
}

/// Sink that never accepts caps and counts what still reaches it.
#[derive(Default)]
struct Picky {
    chained: AtomicUsize,
}

impl PadHandler for Picky {
    fn chain(&self, _pad: &Pad, _buffer: Buffer) -> FlowResult {
        self.chained.fetch_add(1, Ordering::SeqCst);
        Ok(FlowSuccess::Ok)
    }

    fn set_caps(&self, _pad: &Pad, _caps: &Caps) -> bool {
        false
    }
}

#[test]
fn test_refused_caps_leave_neither_side_negotiated() {
    let handler = Arc::new(Picky::default());
    let sink = Pad::builder("sink", PadDirection::Sink)
        .handler(handler.clone())
        .build();
    let src = Pad::builder("src", PadDirection::Src)
        .fixed_caps(Caps::builder("x/raw").field("width", 10..=20).build())
        .build();
    assert_eq!(src.link(&sink).unwrap(), PadLinkReturn::Delayed);

    assert_eq!(src.push(Buffer::from_slice(b"a")), Err(FlowError::NotNegotiated));
    assert!(src.negotiated_caps().is_none());
    assert_eq!(src.push(Buffer::from_slice(b"b")), Err(FlowError::NotNegotiated));
    assert_eq!(handler.chained.load(Ordering::SeqCst), 0);

    assert_eq!(sink.renegotiate(), PadLinkReturn::Refused);
    assert!(src.negotiated_caps().is_none());
    assert!(sink.negotiated_caps().is_none());

    let fixed = Buffer::from_slice(b"c").with_caps(Caps::builder("x/raw").field("width", 12).build());
    assert_eq!(src.push(fixed), Err(FlowError::NotNegotiated));
    assert!(src.negotiated_caps().is_none());
    assert_eq!(handler.chained.load(Ordering::SeqCst), 0);
}

//! Ghost pads at bin boundaries.

use padflow::element::NoopElement;
use padflow::pad::FlowResult;
use padflow::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

/// Records buffers and answers with a scripted flow return.
struct Scripted {
    seen: Mutex<Vec<Buffer>>,
    answer: Mutex<FlowResult>,
}

impl Scripted {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            answer: Mutex::new(Ok(FlowSuccess::Ok)),
        })
    }
}

impl PadHandler for Scripted {
    fn chain(&self, _pad: &Pad, buffer: Buffer) -> FlowResult {
        self.seen.lock().push(buffer);
        *self.answer.lock()
    }
}

fn sink_element(name: &str, handler: Arc<Scripted>, caps: Caps) -> Element {
    let pad = Pad::builder_from_template(&PadTemplate::sink("sink", caps), "sink")
        .handler(handler)
        .build();
    Element::builder(name, NoopElement).pad(pad).build().unwrap()
}

#[test]
fn test_buffer_crosses_sink_ghost_untouched() {
    let ctx = Context::new();
    let bin = Bin::new(&ctx, "bin").unwrap();
    let handler = Scripted::new();
    let inner = sink_element("inner", handler.clone(), Caps::any());
    bin.add(&inner).unwrap();
    let ghost = bin.add_ghost_pad("sink", &inner.pad("sink").unwrap()).unwrap();
    assert!(ghost.internal().is_linked());

    let outside = Pad::new("src", PadDirection::Src);
    assert!(outside.link(&ghost).unwrap().is_linked());

    let buffer = Buffer::from_slice(b"across the boundary");
    let data_ptr = buffer.as_bytes().as_ptr();
    assert_eq!(outside.push(buffer), Ok(FlowSuccess::Ok));

    let seen = handler.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].as_bytes(), b"across the boundary");
    assert_eq!(seen[0].as_bytes().as_ptr(), data_ptr);
}

#[test]
fn test_flow_return_comes_back_through_ghost() {
    let ctx = Context::new();
    let bin = Bin::new(&ctx, "bin").unwrap();
    let handler = Scripted::new();
    let inner = sink_element("inner", handler.clone(), Caps::any());
    bin.add(&inner).unwrap();
    let ghost = bin.add_ghost_pad("sink", &inner.pad("sink").unwrap()).unwrap();
    let outside = Pad::new("src", PadDirection::Src);
    outside.link(&ghost).unwrap();

    for answer in [Err(FlowError::Error), Err(FlowError::NotNegotiated), Ok(FlowSuccess::Ok)] {
        *handler.answer.lock() = answer;
        assert_eq!(outside.push(Buffer::from_slice(b"x")), answer);
    }
    assert_eq!(handler.seen.lock().len(), 3);
}

#[test]
fn test_src_ghost_forwards_out_of_bin() {
    let ctx = Context::new();
    let bin = Bin::new(&ctx, "bin").unwrap();
    let identity = Identity::new("identity").unwrap();
    bin.add(&identity).unwrap();
    bin.add_ghost_pad("sink", &identity.pad("sink").unwrap()).unwrap();
    bin.add_ghost_pad("src", &identity.pad("src").unwrap()).unwrap();

    let handler = Scripted::new();
    let downstream = sink_element("downstream", handler.clone(), Caps::any());
    bin.element().link(&downstream).unwrap();

    let upstream = Pad::new("up", PadDirection::Src);
    upstream.link(&bin.pad("sink").unwrap()).unwrap();
    assert_eq!(upstream.push(Buffer::from_slice(b"through")), Ok(FlowSuccess::Ok));

    assert_eq!(Identity::buffer_count(&identity), 1);
    assert_eq!(handler.seen.lock()[0].as_bytes(), b"through");
}

#[test]
fn test_ghost_caps_are_targets_caps() {
    let ctx = Context::new();
    let bin = Bin::new(&ctx, "bin").unwrap();
    let caps = Caps::builder("x/raw").field("width", 50).build();
    let inner = sink_element("inner", Scripted::new(), caps.clone());
    bin.add(&inner).unwrap();
    let ghost = bin.add_ghost_pad("sink", &inner.pad("sink").unwrap()).unwrap();
    assert_eq!(ghost.query_caps(), caps);

    let wrong = Pad::builder("src", PadDirection::Src)
        .template(PadTemplate::src("src", Caps::builder("x/raw").field("width", 60).build()))
        .build();
    assert_eq!(wrong.link(&ghost).unwrap(), PadLinkReturn::Refused);
}

#[test]
fn test_ghost_needs_child_target() {
    let ctx = Context::new();
    let bin = Bin::new(&ctx, "bin").unwrap();
    let stranger = Identity::new("stranger").unwrap();
    assert!(matches!(
        bin.add_ghost_pad("sink", &stranger.pad("sink").unwrap()),
        Err(Error::Element(_))
    ));
}

/// Sink side that turns every link down.
struct Unwilling;

impl PadHandler for Unwilling {
    fn link(&self, _pad: &Pad, _peer: &Pad) -> PadLinkReturn {
        PadLinkReturn::Refused
    }
}

#[test]
fn test_far_side_refusal_releases_ghost_internal_link() {
    let ctx = Context::new();
    let bin = Bin::new(&ctx, "bin").unwrap();
    let identity = Identity::new("identity").unwrap();
    bin.add(&identity).unwrap();
    let ghost = bin.add_ghost_pad("src", &identity.pad("src").unwrap()).unwrap();
    assert!(ghost.internal().is_linked());

    let unwilling = Pad::builder("sink", PadDirection::Sink)
        .handler(Arc::new(Unwilling))
        .build();
    assert_eq!(ghost.link(&unwilling).unwrap(), PadLinkReturn::Refused);
    assert!(!ghost.is_linked());
    assert!(!unwilling.is_linked());
    assert!(!ghost.internal().is_linked());
    assert!(!identity.pad("src").unwrap().is_linked());

    let handler = Scripted::new();
    let downstream = sink_element("downstream", handler.clone(), Caps::any());
    assert!(ghost.link(&downstream.pad("sink").unwrap()).unwrap().is_linked());
    assert!(ghost.internal().is_linked());
}

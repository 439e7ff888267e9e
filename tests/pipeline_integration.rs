//! Integration tests for linking, pushing and running whole pipelines.

use padflow::bus::Message;
use padflow::caps::PropsEntry;
use padflow::element::NoopElement;
use padflow::prelude::*;
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// Sink handler keeping every buffer it is given.
#[derive(Default)]
struct Collect {
    buffers: Mutex<Vec<Buffer>>,
}

impl PadHandler for Collect {
    fn chain(&self, _pad: &Pad, buffer: Buffer) -> std::result::Result<FlowSuccess, FlowError> {
        self.buffers.lock().push(buffer);
        Ok(FlowSuccess::Ok)
    }
}

fn element_with_pad(name: &str, template: PadTemplate, handler: Option<Arc<dyn PadHandler>>) -> Element {
    let mut builder = Pad::builder_from_template(&template, template.name().to_string());
    if let Some(handler) = handler {
        builder = builder.handler(handler);
    }
    Element::builder(name, NoopElement).pad(builder.build()).build().unwrap()
}

fn raw(width: impl Into<PropsEntry>) -> Caps {
    Caps::builder("x/raw").field("width", width).build()
}

#[test]
fn test_range_meets_fixed_value() {
    let a = element_with_pad("a", PadTemplate::src("src", raw(1..=100)), None);
    let b = element_with_pad("b", PadTemplate::sink("sink", raw(50)), None);

    let ret = a.pad("src").unwrap().link(&b.pad("sink").unwrap()).unwrap();
    assert_eq!(ret, PadLinkReturn::Ok);
    let negotiated = b.pad("sink").unwrap().negotiated_caps().unwrap();
    assert_eq!(negotiated.structure(0).unwrap().get("width"), Some(&PropsEntry::Int(50)));
    assert_eq!(a.pad("src").unwrap().negotiated_caps(), Some(negotiated));
}

#[test]
fn test_disjoint_ranges_refused() {
    let a = element_with_pad("a", PadTemplate::src("src", raw(1..=100)), None);
    let b = element_with_pad("b", PadTemplate::sink("sink", raw(200..=300)), None);

    let src = a.pad("src").unwrap();
    let sink = b.pad("sink").unwrap();
    assert_eq!(src.link(&sink).unwrap(), PadLinkReturn::Refused);
    assert!(!src.is_linked());
    assert!(!sink.is_linked());
}

#[test]
fn test_pushed_buffer_arrives_once_and_intact() {
    let collect = Arc::new(Collect::default());
    let a = element_with_pad("a", PadTemplate::src("src", raw(1..=100)), None);
    let b = element_with_pad(
        "b",
        PadTemplate::sink("sink", raw(50)),
        Some(collect.clone() as Arc<dyn PadHandler>),
    );
    let src = a.pad("src").unwrap();
    src.link(&b.pad("sink").unwrap()).unwrap();

    let payload: Vec<u8> = (0..10).collect();
    assert_eq!(src.push(Buffer::from_slice(&payload)), Ok(FlowSuccess::Ok));

    let received = collect.buffers.lock();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].len(), 10);
    assert_eq!(received[0].as_bytes(), payload.as_slice());
}

#[test]
fn test_basic_pipeline_runs_to_eos() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "basic").unwrap();
    let mut bus = pipeline.subscribe();

    let src = FakeSrc::builder().num_buffers(20).size(32).build("src").unwrap();
    let identity = Identity::new("identity").unwrap();
    let sink = FakeSink::new("sink").unwrap();
    pipeline.add_many(&[&src, &identity, &sink]).unwrap();
    src.link(&identity).unwrap();
    identity.link(&sink).unwrap();

    pipeline.play().unwrap();
    while pipeline.iterate() {}

    assert_eq!(FakeSrc::buffers_produced(&src), 20);
    assert_eq!(Identity::buffer_count(&identity), 20);
    assert_eq!(FakeSink::buffers_received(&sink), 20);
    assert_eq!(FakeSink::bytes_received(&sink), 20 * 32);
    assert!(FakeSink::is_eos(&sink));

    let messages = bus.drain();
    assert!(messages.contains(&Message::Eos {
        source: "sink".to_string()
    }));
    assert!(!messages.iter().any(|m| matches!(m, Message::Error { .. })));
    pipeline.stop().unwrap();
}

#[test]
fn test_stream_error_reaches_bus() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "failing").unwrap();
    let mut bus = pipeline.subscribe();

    let src = FakeSrc::builder().num_buffers(10).build("src").unwrap();
    let identity = Identity::builder().error_after(3).build("identity").unwrap();
    let sink = FakeSink::new("sink").unwrap();
    pipeline.add_many(&[&src, &identity, &sink]).unwrap();
    src.link(&identity).unwrap();
    identity.link(&sink).unwrap();

    pipeline.play().unwrap();
    while pipeline.iterate() {}

    assert_eq!(FakeSink::buffers_received(&sink), 3);
    let errors: Vec<_> = bus
        .drain()
        .into_iter()
        .filter(|m| matches!(m, Message::Error { .. }))
        .collect();
    assert!(!errors.is_empty());
    assert!(errors.iter().any(|m| m.source() == Some("identity")));
    pipeline.stop().unwrap();
}

#[tokio::test]
async fn test_threaded_pipeline_runs_to_eos() {
    let ctx = Context::new();
    let pipeline = Pipeline::with_scheduler(&ctx, "threaded", "threaded").unwrap();
    let mut bus = pipeline.subscribe();

    let src = FakeSrc::builder().num_buffers(200).size(64).build("src").unwrap();
    let queue = Queue::builder().max_buffers(4).build("queue").unwrap();
    let sink = FakeSink::new("sink").unwrap();
    pipeline.add_many(&[&src, &queue, &sink]).unwrap();
    src.link(&queue).unwrap();
    queue.link(&sink).unwrap();

    pipeline.play().unwrap();
    let done = tokio::time::timeout(Duration::from_secs(10), bus.wait_eos()).await;
    assert!(matches!(done, Ok(Ok(()))));
    assert_eq!(FakeSink::buffers_received(&sink), 200);
    pipeline.stop().unwrap();
}

#[test]
fn test_file_copy() {
    let mut input = tempfile::NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    input.write_all(&data).unwrap();
    input.flush().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("copy.bin");

    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "copy").unwrap();
    let src = FileSrc::builder(input.path()).block_size(1000).build("src").unwrap();
    let sink = FileSink::new("sink", &output).unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    pipeline.play().unwrap();
    while pipeline.iterate() {}
    pipeline.stop().unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), data);
}

#[test]
fn test_autoplug_inserts_converter() {
    let ctx = Context::new();
    let registry = ctx.registry();
    registry.register(
        ElementFactory::new("a2b", padflow::autoplug::RANK_PRIMARY, |name| {
            Element::builder(name, NoopElement)
                .pad(Pad::builder_from_template(&PadTemplate::sink("sink", Caps::builder("x/a").build()), "sink").build())
                .pad(Pad::builder_from_template(&PadTemplate::src("src", Caps::builder("x/b").build()), "src").build())
                .build()
        })
        .template(PadTemplate::sink("sink", Caps::builder("x/a").build()))
        .template(PadTemplate::src("src", Caps::builder("x/b").build())),
    );

    let pipeline = Pipeline::new(&ctx, "autoplug").unwrap();
    let src = FakeSrc::builder()
        .num_buffers(2)
        .caps(Caps::builder("x/a").build())
        .build("src")
        .unwrap();
    let sink = FakeSink::builder().caps(Caps::builder("x/b").build()).build("sink").unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();

    let ret = pipeline
        .autoplug_link(&src.pad("src").unwrap(), &sink.pad("sink").unwrap(), registry)
        .unwrap();
    assert!(ret.is_linked());
    assert!(pipeline.child_by_name("a2b0").is_some());
    assert_eq!(pipeline.children().len(), 3);
}

#[test]
fn test_autoplug_without_candidates_refuses() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "autoplug").unwrap();
    let src = FakeSrc::builder()
        .caps(Caps::builder("x/a").build())
        .build("src")
        .unwrap();
    let sink = FakeSink::builder().caps(Caps::builder("x/b").build()).build("sink").unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();

    let ret = pipeline
        .autoplug_link(&src.pad("src").unwrap(), &sink.pad("sink").unwrap(), ctx.registry())
        .unwrap();
    assert_eq!(ret, PadLinkReturn::Refused);
    assert_eq!(pipeline.children().len(), 2);
}

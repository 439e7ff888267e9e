//! Clock selection and distribution, and the two built-in schedulers.

use padflow::bus::Message;
use padflow::clock::{ClockId, ClockReturn};
use padflow::element::NoopElement;
use padflow::prelude::*;
use padflow::scheduler::{BasicPolicy, SchedulerFactory, SchedulerPolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

struct Provider {
    clock: Arc<dyn Clock>,
    priority: u32,
}

impl Provider {
    fn element(name: &str, priority: u32) -> Element {
        Element::new(
            name,
            Provider {
                clock: Arc::new(SystemClock::with_name(format!("{name}-clock"))),
                priority,
            },
        )
    }
}

impl ElementImpl for Provider {
    fn provides_clock(&self) -> bool {
        true
    }

    fn provide_clock(&self) -> Option<Arc<dyn Clock>> {
        Some(Arc::clone(&self.clock))
    }

    fn clock_priority(&self) -> u32 {
        self.priority
    }
}

fn clock_name(pipeline: &Pipeline) -> Option<String> {
    pipeline.clock().map(|c| c.name().to_string())
}

#[test]
fn test_system_clock_without_providers() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "p").unwrap();
    pipeline.add(&FakeSink::new("sink").unwrap()).unwrap();
    pipeline.set_state(State::Paused).unwrap();
    assert_eq!(clock_name(&pipeline).as_deref(), Some("system-monotonic"));
    pipeline.stop().unwrap();
}

#[test]
fn test_highest_priority_provider_is_chosen() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "p").unwrap();
    let mut bus = pipeline.subscribe();
    pipeline
        .add_many(&[
            &Provider::element("low", 10),
            &Provider::element("high", 90),
            &Provider::element("tie", 90),
        ])
        .unwrap();

    pipeline.set_state(State::Paused).unwrap();
    assert_eq!(clock_name(&pipeline).as_deref(), Some("high-clock"));
    assert!(bus.drain().contains(&Message::NewClock {
        clock: "high-clock".to_string()
    }));
    pipeline.stop().unwrap();
}

#[test]
fn test_forced_clock_beats_providers() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "p").unwrap();
    pipeline.add(&Provider::element("provider", 100)).unwrap();
    pipeline.use_clock(Some(Arc::new(SystemClock::with_name("forced"))));
    pipeline.set_state(State::Paused).unwrap();
    assert_eq!(clock_name(&pipeline).as_deref(), Some("forced"));
    pipeline.stop().unwrap();
}

#[test]
fn test_provider_in_nested_bin_is_found() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "p").unwrap();
    let inner = Bin::new(&ctx, "inner").unwrap();
    inner.add(&Provider::element("deep", 1)).unwrap();
    pipeline.add(&inner).unwrap();
    pipeline.set_state(State::Paused).unwrap();
    assert_eq!(clock_name(&pipeline).as_deref(), Some("deep-clock"));
    pipeline.stop().unwrap();
}

#[test]
fn test_clock_reaches_receivers_on_play() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "p").unwrap();
    let sink = FakeSink::builder().sync(true).build("sink").unwrap();
    let plain = Element::new("plain", NoopElement);
    pipeline.add_many(&[&sink, &plain]).unwrap();

    pipeline.set_state(State::Paused).unwrap();
    assert!(sink.clock().is_none());
    pipeline.play().unwrap();
    assert!(sink.clock().is_some());
    assert!(plain.clock().is_none());
    pipeline.stop().unwrap();
}

#[test]
fn test_synced_sink_waits_for_timestamps() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "p").unwrap();
    let src = FakeSrc::builder()
        .num_buffers(4)
        .duration(ClockTime::from_millis(10))
        .build("src")
        .unwrap();
    let sink = FakeSink::builder().sync(true).build("sink").unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    let started = Instant::now();
    pipeline.play().unwrap();
    while pipeline.iterate() {}
    assert_eq!(FakeSink::buffers_received(&sink), 4);
    // last buffer is stamped 30ms
    assert!(started.elapsed() >= Duration::from_millis(29));
    pipeline.stop().unwrap();
}

#[test]
fn test_unschedule_interrupts_wait_from_another_thread() {
    let clock = SystemClock::new();
    let id = ClockId::new(clock.now() + ClockTime::from_secs(30));
    let remote = id.clone();
    let waker = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        remote.unschedule();
    });
    assert_eq!(clock.wait(&id), ClockReturn::Unscheduled);
    waker.join().unwrap();
}

#[test]
fn test_custom_scheduler_from_context() {
    let ctx = Context::new();
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    ctx.schedulers().register(SchedulerFactory::new("counting", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(BasicPolicy::default()) as Box<dyn SchedulerPolicy>
    }));

    let pipeline = Pipeline::with_scheduler(&ctx, "p", "counting").unwrap();
    assert_eq!(pipeline.scheduler().policy_name(), "basic");
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(matches!(
        Pipeline::with_scheduler(&ctx, "q", "nope"),
        Err(Error::UnknownFactory(_))
    ));
}

#[test]
fn test_threaded_pause_stops_streaming() {
    let ctx = Context::new();
    let pipeline = Pipeline::with_scheduler(&ctx, "p", "threaded").unwrap();
    let src = FakeSrc::builder().size(8).build("src").unwrap();
    let sink = FakeSink::new("sink").unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();
    assert!(pipeline.scheduler().is_threaded());

    pipeline.play().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while FakeSink::buffers_received(&sink) < 10 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(FakeSink::buffers_received(&sink) >= 10);

    pipeline.set_state(State::Paused).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    let paused_at = FakeSink::buffers_received(&sink);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(FakeSink::buffers_received(&sink), paused_at);

    pipeline.play().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while FakeSink::buffers_received(&sink) <= paused_at && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(FakeSink::buffers_received(&sink) > paused_at);
    pipeline.stop().unwrap();
}

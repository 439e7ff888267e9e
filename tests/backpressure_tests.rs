//! Bounded queues and pools pushing back on producers.

use padflow::elements::LeakyMode;
use padflow::memory::BufferPool;
use padflow::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

fn slow_sink(name: &str, delay: Duration) -> Element {
    FakeSink::builder()
        .on_buffer(move |_, _| thread::sleep(delay))
        .build(name)
        .unwrap()
}

fn wait_for_eos(sink: &Element) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !FakeSink::is_eos(sink) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(FakeSink::is_eos(sink), "sink never saw EOS");
}

fn threaded_chain(ctx: &Context, src: &Element, queue: &Element, sink: &Element) -> Pipeline {
    let pipeline = Pipeline::with_scheduler(ctx, "p", "threaded").unwrap();
    pipeline.add_many(&[src, queue, sink]).unwrap();
    src.link(queue).unwrap();
    queue.link(sink).unwrap();
    pipeline
}

#[test]
fn test_full_queue_holds_producer_back() {
    let ctx = Context::new();
    let src = FakeSrc::builder().num_buffers(50).size(16).build("src").unwrap();
    let queue = Queue::builder().max_buffers(3).build("queue").unwrap();
    let sink = slow_sink("sink", Duration::from_millis(1));
    let pipeline = threaded_chain(&ctx, &src, &queue, &sink);

    pipeline.play().unwrap();
    wait_for_eos(&sink);

    let stats = Queue::stats(&queue);
    assert!(stats.max_level <= 3, "queue grew to {}", stats.max_level);
    assert_eq!(stats.dropped, 0);
    assert_eq!(FakeSink::buffers_received(&sink), 50);
    pipeline.stop().unwrap();
}

#[test]
fn test_leaky_upstream_drops_new_buffers() {
    let ctx = Context::new();
    let src = FakeSrc::builder().num_buffers(100).size(16).build("src").unwrap();
    let queue = Queue::builder()
        .max_buffers(2)
        .leaky(LeakyMode::Upstream)
        .build("queue")
        .unwrap();
    let sink = slow_sink("sink", Duration::from_millis(2));
    let pipeline = threaded_chain(&ctx, &src, &queue, &sink);

    pipeline.play().unwrap();
    wait_for_eos(&sink);

    let stats = Queue::stats(&queue);
    assert!(stats.dropped > 0);
    assert!(stats.max_level <= 2);
    assert_eq!(FakeSink::buffers_received(&sink) + stats.dropped, 100);
    assert_eq!(FakeSrc::buffers_produced(&src), 100);
    pipeline.stop().unwrap();
}

#[test]
fn test_leaky_downstream_drops_old_buffers() {
    let ctx = Context::new();
    let src = FakeSrc::builder().num_buffers(100).size(16).build("src").unwrap();
    let queue = Queue::builder()
        .max_buffers(2)
        .leaky(LeakyMode::Downstream)
        .build("queue")
        .unwrap();
    let sink = slow_sink("sink", Duration::from_millis(2));
    let pipeline = threaded_chain(&ctx, &src, &queue, &sink);

    pipeline.play().unwrap();
    wait_for_eos(&sink);

    let stats = Queue::stats(&queue);
    assert!(stats.dropped > 0);
    assert_eq!(FakeSink::buffers_received(&sink) + stats.dropped, 100);
    pipeline.stop().unwrap();
}

#[test]
fn test_stop_releases_blocked_producer() {
    let ctx = Context::new();
    let src = FakeSrc::builder().size(16).build("src").unwrap();
    let queue = Queue::builder().max_buffers(2).build("queue").unwrap();
    let sink = slow_sink("sink", Duration::from_millis(20));
    let pipeline = threaded_chain(&ctx, &src, &queue, &sink);

    pipeline.play().unwrap();
    thread::sleep(Duration::from_millis(60));
    assert!(Queue::stats(&queue).max_level >= 1);

    let started = Instant::now();
    pipeline.stop().unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(pipeline.state(), State::Null);
}

#[test]
fn test_paused_queue_holds_what_arrives() {
    let ctx = Context::new();
    let pipeline = Pipeline::with_scheduler(&ctx, "p", "threaded").unwrap();
    let queue = Queue::builder().max_buffers(4).build("queue").unwrap();
    let sink = FakeSink::new("sink").unwrap();
    pipeline.add_many(&[&queue, &sink]).unwrap();
    queue.link(&sink).unwrap();
    let upstream = Pad::new("upstream", PadDirection::Src);
    upstream.link(&queue.pad("sink").unwrap()).unwrap();

    pipeline.play().unwrap();
    thread::sleep(Duration::from_millis(30));
    pipeline.set_state(State::Paused).unwrap();
    thread::sleep(Duration::from_millis(30));

    assert_eq!(upstream.push(Buffer::from_slice(b"late")), Ok(FlowSuccess::Ok));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(FakeSink::buffers_received(&sink), 0);
    assert_eq!(Queue::stats(&queue).buffers, 1);

    pipeline.play().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while FakeSink::buffers_received(&sink) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(FakeSink::buffers_received(&sink), 1);
    pipeline.stop().unwrap();
}

#[test]
fn test_pool_acquire_waits_for_release() {
    let pool = BufferPool::new("frames", 64, 2).unwrap();
    let a = pool.acquire();
    let b = pool.acquire();
    assert!(pool.try_acquire().is_none());

    let err = pool.acquire_timeout(Duration::from_millis(10)).unwrap_err();
    assert!(matches!(err, Error::PoolExhausted));

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        drop(a);
    });
    let c = pool.acquire_timeout(Duration::from_secs(5)).unwrap();
    releaser.join().unwrap();
    assert_eq!(c.len(), 64);

    drop(b);
    drop(c);
    let stats = pool.stats();
    assert_eq!(stats.available, 2);
    assert_eq!(stats.acquisitions, 3);
    assert_eq!(stats.releases, 3);
}

#[test]
fn test_source_falls_back_to_heap_when_pool_is_held() {
    let ctx = Context::new();
    let pipeline = Pipeline::new(&ctx, "p").unwrap();
    let held = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
    let keep = held.clone();
    let src = FakeSrc::builder()
        .num_buffers(6)
        .size(8)
        .pool_slots(2)
        .build("src")
        .unwrap();
    let sink = FakeSink::builder()
        .on_buffer(move |_, buffer| keep.lock().push(buffer.clone()))
        .build("sink")
        .unwrap();
    pipeline.add_many(&[&src, &sink]).unwrap();
    src.link(&sink).unwrap();

    pipeline.play().unwrap();
    while pipeline.iterate() {}
    assert_eq!(FakeSink::buffers_received(&sink), 6);
    assert_eq!(held.lock().len(), 6);
    pipeline.stop().unwrap();
}

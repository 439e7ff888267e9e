//! Metrics collection using metrics-rs.
//!
//! Recording is a no-op until the application installs a recorder.

use crate::element::State;
use crate::pad::FlowError;
use metrics::{Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_DESCRIBED: AtomicBool = AtomicBool::new(false);

const BUFFERS_PUSHED: &str = "padflow_buffers_pushed";
const BYTES_PUSHED: &str = "padflow_bytes_pushed";
const FLOW_ERRORS: &str = "padflow_flow_errors";
const POOL_AVAILABLE: &str = "padflow_pool_available";
const QUEUE_LEVEL: &str = "padflow_queue_level";
const STATE_CHANGES: &str = "padflow_state_changes";

/// Register metric descriptions with the installed recorder.
///
/// Idempotent; call once after installing an exporter.
pub fn init_metrics() {
    if METRICS_DESCRIBED.swap(true, Ordering::SeqCst) {
        return;
    }
    metrics::describe_counter!(BUFFERS_PUSHED, Unit::Count, "Buffers pushed across pad links");
    metrics::describe_counter!(BYTES_PUSHED, Unit::Bytes, "Bytes pushed across pad links");
    metrics::describe_counter!(FLOW_ERRORS, Unit::Count, "Fatal flow returns on push");
    metrics::describe_gauge!(POOL_AVAILABLE, Unit::Count, "Free slots in a buffer pool");
    metrics::describe_gauge!(QUEUE_LEVEL, Unit::Count, "Buffers waiting in a queue element");
    metrics::describe_counter!(STATE_CHANGES, Unit::Count, "Committed element state steps");
}

/// A buffer left a source pad.
#[inline]
pub fn record_buffer_pushed(pad: &str, bytes: usize) {
    counter!(BUFFERS_PUSHED, "pad" => pad.to_string()).increment(1);
    counter!(BYTES_PUSHED, "pad" => pad.to_string()).increment(bytes as u64);
}

/// A push ended in a fatal flow return.
#[inline]
pub fn record_flow_error(error: FlowError) {
    counter!(FLOW_ERRORS, "kind" => error.name()).increment(1);
}

/// Free slots left in a pool.
#[inline]
pub fn record_pool_available(pool: &str, available: usize) {
    gauge!(POOL_AVAILABLE, "pool" => pool.to_string()).set(available as f64);
}

/// Buffers currently held by a queue.
#[inline]
pub fn record_queue_level(queue: &str, level: usize) {
    gauge!(QUEUE_LEVEL, "queue" => queue.to_string()).set(level as f64);
}

/// An element committed a state step.
#[inline]
pub fn record_state_change(element: &str, state: State) {
    counter!(STATE_CHANGES, "element" => element.to_string(), "state" => state_label(state))
        .increment(1);
}

fn state_label(state: State) -> &'static str {
    match state {
        State::Null => "null",
        State::Ready => "ready",
        State::Paused => "paused",
        State::Playing => "playing",
    }
}

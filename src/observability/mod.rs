//! Observability: metrics and tracing.
//!
//! padflow logs through `tracing` and counts through `metrics`; install a
//! subscriber and an exporter to see either.
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `padflow_buffers_pushed` | Counter | Buffers pushed across pad links |
//! | `padflow_bytes_pushed` | Counter | Bytes pushed across pad links |
//! | `padflow_flow_errors` | Counter | Fatal flow returns, by kind |
//! | `padflow_pool_available` | Gauge | Free slots in a buffer pool |
//! | `padflow_queue_level` | Gauge | Buffers waiting in a queue element |
//! | `padflow_state_changes` | Counter | Committed element state steps |
//!
//! Scheduler tasks run inside an element span (see [`span_element`]).

pub mod metrics;
mod tracing_support;

pub use metrics::init_metrics;
pub use tracing_support::{instrument_pipeline, span_element, span_pipeline, trace_buffer, trace_eos};

//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

/// Span for everything happening inside a pipeline.
///
/// ```rust
/// use padflow::observability::span_pipeline;
///
/// let span = span_pipeline("player");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_pipeline(name: &str) -> Span {
    span!(Level::INFO, "pipeline", name = %name)
}

/// Span for one element's streaming work.
#[inline]
pub fn span_element(bin: &str, element: &str) -> Span {
    span!(Level::DEBUG, "element", bin = %bin, element = %element)
}

/// Enter a pipeline span until the guard drops.
pub fn instrument_pipeline(name: &str) -> tracing::span::EnteredSpan {
    span_pipeline(name).entered()
}

/// Log a buffer crossing a link.
#[inline]
pub fn trace_buffer(pad: &str, size: usize, sequence: u64) {
    tracing::trace!(pad = %pad, size, sequence, "buffer");
}

/// Log end-of-stream reaching an element.
#[inline]
pub fn trace_eos(element: &str) {
    tracing::debug!(element = %element, "end of stream");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_without_subscriber() {
        let _p = instrument_pipeline("p");
        let _e = span_element("p", "src").entered();
        trace_buffer("src.src", 10, 0);
        trace_eos("sink");
    }
}

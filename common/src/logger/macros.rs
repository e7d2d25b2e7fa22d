use super::TraceId;
use tracing::{Span, field};

/// Create a root span for a request / batch / job.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        provider = field::Empty,
        request_id = field::Empty
    )
}

/// Create a child span (inherits trace_id automatically via the span tree).
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        provider = field::Empty,
        request_id = field::Empty
    )
}

/// Record the provider/request identifiers onto the current span, once known.
pub fn annotate_span(provider: &str, request_id: Option<&uuid::Uuid>) {
    let span = Span::current();
    span.record("provider", field::display(provider));
    if let Some(id) = request_id {
        span.record("request_id", field::display(id));
    }
}

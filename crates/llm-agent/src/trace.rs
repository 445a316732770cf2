//! W3C trace context for outgoing requests.

use opentelemetry::trace::TraceContextExt;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// `traceparent` header value for the current span, if it is being traced.
pub fn current_traceparent() -> Option<String> {
    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();

    if !span_context.is_valid() {
        return None;
    }

    let flags = if span_context.is_sampled() { "01" } else { "00" };
    Some(format!(
        "00-{}-{}-{}",
        span_context.trace_id(),
        span_context.span_id(),
        flags
    ))
}

/// Attach the current trace context to a request, when there is one.
pub fn with_traceparent(builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match current_traceparent() {
        Some(tp) => builder.header("traceparent", tp),
        None => builder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_traceparent_without_subscriber() {
        assert_eq!(current_traceparent(), None);
    }
}

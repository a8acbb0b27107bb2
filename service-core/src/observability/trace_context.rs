//! W3C Trace Context propagation for outbound HTTP calls.
//!
//! Object storage reads, engine calls and asset downloads all leave the
//! process over HTTP; the helpers here stamp those requests with the current
//! span's `traceparent` so the downstream side can join the trace.
//!
//! See: https://www.w3.org/TR/trace-context/

use opentelemetry::trace::TraceContextExt;
use reqwest::header::HeaderMap;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Header name for W3C traceparent
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Header name for W3C tracestate
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Inject the current span's trace context into outbound headers.
///
/// Nothing is written when there is no valid OpenTelemetry span (for
/// example when OTLP export is disabled).
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return;
    }

    // version-trace_id-span_id-trace_flags
    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = traceparent.parse() {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty()
        && let Ok(value) = tracestate.parse()
    {
        headers.insert(TRACESTATE_HEADER, value);
    }
}

/// A request builder that injects trace headers when sent.
pub struct TracedRequest {
    request: reqwest::RequestBuilder,
}

impl TracedRequest {
    pub fn new(request: reqwest::RequestBuilder) -> Self {
        Self { request }
    }

    pub fn json<T: serde::Serialize + ?Sized>(self, json: &T) -> Self {
        Self {
            request: self.request.json(json),
        }
    }

    /// Attach a bearer token when one is configured.
    pub fn maybe_bearer_auth(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => Self {
                request: self.request.bearer_auth(token),
            },
            None => self,
        }
    }

    pub async fn send(self) -> Result<reqwest::Response, reqwest::Error> {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);

        self.request.headers(headers).send().await
    }
}

/// Extension trait for reqwest::Client to create traced requests.
pub trait TracedClientExt {
    fn traced_get<U: reqwest::IntoUrl>(&self, url: U) -> TracedRequest;
    fn traced_post<U: reqwest::IntoUrl>(&self, url: U) -> TracedRequest;
}

impl TracedClientExt for reqwest::Client {
    fn traced_get<U: reqwest::IntoUrl>(&self, url: U) -> TracedRequest {
        TracedRequest::new(self.get(url))
    }

    fn traced_post<U: reqwest::IntoUrl>(&self, url: U) -> TracedRequest {
        TracedRequest::new(self.post(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_headers_without_active_span() {
        let mut headers = HeaderMap::new();
        inject_trace_context(&mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn missing_token_leaves_request_untouched() {
        let client = reqwest::Client::new();
        let request = client
            .traced_get("http://localhost/object")
            .maybe_bearer_auth(None)
            .request
            .build()
            .unwrap();
        assert!(request.headers().get("authorization").is_none());
    }

    #[test]
    fn token_becomes_bearer_header() {
        let client = reqwest::Client::new();
        let request = client
            .traced_get("http://localhost/object")
            .maybe_bearer_auth(Some("abc"))
            .request
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer abc");
    }
}

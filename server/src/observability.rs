use std::{
    sync::Arc,
    task::{Context as TaskContext, Poll},
    time::Duration,
};

use axum::{
    extract::MatchedPath,
    http::{HeaderValue, Request, Response, header::HeaderName},
};
use tower::{Layer, Service};
use tower_http::trace::{MakeSpan, OnResponse};
use tracing::{Level, Span, event, field};
use uuid::Uuid;

pub(crate) static REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Per-request data captured before routing and carried in request extensions.
#[derive(Clone, Debug)]
pub struct RequestContext {
    request_id: Arc<str>,
}

impl RequestContext {
    fn new(request_id: String) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

pub fn request_context_layer() -> RequestContextLayer {
    RequestContextLayer
}

/// Reuses an inbound `x-request-id` or generates one, then stores the
/// [`RequestContext`] so the trace span and handlers can see it.
#[derive(Clone, Copy, Default)]
pub struct RequestContextLayer;

#[derive(Clone)]
pub struct RequestContextMiddleware<S> {
    inner: S,
}

impl<S> Layer<S> for RequestContextLayer {
    type Service = RequestContextMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestContextMiddleware { inner }
    }
}

impl<S, B> Service<Request<B>> for RequestContextMiddleware<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let inbound = request
            .headers()
            .get(&REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned);

        let request_id = match inbound {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                if let Ok(value) = HeaderValue::from_str(&id) {
                    request
                        .headers_mut()
                        .insert(REQUEST_ID_HEADER.clone(), value);
                }
                id
            }
        };

        request
            .extensions_mut()
            .insert(RequestContext::new(request_id));

        self.inner.call(request)
    }
}

pub fn http_make_span() -> HttpMakeSpan {
    HttpMakeSpan
}

#[derive(Clone, Copy, Default)]
pub struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id().to_owned())
            .unwrap_or_else(|| "unknown".to_owned());
        let route = request
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_owned())
            .unwrap_or_else(|| request.uri().path().to_owned());

        tracing::info_span!(
            "http_request",
            request_id = %request_id,
            http.request.method = %request.method(),
            http.route = %route,
            http.response.status_code = field::Empty,
        )
    }
}

pub fn response_logger() -> ResponseLogger {
    ResponseLogger
}

/// Logs completion at WARN for 4xx and ERROR for 5xx.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseLogger;

impl<B> OnResponse<B> for ResponseLogger {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status();
        let latency_ms = latency.as_millis() as u64;
        let code = status.as_u16();
        span.record("http.response.status_code", code);

        if status.is_server_error() {
            event!(parent: span, Level::ERROR, status = code, latency_ms, "request completed");
        } else if status.is_client_error() {
            event!(parent: span, Level::WARN, status = code, latency_ms, "request completed");
        } else {
            event!(parent: span, Level::INFO, status = code, latency_ms, "request completed");
        }
    }
}

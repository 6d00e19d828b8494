//! Pass-through forwarding to the blog's content server.
//!
//! Serves every request the language router does not take over, and the
//! internal rewrites it asks for. Bodies stream in both directions.

use crate::metrics::GatewayMetrics;
use crate::proxy::ProxyError;
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{request::Parts, Method};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hop-by-hop request headers not forwarded to the origin.
const SKIPPED_REQUEST_HEADERS: &[&str] =
    &["host", "connection", "content-length", "transfer-encoding"];

/// Hop-by-hop response headers not returned to the client.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding"];

pub struct OriginClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    /// `X-Forwarded-Proto` sent when the client did not supply one.
    default_scheme: String,
    metrics: Arc<GatewayMetrics>,
}

impl OriginClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
        default_scheme: &str,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            default_scheme: default_scheme.to_string(),
            metrics,
        }
    }

    /// Forward `req` to the origin, optionally under a rewritten path and query.
    pub async fn forward(&self, req: Request, rewritten: Option<String>) -> Response {
        match self.try_forward(req, rewritten).await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_upstream_failure();
                warn!("Origin request failed: {}", e);
                e.into_response()
            }
        }
    }

    async fn try_forward(
        &self,
        req: Request,
        rewritten: Option<String>,
    ) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();

        let path_and_query = rewritten.unwrap_or_else(|| {
            parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string())
        });
        let url = format!("{}{}", self.base_url, path_and_query);

        debug!("Forwarding {} {} to origin", parts.method, path_and_query);

        let mut request = self
            .client
            .request(parts.method.clone(), &url)
            .headers(origin_headers(&parts, &self.default_scheme));
        if parts.method != Method::GET && parts.method != Method::HEAD {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        self.metrics.record_passthrough();

        let upstream = match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ProxyError::Upstream(e)),
            Err(_) => return Err(ProxyError::Timeout(self.timeout)),
        };

        let status = upstream.status();
        let mut headers = HeaderMap::with_capacity(upstream.headers().len());
        for (name, value) in upstream.headers() {
            if !SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                headers.append(name.clone(), value.clone());
            }
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn origin_headers(parts: &Parts, default_scheme: &str) -> HeaderMap {
    let original = &parts.headers;
    let mut headers = HeaderMap::with_capacity(original.len() + 2);

    for (name, value) in original {
        if !SKIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    if !headers.contains_key("x-forwarded-host") {
        // HTTP/2 clients send the host as the URI authority only.
        let host = original.get(header::HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
        if let Some(host) = host {
            headers.insert("x-forwarded-host", host);
        }
    }
    if !headers.contains_key("x-forwarded-proto") {
        let scheme = parts.uri.scheme_str().unwrap_or(default_scheme);
        if let Ok(scheme) = HeaderValue::from_str(scheme) {
            headers.insert("x-forwarded-proto", scheme);
        }
    }

    headers
}

//! Rewrite proxy: serves `/<lang>/...` pages from the translation shards.
//!
//! One upstream attempt per client request. Redirects are handed back to the
//! client (rewritten), never followed. HTML is buffered and rewritten; every
//! other content type streams through untouched.

use crate::metrics::GatewayMetrics;
use crate::rewrite::{RewriteTarget, Rewriter};
use crate::router::{LANG_PARAM, PATH_PARAM};
use crate::shard::{strip_www, ShardSet};
use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{request::Parts, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::{form_urlencoded, Position, Url};

/// Header carrying the end user's IP to the translation service.
pub const VIEWER_IP_HEADER: &str = "x-gt-viewer-ip";

/// Request headers never copied upstream.
const SKIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "accept-encoding",
    "x-forwarded-host",
    "x-forwarded-proto",
    "transfer-encoding",
    VIEWER_IP_HEADER,
];

/// Response headers dropped because the body may be resized or re-framed.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &[
    "content-length",
    "transfer-encoding",
    "content-encoding",
    "connection",
    "link",
];

/// Client IP sources, most trusted first. `x-forwarded-for` is checked last.
const VIEWER_IP_SOURCES: &[&str] = &["cf-connecting-ip", "x-sucuri-clientip", "x-real-ip"];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing glang or gurl parameter")]
    MissingParams,

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("request carries no usable host")]
    InvalidHost,

    #[error("invalid upstream url: {0}")]
    InvalidUpstreamUrl(#[from] url::ParseError),

    #[error("redirect target is not a valid header value: {0}")]
    InvalidRedirect(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] reqwest::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("failed to read upstream body: {0}")]
    Body(#[source] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingParams
            | ProxyError::UnsupportedLanguage(_)
            | ProxyError::InvalidHost
            | ProxyError::InvalidUpstreamUrl(_)
            | ProxyError::InvalidRedirect(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(_) | ProxyError::Timeout(_) | ProxyError::Body(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Body::empty()).into_response()
    }
}

/// Control and pass-through parameters of a proxy endpoint query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyParams {
    /// Requested language, lower-cased.
    pub language: String,
    /// Decoded rest path, without leading slash.
    pub gurl: String,
    /// Every other parameter, in order.
    pub extra: Vec<(String, String)>,
}

impl ProxyParams {
    /// # Errors
    /// [`ProxyError::MissingParams`] when `glang` or `gurl` is absent or empty.
    pub fn parse(query: Option<&str>) -> Result<Self, ProxyError> {
        let mut language = None;
        let mut gurl = None;
        let mut extra = Vec::new();

        for (key, value) in form_urlencoded::parse(query.unwrap_or("").as_bytes()) {
            match &*key {
                LANG_PARAM => {
                    if language.is_none() {
                        language = Some(value.to_ascii_lowercase());
                    }
                }
                PATH_PARAM => {
                    if gurl.is_none() {
                        gurl = Some(value.into_owned());
                    }
                }
                _ => extra.push((key.into_owned(), value.into_owned())),
            }
        }

        match (language, gurl) {
            (Some(language), Some(gurl)) if !language.is_empty() && !gurl.is_empty() => Ok(Self {
                language,
                gurl,
                extra,
            }),
            _ => Err(ProxyError::MissingParams),
        }
    }
}

/// Everything the proxy needs to know about one inbound request.
#[derive(Debug)]
pub struct RequestContext {
    pub language: String,
    /// Host the client asked for, lower-cased, without port.
    pub original_host: String,
    /// `http` or `https`.
    pub protocol: String,
    pub rest_path: String,
    pub query: Vec<(String, String)>,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Body,
}

/// Static settings of the rewrite proxy.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Domain the shard ids are prefixed to.
    pub upstream_domain: String,
    /// Scheme used when `X-Forwarded-Proto` is absent or unusable.
    pub default_scheme: String,
    /// Limit on waiting for the upstream response.
    pub timeout: Duration,
}

/// HTTP client for upstream calls: redirects are never followed.
pub fn build_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .build()
}

pub struct TranslationProxy {
    client: reqwest::Client,
    shards: Arc<ShardSet>,
    rewriter: Arc<Rewriter>,
    settings: ProxySettings,
    metrics: Arc<GatewayMetrics>,
}

impl TranslationProxy {
    pub fn new(
        client: reqwest::Client,
        shards: Arc<ShardSet>,
        rewriter: Arc<Rewriter>,
        settings: ProxySettings,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            client,
            shards,
            rewriter,
            settings,
            metrics,
        }
    }

    /// Serve a request addressed to the proxy endpoint.
    ///
    /// Never fails: errors become empty-bodied 400 or 502 responses.
    pub async fn handle(&self, req: Request) -> Response {
        match self.try_handle(req).await {
            Ok(response) => response,
            Err(e) => {
                if e.status() == StatusCode::BAD_GATEWAY {
                    self.metrics.record_upstream_failure();
                    warn!("Translation proxy failed: {}", e);
                } else {
                    self.metrics.record_rejected();
                    debug!("Translation proxy rejected request: {}", e);
                }
                e.into_response()
            }
        }
    }

    async fn try_handle(&self, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();

        let params = ProxyParams::parse(parts.uri.query())?;

        let languages = self.rewriter.languages();
        if !languages.is_supported(&params.language) {
            return Err(ProxyError::UnsupportedLanguage(params.language));
        }

        if languages.is_native(&params.language) {
            self.metrics.record_native_redirect();
            return native_redirect(&params);
        }

        let original_host = request_host(&parts).ok_or(ProxyError::InvalidHost)?;
        let protocol = self.protocol(&parts.headers);

        self.forward(RequestContext {
            language: params.language,
            original_host,
            protocol,
            rest_path: params.gurl,
            query: params.extra,
            method: parts.method,
            headers: parts.headers,
            body,
        })
        .await
    }

    /// Fetch the translated page from the shard serving `ctx.original_host`.
    pub async fn forward(&self, ctx: RequestContext) -> Result<Response, ProxyError> {
        let shard = self.shards.pick(&ctx.original_host);
        let upstream_url = self.upstream_url(&ctx.protocol, shard, &ctx.rest_path, &ctx.query)?;
        let synthetic_host = synthetic_host(&ctx.language, &ctx.original_host);
        let headers = upstream_headers(&ctx.headers, &synthetic_host)?;

        debug!(
            "Proxying {} /{} ({}) to {}",
            ctx.method, ctx.rest_path, ctx.language, upstream_url
        );

        let mut request = self
            .client
            .request(ctx.method.clone(), upstream_url)
            .headers(headers);
        if has_body(&ctx.method) {
            request = request.body(reqwest::Body::wrap_stream(ctx.body.into_data_stream()));
        }

        self.metrics.record_proxied();

        let upstream = match tokio::time::timeout(self.settings.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ProxyError::Upstream(e)),
            Err(_) => return Err(ProxyError::Timeout(self.settings.timeout)),
        };

        let target = RewriteTarget {
            language: &ctx.language,
            original_host: &ctx.original_host,
            synthetic_host: &synthetic_host,
        };
        self.respond(upstream, &target).await
    }

    async fn respond(
        &self,
        upstream: reqwest::Response,
        target: &RewriteTarget<'_>,
    ) -> Result<Response, ProxyError> {
        let status = upstream.status();
        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let headers = self.response_headers(upstream.headers(), target);

        let body = if is_rewritable(&content_type) {
            let bytes = match tokio::time::timeout(self.settings.timeout, upstream.bytes()).await {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => return Err(ProxyError::Body(e)),
                Err(_) => return Err(ProxyError::Timeout(self.settings.timeout)),
            };
            let html = String::from_utf8_lossy(&bytes);
            self.metrics.record_html_rewrite();
            Body::from(self.rewriter.rewrite_html(&html, target))
        } else {
            self.metrics.record_streamed();
            Body::from_stream(upstream.bytes_stream())
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }

    fn response_headers(&self, upstream: &HeaderMap, target: &RewriteTarget<'_>) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(upstream.len());

        for (name, value) in upstream {
            if SKIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }

            if *name == header::LOCATION || *name == header::REFRESH {
                let rewritten = value
                    .to_str()
                    .ok()
                    .map(|v| self.rewriter.rewrite_header_location(v, target))
                    .and_then(|v| HeaderValue::from_str(&v).ok());
                headers.append(name.clone(), rewritten.unwrap_or_else(|| value.clone()));
                continue;
            }

            headers.append(name.clone(), value.clone());
        }

        headers
    }

    fn upstream_url(
        &self,
        protocol: &str,
        shard: &str,
        rest_path: &str,
        query: &[(String, String)],
    ) -> Result<Url, ProxyError> {
        let path = rest_path.strip_prefix('/').unwrap_or(rest_path);
        let mut url = Url::parse(&format!(
            "{}://{}.{}/{}",
            protocol,
            shard,
            self.settings.upstream_domain,
            path
        ))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn protocol(&self, headers: &HeaderMap) -> String {
        match headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()) {
            Some("http") => "http".to_string(),
            Some("https") => "https".to_string(),
            _ => self.settings.default_scheme.clone(),
        }
    }
}

/// Whether a response of this content type is buffered and rewritten.
pub fn is_rewritable(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

/// `Host` sent upstream: `<lang>.<host without www.>`.
pub fn synthetic_host(language: &str, original_host: &str) -> String {
    format!("{}.{}", language, strip_www(original_host))
}

/// Host the client addressed, lower-cased and without port.
pub fn request_host(parts: &Parts) -> Option<String> {
    let raw = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))?;

    let host = raw.split(':').next().unwrap_or(raw).trim();
    if host.is_empty() {
        return None;
    }
    Some(host.to_ascii_lowercase())
}

/// End-user IP as reported by the CDN or the nearest proxy.
pub fn viewer_ip(headers: &HeaderMap) -> Option<String> {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    VIEWER_IP_SOURCES
        .iter()
        .find_map(|name| header_value(name))
        .or_else(|| {
            header_value("x-forwarded-for")
                .and_then(|chain| chain.split(',').next())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .map(str::to_string)
}

fn upstream_headers(original: &HeaderMap, synthetic_host: &str) -> Result<HeaderMap, ProxyError> {
    let mut headers = HeaderMap::with_capacity(original.len() + 3);

    for (name, value) in original {
        if SKIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let host = HeaderValue::from_str(synthetic_host).map_err(|_| ProxyError::InvalidHost)?;
    headers.insert(header::HOST, host);
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    if let Some(ip) = viewer_ip(original).and_then(|ip| HeaderValue::from_str(&ip).ok()) {
        headers.insert(HeaderName::from_static(VIEWER_IP_HEADER), ip);
    }

    Ok(headers)
}

fn has_body(method: &Method) -> bool {
    method != Method::GET && method != Method::HEAD
}

/// 301 to the unprefixed path, keeping the pass-through parameters.
fn native_redirect(params: &ProxyParams) -> Result<Response, ProxyError> {
    let mut url = Url::parse("http://localhost/")?;
    url.set_path(&format!(
        "/{}",
        params.gurl.strip_prefix('/').unwrap_or(&params.gurl)
    ));
    if !params.extra.is_empty() {
        url.query_pairs_mut().extend_pairs(&params.extra);
    }

    let location = &url[Position::BeforePath..];
    let value = HeaderValue::from_str(location)
        .map_err(|_| ProxyError::InvalidRedirect(location.to_string()))?;
    Ok((StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    // ==================== Parameter Parsing ====================

    #[test]
    fn test_parse_params() {
        let params = ProxyParams::parse(Some("glang=FR&gurl=post/1&utm=x&utm=y")).unwrap();
        assert_eq!(params.language, "fr");
        assert_eq!(params.gurl, "post/1");
        assert_eq!(
            params.extra,
            vec![
                ("utm".to_string(), "x".to_string()),
                ("utm".to_string(), "y".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_params_decodes_once() {
        let params = ProxyParams::parse(Some("glang=fr&gurl=a%2520b/c%26d")).unwrap();
        assert_eq!(params.gurl, "a%20b/c&d");
    }

    #[test]
    fn test_parse_params_requires_both() {
        let queries = [
            None,
            Some(""),
            Some("glang=fr"),
            Some("gurl=a"),
            Some("glang=&gurl=a"),
            Some("glang=fr&gurl="),
        ];
        for query in queries {
            assert!(
                matches!(ProxyParams::parse(query), Err(ProxyError::MissingParams)),
                "{:?}",
                query
            );
        }
    }

    // ==================== Error Mapping ====================

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ProxyError::MissingParams.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProxyError::UnsupportedLanguage("xx".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ProxyError::InvalidHost.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ProxyError::Timeout(Duration::from_secs(30)).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_response_has_empty_body() {
        let response = ProxyError::MissingParams.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    // ==================== Header Helpers ====================

    #[test]
    fn test_is_rewritable() {
        assert!(is_rewritable("text/html"));
        assert!(is_rewritable("TEXT/HTML; charset=utf-8"));
        assert!(!is_rewritable("image/png"));
        assert!(!is_rewritable("application/octet-stream"));
        assert!(!is_rewritable(""));
    }

    #[test]
    fn test_synthetic_host_strips_www() {
        assert_eq!(synthetic_host("fr", "www.example.com"), "fr.example.com");
        assert_eq!(synthetic_host("fr", "example.com"), "fr.example.com");
    }

    #[test]
    fn test_request_host_strips_port_and_lowercases() {
        let (parts, _) = axum::http::Request::builder()
            .uri("/api/gtranslate")
            .header("host", "Example.COM:3000")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(request_host(&parts).as_deref(), Some("example.com"));
    }

    #[test]
    fn test_request_host_falls_back_to_authority() {
        let (parts, _) = axum::http::Request::builder()
            .uri("https://blog.example.org/api/gtranslate")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(request_host(&parts).as_deref(), Some("blog.example.org"));
    }

    #[test]
    fn test_request_host_missing() {
        let (parts, _) = axum::http::Request::builder()
            .uri("/api/gtranslate")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(request_host(&parts), None);
    }

    #[test]
    fn test_viewer_ip_precedence() {
        let map = headers(&[
            ("x-forwarded-for", "10.0.0.1, 10.0.0.2"),
            ("x-real-ip", "10.0.0.3"),
            ("cf-connecting-ip", "10.0.0.4"),
        ]);
        assert_eq!(viewer_ip(&map).as_deref(), Some("10.0.0.4"));

        let map = headers(&[("x-forwarded-for", "10.0.0.1"), ("x-real-ip", "10.0.0.3")]);
        assert_eq!(viewer_ip(&map).as_deref(), Some("10.0.0.3"));

        let map = headers(&[("x-forwarded-for", " 10.0.0.1 , 10.0.0.2")]);
        assert_eq!(viewer_ip(&map).as_deref(), Some("10.0.0.1"));

        assert_eq!(viewer_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_upstream_headers_filtering() {
        let original = headers(&[
            ("host", "example.com"),
            ("connection", "keep-alive"),
            ("content-length", "12"),
            ("accept-encoding", "gzip, br"),
            ("x-forwarded-host", "example.com"),
            ("x-forwarded-proto", "https"),
            ("x-gt-viewer-ip", "6.6.6.6"),
            ("x-real-ip", "1.2.3.4"),
            ("cookie", "a=1"),
            ("accept-language", "fr"),
        ]);

        let out = upstream_headers(&original, "fr.example.com").unwrap();

        assert_eq!(out.get("host").unwrap(), "fr.example.com");
        assert_eq!(out.get("accept-encoding").unwrap(), "identity");
        assert_eq!(out.get("x-gt-viewer-ip").unwrap(), "1.2.3.4");
        assert_eq!(out.get("cookie").unwrap(), "a=1");
        assert_eq!(out.get("accept-language").unwrap(), "fr");
        assert!(out.get("connection").is_none());
        assert!(out.get("content-length").is_none());
        assert!(out.get("x-forwarded-host").is_none());
        assert!(out.get("x-forwarded-proto").is_none());
    }

    #[test]
    fn test_has_body() {
        assert!(!has_body(&Method::GET));
        assert!(!has_body(&Method::HEAD));
        assert!(has_body(&Method::POST));
        assert!(has_body(&Method::DELETE));
    }

    // ==================== Native Redirect ====================

    #[test]
    fn test_native_redirect_keeps_extra_params() {
        let params = ProxyParams::parse(Some("glang=pt&gurl=sobre&ref=home")).unwrap();
        let response = native_redirect(&params).unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/sobre?ref=home");
    }

    #[test]
    fn test_native_redirect_encodes_unsafe_path() {
        let params = ProxyParams::parse(Some("glang=pt&gurl=caf%C3%A9%20bar&q=a%20b")).unwrap();
        let response = native_redirect(&params).unwrap();
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/caf%C3%A9%20bar?q=a+b"
        );
    }

    #[test]
    fn test_invalid_redirect_is_bad_request() {
        let e = ProxyError::InvalidRedirect("/a\nb".to_string());
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert!(e.to_string().contains("redirect target"));
    }

    #[test]
    fn test_native_redirect_strips_leading_slash() {
        let params = ProxyParams::parse(Some("glang=pt&gurl=%2Fpost%2F1")).unwrap();
        let response = native_redirect(&params).unwrap();
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/post/1");
    }
}

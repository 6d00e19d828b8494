//! Language router: classifies inbound paths by their leading language segment.
//!
//! Classification never fails. Anything that does not look like a request for
//! a translated page is passed through untouched.

use crate::i18n::LanguageRegistry;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::sync::Arc;

/// Path of the rewrite proxy endpoint.
pub const PROXY_ENDPOINT: &str = "/api/gtranslate";

/// Query parameter carrying the requested language.
pub const LANG_PARAM: &str = "glang";

/// Query parameter carrying the encoded rest path.
pub const PATH_PARAM: &str = "gurl";

/// First segments that are never treated as a language.
const RESERVED_SEGMENTS: &[&str] = &["api", "admin", "_next"];

/// Rest paths served by the origin as-is, regardless of language.
const STATIC_FILES: &[&str] = &["/favicon.ico", "/robots.txt", "/sitemap.xml"];

/// Characters left alone by `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// What the serving layer should do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Serve the request unmodified.
    Passthrough,
    /// Serve `path` (with the original query) instead of the requested path.
    InternalRewrite { path: String, query: Option<String> },
    /// Permanent redirect for the native language, prefix stripped.
    RedirectNative { location: String },
    /// Serve the proxy endpoint with the given query.
    ProxyRewrite {
        language: String,
        gurl: String,
        query: String,
    },
}

impl RouteDecision {
    /// Path and query the request is rewritten to, if any.
    pub fn rewritten_uri(&self) -> Option<String> {
        match self {
            RouteDecision::InternalRewrite { path, query } => {
                Some(with_query(path, query.as_deref()))
            }
            RouteDecision::ProxyRewrite { query, .. } => {
                Some(format!("{}?{}", PROXY_ENDPOINT, query))
            }
            RouteDecision::Passthrough | RouteDecision::RedirectNative { .. } => None,
        }
    }
}

/// Classifies request paths against the supported-language set.
#[derive(Debug, Clone)]
pub struct LanguageRouter {
    languages: Arc<LanguageRegistry>,
}

impl LanguageRouter {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self { languages }
    }

    /// Decide how to serve `path` (with the raw `query`, without `?`).
    pub fn classify(&self, path: &str, query: Option<&str>) -> RouteDecision {
        let query = query.filter(|q| !q.is_empty());

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some(first) = segments.first() else {
            return RouteDecision::Passthrough;
        };

        let first = first.to_ascii_lowercase();
        if RESERVED_SEGMENTS.contains(&first.as_str()) {
            return RouteDecision::Passthrough;
        }

        if !self.languages.is_supported(&first) {
            return RouteDecision::Passthrough;
        }
        let language = first;

        let rest_path = format!("/{}", segments[1..].join("/"));

        if is_origin_path(&rest_path) {
            if rest_path.starts_with("/_next/") || rest_path.starts_with("/api/") {
                return RouteDecision::InternalRewrite {
                    path: rest_path,
                    query: query.map(str::to_string),
                };
            }
            return RouteDecision::Passthrough;
        }

        if self.languages.is_native(&language) {
            return RouteDecision::RedirectNative {
                location: with_query(&rest_path, query),
            };
        }

        let gurl = encode_gurl(&rest_path);
        let mut proxy_query = format!(
            "{}={}&{}={}",
            LANG_PARAM,
            utf8_percent_encode(&language, URI_COMPONENT),
            PATH_PARAM,
            gurl
        );
        if let Some(query) = query {
            proxy_query.push('&');
            proxy_query.push_str(query);
        }

        RouteDecision::ProxyRewrite {
            language,
            gurl,
            query: proxy_query,
        }
    }
}

/// Encode the segments of `path` individually and join them with `/`.
///
/// The result has no leading slash; the root path encodes to an empty string.
pub fn encode_gurl(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| utf8_percent_encode(s, URI_COMPONENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Rest paths that belong to the origin (framework assets, API, admin, static files).
fn is_origin_path(rest_path: &str) -> bool {
    rest_path == "/_next"
        || rest_path.starts_with("/_next/")
        || STATIC_FILES.contains(&rest_path)
        || rest_path.starts_with("/api/")
        || rest_path.starts_with("/admin")
        || rest_path.starts_with("/public")
}

fn with_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    }
}

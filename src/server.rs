//! HTTP server: wires the language router, the rewrite proxy and the origin.

use crate::config::Config;
use crate::metrics::GatewayMetrics;
use crate::origin::OriginClient;
use crate::proxy::{build_client, ProxySettings, TranslationProxy};
use crate::rewrite::Rewriter;
use crate::router::{LanguageRouter, RouteDecision, PROXY_ENDPOINT};
use anyhow::{Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<LanguageRouter>,
    pub proxy: Arc<TranslationProxy>,
    pub origin: Arc<OriginClient>,
    pub metrics: Arc<GatewayMetrics>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client =
            build_client(config.upstream_timeout()).context("Failed to build HTTP client")?;
        Self::with_client(config, client)
    }

    /// Build the state around an existing HTTP client.
    ///
    /// The client must not follow redirects (see [`build_client`]).
    pub fn with_client(config: &Config, client: reqwest::Client) -> Result<Self> {
        let languages = Arc::new(config.languages()?);
        let shards = Arc::new(config.shards()?);
        let rewriter = Arc::new(Rewriter::new(Arc::clone(&languages))?);
        let metrics = Arc::new(GatewayMetrics::new());

        let settings = ProxySettings {
            upstream_domain: config.upstream_domain.clone(),
            default_scheme: config.default_scheme.clone(),
            timeout: config.upstream_timeout(),
        };

        info!(
            "Gateway configured: native language '{}', {} languages, {} shards on {}",
            languages.native(),
            languages.len(),
            shards.len(),
            config.upstream_domain
        );

        Ok(Self {
            router: Arc::new(LanguageRouter::new(languages)),
            proxy: Arc::new(TranslationProxy::new(
                client.clone(),
                shards,
                rewriter,
                settings,
                Arc::clone(&metrics),
            )),
            origin: Arc::new(OriginClient::new(
                client,
                &config.origin_url,
                config.upstream_timeout(),
                &config.default_scheme,
                Arc::clone(&metrics),
            )),
            metrics,
        })
    }
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            PROXY_ENDPOINT,
            get(proxy_handler)
                .post(proxy_handler)
                .put(proxy_handler)
                .patch(proxy_handler)
                .delete(proxy_handler),
        )
        .route("/health", get(health_handler))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;

    info!("Listening on http://{}", addr);
    info!("Forwarding untranslated requests to {}", config.origin_url);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    state.proxy.handle(req).await
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let body = serde_json::json!({
        "status": "ok",
        "metrics": state.metrics.report(),
    });
    (StatusCode::OK, Json(body)).into_response()
}

/// Fallback: classify the path and act on the router's decision.
async fn dispatch(State(state): State<AppState>, mut req: Request) -> Response {
    let decision = state
        .router
        .classify(req.uri().path(), req.uri().query());

    debug!("{} {} -> {:?}", req.method(), req.uri(), decision);

    let rewritten = decision.rewritten_uri();
    match decision {
        RouteDecision::Passthrough => state.origin.forward(req, None).await,

        RouteDecision::RedirectNative { location } => match HeaderValue::from_str(&location) {
            Ok(value) => {
                state.metrics.record_native_redirect();
                (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, value)]).into_response()
            }
            Err(_) => state.origin.forward(req, None).await,
        },

        RouteDecision::InternalRewrite { path, .. } if path != PROXY_ENDPOINT => {
            state.origin.forward(req, rewritten).await
        }

        RouteDecision::InternalRewrite { .. } | RouteDecision::ProxyRewrite { .. } => {
            match rewritten.and_then(|pq| rewrite_path(req.uri(), &pq)) {
                Some(uri) => {
                    *req.uri_mut() = uri;
                    state.proxy.handle(req).await
                }
                None => state.origin.forward(req, None).await,
            }
        }
    }
}

/// Replace the path and query of `original`, keeping its scheme and authority.
///
/// HTTP/2 requests carry the host only in the URI (`:authority`), so
/// dropping it would leave the proxy without a host.
fn rewrite_path(original: &Uri, path_and_query: &str) -> Option<Uri> {
    let mut parts = original.clone().into_parts();
    parts.path_and_query = Some(path_and_query.parse().ok()?);
    Uri::from_parts(parts).ok()
}

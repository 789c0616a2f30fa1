//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, metrics, timeout, body limit)
//! - Bind server to a plain or TLS listener
//! - Swap in reloaded configuration
//! - Close XMPP sessions once HTTP has drained

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{GatewayConfig, TlsConfig};
use crate::http::handlers;
use crate::http::request::{MakeRequestUuid, RequestIdExt};
use crate::observability::metrics;
use crate::pubsub::SubscriptionService;
use crate::session::SessionManager;
use crate::xmpp::Connector;

/// How long in-flight requests get to finish on a TLS listener shutdown.
const TLS_DRAIN_SECS: u64 = 10;

/// Application state injected into handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub sessions: Arc<SessionManager>,
    pub subscriptions: SubscriptionService,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: GatewayConfig, connector: Arc<dyn Connector>) -> Self {
        let sessions = Arc::new(SessionManager::new(connector, config.xmpp.resource.clone()));
        let config = Arc::new(ArcSwap::from_pointee(config));
        let subscriptions = SubscriptionService::new(sessions.clone(), config.clone());

        Self {
            state: AppState {
                config,
                sessions,
                subscriptions,
            },
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Later layers wrap earlier ones, so the request id is set before
    /// anything else runs. A request that outlives the HTTP deadline gets
    /// 504 like an unanswered stanza.
    pub fn router(&self) -> Router {
        let config = self.state.config.load();

        Router::new()
            .route(
                "/channels/{owner}/{node}/subscriptions",
                get(handlers::get_subscriptions).post(handlers::post_subscriptions),
            )
            .route("/health", get(handlers::health))
            .with_state(self.state.clone())
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                Duration::from_secs(config.timeouts.http_request_secs),
            ))
            .layer(middleware::from_fn(track_metrics))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %request.request_id(),
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let reload = tokio::spawn(apply_config_updates(self.state.config.clone(), config_updates));
        let app = self.router();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining HTTP");
            })
            .await;

        reload.abort();
        self.finish();
        served
    }

    /// Run the server over TLS on `addr`.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: &TlsConfig,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let rustls =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await?;
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received, draining HTTPS");
            drain.graceful_shutdown(Some(Duration::from_secs(TLS_DRAIN_SECS)));
        });

        let reload = tokio::spawn(apply_config_updates(self.state.config.clone(), config_updates));
        let app = self.router();

        let served = axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app.into_make_service())
            .await;

        reload.abort();
        self.finish();
        served
    }

    fn finish(&self) {
        let closed = self.state.sessions.close_all();
        tracing::info!(closed_sessions = closed, "HTTP server stopped");
    }
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_http_request(&method, response.status().as_u16(), start);
    response
}

/// Store each reloaded config; warn about fields read only at startup.
async fn apply_config_updates(
    current: Arc<ArcSwap<GatewayConfig>>,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
) {
    while let Some(next) = updates.recv().await {
        let previous = current.load_full();
        for field in restart_required(&previous, &next) {
            tracing::warn!(field = field, "Changed setting takes effect after restart");
        }
        current.store(Arc::new(next));
        tracing::info!("Configuration reloaded");
    }
}

fn restart_required(previous: &GatewayConfig, next: &GatewayConfig) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if previous.listener != next.listener {
        fields.push("listener");
    }
    if previous.xmpp.server_address != next.xmpp.server_address {
        fields.push("xmpp.server_address");
    }
    if previous.xmpp.connect_timeout_secs != next.xmpp.connect_timeout_secs {
        fields.push("xmpp.connect_timeout_secs");
    }
    if previous.xmpp.resource != next.xmpp.resource {
        fields.push("xmpp.resource");
    }
    if previous.timeouts != next.timeouts {
        fields.push("timeouts");
    }
    if previous.security != next.security {
        fields.push("security");
    }
    if previous.observability != next.observability {
        fields.push("observability");
    }
    fields
}

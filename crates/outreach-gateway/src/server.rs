//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use outreach_core::config::OutreachConfig;
use outreach_core::traits::Provider;
use outreach_dispatch::Dispatcher;
use outreach_store::JobStore;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub dispatcher: Arc<Dispatcher>,
    /// Default attempt ceiling applied to campaigns that do not set one.
    pub max_attempts: u32,
    /// Upper bound for the per-request dispatch limit override.
    pub batch_size: u32,
    /// Shared secret expected in X-Dispatch-Secret. Empty disables auth.
    pub dispatch_secret: String,
}

impl AppState {
    pub fn new(
        store: Arc<JobStore>,
        provider: Arc<dyn Provider>,
        config: &OutreachConfig,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            provider,
            config.dispatcher.clone(),
        ));
        Self {
            store,
            dispatcher,
            max_attempts: config.dispatcher.max_attempts,
            batch_size: config.dispatcher.batch_size,
            dispatch_secret: config.gateway.dispatch_secret.clone(),
        }
    }
}

/// Shared-secret auth middleware — validates the X-Dispatch-Secret header.
async fn require_secret(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // No secret configured: open gateway (development only).
    if state.dispatch_secret.is_empty() {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get("X-Dispatch-Secret")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if presented == state.dispatch_secret {
        return next.run(req).await;
    }

    axum::response::Response::builder()
        .status(axum::http::StatusCode::UNAUTHORIZED)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(
            serde_json::json!({"ok": false, "error": "invalid or missing dispatch secret"})
                .to_string(),
        ))
        .unwrap_or_default()
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let shared = Arc::new(state);

    // Protected routes — require the dispatch secret
    let protected = Router::new()
        .route("/api/v1/dispatch", post(super::routes::trigger_dispatch))
        .route("/api/v1/campaigns", post(super::routes::create_campaign))
        .route(
            "/api/v1/campaigns/{id}/jobs",
            get(super::routes::campaign_jobs),
        )
        .route(
            "/api/v1/campaigns/{id}/cancel",
            post(super::routes::cancel_campaign),
        )
        .route("/api/v1/jobs/{id}", get(super::routes::get_job))
        .route(
            "/api/v1/jobs/{id}/attempts",
            get(super::routes::job_attempts),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            shared.clone(),
            require_secret,
        ));

    // Public routes — no auth
    let public = Router::new().route("/health", get(super::routes::health_check));

    protected
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(shared)
}

/// Start the HTTP server.
pub async fn start(config: &OutreachConfig) -> anyhow::Result<()> {
    let store = Arc::new(JobStore::open(&config.store.resolved_path())?);
    let provider = outreach_providers::select_provider(config)?;
    tracing::info!("📧 Delivery provider: {}", provider.name());

    if config.gateway.dispatch_secret.is_empty() {
        tracing::warn!("⚠️ No dispatch secret configured — the API is open to anyone");
    }

    let app = build_router(AppState::new(store, provider, config));

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

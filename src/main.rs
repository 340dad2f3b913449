//! Adaptive request-protection demo server.
//!
//! Mounts the guard middleware in front of a handful of sample routes and
//! exposes the operator endpoints under `/sentinel`. A session header
//! stands in for a real authentication layer; any service embedding the
//! guard inserts [`AuthContext`] from its own session machinery instead.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use request_sentinel::config::loader::load_config;
use request_sentinel::config::watcher::ConfigWatcher;
use request_sentinel::pipeline::guard::IssuedCsrfToken;
use request_sentinel::pipeline::report::{findings_report, security_report};
use request_sentinel::{guard_middleware, AuthContext, GuardConfig, SecurityMonitorState, Shutdown};

#[derive(Parser)]
#[command(name = "request-sentinel", about = "Adaptive request-protection layer")]
struct Args {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "request_sentinel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    tracing::info!(
        bind_address = %config.listener.bind_address,
        block_threshold = config.reputation.block_threshold,
        learning_mode = config.anomaly.learning_mode,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => request_sentinel::observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let bind_address = config.listener.bind_address.clone();
    let state = SecurityMonitorState::new(config)?;
    let shutdown = Shutdown::new();
    state.spawn_background_tasks(&shutdown);

    // Hot reload: swap validated configs in as the file changes.
    let _watcher_handle = if let Some(path) = &args.config {
        let (watcher, mut reload_rx) = ConfigWatcher::new(path);
        let handle = watcher.run()?;
        let reload_state = state.clone();
        tokio::spawn(async move {
            while let Some(new_config) = reload_rx.recv().await {
                reload_state.update_config(new_config);
            }
        });
        Some(handle)
    } else {
        None
    };

    let app = router(state.clone());

    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let mut shutdown_rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    });

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    Ok(())
}

/// Sample routes behind the guard, plus the operator surface.
///
/// Layer order matters: the session layer is outermost so the guard sees
/// the `AuthContext` extension it attaches.
fn router(state: Arc<SecurityMonitorState>) -> Router {
    let request_timeout = Duration::from_secs(state.config().listener.request_timeout_secs);
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users/{id}", get(get_user))
        .route("/api/transfers", post(create_transfer))
        .route("/sentinel/report", get(report))
        .route("/sentinel/findings", get(findings))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            guard_middleware,
        ))
        .layer(middleware::from_fn(attach_session))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Stand-in auth layer: a bare session header marks the request as
/// authenticated.
async fn attach_session(mut request: axum::extract::Request, next: Next) -> Response {
    if let Some(session) = request
        .headers()
        .get("x-session-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
    {
        let session_id = session.to_string();
        request.extensions_mut().insert(AuthContext { session_id });
    }
    next.run(request).await
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_user(Path(id): Path<String>) -> Json<serde_json::Value> {
    Json(json!({ "id": id, "name": "sample user" }))
}

async fn create_transfer(
    token: Option<Extension<IssuedCsrfToken>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let next_token = token.map(|Extension(IssuedCsrfToken(t))| t);
    (
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "amount": body.get("amount").cloned().unwrap_or(json!(0)),
            "csrfToken": next_token,
        })),
    )
}

async fn report(State(state): State<Arc<SecurityMonitorState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(security_report(&state)).unwrap_or(json!({})))
}

async fn findings(State(state): State<Arc<SecurityMonitorState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(findings_report(&state)).unwrap_or(json!([])))
}

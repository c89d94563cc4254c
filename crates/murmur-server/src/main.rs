mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, Request, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, Method, header::{AUTHORIZATION, CONTENT_TYPE}},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug_span, error, info, warn};

use murmur_api::middleware::{bearer_token, decode_token};
use murmur_api::{ApiError, AppState, AppStateInner};
use murmur_db::Database;
use murmur_gateway::connection;
use murmur_gateway::{ChatService, Registry};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("FATAL: {:#}", e);
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    let reset = db.reset_presence(chrono::Utc::now())?;
    if reset > 0 {
        warn!("Cleared {} stale online flags from a previous run", reset);
    }

    // Shared state
    let service = ChatService::new(db, Registry::new());
    let state: AppState = Arc::new(AppStateInner {
        service,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl,
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state.clone());

    let app = Router::new()
        .merge(murmur_api::router(state))
        .merge(ws_route)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(cors_layer(config.cors_origin.as_deref())?),
        );

    info!("Murmur server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Murmur server stopped");
    Ok(())
}

/// Span for one HTTP request. Records the path only: the query string can
/// carry a bearer token (`/gateway?token=`).
fn request_span(req: &Request) -> Span {
    debug_span!("request", method = %req.method(), path = %req.uri().path())
}

fn cors_layer(origin: Option<&str>) -> anyhow::Result<CorsLayer> {
    let Some(origin) = origin else {
        return Ok(CorsLayer::permissive());
    };

    Ok(CorsLayer::new()
        .allow_origin(origin.parse::<HeaderValue>()?)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]))
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also come as `?token=`. The header wins when both are present.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<GatewayParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers)
        .or(params.token)
        .ok_or_else(ApiError::unauthenticated)?;
    let claims = decode_token(&state.jwt_secret, &token)?;

    let service = state.service.clone();
    Ok(ws
        .on_upgrade(move |socket| {
            connection::handle_connection(socket, service, claims.sub, claims.username)
        })
        .into_response())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

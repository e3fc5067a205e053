// HTTP surface of the proxy.
// `GET /holidays?country=..&year=..` and `GET /countries` return the upstream
// lists as JSON arrays; `GET /health` reports liveness and cache counters.
// Every error body has the shape `{"error": "<message>"}`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cache::{spawn_sweeper, ExpiringCache, TtlCache};
use crate::config::Config;
use crate::proxy::{HolidayProxy, ProxyError};
use crate::upstream::CalendarificClient;

// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<HolidayProxy>,
}

// Query parameters of `/holidays`. Both are optional here so that a missing
// one produces the proxy's own 400 body rather than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct HolidayParams {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn list_holidays(
    State(state): State<AppState>,
    params: Result<Query<HolidayParams>, QueryRejection>,
) -> Result<Json<Value>, ProxyError> {
    // malformed query strings (a repeated key, for one) still answer with a JSON body
    let Query(params) =
        params.map_err(|rejection| ProxyError::InvalidQuery(rejection.body_text()))?;

    let holidays = state
        .proxy
        .holidays(params.country.as_deref(), params.year.as_deref())
        .await?;

    Ok(Json(holidays))
}

async fn list_countries(State(state): State<AppState>) -> Result<Json<Value>, ProxyError> {
    let countries = state.proxy.countries().await?;
    Ok(Json(countries))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "cache": state.proxy.cache_stats(),
    }))
}

// Build the router over an already constructed proxy
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/holidays", get(list_holidays))
        .route("/countries", get(list_countries))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Wire cache, upstream client and router together and serve until Ctrl-C or SIGTERM
pub async fn serve(config: Config) -> Result<()> {
    let cache: Arc<dyn ExpiringCache<Value = Value>> =
        Arc::new(TtlCache::<Value>::new(config.cache_config()));
    let client = CalendarificClient::new(config.client_config())?;
    let proxy = Arc::new(HolidayProxy::new(Arc::new(client), cache.clone()));

    let sweeper = spawn_sweeper(
        cache,
        Duration::from_secs(config.cache_sweep_interval_secs),
    );

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        %addr,
        upstream = %config.base_url,
        cache_ttl_secs = config.cache_ttl_secs,
        "Holiday proxy listening"
    );

    axum::serve(listener, router(AppState { proxy }))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    info!("Holiday proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

//! HTTP health listener.
//!
//! `GET /health` answers `ok` for platform probes (and keeps free hosting
//! tiers awake); `GET /status` reports the version and active sessions.

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tracing::info;

use crate::audio::SessionRegistry;

#[derive(Debug, Serialize, PartialEq)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn status(State(registry): State<Arc<SessionRegistry>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: registry.len(),
    })
}

pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(registry)
}

/// Sirve el listener hasta que el proceso termine.
pub async fn run(port: u16, registry: Arc<SessionRegistry>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("no se pudo abrir {}", addr))?;

    info!("🩺 Health check escuchando en {}", addr);
    axum::serve(listener, router(registry))
        .await
        .context("error del servidor de health check")?;

    Ok(())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP ingest surface for provmirror-core.
//!
//! The watch relay POSTs resource-changed notifications here. Processing is
//! fire-and-forget from the relay's point of view: success is 204 with no
//! body, failures map to 5xx so the relay redelivers. Per-resource ordering
//! and leader election live in the relay, not here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{debug, error, info};

use crate::event::WatchEvent;
use crate::handlers::{handle_resource_event, HandlerState};

/// Build the ingest router.
pub fn router(state: Arc<HandlerState>) -> Router {
    Router::new()
        .route("/v1/events", post(ingest_event))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Run the ingest server until the task is cancelled.
pub async fn run_server(addr: SocketAddr, state: Arc<HandlerState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP ingest server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ingest_event(
    State(state): State<Arc<HandlerState>>,
    Json(event): Json<WatchEvent>,
) -> StatusCode {
    match handle_resource_event(&state, &event).await {
        Ok(outcome) => {
            debug!(?outcome, "Event processed");
            StatusCode::NO_CONTENT
        }
        Err(e) => {
            error!(error = %e, "Event processing failed, relying on redelivery");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn healthz(State(state): State<Arc<HandlerState>>) -> StatusCode {
    match state.persistence.health_check_db().await {
        Ok(true) => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

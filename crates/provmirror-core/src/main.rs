// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! provmirror-core - Environment Lifecycle Reporting
//!
//! Mirrors lifecycle events of provisioned environments into the reporting
//! database. The watch relay delivers events over HTTP; directory and CRM
//! capabilities are attached when their endpoints are configured.

use std::sync::Arc;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use provmirror_core::config::Config;
use provmirror_core::handlers::HandlerState;
use provmirror_core::migrations;
use provmirror_core::persistence::PostgresPersistence;
use provmirror_core::server;
use provmirror_core::sources::HttpJobSource;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("provmirror_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting provmirror-core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        http_addr = %config.http_addr,
        platform_domain = %config.domains.platform,
        job_api = config.job_api.is_some(),
        "Configuration loaded"
    );

    // Connect to database
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    info!("Database connection established");

    // Verify connection
    let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
    info!(result = row.0, "Database health check passed");

    info!("Running database migrations...");
    migrations::run_postgres(&pool).await?;
    info!("Migrations completed");

    // Create persistence backend and shared handler state
    let persistence = Arc::new(PostgresPersistence::new(pool.clone()));
    let mut state = HandlerState::new(
        persistence,
        config.domains.clone(),
        config.corp_domain.clone(),
    );

    if let Some(job_api) = config.job_api.clone() {
        state = state.with_jobs(Arc::new(HttpJobSource::new(job_api)?));
    }

    let state = Arc::new(state);

    info!("provmirror-core initialized successfully");

    // Start the ingest server (the watch relay delivers events here)
    let http_addr = config.http_addr;
    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(http_addr, server_state).await {
            error!("HTTP ingest server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    server_handle.abort();

    pool.close().await;
    info!("Shutdown complete");

    Ok(())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for provmirror-core.
//!
//! This module exposes embedded migrations that can be run programmatically.
//! The server binary runs them on startup; tests run them against their own
//! database.

use sqlx::migrate::MigrateError;

/// PostgreSQL migrator with all core migrations embedded.
pub static POSTGRES: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Run PostgreSQL migrations.
///
/// Applies all pending migrations to the database. Safe to call multiple
/// times; already-applied migrations are skipped.
pub async fn run_postgres(pool: &sqlx::PgPool) -> Result<(), MigrateError> {
    POSTGRES.run(pool).await
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Conflict-safe insert-or-update statements.
//!
//! Every entity in the reporting store follows the same lifecycle: look up
//! by natural key, insert with defaults when absent, update the mutable
//! fields when present, hand back a surrogate identifier. This module builds
//! that as a single `INSERT ... ON CONFLICT ON CONSTRAINT ... DO UPDATE ...
//! RETURNING` statement so conflict resolution happens in the storage layer,
//! not in a read-then-write race. Table, column, and constraint names are
//! compile-time literals; all values are bound parameters.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use crate::error::Result;

/// A typed bind value. `None` binds SQL NULL.
#[derive(Debug, Clone)]
pub enum SqlValue {
    /// TEXT
    Text(Option<String>),
    /// INTEGER
    Int(Option<i32>),
    /// BIGINT
    BigInt(Option<i64>),
    /// DOUBLE PRECISION
    Double(Option<f64>),
    /// BOOLEAN
    Bool(Option<bool>),
    /// UUID
    Uuid(Option<Uuid>),
    /// TIMESTAMPTZ
    Timestamp(Option<DateTime<Utc>>),
    /// DATE
    Date(Option<NaiveDate>),
    /// INTERVAL
    Interval(Option<PgInterval>),
    /// JSONB
    Json(Option<Value>),
}

impl SqlValue {
    /// Convenience constructor for owned text.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(Some(value.into()))
    }

    /// Convenience constructor for optional text.
    pub fn opt_text(value: Option<String>) -> Self {
        Self::Text(value)
    }
}

/// Bind a [`SqlValue`] onto a query.
pub fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: SqlValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlValue::Text(v) => query.bind(v),
        SqlValue::Int(v) => query.bind(v),
        SqlValue::BigInt(v) => query.bind(v),
        SqlValue::Double(v) => query.bind(v),
        SqlValue::Bool(v) => query.bind(v),
        SqlValue::Uuid(v) => query.bind(v),
        SqlValue::Timestamp(v) => query.bind(v),
        SqlValue::Date(v) => query.bind(v),
        SqlValue::Interval(v) => query.bind(v),
        SqlValue::Json(v) => query.bind(v),
    }
}

/// Builder for one upsert statement.
#[derive(Debug, Clone)]
pub struct Upsert {
    table: &'static str,
    constraint: &'static str,
    returning: &'static str,
    columns: Vec<(&'static str, SqlValue)>,
    update_columns: Vec<&'static str>,
    update_exprs: Vec<(&'static str, &'static str)>,
}

impl Upsert {
    /// Start an upsert into `table`, resolving conflicts on the named
    /// uniqueness `constraint` and returning `returning` in both branches.
    pub fn new(table: &'static str, constraint: &'static str, returning: &'static str) -> Self {
        Self {
            table,
            constraint,
            returning,
            columns: Vec::new(),
            update_columns: Vec::new(),
            update_exprs: Vec::new(),
        }
    }

    /// Insert-only column: written on first insert, left alone on conflict.
    pub fn column(mut self, name: &'static str, value: SqlValue) -> Self {
        self.columns.push((name, value));
        self
    }

    /// Mutable column: written on insert and overwritten on conflict.
    pub fn mutable(mut self, name: &'static str, value: SqlValue) -> Self {
        self.columns.push((name, value));
        self.update_columns.push(name);
        self
    }

    /// Conflict-branch-only assignment from a raw SQL expression, e.g.
    /// `modified_at = timezone('UTC', NOW())`.
    pub fn update_expr(mut self, name: &'static str, expr: &'static str) -> Self {
        self.update_exprs.push((name, expr));
        self
    }

    /// Render the statement text.
    pub fn sql(&self) -> String {
        let column_list = self
            .columns
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=self.columns.len())
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ");

        let mut assignments: Vec<String> = self
            .update_columns
            .iter()
            .map(|name| format!("{} = EXCLUDED.{}", name, name))
            .collect();
        assignments.extend(
            self.update_exprs
                .iter()
                .map(|(name, expr)| format!("{} = {}", name, expr)),
        );

        // At least one assignment is required so that the conflict branch
        // still produces a row for RETURNING.
        debug_assert!(!assignments.is_empty(), "upsert needs a mutable column");

        format!(
            "INSERT INTO {} ({}) VALUES ({}) \
             ON CONFLICT ON CONSTRAINT {} DO UPDATE SET {} \
             RETURNING {}",
            self.table,
            column_list,
            placeholders,
            self.constraint,
            assignments.join(", "),
            self.returning
        )
    }

    /// Execute and fetch the RETURNING row.
    pub async fn fetch_one(self, pool: &PgPool) -> Result<PgRow> {
        let sql = self.sql();
        let mut query = sqlx::query(&sql);
        for (_, value) in self.columns {
            query = bind_value(query, value);
        }
        Ok(query.fetch_one(pool).await?)
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for provmirror-core integration tests.
//!
//! Provides TestContext for database access plus static mock
//! implementations of the external collaborator traits.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use provmirror_core::config::AnnotationDomains;
use provmirror_core::error::Result;
use provmirror_core::handlers::HandlerState;
use provmirror_core::persistence::PostgresPersistence;
use provmirror_core::sources::{
    Claim, ClaimSource, CrmOpportunity, DirectorySource, DirectoryUser, JobRecord, JobSource,
    OpportunitySource,
};

/// Skip the current test when no test database is configured.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// Test context that manages the database connection for integration tests.
pub struct TestContext {
    pub pool: PgPool,
    pub persistence: Arc<PostgresPersistence>,
}

impl TestContext {
    /// Connect to the test database and ensure the schema exists.
    pub async fn new() -> Option<Self> {
        let database_url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&database_url).await.ok()?;
        provmirror_core::migrations::run_postgres(&pool).await.ok()?;

        Some(Self {
            persistence: Arc::new(PostgresPersistence::new(pool.clone())),
            pool,
        })
    }

    /// Handler state over the test persistence with no external sources.
    pub fn handler_state(&self) -> HandlerState {
        HandlerState::new(
            self.persistence.clone(),
            AnnotationDomains::default(),
            "redhat.com",
        )
    }

    /// Count lifecycle log rows for a provision.
    pub async fn count_lifecycle(&self, uuid: Uuid) -> i64 {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM lifecycle_log WHERE provision_uuid = $1")
                .bind(uuid)
                .fetch_one(&self.pool)
                .await
                .expect("count lifecycle rows");
        row.0
    }

    /// Count provision rows for a UUID.
    pub async fn count_provisions(&self, uuid: Uuid) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM provisions WHERE uuid = $1")
            .bind(uuid)
            .fetch_one(&self.pool)
            .await
            .expect("count provision rows");
        row.0
    }

    /// Add a manager to the chargeback roster, returning its id.
    pub async fn add_roster_manager(&self, email: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO manager_chargeback (email)
            VALUES ($1)
            ON CONFLICT ON CONSTRAINT manager_chargeback_unique_email
            DO UPDATE SET email = EXCLUDED.email
            RETURNING id
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .expect("insert roster manager");
        row.0
    }

    /// Clean up all rows belonging to a provision.
    pub async fn cleanup_provision(&self, uuid: Uuid) {
        sqlx::query("DELETE FROM lifecycle_log WHERE provision_uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("DELETE FROM resource_claim_log WHERE provision_uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .ok();
        sqlx::query("DELETE FROM provisions WHERE uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await
            .ok();
    }
}

// ============================================================================
// Event builders
// ============================================================================

/// Build a watch event for a lab environment with the standard governor.
pub fn lab_event(event_type: &str, uuid: Uuid, current: &str, desired: &str) -> Value {
    json!({
        "type": event_type,
        "object": {
            "kind": "EnvironmentSubject",
            "metadata": {
                "name": format!("training-lab.prod-{}", &uuid.to_string()[..5]),
                "annotations": {
                    "poolboy.gpte.redhat.com/resource-claim-name": "my-lab",
                    "poolboy.gpte.redhat.com/resource-claim-namespace": "user-jane-doe"
                }
            },
            "spec": {
                "governor": "prod.training-lab.rhel",
                "vars": {
                    "current_state": current,
                    "desired_state": desired,
                    "job_vars": { "uuid": uuid.to_string() }
                }
            },
            "status": {}
        }
    })
}

/// Parse a JSON value into a watch event.
pub fn watch_event(value: Value) -> provmirror_core::event::WatchEvent {
    serde_json::from_value(value).expect("valid watch event")
}

// ============================================================================
// Mock collaborator sources
// ============================================================================

/// Claim source that always serves the configured body.
pub struct StaticClaimSource {
    pub claim: Option<Value>,
}

#[async_trait]
impl ClaimSource for StaticClaimSource {
    async fn fetch(&self, _namespace: &str, _name: &str) -> Result<Option<Claim>> {
        Ok(self.claim.clone().map(|raw| Claim { raw }))
    }
}

/// Job source that always serves the configured record.
pub struct StaticJobSource {
    pub record: JobRecord,
}

#[async_trait]
impl JobSource for StaticJobSource {
    async fn fetch(&self, _job_id: &str) -> Result<JobRecord> {
        Ok(self.record.clone())
    }
}

/// Directory with fixed answers per query string.
#[derive(Default)]
pub struct StaticDirectory {
    pub internal: HashMap<String, DirectoryUser>,
    pub federated_uid: HashMap<String, DirectoryUser>,
    pub federated_mail: HashMap<String, DirectoryUser>,
    /// user mail -> roster manager mail found by walking the chain
    pub manager_chain: HashMap<String, String>,
}

#[async_trait]
impl DirectorySource for StaticDirectory {
    async fn search_internal(&self, mail: &str) -> Result<Option<DirectoryUser>> {
        Ok(self.internal.get(mail).cloned())
    }

    async fn search_federated_uid(&self, uid: &str) -> Result<Option<DirectoryUser>> {
        Ok(self.federated_uid.get(uid).cloned())
    }

    async fn search_federated_mail(&self, mail: &str) -> Result<Option<DirectoryUser>> {
        Ok(self.federated_mail.get(mail).cloned())
    }

    async fn roster_manager(
        &self,
        mail: &str,
        roster: &HashMap<String, i64>,
    ) -> Result<Option<String>> {
        Ok(self
            .manager_chain
            .get(mail)
            .filter(|manager| roster.contains_key(*manager))
            .cloned())
    }
}

/// CRM with fixed answers per number/id.
#[derive(Default)]
pub struct StaticCrm {
    pub by_number: HashMap<String, CrmOpportunity>,
    pub by_id: HashMap<String, CrmOpportunity>,
}

#[async_trait]
impl OpportunitySource for StaticCrm {
    async fn by_number(&self, number: &str) -> Result<Option<CrmOpportunity>> {
        Ok(self.by_number.get(number).cloned())
    }

    async fn by_id(&self, id: &str) -> Result<Option<CrmOpportunity>> {
        Ok(self.by_id.get(id).cloned())
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence for provmirror-core.
//!
//! All entity writes go through the upsert contract in [`super::upsert`],
//! keyed on the named uniqueness constraints created by the migrations.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::postgres::types::PgInterval;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::upsert::{SqlValue, Upsert};
use super::{
    CatalogItemRow, LifecycleLogRecord, ManagerRow, OpportunityRow, Persistence, ProvisionRecord,
    ProvisionRow, StudentRow, StudentUpsert,
};
use crate::error::Result;

/// PostgreSQL-backed persistence implementation.
#[derive(Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new Postgres-backed persistence implementation.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Convert a duration to a Postgres interval. Month/day granularity is not
/// used; everything is carried in microseconds.
fn to_pg_interval(duration: Duration) -> PgInterval {
    PgInterval {
        months: 0,
        days: 0,
        microseconds: duration.num_microseconds().unwrap_or(i64::MAX),
    }
}

#[async_trait]
impl Persistence for PostgresPersistence {
    async fn upsert_catalog_item(&self, row: &CatalogItemRow) -> Result<i64> {
        let result = Upsert::new("catalog_items", "catalog_items_unique_item", "id")
            .column("catalog_item", SqlValue::text(row.catalog_item.clone()))
            .column("catalog_name", SqlValue::text(row.catalog_name.clone()))
            .mutable("class_name", SqlValue::text(row.class_name.clone()))
            .mutable("infra_type", SqlValue::text(row.infra_type.clone()))
            .fetch_one(&self.pool)
            .await?;
        Ok(result.try_get("id")?)
    }

    async fn upsert_purpose(&self, purpose: &str, category: &str) -> Result<i64> {
        let result = Upsert::new("purpose", "purpose_unique_purpose", "id")
            .column("purpose", SqlValue::text(purpose))
            .mutable("category", SqlValue::text(category))
            .fetch_one(&self.pool)
            .await?;
        Ok(result.try_get("id")?)
    }

    async fn upsert_manager(&self, row: &ManagerRow) -> Result<i64> {
        let result = Upsert::new("manager", "manager_unique_email", "id")
            .column("email", SqlValue::text(row.email.clone()))
            .mutable("name", SqlValue::opt_text(row.name.clone()))
            .mutable("directory_uid", SqlValue::opt_text(row.directory_uid.clone()))
            .fetch_one(&self.pool)
            .await?;
        Ok(result.try_get("id")?)
    }

    async fn upsert_student(&self, row: &StudentRow) -> Result<StudentUpsert> {
        // check_headcount is curated out of band: set on first insert only,
        // read back in both branches.
        let result = Upsert::new("students", "students_unique_email", "id, check_headcount")
            .column("email", SqlValue::text(row.email.clone()))
            .column("check_headcount", SqlValue::Bool(Some(true)))
            .column("created_at", SqlValue::Timestamp(Some(Utc::now())))
            .mutable("company_id", SqlValue::Int(Some(row.company_id)))
            .mutable("username", SqlValue::opt_text(row.username.clone()))
            .mutable("full_name", SqlValue::text(row.full_name.clone()))
            .mutable("first_name", SqlValue::text(row.first_name.clone()))
            .mutable("last_name", SqlValue::text(row.last_name.clone()))
            .mutable("geo", SqlValue::text(row.geo.clone()))
            .mutable("partner", SqlValue::text(row.partner.clone()))
            .mutable("cost_center", SqlValue::Int(row.cost_center))
            .mutable("directory_uid", SqlValue::opt_text(row.directory_uid.clone()))
            .mutable("manager", SqlValue::opt_text(row.manager.clone()))
            .mutable("manager_email", SqlValue::opt_text(row.manager_email.clone()))
            .mutable("title", SqlValue::opt_text(row.title.clone()))
            .mutable("user_category", SqlValue::text(row.user_category.clone()))
            .fetch_one(&self.pool)
            .await?;

        Ok(StudentUpsert {
            id: result.try_get("id")?,
            check_headcount: result.try_get("check_headcount")?,
        })
    }

    async fn upsert_opportunity(&self, row: &OpportunityRow) -> Result<i64> {
        let result = Upsert::new("opportunities", "opportunities_unique_number", "id")
            .column("number", SqlValue::text(row.number.clone()))
            .mutable("opportunity_id", SqlValue::text(row.opportunity_id.clone()))
            .mutable("opportunity_name", SqlValue::opt_text(row.opportunity_name.clone()))
            .mutable("account_id", SqlValue::opt_text(row.account_id.clone()))
            .mutable("account_name", SqlValue::opt_text(row.account_name.clone()))
            .mutable("amount", SqlValue::Double(row.amount))
            .mutable("expected_revenue", SqlValue::Double(row.expected_revenue))
            .mutable("closed_at", SqlValue::Date(row.closed_at))
            .mutable("is_closed", SqlValue::Bool(row.is_closed))
            .mutable("stage", SqlValue::opt_text(row.stage.clone()))
            .mutable("type", SqlValue::opt_text(row.opportunity_type.clone()))
            .mutable("owner_id", SqlValue::opt_text(row.owner_id.clone()))
            .mutable("owner_name", SqlValue::opt_text(row.owner_name.clone()))
            .mutable("owner_email", SqlValue::opt_text(row.owner_email.clone()))
            .mutable("owner_title", SqlValue::opt_text(row.owner_title.clone()))
            .update_expr("updated_at", "timezone('UTC', NOW())")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.try_get("id")?)
    }

    async fn upsert_provision(&self, row: &ProvisionRow) -> Result<Uuid> {
        let provisioned_at = row.provisioned_at.unwrap_or_else(Utc::now);

        let result = Upsert::new("provisions", "provisions_unique_uuid", "uuid")
            .column("uuid", SqlValue::Uuid(Some(row.uuid)))
            .column("provisioned_at", SqlValue::Timestamp(Some(provisioned_at)))
            .column("provision_result", SqlValue::text(row.provision_result.clone()))
            .column("purpose", SqlValue::opt_text(row.purpose.clone()))
            .column("opportunity", SqlValue::opt_text(row.opportunity.clone()))
            .column("platform_guid", SqlValue::opt_text(row.platform_guid.clone()))
            .column("account", SqlValue::opt_text(row.account.clone()))
            .column("environment", SqlValue::opt_text(row.environment.clone()))
            .column("class_name", SqlValue::opt_text(row.class_name.clone()))
            .column("sandbox_name", SqlValue::opt_text(row.sandbox_name.clone()))
            .column("cloud", SqlValue::opt_text(row.cloud.clone()))
            .column("cloud_region", SqlValue::opt_text(row.cloud_region.clone()))
            .column("datasource", SqlValue::opt_text(row.datasource.clone()))
            .column("env_type", SqlValue::opt_text(row.env_type.clone()))
            .column("provision_time", SqlValue::Double(Some(row.provision_time)))
            .column(
                "deploy_interval",
                SqlValue::Interval(row.deploy_interval.map(to_pg_interval)),
            )
            .column("chargeback_method", SqlValue::opt_text(row.chargeback_method.clone()))
            .column("workshop_users", SqlValue::Int(Some(row.workshop_users)))
            .column("job_id", SqlValue::opt_text(row.job_id.clone()))
            .column("job_url", SqlValue::opt_text(row.job_url.clone()))
            .column("azure_tenant", SqlValue::opt_text(row.azure_tenant.clone()))
            .column("azure_subscription", SqlValue::opt_text(row.azure_subscription.clone()))
            .column("platform_url", SqlValue::opt_text(row.platform_url.clone()))
            .column("purpose_id", SqlValue::BigInt(row.purpose_id))
            .mutable("student_id", SqlValue::BigInt(row.student_id))
            .mutable("catalog_id", SqlValue::BigInt(row.catalog_id))
            .mutable("opportunity_id", SqlValue::BigInt(row.opportunity_id))
            .mutable("guid", SqlValue::opt_text(row.guid.clone()))
            .mutable("cost_center", SqlValue::Int(row.cost_center))
            .mutable("student_geo", SqlValue::opt_text(row.student_geo.clone()))
            .mutable("manager_id", SqlValue::BigInt(row.manager_id))
            .mutable("manager_chargeback_id", SqlValue::BigInt(row.manager_chargeback_id))
            .update_expr("modified_at", "timezone('UTC', NOW())")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.try_get("uuid")?)
    }

    async fn get_provision(&self, uuid: Uuid) -> Result<Option<ProvisionRecord>> {
        let record = sqlx::query_as::<_, ProvisionRecord>(
            r#"
            SELECT id, uuid, last_state, provision_result, provisioned_at, retired_at,
                   provision_time, deploy_interval, lifetime_interval,
                   cost_center, student_geo, student_id, catalog_id, purpose_id,
                   manager_id, manager_chargeback_id, opportunity_id,
                   purpose, opportunity, guid, platform_guid, cloud, cloud_region,
                   account, environment, class_name, sandbox_name, datasource,
                   env_type, chargeback_method, workshop_users, job_id, job_url,
                   azure_tenant, azure_subscription, platform_url,
                   created_at, modified_at
            FROM provisions
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn last_lifecycle_state(&self, uuid: Uuid) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT state
            FROM lifecycle_log
            WHERE provision_uuid = $1
            ORDER BY logged_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    async fn lifecycle_log(&self, uuid: Uuid) -> Result<Vec<LifecycleLogRecord>> {
        let records = sqlx::query_as::<_, LifecycleLogRecord>(
            r#"
            SELECT id, provision_uuid, state, executor, logged_at
            FROM lifecycle_log
            WHERE provision_uuid = $1
            ORDER BY logged_at ASC, id ASC
            "#,
        )
        .bind(uuid)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn append_lifecycle(
        &self,
        uuid: Uuid,
        state: &str,
        executor: &str,
    ) -> Result<DateTime<Utc>> {
        let row: (DateTime<Utc>,) = sqlx::query_as(
            r#"
            INSERT INTO lifecycle_log (provision_uuid, state, executor)
            VALUES ($1, $2, $3)
            RETURNING logged_at
            "#,
        )
        .bind(uuid)
        .bind(state)
        .bind(executor)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn touch_last_state(&self, uuid: Uuid, state: &str) -> Result<()> {
        // The provision row may not exist yet when early transitions are
        // logged; 0 rows affected is fine.
        sqlx::query(
            r#"
            UPDATE provisions
            SET last_state = $2, modified_at = timezone('UTC', NOW())
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .bind(state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_provision_result(&self, uuid: Uuid, result: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE provisions
            SET provision_result = $2
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_retired(&self, uuid: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE provisions
            SET retired_at = $2
            WHERE uuid = $1 AND retired_at IS NULL
            RETURNING uuid
            "#,
        )
        .bind(uuid)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some())
    }

    async fn set_lifetime_interval(&self, uuid: Uuid, lifetime: Duration) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE provisions
            SET lifetime_interval = $2
            WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .bind(to_pg_interval(lifetime))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn state_logged_at(&self, uuid: Uuid, state: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
            r#"
            SELECT logged_at
            FROM lifecycle_log
            WHERE provision_uuid = $1 AND state = $2
            ORDER BY logged_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(uuid)
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.0))
    }

    async fn chargeback_roster(&self) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT email, id FROM manager_chargeback")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    async fn save_claim_mirror(
        &self,
        uuid: Uuid,
        claim_name: Option<&str>,
        claim_namespace: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        mirror_column(
            &self.pool,
            "resource_claim_json",
            uuid,
            claim_name,
            claim_namespace,
            payload,
        )
        .await
    }

    async fn save_draft_mirror(
        &self,
        uuid: Uuid,
        claim_name: Option<&str>,
        claim_namespace: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        mirror_column(
            &self.pool,
            "provision_vars_json",
            uuid,
            claim_name,
            claim_namespace,
            payload,
        )
        .await
    }

    async fn save_job_vars_mirror(
        &self,
        uuid: Uuid,
        claim_name: Option<&str>,
        claim_namespace: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        mirror_column(
            &self.pool,
            "job_vars_json",
            uuid,
            claim_name,
            claim_namespace,
            payload,
        )
        .await
    }

    async fn health_check_db(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}

/// Upsert one JSON column of the audit mirror, keyed by provision UUID.
async fn mirror_column(
    pool: &PgPool,
    column: &'static str,
    uuid: Uuid,
    claim_name: Option<&str>,
    claim_namespace: Option<&str>,
    payload: &Value,
) -> Result<()> {
    let upsert = Upsert::new(
        "resource_claim_log",
        "resource_claim_log_unique_claim",
        "provision_uuid",
    )
    .column("provision_uuid", SqlValue::Uuid(Some(uuid)))
    .mutable(
        "resource_claim_name",
        SqlValue::Text(claim_name.map(str::to_string)),
    )
    .mutable(
        "resource_claim_namespace",
        SqlValue::Text(claim_namespace.map(str::to_string)),
    )
    .mutable(column, SqlValue::Json(Some(payload.clone())));

    upsert.fetch_one(pool).await?;
    Ok(())
}

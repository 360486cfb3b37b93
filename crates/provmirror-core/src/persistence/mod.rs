//! Persistence interfaces and backends for provmirror-core.
//!
//! This module defines the persistence abstraction and the record types
//! exchanged with it. The handle is constructed once at startup and passed
//! in explicitly; acquisition and release of connections is scoped to each
//! operation by the pool.

pub mod postgres;
pub mod upsert;

pub use self::postgres::PostgresPersistence;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::types::PgInterval;
use uuid::Uuid;

use crate::error::Result;

/// Provision row from the persistence layer.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProvisionRecord {
    /// Database primary key.
    pub id: i64,
    /// Provisioning identifier.
    pub uuid: Uuid,
    /// Denormalized last observed lifecycle state.
    pub last_state: Option<String>,
    /// Deploy outcome (installing, success, failure).
    pub provision_result: Option<String>,
    /// When the deploy started.
    pub provisioned_at: Option<DateTime<Utc>>,
    /// When the environment was retired. Never unset once stamped.
    pub retired_at: Option<DateTime<Utc>>,
    /// Deploy duration in minutes.
    pub provision_time: Option<f64>,
    /// Raw deploy duration.
    pub deploy_interval: Option<PgInterval>,
    /// Total lifetime, computed at terminal destroy completion.
    pub lifetime_interval: Option<PgInterval>,
    /// Requester's cost center.
    pub cost_center: Option<i32>,
    /// Requester's geography.
    pub student_geo: Option<String>,
    /// Requester row reference.
    pub student_id: Option<i64>,
    /// Catalog item reference.
    pub catalog_id: Option<i64>,
    /// Purpose reference.
    pub purpose_id: Option<i64>,
    /// Manager reference.
    pub manager_id: Option<i64>,
    /// Chargeback manager reference.
    pub manager_chargeback_id: Option<i64>,
    /// Opportunity reference.
    pub opportunity_id: Option<i64>,
    /// Free-text purpose.
    pub purpose: Option<String>,
    /// Sales opportunity annotation value.
    pub opportunity: Option<String>,
    /// Short resource guid.
    pub guid: Option<String>,
    /// Platform-wide deployment guid.
    pub platform_guid: Option<String>,
    /// Cloud provider.
    pub cloud: Option<String>,
    /// Cloud region.
    pub cloud_region: Option<String>,
    /// Owning account.
    pub account: Option<String>,
    /// Environment class.
    pub environment: Option<String>,
    /// Derived class name.
    pub class_name: Option<String>,
    /// Sandbox name.
    pub sandbox_name: Option<String>,
    /// Reporting datasource.
    pub datasource: Option<String>,
    /// Environment type tag.
    pub env_type: Option<String>,
    /// Chargeback method.
    pub chargeback_method: Option<String>,
    /// Seats requested.
    pub workshop_users: Option<i32>,
    /// Deploy job identifier.
    pub job_id: Option<String>,
    /// Deploy job URL.
    pub job_url: Option<String>,
    /// Azure tenant.
    pub azure_tenant: Option<String>,
    /// Azure subscription.
    pub azure_subscription: Option<String>,
    /// External platform URL.
    pub platform_url: Option<String>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
}

/// Lifecycle log row: one accepted transition, immutable once written.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LifecycleLogRecord {
    /// Database primary key.
    pub id: i64,
    /// Provision this transition belongs to.
    pub provision_uuid: Uuid,
    /// The recorded state.
    pub state: String,
    /// Who drove the transition.
    pub executor: String,
    /// When the transition was recorded.
    pub logged_at: DateTime<Utc>,
}

/// Insertable provision row, produced by derivation plus enrichment.
#[derive(Debug, Clone, Default)]
pub struct ProvisionRow {
    /// Provisioning identifier.
    pub uuid: Uuid,
    /// When the deploy started; defaults to now when the job never reported.
    pub provisioned_at: Option<DateTime<Utc>>,
    /// Deploy outcome at insert time.
    pub provision_result: String,
    /// Requester row reference.
    pub student_id: Option<i64>,
    /// Catalog item reference.
    pub catalog_id: Option<i64>,
    /// Purpose reference.
    pub purpose_id: Option<i64>,
    /// Opportunity reference.
    pub opportunity_id: Option<i64>,
    /// Free-text purpose.
    pub purpose: Option<String>,
    /// Sales opportunity annotation value.
    pub opportunity: Option<String>,
    /// Short resource guid.
    pub guid: Option<String>,
    /// Platform-wide deployment guid.
    pub platform_guid: Option<String>,
    /// Owning account.
    pub account: Option<String>,
    /// Environment class.
    pub environment: Option<String>,
    /// Derived class name.
    pub class_name: Option<String>,
    /// Sandbox name.
    pub sandbox_name: Option<String>,
    /// Cloud provider.
    pub cloud: Option<String>,
    /// Cloud region.
    pub cloud_region: Option<String>,
    /// Reporting datasource.
    pub datasource: Option<String>,
    /// Environment type tag.
    pub env_type: Option<String>,
    /// Deploy duration in minutes.
    pub provision_time: f64,
    /// Raw deploy duration.
    pub deploy_interval: Option<Duration>,
    /// Requester's cost center.
    pub cost_center: Option<i32>,
    /// Requester's geography.
    pub student_geo: Option<String>,
    /// Manager reference.
    pub manager_id: Option<i64>,
    /// Chargeback manager reference.
    pub manager_chargeback_id: Option<i64>,
    /// Chargeback method.
    pub chargeback_method: Option<String>,
    /// Seats requested.
    pub workshop_users: i32,
    /// Deploy job identifier.
    pub job_id: Option<String>,
    /// Deploy job URL.
    pub job_url: Option<String>,
    /// Azure tenant.
    pub azure_tenant: Option<String>,
    /// Azure subscription.
    pub azure_subscription: Option<String>,
    /// External platform URL.
    pub platform_url: Option<String>,
}

/// Insertable catalog item row.
#[derive(Debug, Clone)]
pub struct CatalogItemRow {
    /// Natural key: the catalog item name.
    pub catalog_item: String,
    /// Display name.
    pub catalog_name: String,
    /// Derived class name.
    pub class_name: String,
    /// Infrastructure sharing model.
    pub infra_type: String,
}

/// Insertable manager row.
#[derive(Debug, Clone)]
pub struct ManagerRow {
    /// Display name.
    pub name: Option<String>,
    /// Natural key: the manager email.
    pub email: String,
    /// Identity-system uid.
    pub directory_uid: Option<String>,
}

/// Insertable student (user) row.
#[derive(Debug, Clone, Default)]
pub struct StudentRow {
    /// Company affiliation id.
    pub company_id: i32,
    /// Login.
    pub username: Option<String>,
    /// Natural key: the email address.
    pub email: String,
    /// Full display name.
    pub full_name: String,
    /// Given name.
    pub first_name: String,
    /// Surname.
    pub last_name: String,
    /// Geography.
    pub geo: String,
    /// Partner classification (redhat, IBM, partner).
    pub partner: String,
    /// Cost center.
    pub cost_center: Option<i32>,
    /// Identity-system uid.
    pub directory_uid: Option<String>,
    /// Manager display name.
    pub manager: Option<String>,
    /// Manager email.
    pub manager_email: Option<String>,
    /// Job title.
    pub title: Option<String>,
    /// Account classification tag (regular, excluded, poolboy).
    pub user_category: String,
}

/// Result of a student upsert.
#[derive(Debug, Clone, Copy)]
pub struct StudentUpsert {
    /// Surrogate id.
    pub id: i64,
    /// Stored chargeback-eligibility flag. Curated out of band; the upsert
    /// only sets it on first insert.
    pub check_headcount: bool,
}

/// Insertable opportunity row (CRM mirror).
#[derive(Debug, Clone, Default)]
pub struct OpportunityRow {
    /// CRM-internal identifier.
    pub opportunity_id: String,
    /// Natural key: the external opportunity number.
    pub number: String,
    /// Opportunity name.
    pub opportunity_name: Option<String>,
    /// Account identifier.
    pub account_id: Option<String>,
    /// Account display name.
    pub account_name: Option<String>,
    /// Monetary amount.
    pub amount: Option<f64>,
    /// Expected revenue.
    pub expected_revenue: Option<f64>,
    /// Close date.
    pub closed_at: Option<NaiveDate>,
    /// Whether the opportunity is closed.
    pub is_closed: Option<bool>,
    /// Sales stage.
    pub stage: Option<String>,
    /// Opportunity type.
    pub opportunity_type: Option<String>,
    /// Owner identifier.
    pub owner_id: Option<String>,
    /// Owner display name.
    pub owner_name: Option<String>,
    /// Owner mail address.
    pub owner_email: Option<String>,
    /// Owner title.
    pub owner_title: Option<String>,
}

/// Persistence interface used by the event handlers.
#[allow(missing_docs)]
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn upsert_catalog_item(&self, row: &CatalogItemRow) -> Result<i64>;

    async fn upsert_purpose(&self, purpose: &str, category: &str) -> Result<i64>;

    async fn upsert_manager(&self, row: &ManagerRow) -> Result<i64>;

    async fn upsert_student(&self, row: &StudentRow) -> Result<StudentUpsert>;

    async fn upsert_opportunity(&self, row: &OpportunityRow) -> Result<i64>;

    async fn upsert_provision(&self, row: &ProvisionRow) -> Result<Uuid>;

    async fn get_provision(&self, uuid: Uuid) -> Result<Option<ProvisionRecord>>;

    /// Latest logged state for a provision, newest first.
    async fn last_lifecycle_state(&self, uuid: Uuid) -> Result<Option<String>>;

    /// All logged transitions for a provision, oldest first.
    async fn lifecycle_log(&self, uuid: Uuid) -> Result<Vec<LifecycleLogRecord>>;

    /// Append a transition row; returns the recorded timestamp.
    async fn append_lifecycle(
        &self,
        uuid: Uuid,
        state: &str,
        executor: &str,
    ) -> Result<DateTime<Utc>>;

    /// Refresh the denormalized `last_state`/`modified_at` on the provision.
    /// A provision row that does not exist yet is not an error.
    async fn touch_last_state(&self, uuid: Uuid, state: &str) -> Result<()>;

    async fn set_provision_result(&self, uuid: Uuid, result: &str) -> Result<()>;

    /// Stamp `retired_at` when unset. Returns whether this call stamped it.
    async fn mark_retired(&self, uuid: Uuid, at: DateTime<Utc>) -> Result<bool>;

    async fn set_lifetime_interval(&self, uuid: Uuid, lifetime: Duration) -> Result<()>;

    /// Timestamp of the most recent log entry with the given state.
    async fn state_logged_at(&self, uuid: Uuid, state: &str) -> Result<Option<DateTime<Utc>>>;

    /// The chargeback-eligible manager roster (email to id).
    async fn chargeback_roster(&self) -> Result<HashMap<String, i64>>;

    /// Mirror the raw claim body into the audit log.
    async fn save_claim_mirror(
        &self,
        uuid: Uuid,
        claim_name: Option<&str>,
        claim_namespace: Option<&str>,
        payload: &Value,
    ) -> Result<()>;

    /// Mirror the derived provision variables into the audit log.
    async fn save_draft_mirror(
        &self,
        uuid: Uuid,
        claim_name: Option<&str>,
        claim_namespace: Option<&str>,
        payload: &Value,
    ) -> Result<()>;

    /// Mirror the job launch variables into the audit log.
    async fn save_job_vars_mirror(
        &self,
        uuid: Uuid,
        claim_name: Option<&str>,
        claim_namespace: Option<&str>,
        payload: &Value,
    ) -> Result<()>;

    async fn health_check_db(&self) -> Result<bool>;
}

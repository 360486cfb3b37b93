// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Derivation of a normalized provisioning record from the raw event.
//!
//! `build_draft` is a pure function over the extracted resource variables,
//! the optionally-fetched claim, and the optionally-fetched job record. Every
//! field has a documented fallback chain; the chain decides which upstream
//! system wins when several carry a value. Nothing here touches the database.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::AnnotationDomains;
use crate::error::{CoreError, Result};
use crate::event::ResourceVars;
use crate::sources::{Claim, JobRecord};

/// Purpose recorded when neither the claim nor the job supplies one.
const DEFAULT_PURPOSE: &str = "Development - Catalog item creation / maintenance";

/// Category assigned to a purpose string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurposeCategory {
    /// Training engagements.
    Training,
    /// Content or catalog development.
    Development,
    /// Customer-facing activity.
    CustomerActivity,
    /// Everything else.
    Others,
}

impl PurposeCategory {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Training => "Training",
            Self::Development => "Development",
            Self::CustomerActivity => "Customer Activity",
            Self::Others => "Others",
        }
    }
}

/// Categorize a free-text purpose by prefix/substring conventions.
pub fn categorize_purpose(purpose: &str) -> PurposeCategory {
    if purpose.starts_with("Training") {
        PurposeCategory::Training
    } else if purpose.starts_with("Development") || purpose.contains("Content dev") {
        PurposeCategory::Development
    } else if purpose.contains("Customer Activity") {
        PurposeCategory::CustomerActivity
    } else {
        PurposeCategory::Others
    }
}

/// Infrastructure sharing model of a catalog item, derived from naming
/// conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfraType {
    /// Environment deployed into its own account.
    Dedicated,
    /// Environment on shared infrastructure.
    Shared,
    /// Environment in a sandbox account.
    Sandbox,
}

impl InfraType {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dedicated => "Dedicated",
            Self::Shared => "Shared",
            Self::Sandbox => "Sandbox",
        }
    }
}

/// Derive the infra type from the class name and account.
pub fn infra_type(class_name: &str, account: &str) -> InfraType {
    if class_name.contains("SHARED") {
        InfraType::Shared
    } else if account.contains("sandbox") {
        InfraType::Sandbox
    } else {
        InfraType::Dedicated
    }
}

/// Segments of a dotted governor identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernorParts {
    /// First segment: the owning account.
    pub account: String,
    /// Third segment: the environment class.
    pub environment: String,
    /// `{environment}_{second segment, dashes underscored}`, upper-cased.
    pub class_name: String,
    /// Second segment: the catalog short name.
    pub short_name: String,
}

/// Split a governor of the form `account.item.environment`.
///
/// These segments group records downstream; anything with fewer than three
/// segments must fail loudly rather than yield a malformed grouping.
pub fn parse_governor(governor: &str) -> Result<GovernorParts> {
    let segments: Vec<&str> = governor.split('.').collect();
    if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(CoreError::MalformedGovernor {
            governor: governor.to_string(),
        });
    }

    let class_name = format!("{}_{}", segments[2], segments[1].replace('-', "_")).to_uppercase();

    Ok(GovernorParts {
        account: segments[0].to_string(),
        environment: segments[2].to_string(),
        class_name,
        short_name: segments[1].to_string(),
    })
}

/// Reduce a dotted catalog identifier to its display short name: `a.b.c`
/// yields `b`, anything without dots passes through trimmed.
pub fn parse_catalog_item(raw: &str) -> String {
    let name = if raw.contains('.') {
        raw.split('.').nth(1).unwrap_or(raw)
    } else {
        raw
    };
    name.trim().to_string()
}

/// Normalize a cloud-provider name to the reporting vocabulary.
pub fn normalize_cloud(cloud: &str) -> String {
    match cloud {
        "ec2" => "aws".to_string(),
        "osp" => "openstack".to_string(),
        "none" => "shared".to_string(),
        other => other.to_string(),
    }
}

/// Normalize a platform name to the reporting datasource vocabulary.
pub fn normalize_datasource(platform: &str) -> String {
    let upper = platform.to_uppercase();
    if upper == "LABS" {
        "OPENTLC".to_string()
    } else {
        upper
    }
}

/// Parse a job timestamp: ISO8601 with offset (`Z` or `+00:00`), normalized
/// to UTC.
pub fn parse_job_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn serialize_duration_secs<S>(value: &Option<Duration>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(d) => serializer.serialize_some(&d.num_seconds()),
        None => serializer.serialize_none(),
    }
}

/// The normalized provisioning record, ready for persistence. Every field is
/// optional except the identifiers the pipeline refuses to run without.
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionDraft {
    /// Provisioning identifier.
    pub uuid: Uuid,
    /// Resolved requester login.
    pub requester: Option<String>,
    /// Requester email annotation.
    pub requester_email: Option<String>,
    /// Catalog display name.
    pub catalog_name: String,
    /// Catalog item display name.
    pub catalog_item: String,
    /// Full governor string.
    pub governor: String,
    /// Owning account from the governor.
    pub account: String,
    /// Environment class from the governor.
    pub environment: String,
    /// Derived class name.
    pub class_name: String,
    /// Raw current state (classification happens separately).
    pub current_state: Option<String>,
    /// Raw desired state.
    pub desired_state: Option<String>,
    /// Short resource guid, set for external-platform requests.
    pub guid: Option<String>,
    /// Platform-wide deployment guid.
    pub platform_guid: Option<String>,
    /// Normalized cloud provider.
    pub cloud: String,
    /// Cloud region.
    pub cloud_region: Option<String>,
    /// Reporting datasource.
    pub datasource: String,
    /// Environment type tag.
    pub env_type: String,
    /// Sandbox account.
    pub sandbox_account: Option<String>,
    /// Sandbox name.
    pub sandbox_name: Option<String>,
    /// Azure tenant.
    pub azure_tenant: Option<String>,
    /// Azure subscription.
    pub azure_subscription: Option<String>,
    /// Chargeback method: `open` or `regional`.
    pub chargeback_method: String,
    /// Free-text purpose.
    pub purpose: String,
    /// Sales opportunity reference from the claim.
    pub opportunity: Option<String>,
    /// Seats requested for workshop-style items.
    pub workshop_users: i32,
    /// Deploy job identifier.
    pub job_id: Option<String>,
    /// Deploy job URL.
    pub job_url: Option<String>,
    /// When the deploy started (also the provisioned-at timestamp).
    pub provisioned_at: Option<DateTime<Utc>>,
    /// When the deploy finished. Absent while still running.
    pub job_complete: Option<DateTime<Utc>>,
    /// Deploy duration in minutes; live elapsed minutes while running.
    pub provision_time: f64,
    /// Raw deploy duration.
    #[serde(serialize_with = "serialize_duration_secs")]
    pub deploy_interval: Option<Duration>,
    /// External platform URL when the request came through one.
    pub platform_url: Option<String>,
    /// Whether the requester is an external-platform notifier identity.
    pub external_platform: bool,
}

/// Build the provisioning draft from the extracted variables plus whatever
/// upstream data could be fetched. `now` stands in for an absent deploy
/// completion so a still-running job reports live elapsed time.
pub fn build_draft(
    vars: &ResourceVars,
    claim: Option<&Claim>,
    job: Option<&JobRecord>,
    domains: &AnnotationDomains,
    now: DateTime<Utc>,
) -> Result<ProvisionDraft> {
    let uuid = vars.uuid.ok_or_else(|| CoreError::MissingUuid {
        resource: vars.resource_name.clone().unwrap_or_default(),
    })?;

    let governor = parse_governor(&vars.governor)?;
    let default_catalog = parse_catalog_item(&vars.governor);

    let mut catalog_name = default_catalog.clone();
    let mut catalog_item = default_catalog.clone();
    let mut opportunity = None;
    let mut claim_purpose = None;
    let mut claim_requester = None;
    let mut platform_url = None;
    let mut guid = None;

    if let Some(claim) = claim {
        // External-platform requests carry the platform URL; their claim
        // names end in a 4-character resource guid.
        platform_url = claim.annotation(&domains.platform, "externalPlatformUrl");
        if platform_url.is_some() {
            guid = claim
                .name()
                .filter(|name| name.len() >= 4)
                .map(|name| name[name.len() - 4..].to_string());
        }

        catalog_name = claim
            .annotation(&domains.platform, "catalogDisplayName")
            .or_else(|| claim.label(&domains.platform, "catalogItemName"))
            .unwrap_or(catalog_name);
        catalog_item = claim
            .annotation(&domains.platform, "catalogItemDisplayName")
            .or_else(|| claim.label(&domains.platform, "catalogItemName"))
            .unwrap_or(catalog_item);

        opportunity = claim.annotation(&domains.sales, "salesforce-id");
        claim_purpose = claim.annotation(&domains.sales, "purpose");
        claim_requester = claim.annotation(&domains.platform, "requester");
    }

    // Catalog names may still be dotted when sourced from labels.
    if catalog_name.contains('.') {
        catalog_name = parse_catalog_item(&catalog_name);
    }
    if catalog_item.contains('.') {
        catalog_item = parse_catalog_item(&catalog_item);
    }

    let api_vars = job.map(|j| j.extra_vars.clone()).unwrap_or(Value::Null);

    // The claim's own requester annotation is the most specific source and
    // wins over the event-level resolution; job launch vars are last.
    let requester = claim_requester
        .or_else(|| vars.requester.clone())
        .or_else(|| str_var(&api_vars, "requester_username"));

    let job_start = str_field_of(&vars.provision_job, "startTimestamp")
        .or_else(|| job.and_then(|j| j.start_timestamp.clone()))
        .as_deref()
        .and_then(parse_job_timestamp);
    let job_complete = str_field_of(&vars.provision_job, "completeTimestamp")
        .or_else(|| job.and_then(|j| j.complete_timestamp.clone()))
        .as_deref()
        .and_then(parse_job_timestamp);

    let (provision_time, deploy_interval) = match job_start {
        Some(start) => {
            let end = job_complete.unwrap_or(now);
            let interval = end - start;
            (interval.num_seconds() as f64 / 60.0, Some(interval))
        }
        None => (0.0, None),
    };

    let datasource = normalize_datasource(
        &str_var(&api_vars, "platform").unwrap_or_else(|| "BABYLON".to_string()),
    );
    let cloud = normalize_cloud(
        &str_var(&api_vars, "cloud_provider").unwrap_or_else(|| "test".to_string()),
    );

    let azure_tenant = str_field_of(&vars.provision_data, "azure_subscription");
    let azure_subscription = str_field_of(&vars.provision_data, "azure_subscription");

    let (sandbox_account, sandbox_name) = if cloud == "azure" {
        (
            vars.sandbox_account.clone(),
            str_field_of(&vars.provision_data, "sandbox_name"),
        )
    } else {
        (vars.sandbox_account.clone(), vars.sandbox_name.clone())
    };

    let open_environment = bool_var(&api_vars, "agnosticd_open_environment")
        || catalog_item.contains("Open Environment");
    let chargeback_method = if open_environment { "open" } else { "regional" };

    let purpose = claim_purpose
        .or_else(|| str_var(&api_vars, "purpose"))
        .unwrap_or_else(|| DEFAULT_PURPOSE.to_string());

    let workshop_users = int_var(&api_vars, "user_count")
        .or_else(|| int_var(&api_vars, "num_users"))
        .unwrap_or(1) as i32;

    let env_type = str_var(&api_vars, "env_type").unwrap_or_else(|| "tests".to_string());

    let platform_guid = str_var(&api_vars, "guid").or_else(|| vars.platform_guid.clone());
    let cloud_region = str_var(&api_vars, "region").or_else(|| vars.cloud_region.clone());

    let job_id = job_id_of(&vars.provision_job);
    let job_url = str_field_of(&vars.provision_job, "towerJobURL");

    Ok(ProvisionDraft {
        uuid,
        requester,
        requester_email: vars.requester_email.clone(),
        catalog_name,
        catalog_item,
        governor: vars.governor.clone(),
        account: governor.account,
        environment: governor.environment,
        class_name: governor.class_name,
        current_state: vars.current_state.clone(),
        desired_state: vars.desired_state.clone(),
        guid,
        platform_guid,
        cloud,
        cloud_region,
        datasource,
        env_type,
        sandbox_account,
        sandbox_name,
        azure_tenant,
        azure_subscription,
        chargeback_method: chargeback_method.to_string(),
        purpose,
        opportunity,
        workshop_users,
        job_id,
        job_url,
        provisioned_at: job_start,
        job_complete,
        provision_time,
        deploy_interval,
        platform_url: platform_url.clone(),
        external_platform: platform_url.is_some(),
    })
}

fn str_field_of(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(str::to_string)
}

fn str_var(vars: &Value, key: &str) -> Option<String> {
    vars[key].as_str().map(str::to_string)
}

fn int_var(vars: &Value, key: &str) -> Option<i64> {
    vars[key]
        .as_i64()
        .or_else(|| vars[key].as_str().and_then(|s| s.parse().ok()))
}

fn bool_var(vars: &Value, key: &str) -> bool {
    vars[key]
        .as_bool()
        .or_else(|| vars[key].as_str().map(|s| s.eq_ignore_ascii_case("true")))
        .unwrap_or(false)
}

/// The deploy job id may arrive as a number or a string.
fn job_id_of(provision_job: &Value) -> Option<String> {
    match &provision_job["deployerJob"] {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn domains() -> AnnotationDomains {
        AnnotationDomains::default()
    }

    fn base_vars() -> ResourceVars {
        ResourceVars {
            uuid: Some(Uuid::parse_str("8f4d0e3a-51a1-4f36-9a52-4a8a7e3f1a01").unwrap()),
            governor: "prod.training-lab.rhel".to_string(),
            current_state: Some("provisioning".to_string()),
            desired_state: Some("started".to_string()),
            requester: Some("jane.doe".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_governor_parsing() {
        let parts = parse_governor("prod.training-lab.rhel").unwrap();
        assert_eq!(parts.account, "prod");
        assert_eq!(parts.environment, "rhel");
        assert_eq!(parts.class_name, "RHEL_TRAINING_LAB");
        assert_eq!(parts.short_name, "training-lab");
    }

    #[test]
    fn test_governor_too_few_segments_is_fatal() {
        for governor in ["", "prod", "prod.lab", "prod..rhel"] {
            let err = parse_governor(governor).unwrap_err();
            assert_eq!(err.error_code(), "MALFORMED_GOVERNOR");
        }
    }

    #[test]
    fn test_catalog_item_parsing() {
        assert_eq!(parse_catalog_item("prod.training-lab.rhel"), "training-lab");
        assert_eq!(parse_catalog_item("  OpenShift Workshop  "), "OpenShift Workshop");
    }

    #[test]
    fn test_cloud_normalization() {
        assert_eq!(normalize_cloud("ec2"), "aws");
        assert_eq!(normalize_cloud("osp"), "openstack");
        assert_eq!(normalize_cloud("none"), "shared");
        assert_eq!(normalize_cloud("gcp"), "gcp");
    }

    #[test]
    fn test_datasource_normalization() {
        assert_eq!(normalize_datasource("babylon"), "BABYLON");
        assert_eq!(normalize_datasource("labs"), "OPENTLC");
        assert_eq!(normalize_datasource("RHPDS"), "RHPDS");
    }

    #[test]
    fn test_purpose_categorization() {
        assert_eq!(
            categorize_purpose("Training - RHEL Deep Dive"),
            PurposeCategory::Training
        );
        assert_eq!(
            categorize_purpose("Development - Catalog item creation"),
            PurposeCategory::Development
        );
        assert_eq!(
            categorize_purpose("Workshop Content dev for partners"),
            PurposeCategory::Development
        );
        assert_eq!(
            categorize_purpose("Demo - Customer Activity follow-up"),
            PurposeCategory::CustomerActivity
        );
        assert_eq!(categorize_purpose("Conference booth"), PurposeCategory::Others);
    }

    #[test]
    fn test_infra_type_conventions() {
        assert_eq!(infra_type("OCP_SHARED_CLUSTER", "prod"), InfraType::Shared);
        assert_eq!(infra_type("RHEL_BASE", "aws-sandbox"), InfraType::Sandbox);
        assert_eq!(infra_type("RHEL_BASE", "prod"), InfraType::Dedicated);
    }

    #[test]
    fn test_timestamp_parsing_normalizes_to_utc() {
        let z = parse_job_timestamp("2026-03-02T10:00:00Z").unwrap();
        let offset = parse_job_timestamp("2026-03-02T12:00:00+02:00").unwrap();
        assert_eq!(z, offset);
        assert!(parse_job_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_draft_from_governor_only() {
        let vars = base_vars();
        let now = Utc::now();
        let draft = build_draft(&vars, None, None, &domains(), now).unwrap();

        assert_eq!(draft.account, "prod");
        assert_eq!(draft.environment, "rhel");
        assert_eq!(draft.class_name, "RHEL_TRAINING_LAB");
        assert_eq!(draft.catalog_name, "training-lab");
        assert_eq!(draft.catalog_item, "training-lab");
        assert_eq!(draft.datasource, "BABYLON");
        assert_eq!(draft.cloud, "test");
        assert_eq!(draft.chargeback_method, "regional");
        assert_eq!(draft.purpose, DEFAULT_PURPOSE);
        assert_eq!(draft.workshop_users, 1);
        assert_eq!(draft.provision_time, 0.0);
        assert!(!draft.external_platform);
    }

    #[test]
    fn test_draft_missing_uuid_is_fatal() {
        let mut vars = base_vars();
        vars.uuid = None;
        let err = build_draft(&vars, None, None, &domains(), Utc::now()).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_UUID");
    }

    #[test]
    fn test_claim_catalog_precedence() {
        let vars = base_vars();
        let claim = Claim {
            raw: json!({
                "metadata": {
                    "name": "my-lab-x7k2",
                    "annotations": {
                        "babylon.gpte.redhat.com/catalogDisplayName": "RHEL Training Lab",
                        "pfe.redhat.com/salesforce-id": "2210456",
                        "pfe.redhat.com/purpose": "Training - RHEL onboarding"
                    },
                    "labels": {
                        "babylon.gpte.redhat.com/catalogItemName": "prod.training-lab.rhel"
                    }
                }
            }),
        };

        let draft = build_draft(&vars, Some(&claim), None, &domains(), Utc::now()).unwrap();
        assert_eq!(draft.catalog_name, "RHEL Training Lab");
        // Item display name falls back to the label, then gets un-dotted.
        assert_eq!(draft.catalog_item, "training-lab");
        assert_eq!(draft.opportunity.as_deref(), Some("2210456"));
        assert_eq!(draft.purpose, "Training - RHEL onboarding");
    }

    #[test]
    fn test_claim_requester_overrides_event_requester() {
        let vars = base_vars();
        let claim = Claim {
            raw: json!({
                "metadata": {
                    "annotations": {
                        "babylon.gpte.redhat.com/requester": "jdoe-admin"
                    }
                }
            }),
        };

        let draft = build_draft(&vars, Some(&claim), None, &domains(), Utc::now()).unwrap();
        assert_eq!(draft.requester.as_deref(), Some("jdoe-admin"));
    }

    #[test]
    fn test_external_platform_claim_sets_guid_and_url() {
        let vars = base_vars();
        let claim = Claim {
            raw: json!({
                "metadata": {
                    "name": "lab-request-x7k2",
                    "annotations": {
                        "babylon.gpte.redhat.com/externalPlatformUrl": "https://portal.example.com"
                    }
                }
            }),
        };

        let draft = build_draft(&vars, Some(&claim), None, &domains(), Utc::now()).unwrap();
        assert!(draft.external_platform);
        assert_eq!(draft.platform_url.as_deref(), Some("https://portal.example.com"));
        assert_eq!(draft.guid.as_deref(), Some("x7k2"));
    }

    #[test]
    fn test_job_vars_drive_cloud_and_chargeback() {
        let vars = base_vars();
        let job = JobRecord {
            start_timestamp: None,
            complete_timestamp: None,
            extra_vars: json!({
                "cloud_provider": "ec2",
                "platform": "labs",
                "env_type": "prod",
                "user_count": 25,
                "agnosticd_open_environment": true,
                "guid": "a1b2c",
                "region": "eu-west-1"
            }),
        };

        let draft = build_draft(&vars, None, Some(&job), &domains(), Utc::now()).unwrap();
        assert_eq!(draft.cloud, "aws");
        assert_eq!(draft.datasource, "OPENTLC");
        assert_eq!(draft.env_type, "prod");
        assert_eq!(draft.workshop_users, 25);
        assert_eq!(draft.chargeback_method, "open");
        assert_eq!(draft.platform_guid.as_deref(), Some("a1b2c"));
        assert_eq!(draft.cloud_region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_open_environment_from_display_name() {
        let vars = base_vars();
        let claim = Claim {
            raw: json!({
                "metadata": {
                    "annotations": {
                        "babylon.gpte.redhat.com/catalogItemDisplayName": "AWS Open Environment"
                    }
                }
            }),
        };

        let draft = build_draft(&vars, Some(&claim), None, &domains(), Utc::now()).unwrap();
        assert_eq!(draft.chargeback_method, "open");
    }

    #[test]
    fn test_provision_time_uses_now_while_running() {
        let mut vars = base_vars();
        vars.provision_job = json!({
            "deployerJob": 12345,
            "startTimestamp": "2026-03-02T10:00:00+00:00"
        });

        let now = parse_job_timestamp("2026-03-02T10:30:00Z").unwrap();
        let draft = build_draft(&vars, None, None, &domains(), now).unwrap();

        assert_eq!(draft.provision_time, 30.0);
        assert_eq!(draft.deploy_interval, Some(Duration::minutes(30)));
        assert_eq!(draft.job_id.as_deref(), Some("12345"));
        assert!(draft.job_complete.is_none());
    }

    #[test]
    fn test_provision_time_from_completed_job() {
        let mut vars = base_vars();
        vars.provision_job = json!({
            "startTimestamp": "2026-03-02T10:00:00+00:00",
            "completeTimestamp": "2026-03-02T10:42:00+00:00"
        });

        let draft = build_draft(&vars, None, None, &domains(), Utc::now()).unwrap();
        assert_eq!(draft.provision_time, 42.0);
        assert_eq!(draft.deploy_interval, Some(Duration::minutes(42)));
        assert_eq!(
            draft.provisioned_at,
            parse_job_timestamp("2026-03-02T10:00:00Z")
        );
    }

    #[test]
    fn test_requester_falls_back_to_job_launch_vars() {
        let mut vars = base_vars();
        vars.requester = None;
        let job = JobRecord {
            start_timestamp: None,
            complete_timestamp: None,
            extra_vars: json!({ "requester_username": "jdoe" }),
        };

        let draft = build_draft(&vars, None, Some(&job), &domains(), Utc::now()).unwrap();
        assert_eq!(draft.requester.as_deref(), Some("jdoe"));
    }
}

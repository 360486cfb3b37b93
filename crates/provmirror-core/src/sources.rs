// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External collaborator interfaces.
//!
//! The event-watch relay, the directory, the CRM, and the orchestration
//! platform's claim store are all external systems. The core consumes them
//! through the narrow traits defined here; production wiring injects real
//! clients, tests inject mocks. Only the job-execution REST read ships with
//! an HTTP implementation, since its contract is a single authenticated GET.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::JobApiConfig;
use crate::error::{CoreError, Result};

/// Outbound requests are bounded. The upstream behavior ran without a
/// timeout; the bound here is a deliberate hardening addition.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A fetched claim object: the user's hold on a provisioned environment.
#[derive(Debug, Clone)]
pub struct Claim {
    /// Full resource body as delivered by the platform.
    pub raw: Value,
}

impl Claim {
    /// Claim resource name.
    pub fn name(&self) -> Option<&str> {
        self.raw["metadata"]["name"].as_str()
    }

    /// Read a domain-namespaced metadata annotation.
    pub fn annotation(&self, domain: &str, key: &str) -> Option<String> {
        self.raw["metadata"]["annotations"][format!("{}/{}", domain, key)]
            .as_str()
            .map(str::to_string)
    }

    /// Read a domain-namespaced metadata label.
    pub fn label(&self, domain: &str, key: &str) -> Option<String> {
        self.raw["metadata"]["labels"][format!("{}/{}", domain, key)]
            .as_str()
            .map(str::to_string)
    }

    /// Metadata subtree used for the audit mirror, with server-managed
    /// bookkeeping stripped.
    pub fn audit_metadata(&self) -> Value {
        let mut metadata = self.raw["metadata"].clone();
        if let Some(map) = metadata.as_object_mut() {
            map.remove("managedFields");
        }
        serde_json::json!({ "metadata": metadata })
    }
}

/// A job-execution record from the automation API.
#[derive(Debug, Clone, Default)]
pub struct JobRecord {
    /// Job start, ISO8601 with offset.
    pub start_timestamp: Option<String>,
    /// Job completion, ISO8601 with offset. Absent while still running.
    pub complete_timestamp: Option<String>,
    /// Launch-time variables of the job.
    pub extra_vars: Value,
}

/// A directory entry for a person, with the manager sub-entry when resolved.
#[derive(Debug, Clone, Default)]
pub struct DirectoryUser {
    /// Primary mail address.
    pub mail: Option<String>,
    /// Given name.
    pub given_name: Option<String>,
    /// Surname.
    pub surname: Option<String>,
    /// Identity-system uid.
    pub uid: Option<String>,
    /// Job title.
    pub title: Option<String>,
    /// Cost center.
    pub cost_center: Option<i32>,
    /// Geography.
    pub geo: Option<String>,
    /// Direct manager.
    pub manager: Option<DirectoryManager>,
}

/// A directory entry for a manager.
#[derive(Debug, Clone, Default)]
pub struct DirectoryManager {
    /// Display name.
    pub name: Option<String>,
    /// Mail address.
    pub mail: Option<String>,
    /// Identity-system uid.
    pub uid: Option<String>,
}

/// A CRM opportunity with its nested account/owner fields resolved.
#[derive(Debug, Clone, Default)]
pub struct CrmOpportunity {
    /// CRM-internal identifier.
    pub id: String,
    /// External opportunity number.
    pub number: String,
    /// Opportunity name.
    pub name: Option<String>,
    /// Account identifier.
    pub account_id: Option<String>,
    /// Account display name.
    pub account_name: Option<String>,
    /// Monetary amount.
    pub amount: Option<f64>,
    /// Expected revenue.
    pub expected_revenue: Option<f64>,
    /// Close date (`YYYY-MM-DD`).
    pub close_date: Option<String>,
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

/// Claim store read access. `NotFound` is a normal outcome.
#[async_trait]
pub trait ClaimSource: Send + Sync {
    /// Fetch a claim by namespace and name. Returns `Ok(None)` when the
    /// claim no longer exists.
    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<Claim>>;
}

/// Job-execution record read access. Network or auth failure is fatal for
/// the event being processed.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Fetch the execution record for a deploy job.
    async fn fetch(&self, job_id: &str) -> Result<JobRecord>;
}

/// Directory lookups across the internal and federated identity sources.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    /// Search the internal corporate directory by mail address.
    async fn search_internal(&self, mail: &str) -> Result<Option<DirectoryUser>>;

    /// Search the federated source by uid.
    async fn search_federated_uid(&self, uid: &str) -> Result<Option<DirectoryUser>>;

    /// Search the federated source by mail address.
    async fn search_federated_mail(&self, mail: &str) -> Result<Option<DirectoryUser>>;

    /// Walk the management chain of `mail` and return the first manager
    /// address present in the roster, if any.
    async fn roster_manager(
        &self,
        mail: &str,
        roster: &HashMap<String, i64>,
    ) -> Result<Option<String>>;
}

/// CRM opportunity read access.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    /// Query by external opportunity number.
    async fn by_number(&self, number: &str) -> Result<Option<CrmOpportunity>>;

    /// Query by CRM-internal identifier.
    async fn by_id(&self, id: &str) -> Result<Option<CrmOpportunity>>;
}

// ============================================================================
// Job API HTTP client
// ============================================================================

/// reqwest-backed implementation of [`JobSource`] against the
/// automation-execution REST API.
pub struct HttpJobSource {
    client: reqwest::Client,
    config: JobApiConfig,
}

impl HttpJobSource {
    /// Create a client for the configured endpoint.
    pub fn new(config: JobApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| CoreError::UpstreamFetch {
                source: "job-api".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch(&self, job_id: &str) -> Result<JobRecord> {
        let url = format!(
            "{}/api/v2/jobs/{}/",
            self.config.base_url.trim_end_matches('/'),
            job_id
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await
            .map_err(|e| CoreError::UpstreamFetch {
                source: "job-api".to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(job_api_status_error(response.status().as_u16()));
        }

        let body: Value = response.json().await.map_err(|e| CoreError::UpstreamFetch {
            source: "job-api".to_string(),
            reason: format!("invalid response body: {}", e),
        })?;

        Ok(job_record_from_json(&body))
    }
}

/// Map a non-success job API status to a fatal upstream error.
fn job_api_status_error(status: u16) -> CoreError {
    CoreError::UpstreamFetch {
        source: "job-api".to_string(),
        reason: format!("HTTP status {}", status),
    }
}

/// Build a [`JobRecord`] from a job API response body. The launch variables
/// arrive JSON-encoded inside a string field; a malformed blob degrades to
/// an empty object with a log line rather than failing the event.
fn job_record_from_json(body: &Value) -> JobRecord {
    let extra_vars = match body["extra_vars"].as_str() {
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
            warn!(error = %e, "Job record carried unparseable extra_vars");
            Value::Object(Default::default())
        }),
        None => body["extra_vars"].clone(),
    };

    JobRecord {
        start_timestamp: body["startTimestamp"].as_str().map(str::to_string),
        complete_timestamp: body["completeTimestamp"].as_str().map(str::to_string),
        extra_vars,
    }
}

// ============================================================================
// Retry
// ============================================================================

/// Bounded exponential backoff: `attempts` tries, delay doubling from
/// `base_delay` up to `max_delay`. Applied to CRM lookups.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = base_delay;
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, error = %e, "Retryable call failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| CoreError::UpstreamFetch {
        source: "retry".to_string(),
        reason: "no attempts were made".to_string(),
    }))
}

/// Default retry schedule for CRM calls: 3 attempts, 500ms base, 5s cap.
pub async fn retry_crm<T, F, Fut>(op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    retry_with_backoff(3, Duration::from_millis(500), Duration::from_secs(5), op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_job_record_parses_string_encoded_extra_vars() {
        let body = json!({
            "startTimestamp": "2026-03-02T10:00:00+00:00",
            "completeTimestamp": "2026-03-02T10:42:00+00:00",
            "extra_vars": "{\"cloud_provider\": \"ec2\", \"purpose\": \"Training - RHEL\"}"
        });

        let record = job_record_from_json(&body);
        assert_eq!(
            record.start_timestamp.as_deref(),
            Some("2026-03-02T10:00:00+00:00")
        );
        assert_eq!(record.extra_vars["cloud_provider"], "ec2");
    }

    #[test]
    fn test_job_record_tolerates_garbage_extra_vars() {
        let body = json!({ "extra_vars": "{not json" });
        let record = job_record_from_json(&body);
        assert!(record.extra_vars.as_object().unwrap().is_empty());
        assert!(record.start_timestamp.is_none());
    }

    #[test]
    fn test_job_api_status_maps_to_upstream_error() {
        let err = job_api_status_error(401);
        assert_eq!(err.error_code(), "UPSTREAM_FETCH_FAILED");
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(CoreError::UpstreamFetch {
                            source: "crm".to_string(),
                            reason: "flaky".to_string(),
                        })
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(
            3,
            Duration::from_millis(1),
            Duration::from_millis(4),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(CoreError::UpstreamFetch {
                        source: "crm".to_string(),
                        reason: "down".to_string(),
                    })
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_claim_audit_metadata_strips_managed_fields() {
        let claim = Claim {
            raw: json!({
                "metadata": {
                    "name": "my-lab",
                    "managedFields": [{"manager": "platform"}],
                    "annotations": { "a/b": "c" }
                }
            }),
        };
        let audit = claim.audit_metadata();
        assert!(audit["metadata"]["managedFields"].is_null());
        assert_eq!(audit["metadata"]["name"], "my-lab");
    }
}

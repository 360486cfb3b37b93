// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Extraction of normalized variables from the raw resource envelope.
//!
//! Incoming resource bodies are loosely structured: nearly every field is
//! optional and several can arrive from more than one place. Everything the
//! pipeline consumes is pulled into [`ResourceVars`] here, in one place, so
//! the per-field precedence is testable instead of being scattered through
//! the processing code.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::AnnotationDomains;

/// Requester recorded when the event originated from the automation layer
/// itself rather than an end user.
pub const AUTOMATION_REQUESTER: &str = "poolboy";

/// Governor marker for pool-managed resources that carry no user config.
const EMPTY_CONFIG_MARKER: &str = "empty-config";

/// Claim namespaces are prefixed per-user; the prefix is stripped when
/// deriving a requester from the namespace name.
const NAMESPACE_USER_PREFIX: &str = "user-";

/// A watch notification delivered by the event relay.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchEvent {
    /// Delivery type.
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    /// The resource body.
    pub object: Value,
}

/// Watch delivery types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    /// Resource first observed.
    Added,
    /// Resource changed.
    Modified,
    /// Resource removed.
    Deleted,
}

/// Normalized variables extracted from one resource body.
///
/// Raw state strings are kept as-is; classification happens in
/// [`crate::state`].
#[derive(Debug, Clone, Default)]
pub struct ResourceVars {
    /// Resource name from metadata.
    pub resource_name: Option<String>,
    /// Raw current lifecycle state.
    pub current_state: Option<String>,
    /// Raw desired lifecycle state.
    pub desired_state: Option<String>,
    /// Provisioning identifier: job vars first, resource-handle annotation
    /// as fallback.
    pub uuid: Option<Uuid>,
    /// Resolved requester (see [`resolve_requester`]).
    pub requester: Option<String>,
    /// Requester email annotation, when present.
    pub requester_email: Option<String>,
    /// Claim name annotation.
    pub claim_name: Option<String>,
    /// Claim namespace annotation.
    pub claim_namespace: Option<String>,
    /// Dotted governor identifier naming the provisioning template.
    pub governor: String,
    /// Job variables from `spec.vars.job_vars`.
    pub job_vars: Value,
    /// Provision data from `spec.vars.provision_data`.
    pub provision_data: Value,
    /// Deploy-job bookkeeping from `status.towerJobs.provision`.
    pub provision_job: Value,
    /// Sandbox account: job vars first, provision data fallback.
    pub sandbox_account: Option<String>,
    /// Sandbox name: job vars first, provision data fallback.
    pub sandbox_name: Option<String>,
    /// Platform guid: deploy-job record first, job vars fallback.
    pub platform_guid: Option<String>,
    /// Cloud region: deploy-job record first, job vars fallback.
    pub cloud_region: Option<String>,
}

impl ResourceVars {
    /// Extract variables from a resource body using the configured
    /// annotation domains.
    pub fn from_resource(object: &Value, domains: &AnnotationDomains) -> Self {
        let metadata = &object["metadata"];
        let annotations = &metadata["annotations"];
        let spec_vars = &object["spec"]["vars"];
        let job_vars = spec_vars["job_vars"].clone();
        let provision_data = spec_vars["provision_data"].clone();
        let provision_job = object["status"]["towerJobs"]["provision"].clone();

        let governor = object["spec"]["governor"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        let uuid = str_field(&job_vars, "uuid")
            .or_else(|| annotation(annotations, &domains.pool, "resource-handle-uid"))
            .and_then(|raw| Uuid::parse_str(&raw).ok());

        let claim_name = annotation(annotations, &domains.pool, "resource-claim-name");
        let claim_namespace = annotation(annotations, &domains.pool, "resource-claim-namespace");

        let requester = resolve_requester(
            annotation(annotations, &domains.platform, "requester"),
            claim_namespace.as_deref(),
            &governor,
        );

        let sandbox_account = str_field(&job_vars, "sandbox_account")
            .or_else(|| str_field(&provision_data, "ibm_sandbox_account"));
        let sandbox_name = str_field(&job_vars, "sandbox_name")
            .or_else(|| str_field(&provision_data, "ibm_sandbox_name"));

        let platform_guid =
            str_field(&provision_job, "guid").or_else(|| str_field(&job_vars, "guid"));
        let cloud_region =
            str_field(&provision_job, "region").or_else(|| str_field(&job_vars, "region"));

        Self {
            resource_name: str_field(metadata, "name"),
            current_state: str_field(spec_vars, "current_state"),
            desired_state: str_field(spec_vars, "desired_state"),
            uuid,
            requester,
            requester_email: annotation(annotations, &domains.platform, "requester-email"),
            claim_name,
            claim_namespace,
            governor,
            job_vars,
            provision_data,
            provision_job,
            sandbox_account,
            sandbox_name,
            platform_guid,
            cloud_region,
        }
    }
}

/// Resolve the requester with the documented fallback chain: explicit
/// annotation, then a requester derived from the claim namespace, then the
/// automation identity when no claim namespace exists (the event originated
/// from the pool manager, not an end user) or the governor carries the
/// empty-config marker.
pub fn resolve_requester(
    annotation: Option<String>,
    claim_namespace: Option<&str>,
    governor: &str,
) -> Option<String> {
    if let Some(requester) = annotation {
        return Some(requester);
    }
    if claim_namespace.is_none() || governor.contains(EMPTY_CONFIG_MARKER) {
        return Some(AUTOMATION_REQUESTER.to_string());
    }
    claim_namespace.map(requester_from_namespace)
}

/// Derive a requester login from a claim namespace: strip the per-user
/// prefix and turn the final dash into a dot (`user-jane-doe` → `jane.doe`).
fn requester_from_namespace(namespace: &str) -> String {
    let base = namespace
        .strip_prefix(NAMESPACE_USER_PREFIX)
        .unwrap_or(namespace);
    match base.rfind('-') {
        Some(pos) => {
            let mut derived = String::with_capacity(base.len());
            derived.push_str(&base[..pos]);
            derived.push('.');
            derived.push_str(&base[pos + 1..]);
            derived
        }
        None => base.to_string(),
    }
}

/// Read a domain-namespaced annotation, e.g. `{domain}/requester`.
pub fn annotation(annotations: &Value, domain: &str, key: &str) -> Option<String> {
    annotations[format!("{}/{}", domain, key)]
        .as_str()
        .map(str::to_string)
}

/// Read a string field, tolerating absence and non-string values.
pub fn str_field(value: &Value, key: &str) -> Option<String> {
    value[key].as_str().map(str::to_string)
}

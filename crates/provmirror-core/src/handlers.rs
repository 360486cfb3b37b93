// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Event handlers for provmirror-core.
//!
//! `handle_resource_event` is the one externally observable command:
//! process a single resource-changed notification to completion. It is
//! idempotent under redelivery; the delivery layer is assumed to be
//! at-least-once and to serialize events per resource.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AnnotationDomains;
use crate::derive::{build_draft, categorize_purpose, infra_type, ProvisionDraft};
use crate::enrich::{Enricher, UserLinks};
use crate::error::CoreError;
use crate::event::{ResourceVars, WatchEvent, WatchEventType};
use crate::lifecycle::{apply_transition, initial_provision_result, record_transition};
use crate::opportunity::mirror_opportunity;
use crate::persistence::{CatalogItemRow, Persistence, ProvisionRow};
use crate::sources::{Claim, ClaimSource, DirectorySource, JobRecord, JobSource, OpportunitySource};
use crate::state::{classify, Classification, LifecycleState};

/// States during which the claim is not fetched: the claim is either being
/// torn down or was already consumed for this purpose.
const NO_CLAIM_FETCH: &[LifecycleState] = &[
    LifecycleState::Destroying,
    LifecycleState::DestroyFailed,
    LifecycleState::Starting,
];

/// What processing an event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Event ignored: state outside the actionable vocabulary.
    Ignored,
    /// Current state equals desired state; nothing to record.
    Settled,
    /// Deletion during teardown: retirement stamped, terminal transition
    /// forced.
    Retired,
    /// Full pipeline ran.
    Processed,
}

/// Shared state for event handlers.
///
/// The persistence handle is required; external lookup sources are optional
/// capabilities. Processing degrades gracefully when a source is absent,
/// exactly as it does when the source has no answer.
pub struct HandlerState {
    /// Persistence implementation.
    pub persistence: Arc<dyn Persistence>,
    /// Claim store read access.
    pub claims: Option<Arc<dyn ClaimSource>>,
    /// Job-execution record read access.
    pub jobs: Option<Arc<dyn JobSource>>,
    /// Directory lookups.
    pub directory: Option<Arc<dyn DirectorySource>>,
    /// CRM lookups.
    pub opportunities: Option<Arc<dyn OpportunitySource>>,
    /// Annotation domains for metadata keys.
    pub domains: AnnotationDomains,
    /// Corporate mail domain for identity routing.
    pub corp_domain: String,
}

impl HandlerState {
    /// Create a handler state with no external lookup sources attached.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        domains: AnnotationDomains,
        corp_domain: impl Into<String>,
    ) -> Self {
        Self {
            persistence,
            claims: None,
            jobs: None,
            directory: None,
            opportunities: None,
            domains,
            corp_domain: corp_domain.into(),
        }
    }

    /// Attach a claim source.
    pub fn with_claims(mut self, claims: Arc<dyn ClaimSource>) -> Self {
        self.claims = Some(claims);
        self
    }

    /// Attach a job-execution source.
    pub fn with_jobs(mut self, jobs: Arc<dyn JobSource>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    /// Attach a directory source.
    pub fn with_directory(mut self, directory: Arc<dyn DirectorySource>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Attach a CRM source.
    pub fn with_opportunities(mut self, opportunities: Arc<dyn OpportunitySource>) -> Self {
        self.opportunities = Some(opportunities);
        self
    }
}

/// Process one resource-changed notification to completion.
#[instrument(skip(state, event), fields(event_type = ?event.event_type))]
pub async fn handle_resource_event(state: &HandlerState, event: &WatchEvent) -> Result<Outcome> {
    let vars = ResourceVars::from_resource(&event.object, &state.domains);
    let deleted = event.event_type == WatchEventType::Deleted;

    match classify(
        deleted,
        vars.current_state.as_deref(),
        vars.desired_state.as_deref(),
    ) {
        Classification::Ignorable { state: parsed } => {
            match parsed {
                Some(known) => info!(
                    uuid = ?vars.uuid,
                    state = %known,
                    "Nothing to record for this state, ignoring event"
                ),
                None => warn!(
                    uuid = ?vars.uuid,
                    state = ?vars.current_state,
                    "Current state not recognized, ignoring event"
                ),
            }
            Ok(Outcome::Ignored)
        }
        Classification::Settled { state: settled } => {
            info!(uuid = ?vars.uuid, state = %settled, "No update required");
            Ok(Outcome::Settled)
        }
        Classification::TerminalRetire => retire(state, &vars).await,
        Classification::Actionable { current, .. } => process(state, &vars, current).await,
    }
}

/// Deletion during teardown: stamp retirement and force the terminal
/// transition, bypassing the derivation pipeline.
async fn retire(state: &HandlerState, vars: &ResourceVars) -> Result<Outcome> {
    let uuid = require_uuid(vars)?;
    let now = Utc::now();

    if state.persistence.mark_retired(uuid, now).await? {
        info!(%uuid, retired_at = %now, "Retirement date set");
    }

    record_transition(
        state.persistence.as_ref(),
        uuid,
        LifecycleState::DestroyCompleted,
        vars.requester.as_deref(),
    )
    .await?;

    Ok(Outcome::Retired)
}

/// The full pipeline: fetch, derive, enrich, persist, log.
async fn process(
    state: &HandlerState,
    vars: &ResourceVars,
    current: LifecycleState,
) -> Result<Outcome> {
    let uuid = require_uuid(vars)?;
    let persistence = state.persistence.as_ref();

    let claim = fetch_claim(state, vars, current).await?;
    if let Some(claim) = &claim {
        persistence
            .save_claim_mirror(
                uuid,
                vars.claim_name.as_deref(),
                vars.claim_namespace.as_deref(),
                &claim.audit_metadata(),
            )
            .await?;
    }

    let job = fetch_job(state, vars).await?;
    if let Some(job) = &job {
        persistence
            .save_job_vars_mirror(
                uuid,
                vars.claim_name.as_deref(),
                vars.claim_namespace.as_deref(),
                &job.extra_vars,
            )
            .await?;
    }

    let draft = build_draft(vars, claim.as_ref(), job.as_ref(), &state.domains, Utc::now())?;
    persistence
        .save_draft_mirror(
            uuid,
            vars.claim_name.as_deref(),
            vars.claim_namespace.as_deref(),
            &serde_json::to_value(&draft).map_err(CoreError::from)?,
        )
        .await?;

    info!(
        %uuid,
        state = %current,
        catalog = %draft.catalog_name,
        requester = ?draft.requester,
        "Populating provision"
    );

    let links = resolve_links(state, &draft).await?;

    let catalog_id = persistence
        .upsert_catalog_item(&CatalogItemRow {
            catalog_item: draft.catalog_item.clone(),
            catalog_name: draft.catalog_name.clone(),
            class_name: draft.class_name.clone(),
            infra_type: infra_type(&draft.class_name, &draft.account).as_str().to_string(),
        })
        .await?;

    let purpose_id = persistence
        .upsert_purpose(&draft.purpose, categorize_purpose(&draft.purpose).as_str())
        .await?;

    let opportunity_id = match (&state.opportunities, &draft.opportunity) {
        (Some(crm), Some(reference)) => {
            mirror_opportunity(persistence, crm.as_ref(), reference).await?
        }
        _ => None,
    };

    let row = provision_row(&draft, current, &links, catalog_id, purpose_id, opportunity_id);
    persistence.upsert_provision(&row).await?;

    apply_transition(persistence, uuid, current, draft.requester.as_deref()).await?;

    Ok(Outcome::Processed)
}

fn require_uuid(vars: &ResourceVars) -> Result<Uuid, CoreError> {
    vars.uuid.ok_or_else(|| CoreError::MissingUuid {
        resource: vars.resource_name.clone().unwrap_or_default(),
    })
}

/// Fetch the claim when the lifecycle stage still warrants it. A missing
/// claim degrades to governor-derived defaults; fatal client errors
/// propagate.
async fn fetch_claim(
    state: &HandlerState,
    vars: &ResourceVars,
    current: LifecycleState,
) -> Result<Option<Claim>, CoreError> {
    if NO_CLAIM_FETCH.contains(&current) {
        return Ok(None);
    }
    let (Some(source), Some(namespace), Some(name)) =
        (&state.claims, &vars.claim_namespace, &vars.claim_name)
    else {
        return Ok(None);
    };

    match source.fetch(namespace, name).await? {
        Some(claim) => Ok(Some(claim)),
        None => {
            info!(
                uuid = ?vars.uuid,
                claim = %name,
                namespace = %namespace,
                "Claim not found, continuing with governor-derived defaults"
            );
            Ok(None)
        }
    }
}

/// Fetch the job-execution record when a deploy job is referenced. Network
/// and auth failures are fatal for the event.
async fn fetch_job(
    state: &HandlerState,
    vars: &ResourceVars,
) -> Result<Option<JobRecord>, CoreError> {
    let Some(source) = &state.jobs else {
        return Ok(None);
    };
    let job_id = match &vars.provision_job["deployerJob"] {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => return Ok(None),
    };

    let record = source.fetch(&job_id).await?;
    Ok(Some(record))
}

/// Resolve the requester into reporting-store links. No directory or no
/// requester means the provision is recorded without user attribution.
async fn resolve_links(state: &HandlerState, draft: &ProvisionDraft) -> Result<UserLinks> {
    let (Some(directory), Some(requester)) = (&state.directory, &draft.requester) else {
        warn!(
            uuid = %draft.uuid,
            governor = %draft.governor,
            "Unable to attribute provision to a user"
        );
        return Ok(UserLinks::default());
    };

    let enricher = Enricher::new(directory.clone(), state.corp_domain.clone());
    let profile = enricher.lookup(requester, draft.external_platform).await?;
    let links = enricher
        .link_user(state.persistence.as_ref(), profile)
        .await?;
    Ok(links)
}

/// Assemble the insertable provision row.
fn provision_row(
    draft: &ProvisionDraft,
    current: LifecycleState,
    links: &UserLinks,
    catalog_id: i64,
    purpose_id: i64,
    opportunity_id: Option<i64>,
) -> ProvisionRow {
    ProvisionRow {
        uuid: draft.uuid,
        provisioned_at: draft.provisioned_at,
        provision_result: initial_provision_result(current).to_string(),
        student_id: links.user_id,
        catalog_id: Some(catalog_id),
        purpose_id: Some(purpose_id),
        opportunity_id,
        purpose: Some(draft.purpose.clone()),
        opportunity: draft.opportunity.clone(),
        guid: draft.guid.clone(),
        platform_guid: draft.platform_guid.clone(),
        account: Some(draft.account.clone()),
        environment: Some(draft.environment.clone()),
        class_name: Some(draft.class_name.clone()),
        sandbox_name: draft.sandbox_name.clone(),
        cloud: Some(draft.cloud.clone()),
        cloud_region: draft.cloud_region.clone(),
        datasource: Some(draft.datasource.clone()),
        env_type: Some(draft.env_type.clone()),
        provision_time: draft.provision_time,
        deploy_interval: draft.deploy_interval,
        cost_center: links.cost_center,
        student_geo: links.geo.clone(),
        manager_id: links.manager_id,
        manager_chargeback_id: links.manager_chargeback_id,
        chargeback_method: Some(draft.chargeback_method.clone()),
        workshop_users: draft.workshop_users,
        job_id: draft.job_id.clone(),
        job_url: draft.job_url.clone(),
        azure_tenant: draft.azure_tenant.clone(),
        azure_subscription: draft.azure_subscription.clone(),
        platform_url: draft.platform_url.clone(),
    }
}

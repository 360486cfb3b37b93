// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle transition log.
//!
//! The log is append-only and is the single source of truth for "what was
//! the last action" on a provision. Recording is idempotent under redundant
//! delivery: a transition equal to the most recent logged state is a no-op.
//! Terminal destroy completion additionally back-computes the environment's
//! lifetime from the most recent `provisioning` entry.

use std::str::FromStr;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::persistence::Persistence;
use crate::state::{LifecycleState, Phase};

/// Executor recorded when the requester is unknown.
pub const DEFAULT_EXECUTOR: &str = "provmirror";

/// Record one transition. Returns whether a log row was appended.
///
/// Steps: read the most recent logged state; no-op when identical; otherwise
/// append, refresh the denormalized `last_state`, and on terminal destroy
/// completion persist `lifetime_interval` as the gap back to the most recent
/// `provisioning` entry.
pub async fn record_transition(
    persistence: &dyn Persistence,
    uuid: Uuid,
    state: LifecycleState,
    executor: Option<&str>,
) -> Result<bool> {
    let last = persistence.last_lifecycle_state(uuid).await?;
    if last.as_deref() == Some(state.as_str()) {
        debug!(%uuid, state = %state, "Transition already logged, skipping");
        return Ok(false);
    }

    let executor = executor.unwrap_or(DEFAULT_EXECUTOR);
    info!(%uuid, state = %state, executor, "Recording lifecycle transition");

    let logged_at = persistence
        .append_lifecycle(uuid, state.as_str(), executor)
        .await?;
    persistence.touch_last_state(uuid, state.as_str()).await?;

    if state.is_terminal() {
        let provisioned = persistence
            .state_logged_at(uuid, LifecycleState::Provisioning.as_str())
            .await?;
        if let Some(started) = provisioned {
            let lifetime = logged_at - started;
            info!(%uuid, lifetime_seconds = lifetime.num_seconds(), "Environment reached end of life");
            persistence.set_lifetime_interval(uuid, lifetime).await?;
        }
    }

    Ok(true)
}

/// Record a transition together with its secondary effects, decided from
/// the previously logged action:
///
/// - a `*-failed` state whose prior logged action was in the provision
///   family forces `provision_result = failure`;
/// - a `started` state directly after `provisioning` first emits the
///   synthetic `provision-completed` entry the deploy job never sends.
pub async fn apply_transition(
    persistence: &dyn Persistence,
    uuid: Uuid,
    current: LifecycleState,
    executor: Option<&str>,
) -> Result<()> {
    let last = persistence
        .last_lifecycle_state(uuid)
        .await?
        .and_then(|raw| LifecycleState::from_str(&raw).ok());

    if last.map(|s| s.phase()) == Some(Some(Phase::Provision)) && current.is_failed() {
        info!(%uuid, state = %current, "Deploy failed, updating provision result");
        record_transition(persistence, uuid, current, executor).await?;
        persistence.set_provision_result(uuid, "failure").await?;
    }

    if last == Some(LifecycleState::Provisioning) && current == LifecycleState::Started {
        record_transition(
            persistence,
            uuid,
            LifecycleState::ProvisionCompleted,
            executor,
        )
        .await?;
    }

    record_transition(persistence, uuid, current, executor).await?;
    Ok(())
}

/// Initial `provision_result` for a freshly observed state.
pub fn initial_provision_result(current: LifecycleState) -> &'static str {
    if current == LifecycleState::Provisioning {
        "installing"
    } else if current.is_failed() && current.phase() == Some(Phase::Provision) {
        "failure"
    } else {
        "success"
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle state vocabulary and event classification.
//!
//! The state vocabulary is closed: raw strings outside it never reach the
//! persistence layer. Classification decides how far an incoming event gets
//! into the pipeline before anything is written.

use std::fmt;
use std::str::FromStr;

/// Action family a state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Initial deploy of the environment.
    Provision,
    /// Start of a stopped environment.
    Start,
    /// Stop of a running environment.
    Stop,
    /// Teardown of the environment.
    Destroy,
}

/// Canonical lifecycle states of a provisioned environment.
///
/// ```text
/// new ──► provision-pending ──► provisioning ──► {provision-failed | started}
/// started ⇄ {start-pending ► starting ► start-failed,
///            stop-pending ► stopping ► stop-failed ► stopped}
/// stopped|started ──► destroying ──► {destroy-failed | destroy-canceled |
///                                     destroy-completed (terminal)}
/// ```
///
/// `provision-completed` never arrives on the wire; it is emitted
/// retroactively when a `started` transition follows `provisioning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Resource created, nothing scheduled yet.
    New,
    /// Deploy requested, not yet running.
    ProvisionPending,
    /// Deploy job running.
    Provisioning,
    /// Deploy action (transitional alias seen on some payloads).
    Provision,
    /// Deploy job failed.
    ProvisionFailed,
    /// Deploy finished (synthetic).
    ProvisionCompleted,
    /// Environment up.
    Started,
    /// Start requested.
    StartPending,
    /// Start job running.
    Starting,
    /// Start job failed.
    StartFailed,
    /// Stop requested.
    StopPending,
    /// Stop job running.
    Stopping,
    /// Stop job failed.
    StopFailed,
    /// Environment down.
    Stopped,
    /// Teardown job running.
    Destroying,
    /// Teardown job failed.
    DestroyFailed,
    /// Teardown canceled.
    DestroyCanceled,
    /// Teardown finished. Terminal.
    DestroyCompleted,
}

impl LifecycleState {
    /// Canonical wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::ProvisionPending => "provision-pending",
            Self::Provisioning => "provisioning",
            Self::Provision => "provision",
            Self::ProvisionFailed => "provision-failed",
            Self::ProvisionCompleted => "provision-completed",
            Self::Started => "started",
            Self::StartPending => "start-pending",
            Self::Starting => "starting",
            Self::StartFailed => "start-failed",
            Self::StopPending => "stop-pending",
            Self::Stopping => "stopping",
            Self::StopFailed => "stop-failed",
            Self::Stopped => "stopped",
            Self::Destroying => "destroying",
            Self::DestroyFailed => "destroy-failed",
            Self::DestroyCanceled => "destroy-canceled",
            Self::DestroyCompleted => "destroy-completed",
        }
    }

    /// The action family this state belongs to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::New => None,
            Self::ProvisionPending
            | Self::Provisioning
            | Self::Provision
            | Self::ProvisionFailed
            | Self::ProvisionCompleted => Some(Phase::Provision),
            Self::Started | Self::StartPending | Self::Starting | Self::StartFailed => {
                Some(Phase::Start)
            }
            Self::StopPending | Self::Stopping | Self::StopFailed | Self::Stopped => {
                Some(Phase::Stop)
            }
            Self::Destroying
            | Self::DestroyFailed
            | Self::DestroyCanceled
            | Self::DestroyCompleted => Some(Phase::Destroy),
        }
    }

    /// Whether this state denotes a failed action.
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            Self::ProvisionFailed | Self::StartFailed | Self::StopFailed | Self::DestroyFailed
        )
    }

    /// Whether this state is terminal for the environment.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DestroyCompleted)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s {
            "new" => Self::New,
            "provision-pending" => Self::ProvisionPending,
            "provisioning" => Self::Provisioning,
            "provision" => Self::Provision,
            "provision-failed" => Self::ProvisionFailed,
            "provision-completed" => Self::ProvisionCompleted,
            "started" => Self::Started,
            "start-pending" => Self::StartPending,
            "starting" => Self::Starting,
            "start-failed" => Self::StartFailed,
            "stop-pending" => Self::StopPending,
            "stopping" => Self::Stopping,
            "stop-failed" => Self::StopFailed,
            "stopped" => Self::Stopped,
            "destroying" => Self::Destroying,
            "destroy-failed" => Self::DestroyFailed,
            "destroy-canceled" => Self::DestroyCanceled,
            "destroy-completed" => Self::DestroyCompleted,
            _ => return Err(()),
        };
        Ok(state)
    }
}

/// How far an incoming event gets into the processing pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No persistence side effects. Covers unknown, absent, `new` and
    /// `provision-pending` states.
    Ignorable {
        /// The recognized state, when the raw value parsed.
        state: Option<LifecycleState>,
    },
    /// Current equals desired: the resource is at rest, nothing to record.
    Settled {
        /// The settled state.
        state: LifecycleState,
    },
    /// Deletion observed while destroying: short-circuit into retirement
    /// plus a forced `destroy-completed` transition.
    TerminalRetire,
    /// Full pipeline: derive, enrich, persist, log.
    Actionable {
        /// The observed current state.
        current: LifecycleState,
        /// The desired state, when recognizable.
        desired: Option<LifecycleState>,
    },
}

/// Classify an incoming event by its raw current/desired states and whether
/// the delivery was a deletion.
pub fn classify(
    deleted: bool,
    current_raw: Option<&str>,
    desired_raw: Option<&str>,
) -> Classification {
    let current = match current_raw.and_then(|s| LifecycleState::from_str(s).ok()) {
        Some(state) => state,
        None => return Classification::Ignorable { state: None },
    };

    if matches!(
        current,
        LifecycleState::New | LifecycleState::ProvisionPending
    ) {
        return Classification::Ignorable {
            state: Some(current),
        };
    }

    if current_raw == desired_raw {
        return Classification::Settled { state: current };
    }

    if deleted && current == LifecycleState::Destroying {
        return Classification::TerminalRetire;
    }

    Classification::Actionable {
        current,
        desired: desired_raw.and_then(|s| LifecycleState::from_str(s).ok()),
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! provmirror-core - Environment Lifecycle Reporting
//!
//! This crate mirrors lifecycle events of provisioned cloud environments
//! (custom resources on an orchestration platform) into a relational
//! reporting store, enriching each record with directory, organizational,
//! and sales metadata.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Orchestration Platform                           │
//! │        (resource watch, per-resource ordering, leader election)     │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                 │ resource-changed notifications
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      provmirror-core                                │
//! │                       (This Crate)                                  │
//! │   classify ─► derive ─► enrich ─► upsert ─► transition log          │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │               │                │                │
//!        ▼               ▼                ▼                ▼
//! ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌─────────────────┐
//! │ Claim read │  │  Job API   │  │ Directory  │  │   PostgreSQL    │
//! │ (platform) │  │  (deploy)  │  │  + CRM     │  │ (reporting db)  │
//! └────────────┘  └────────────┘  └────────────┘  └─────────────────┘
//! ```
//!
//! # Processing one event
//!
//! The only externally observable command is "process one event", idempotent
//! under redelivery:
//!
//! 1. [`event`] extracts normalized variables from the raw resource body,
//!    including the requester fallback chain.
//! 2. [`state`] classifies the event: ignorable, settled, terminal
//!    retirement, or actionable.
//! 3. [`derive`] builds the normalized provision draft from the event plus
//!    the optionally-fetched claim and job records.
//! 4. [`enrich`] resolves the requester against the directory and links
//!    manager and chargeback rows.
//! 5. [`persistence`] upserts every entity through one conflict-safe
//!    insert-or-update contract keyed on named uniqueness constraints.
//! 6. [`lifecycle`] appends the transition to the append-only log,
//!    deduplicating redundant deliveries and computing terminal bookkeeping.
//!
//! # Lifecycle state machine
//!
//! ```text
//! new ──► provision-pending ──► provisioning ──► {provision-failed | started}
//! started ⇄ {start-pending ► starting ► start-failed,
//!            stop-pending ► stopping ► stop-failed ► stopped}
//! stopped|started ──► destroying ──► {destroy-failed | destroy-canceled |
//!                                     destroy-completed (terminal)}
//! ```
//!
//! Any transition into a `*-failed` state whose prior logged action was in
//! the provision family forces `provision_result = failure`. Terminal
//! destroy completion back-computes `lifetime_interval` from the most recent
//! `provisioning` log entry.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `PROVMIRROR_DATABASE_URL` | Yes | - | PostgreSQL connection string |
//! | `PROVMIRROR_HTTP_PORT` | No | `8080` | HTTP ingest port |
//! | `PROVMIRROR_PLATFORM_DOMAIN` | No | deployment default | Platform annotation domain |
//! | `PROVMIRROR_POOL_DOMAIN` | No | deployment default | Pool-manager annotation domain |
//! | `PROVMIRROR_SALES_DOMAIN` | No | deployment default | Sales annotation domain |
//! | `PROVMIRROR_CORP_DOMAIN` | No | `redhat.com` | Corporate mail domain |
//! | `PROVMIRROR_JOB_API_URL` | No | - | Job API base URL (enables job enrichment) |
//! | `PROVMIRROR_JOB_API_USER` | With URL | - | Job API basic-auth user |
//! | `PROVMIRROR_JOB_API_PASSWORD` | With URL | - | Job API basic-auth password |

#![deny(missing_docs)]

/// Server configuration loaded from environment variables.
pub mod config;

/// Derivation of the normalized provision draft with its fallback chains.
pub mod derive;

/// Identity enrichment: directory routing, manager and chargeback linking.
pub mod enrich;

/// Error types for event processing.
pub mod error;

/// Extraction of normalized variables from raw resource bodies.
pub mod event;

/// Event handlers: the "process one event" command.
pub mod handlers;

/// Append-only lifecycle transition log.
pub mod lifecycle;

/// Embedded database migrations.
pub mod migrations;

/// CRM opportunity mirroring.
pub mod opportunity;

/// Persistence trait, PostgreSQL backend, and the upsert contract.
pub mod persistence;

/// External collaborator interfaces and the job API client.
pub mod sources;

/// Lifecycle state vocabulary and event classification.
pub mod state;

/// HTTP ingest server.
#[cfg(feature = "server")]
pub mod server;

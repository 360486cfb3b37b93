// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! CRM opportunity mirroring.
//!
//! Claims may carry a sales opportunity reference. The CRM is queried by
//! opportunity number first, falling back to id lookup, and the resolved
//! record is mirrored into the `opportunities` table. An unresolvable
//! reference is logged and skipped; it never fails the event.

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::Result;
use crate::persistence::{OpportunityRow, Persistence};
use crate::sources::{retry_crm, CrmOpportunity, OpportunitySource};

/// Placeholder values that mean "no opportunity".
const EMPTY_MARKERS: &[&str] = &["", "default", "NULL"];

/// Mirror the opportunity referenced by a claim annotation. Returns the
/// surrogate id when a CRM record was found and stored.
pub async fn mirror_opportunity(
    persistence: &dyn Persistence,
    crm: &dyn OpportunitySource,
    reference: &str,
) -> Result<Option<i64>> {
    if EMPTY_MARKERS.contains(&reference) {
        return Ok(None);
    }

    info!(reference, "Resolving opportunity by number");
    let mut record = retry_crm(|| crm.by_number(reference)).await?;

    if record.is_none() {
        warn!(reference, "Opportunity not found by number, trying by id");
        record = retry_crm(|| crm.by_id(reference)).await?;
    }

    let Some(record) = record else {
        warn!(reference, "Opportunity not found in CRM, skipping");
        return Ok(None);
    };

    let id = persistence.upsert_opportunity(&row_from_crm(&record)).await?;
    info!(reference, id, "Opportunity mirrored");
    Ok(Some(id))
}

/// Build the storage row from a CRM record. Quote characters in the account
/// name are flattened for storage.
fn row_from_crm(record: &CrmOpportunity) -> OpportunityRow {
    OpportunityRow {
        opportunity_id: record.id.clone(),
        number: record.number.clone(),
        opportunity_name: record.name.clone(),
        account_id: record.account_id.clone(),
        account_name: record
            .account_name
            .as_ref()
            .map(|name| name.replace('\'', " ")),
        amount: record.amount,
        expected_revenue: record.expected_revenue,
        closed_at: record
            .close_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()),
        is_closed: record.is_closed,
        stage: record.stage.clone(),
        opportunity_type: record.opportunity_type.clone(),
        owner_id: record.owner_id.clone(),
        owner_name: record.owner_name.clone(),
        owner_email: record.owner_email.clone(),
        owner_title: record.owner_title.clone(),
    }
}

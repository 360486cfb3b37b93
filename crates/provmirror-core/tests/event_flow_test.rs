// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for event processing.

mod common;

use std::sync::Arc;

use common::*;
use serde_json::json;
use uuid::Uuid;

use provmirror_core::handlers::{handle_resource_event, Outcome};
use provmirror_core::persistence::Persistence;
use provmirror_core::sources::{CrmOpportunity, DirectoryManager, DirectoryUser};

#[tokio::test]
async fn test_scenario_first_provisioning_event() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let state = ctx.handler_state();
    let event = watch_event(lab_event("MODIFIED", uuid, "provisioning", "started"));

    let outcome = handle_resource_event(&state, &event).await.unwrap();
    assert_eq!(outcome, Outcome::Processed);

    assert_eq!(ctx.count_provisions(uuid).await, 1);
    assert_eq!(ctx.count_lifecycle(uuid).await, 1);

    let record = ctx.persistence.get_provision(uuid).await.unwrap().unwrap();
    assert_eq!(record.last_state.as_deref(), Some("provisioning"));
    assert_ne!(record.provision_result.as_deref(), Some("failure"));

    ctx.cleanup_provision(uuid).await;
}

#[tokio::test]
async fn test_scenario_provision_failure_after_provisioning() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let state = ctx.handler_state();

    let provisioning = watch_event(lab_event("MODIFIED", uuid, "provisioning", "started"));
    handle_resource_event(&state, &provisioning).await.unwrap();

    let failed = watch_event(lab_event("MODIFIED", uuid, "provision-failed", "started"));
    let outcome = handle_resource_event(&state, &failed).await.unwrap();
    assert_eq!(outcome, Outcome::Processed);

    let record = ctx.persistence.get_provision(uuid).await.unwrap().unwrap();
    assert_eq!(record.provision_result.as_deref(), Some("failure"));

    let log = ctx.persistence.lifecycle_log(uuid).await.unwrap();
    let states: Vec<&str> = log.iter().map(|entry| entry.state.as_str()).collect();
    assert_eq!(states, vec!["provisioning", "provision-failed"]);

    ctx.cleanup_provision(uuid).await;
}

#[tokio::test]
async fn test_scenario_governor_derivation() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let state = ctx.handler_state();
    let event = watch_event(lab_event("MODIFIED", uuid, "provisioning", "started"));
    handle_resource_event(&state, &event).await.unwrap();

    let record = ctx.persistence.get_provision(uuid).await.unwrap().unwrap();
    assert_eq!(record.account.as_deref(), Some("prod"));
    assert_eq!(record.environment.as_deref(), Some("rhel"));
    assert_eq!(record.class_name.as_deref(), Some("RHEL_TRAINING_LAB"));

    let catalog: (String, Option<String>) =
        sqlx::query_as("SELECT catalog_item, class_name FROM catalog_items WHERE id = $1")
            .bind(record.catalog_id.unwrap())
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(catalog.0, "training-lab");
    assert_eq!(catalog.1.as_deref(), Some("RHEL_TRAINING_LAB"));

    ctx.cleanup_provision(uuid).await;
}

#[tokio::test]
async fn test_deletion_during_teardown_retires_once() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let state = ctx.handler_state();

    let provisioning = watch_event(lab_event("MODIFIED", uuid, "provisioning", "started"));
    handle_resource_event(&state, &provisioning).await.unwrap();

    let deleted = watch_event(lab_event("DELETED", uuid, "destroying", "destroy-completed"));
    let outcome = handle_resource_event(&state, &deleted).await.unwrap();
    assert_eq!(outcome, Outcome::Retired);

    let record = ctx.persistence.get_provision(uuid).await.unwrap().unwrap();
    let retired_at = record.retired_at.expect("retirement must be stamped");
    assert!(
        record.lifetime_interval.is_some(),
        "terminal transition computes the lifetime"
    );

    // Redelivery: no second log row, retirement timestamp untouched.
    let outcome = handle_resource_event(&state, &deleted).await.unwrap();
    assert_eq!(outcome, Outcome::Retired);

    let record = ctx.persistence.get_provision(uuid).await.unwrap().unwrap();
    assert_eq!(record.retired_at, Some(retired_at));

    let log = ctx.persistence.lifecycle_log(uuid).await.unwrap();
    let completed = log
        .iter()
        .filter(|entry| entry.state == "destroy-completed")
        .count();
    assert_eq!(completed, 1);

    ctx.cleanup_provision(uuid).await;
}

#[tokio::test]
async fn test_settled_event_writes_nothing() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let state = ctx.handler_state();
    let event = watch_event(lab_event("MODIFIED", uuid, "started", "started"));

    let outcome = handle_resource_event(&state, &event).await.unwrap();
    assert_eq!(outcome, Outcome::Settled);
    assert_eq!(ctx.count_provisions(uuid).await, 0);
    assert_eq!(ctx.count_lifecycle(uuid).await, 0);
}

#[tokio::test]
async fn test_unrecognized_and_pending_states_write_nothing() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let state = ctx.handler_state();

    for raw in ["bogus", "new", "provision-pending"] {
        let event = watch_event(lab_event("MODIFIED", uuid, raw, "started"));
        let outcome = handle_resource_event(&state, &event).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored, "'{}' must be ignored", raw);
    }

    assert_eq!(ctx.count_provisions(uuid).await, 0);
    assert_eq!(ctx.count_lifecycle(uuid).await, 0);
}

#[tokio::test]
async fn test_identity_enrichment_links_manager_and_chargeback() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let suffix = &uuid.to_string()[..8];
    let user_mail = format!("jane.{}@redhat.com", suffix);
    let boss_mail = format!("boss.{}@redhat.com", suffix);

    let roster_id = ctx.add_roster_manager(&boss_mail).await;

    let mut directory = StaticDirectory::default();
    // The requester login resolves through the federated source first.
    directory.federated_uid.insert(
        "jane.doe".to_string(),
        DirectoryUser {
            mail: Some(user_mail.clone()),
            given_name: Some("Jane".to_string()),
            surname: Some("Doe".to_string()),
            uid: Some("jdoe".to_string()),
            ..Default::default()
        },
    );
    // The corporate address then gets the deep internal treatment.
    directory.internal.insert(
        user_mail.clone(),
        DirectoryUser {
            mail: Some(user_mail.clone()),
            given_name: Some("Jane".to_string()),
            surname: Some("Doe".to_string()),
            uid: Some("jdoe".to_string()),
            title: Some("Consultant".to_string()),
            cost_center: Some(441),
            geo: Some("EMEA".to_string()),
            manager: Some(DirectoryManager {
                name: Some("Boss Person".to_string()),
                mail: Some(boss_mail.clone()),
                uid: Some("boss".to_string()),
            }),
        },
    );
    directory
        .manager_chain
        .insert(user_mail.clone(), boss_mail.clone());

    let state = ctx.handler_state().with_directory(Arc::new(directory));
    let event = watch_event(lab_event("MODIFIED", uuid, "provisioning", "started"));
    handle_resource_event(&state, &event).await.unwrap();

    let record = ctx.persistence.get_provision(uuid).await.unwrap().unwrap();
    assert!(record.student_id.is_some());
    assert!(record.manager_id.is_some());
    assert_eq!(record.manager_chargeback_id, Some(roster_id));
    assert_eq!(record.cost_center, Some(441));
    assert_eq!(record.student_geo.as_deref(), Some("EMEA"));

    let student: (String, String, Option<i32>) = sqlx::query_as(
        "SELECT partner, user_category, cost_center FROM students WHERE email = $1",
    )
    .bind(&user_mail)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert_eq!(student.0, "redhat");
    assert_eq!(student.1, "regular");
    assert_eq!(student.2, Some(441));

    let manager: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM manager WHERE email = $1")
        .bind(&boss_mail)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(manager.0, 1);

    ctx.cleanup_provision(uuid).await;
}

#[tokio::test]
async fn test_claim_drives_catalog_and_opportunity() {
    skip_if_no_db!();
    let Some(ctx) = TestContext::new().await else {
        eprintln!("Skipping test: failed to create test context");
        return;
    };

    let uuid = Uuid::new_v4();
    let number = format!("22{}", &uuid.simple().to_string()[..6]);

    let claim = json!({
        "metadata": {
            "name": "my-lab",
            "annotations": {
                "babylon.gpte.redhat.com/catalogDisplayName": "RHEL Training Lab",
                "pfe.redhat.com/salesforce-id": number,
                "pfe.redhat.com/purpose": "Training - RHEL onboarding"
            }
        }
    });

    let mut crm = StaticCrm::default();
    crm.by_number.insert(
        number.clone(),
        CrmOpportunity {
            id: "006A000001".to_string(),
            number: number.clone(),
            name: Some("RHEL expansion".to_string()),
            account_name: Some("Example Corp".to_string()),
            amount: Some(125_000.0),
            close_date: Some("2026-09-30".to_string()),
            is_closed: Some(false),
            stage: Some("Negotiation".to_string()),
            ..Default::default()
        },
    );

    let state = ctx
        .handler_state()
        .with_claims(Arc::new(StaticClaimSource { claim: Some(claim) }))
        .with_opportunities(Arc::new(crm));

    let event = watch_event(lab_event("MODIFIED", uuid, "provisioning", "started"));
    handle_resource_event(&state, &event).await.unwrap();

    let record = ctx.persistence.get_provision(uuid).await.unwrap().unwrap();
    assert_eq!(record.opportunity.as_deref(), Some(number.as_str()));
    assert!(record.opportunity_id.is_some());
    assert_eq!(record.purpose.as_deref(), Some("Training - RHEL onboarding"));

    let opportunity: (String, Option<String>) =
        sqlx::query_as("SELECT number, account_name FROM opportunities WHERE id = $1")
            .bind(record.opportunity_id.unwrap())
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!(opportunity.0, number);
    assert_eq!(opportunity.1.as_deref(), Some("Example Corp"));

    // The audit mirror carries the claim body and the derived draft.
    let mirror: (Option<serde_json::Value>, Option<serde_json::Value>) = sqlx::query_as(
        "SELECT resource_claim_json, provision_vars_json FROM resource_claim_log WHERE provision_uuid = $1",
    )
    .bind(uuid)
    .fetch_one(&ctx.pool)
    .await
    .unwrap();
    assert!(mirror.0.is_some());
    assert!(mirror.1.is_some());

    ctx.cleanup_provision(uuid).await;
}

//! Background workers and the HTTP surface.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use common::*;
use mobcash_reconciliation::api::{router, AppState};
use mobcash_reconciliation::database::models::{TransactionStatus, TransactionType};
use mobcash_reconciliation::health::HealthChecker;
use mobcash_reconciliation::payments::types::{PaymentState, ProviderName};
use mobcash_reconciliation::services::orchestrator::SettlementTrigger;
use mobcash_reconciliation::services::task_queue::FollowUpTask;
use mobcash_reconciliation::workers::follow_up::run_with_retries;
use mobcash_reconciliation::workers::pending_poller::{PendingPoller, PendingPollerConfig};
use mobcash_reconciliation::workers::webhook_retry::WebhookRetryWorker;
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

fn app(h: &Harness) -> Router {
    router(AppState {
        orchestrator: h.orchestrator.clone(),
        intake: h.intake.clone(),
        health: HealthChecker::new(h.store.clone(), vec![ProviderName::Feexpay]),
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// Workers
// ============================================================================

#[tokio::test]
async fn poller_settles_transactions_without_callback() {
    let h = Harness::new();
    let settled = h
        .orchestrator
        .create_deposit(request(TransactionType::Deposit, user(), mtn_bj(), 1000))
        .await
        .unwrap();
    h.orchestrator.send_to_provider(settled.id).await.unwrap();
    // Never sent: no provider id, so the poller leaves it alone.
    h.orchestrator
        .create_deposit(request(TransactionType::Deposit, user(), mtn_bj(), 1000))
        .await
        .unwrap();

    let poller = PendingPoller::new(
        h.store.clone(),
        h.orchestrator.clone(),
        PendingPollerConfig::default(),
    );

    let summary = poller.run_cycle().await.unwrap();
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.settled, 0);

    h.gateway(ProviderName::Feexpay)
        .report_status(PaymentState::Timeout);
    let summary = poller.run_cycle().await.unwrap();
    assert_eq!(summary.settled, 1);

    let current = h.store.find_transaction(settled.id).await.unwrap().unwrap();
    assert_eq!(current.status, TransactionStatus::Timeout);

    let summary = poller.run_cycle().await.unwrap();
    assert_eq!(summary.checked, 0);
}

#[tokio::test]
async fn poller_requeues_follow_ups_lost_after_settlement() {
    let h = Harness::new();
    let tx = h
        .orchestrator
        .create_deposit(request(TransactionType::Deposit, user(), mtn_bj(), 1000))
        .await
        .unwrap();
    h.orchestrator.send_to_provider(tx.id).await.unwrap();
    h.gateway(ProviderName::Feexpay)
        .report_status(PaymentState::Success);
    h.orchestrator
        .settle(tx.id, SettlementTrigger::Poll)
        .await
        .unwrap();

    // The queue loses the settled task.
    assert!(!h.tasks.take().is_empty());
    let stored = h.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Accept);
    assert!(!stored.fond_calculate);

    let patient = PendingPoller::new(
        h.store.clone(),
        h.orchestrator.clone(),
        PendingPollerConfig::default(),
    );
    assert_eq!(patient.run_cycle().await.unwrap().requeued, 0);

    let poller = PendingPoller::new(
        h.store.clone(),
        h.orchestrator.clone(),
        PendingPollerConfig {
            follow_up_grace: Duration::ZERO,
            ..PendingPollerConfig::default()
        },
    );
    let summary = poller.run_cycle().await.unwrap();
    assert_eq!(summary.requeued, 1);

    let ran = h.run_follow_ups().await;
    assert!(matches!(
        ran.as_slice(),
        [FollowUpTask::Settled { transaction_id }] if *transaction_id == tx.id
    ));
    let finished = h.store.find_transaction(tx.id).await.unwrap().unwrap();
    assert!(finished.fond_calculate);
    assert!(finished.success_event_sent);
    let ledger = h.store.find_ledger(PLATFORM).await.unwrap().unwrap();
    assert_eq!(ledger.balance, -1000);

    assert_eq!(poller.run_cycle().await.unwrap().requeued, 0);
}

#[tokio::test]
async fn retry_worker_resolves_recorded_callbacks() {
    let h = Harness::new();
    let tx = h
        .orchestrator
        .create_deposit(request(TransactionType::Deposit, user(), mtn_bj(), 1000))
        .await
        .unwrap();
    let sent = h.orchestrator.send_to_provider(tx.id).await.unwrap();

    let key = h
        .intake
        .record("feexpay", &json!({ "reference": sent.public_id.unwrap() }))
        .await
        .unwrap();

    let worker = WebhookRetryWorker::new(
        h.store.clone(),
        h.intake.clone(),
        Duration::from_secs(60),
        5,
    );
    assert_eq!(worker.run_cycle().await.unwrap(), 0);

    h.gateway(ProviderName::Feexpay)
        .report_status(PaymentState::Success);
    assert_eq!(worker.run_cycle().await.unwrap(), 1);

    let log = h.store.find_webhook_log(&key).await.unwrap().unwrap();
    assert!(log.processed);
    assert_eq!(log.attempts, 1);
    assert_eq!(worker.run_cycle().await.unwrap(), 0);
}

#[tokio::test]
async fn retry_worker_gives_up_after_max_attempts() {
    let h = Harness::new();
    h.intake
        .record("feexpay", &json!({ "reference": "unknown-ref" }))
        .await
        .unwrap();

    let worker = WebhookRetryWorker::new(
        h.store.clone(),
        h.intake.clone(),
        Duration::from_secs(60),
        2,
    );
    for _ in 0..4 {
        worker.run_cycle().await.unwrap();
    }
    let log = h.store.find_webhook_log("unknown-ref").await.unwrap().unwrap();
    assert!(!log.processed);
    assert_eq!(log.attempts, 2);
    assert!(log.error_message.is_some());
}

#[tokio::test]
async fn follow_up_tasks_are_idempotent() {
    let h = Harness::new();
    let task = FollowUpTask::AdminAlert {
        title: "Test".to_string(),
        content: "alerte".to_string(),
    };
    assert!(run_with_retries(&h.orchestrator, &task).await);

    let tx = h
        .orchestrator
        .create_deposit(request(TransactionType::Deposit, user(), mtn_bj(), 1000))
        .await
        .unwrap();
    h.gateway(ProviderName::Feexpay)
        .reply_to_deposits(Reply::Reject("refused".to_string()));
    h.orchestrator.send_to_provider(tx.id).await.unwrap();

    let failed = FollowUpTask::Failed { transaction_id: tx.id };
    assert!(run_with_retries(&h.orchestrator, &failed).await);
    assert!(run_with_retries(&h.orchestrator, &failed).await);
    // One user message and one operator detail, despite the replay.
    assert_eq!(h.notifier.messages.lock().unwrap().len(), 3);
}

// ============================================================================
// HTTP
// ============================================================================

#[tokio::test]
async fn webhook_endpoint_records_and_acknowledges() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(post_json(
            "/webhooks/feexpay",
            r#"{"reference":"fx-123","status":"SUCCESSFUL"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["key"], "fx-123");

    let log = h.store.find_webhook_log("fx-123").await.unwrap();
    assert!(log.is_some());
}

#[tokio::test]
async fn webhook_endpoint_rejects_bad_payloads() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(post_json("/webhooks/feexpay", "not json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&h)
        .oneshot(post_json("/webhooks/feexpay", r#"{"status":"SUCCESSFUL"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn transaction_view_hides_withdrawal_code() {
    let h = Harness::new();
    let tx = h
        .orchestrator
        .create_withdrawal(request(TransactionType::Withdrawal, user(), mtn_bj(), 1000))
        .await
        .unwrap();

    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri(format!("/transactions/{}", tx.reference))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["reference"], tx.reference.as_str());
    assert_eq!(json["status"], "pending");
    assert!(json.get("withdrawal_code").is_none());
    assert_eq!(json["status_history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_transaction_is_404() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/transactions/depot-0")
                .header("x-request-id", "req-9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "TRANSACTION_NOT_FOUND");
}

#[tokio::test]
async fn check_endpoint_settles_on_demand() {
    let h = Harness::new();
    let tx = h
        .orchestrator
        .create_deposit(request(TransactionType::Deposit, user(), mtn_bj(), 1000))
        .await
        .unwrap();
    h.orchestrator.send_to_provider(tx.id).await.unwrap();
    h.gateway(ProviderName::Feexpay)
        .report_status(PaymentState::Success);

    let response = app(&h)
        .oneshot(post_json(
            &format!("/transactions/{}/check", tx.reference),
            "",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "accept");
}

#[tokio::test]
async fn admin_endpoint_overrides_status() {
    let h = Harness::new();
    let tx = h
        .orchestrator
        .create_deposit(request(TransactionType::Deposit, user(), mtn_bj(), 1000))
        .await
        .unwrap();

    let response = app(&h)
        .oneshot(post_json(
            &format!("/admin/transactions/{}/status", tx.reference),
            r#"{"status":"bogus","admin_id":"admin-1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&h)
        .oneshot(post_json(
            &format!("/admin/transactions/{}/status", tx.reference),
            r#"{"status":"timeouf","admin_id":"admin-1"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "timeout");
    assert_eq!(json["fixed_by_admin"], true);
}

#[tokio::test]
async fn health_reports_store_and_gateways() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["checks"]["gateways"]["details"], "feexpay");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let h = Harness::new();
    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/transactions/depot-0")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-42");

    let response = app(&h)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

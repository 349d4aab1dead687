//! Gateway authorization, pending semantics, and decrypt accounting.

use std::sync::Arc;

use redline::artifacts;
use redline::gateway::{ChatRequest, GatewayError, PlanStatus};

use crate::fixtures::{finding, CountingCustodian, Workspace, TOKEN};

fn request(scan_id: &str, token: Option<&str>) -> ChatRequest {
    ChatRequest {
        scan_id: scan_id.to_owned(),
        question: "is this ransomware?".to_owned(),
        request_plan: true,
        token: token.map(str::to_owned),
    }
}

#[tokio::test]
async fn invalid_token_never_decrypts_and_leaks_nothing() {
    let ws = Workspace::new();
    ws.ingest_and_plan(&finding("scan-live", &["CRITICAL"])).await;
    let counter = Arc::new(CountingCustodian::new(ws.custodian.clone()));
    let gateway = ws.gateway_with(counter.clone());

    let existing = gateway
        .chat(request("scan-live", Some("wrong-token")))
        .await
        .expect("chat");
    let missing = gateway
        .chat(request("scan-none", Some("wrong-token")))
        .await
        .expect("chat");
    let anonymous = gateway.chat(request("scan-live", None)).await.expect("chat");

    assert_eq!(existing.plan_status, PlanStatus::Forbidden);
    assert!(existing.plan.is_none());
    assert_eq!(existing, missing);
    assert_eq!(existing, anonymous);
    assert_eq!(counter.unwraps(), 0);
}

#[tokio::test]
async fn token_is_checked_before_scan_id_validation() {
    let ws = Workspace::new();
    let gateway = ws.gateway();
    let response = gateway
        .chat(request("../../etc/passwd", Some("wrong-token")))
        .await
        .expect("chat");
    assert_eq!(response.plan_status, PlanStatus::Forbidden);

    let err = gateway
        .chat(request("../../etc/passwd", Some(TOKEN)))
        .await
        .expect_err("invalid scan id");
    assert!(matches!(err, GatewayError::InvalidScanId));
}

#[tokio::test]
async fn quick_response_needs_no_token_and_no_decrypt() {
    let ws = Workspace::new();
    ws.ingest_and_plan(&finding("scan-q", &["LOW"])).await;
    let counter = Arc::new(CountingCustodian::new(ws.custodian.clone()));
    let gateway = ws.gateway_with(counter.clone());

    let response = gateway
        .chat(ChatRequest {
            scan_id: "scan-q".to_owned(),
            question: "what should I do about this malware?".to_owned(),
            request_plan: false,
            token: None,
        })
        .await
        .expect("chat");
    assert_eq!(response.plan_status, PlanStatus::NotRequested);
    assert!(response.plan.is_none());
    assert!(!response.quick_response.summary.is_empty());
    assert_eq!(counter.unwraps(), 0);
}

#[tokio::test]
async fn authorized_request_before_planning_is_pending() {
    let ws = Workspace::new();
    ws.preprocessor()
        .process_bytes(&ws.seal(&finding("scan-p", &["CRITICAL"])).await)
        .await
        .expect("ingest");

    let response = ws
        .gateway()
        .chat(request("scan-p", Some(TOKEN)))
        .await
        .expect("pending is not an error");
    assert_eq!(response.plan_status, PlanStatus::Pending);
    assert!(response.plan.is_none());
}

#[tokio::test]
async fn authorized_request_returns_plan_with_one_decrypt() {
    let ws = Workspace::new();
    ws.ingest_and_plan(&finding("scan-r", &["CRITICAL"])).await;
    let counter = Arc::new(CountingCustodian::new(ws.custodian.clone()));
    let gateway = ws.gateway_with(counter.clone());

    let response = gateway
        .chat(request("scan-r", Some(TOKEN)))
        .await
        .expect("chat");
    assert_eq!(response.plan_status, PlanStatus::Ready);
    let plan = response.plan.expect("plan");
    assert_eq!(plan.scan_id, "scan-r");
    assert_eq!(plan.steps.len(), 3);
    assert_eq!(counter.unwraps(), 1);

    let leftovers: Vec<_> = std::fs::read_dir(&ws.plans)
        .expect("plans dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(leftovers, vec!["scan-r.plan.enc".to_owned()]);
}

#[tokio::test]
async fn plan_moved_to_another_scan_is_corrupt() {
    let ws = Workspace::new();
    ws.ingest_and_plan(&finding("scan-orig", &["LOW"])).await;
    std::fs::copy(
        artifacts::plan_path(&ws.plans, "scan-orig"),
        artifacts::plan_path(&ws.plans, "scan-other"),
    )
    .expect("copy");

    let err = ws
        .gateway()
        .fetch_plan("scan-other", TOKEN)
        .await
        .expect_err("mismatched plan");
    assert!(matches!(err, GatewayError::CorruptPlan(_)));
}

#[tokio::test]
async fn plan_sealed_for_another_key_fails_decryption() {
    let ws = Workspace::new();
    let other = Workspace::new();
    other.ingest_and_plan(&finding("scan-z", &["LOW"])).await;
    std::fs::copy(
        artifacts::plan_path(&other.plans, "scan-z"),
        artifacts::plan_path(&ws.plans, "scan-z"),
    )
    .expect("copy");

    let err = ws
        .gateway()
        .fetch_plan("scan-z", TOKEN)
        .await
        .expect_err("foreign plan");
    assert!(matches!(err, GatewayError::Decryption(_)));
}

#[tokio::test]
async fn concurrent_requests_are_independent() {
    let ws = Workspace::new();
    ws.ingest_and_plan(&finding("scan-c1", &["LOW"])).await;
    ws.ingest_and_plan(&finding("scan-c2", &["CRITICAL"])).await;
    let gateway = Arc::new(ws.gateway());

    let mut tasks = tokio::task::JoinSet::new();
    for (id, token) in [
        ("scan-c1", TOKEN),
        ("scan-c2", TOKEN),
        ("scan-c2", "nope"),
        ("scan-c3", TOKEN),
    ] {
        let gateway = gateway.clone();
        tasks.spawn(async move {
            let response = gateway.chat(request(id, Some(token))).await.expect("chat");
            (id, token, response.plan_status)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined.expect("task"));
    }
    outcomes.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    assert_eq!(
        outcomes,
        vec![
            ("scan-c1", TOKEN, PlanStatus::Ready),
            ("scan-c2", TOKEN, PlanStatus::Ready),
            ("scan-c2", "nope", PlanStatus::Forbidden),
            ("scan-c3", TOKEN, PlanStatus::Pending),
        ]
    );
}

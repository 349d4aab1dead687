//! End-to-end runs of the `redline` binary against a temp root.

use std::path::Path;
use std::process::Output;

use assert_cmd::Command;
use serde_json::{json, Value};

fn redline(root: &Path, args: &[&str]) -> Output {
    Command::cargo_bin("redline")
        .expect("binary")
        .arg("--root")
        .arg(root)
        .args(args)
        .env_remove("REDLINE_ROOT")
        .env_remove("REDLINE_GATEWAY_TOKEN")
        .env_remove("REDLINE_HASH_KEY")
        .env_remove("REDLINE_RULESET")
        .env("RUST_LOG", "warn")
        .output()
        .expect("run redline")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn init_seal_run_chat() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();

    let init = redline(root, &["init"]);
    assert!(init.status.success(), "init failed: {init:?}");
    assert!(stdout(&init).contains("custodian fingerprint"));

    let finding = root.join("scan-cli.json");
    std::fs::write(
        &finding,
        json!({
            "scanId": "scan-cli",
            "findings": [{"eventId": "1", "severity": "CRITICAL", "ip": "192.168.100.55"}]
        })
        .to_string(),
    )
    .expect("write finding");

    let seal = redline(root, &["seal", finding.to_str().expect("utf8 path")]);
    assert!(seal.status.success(), "seal failed: {seal:?}");
    assert!(root.join("inbox/scan-cli.enc").exists());

    let run = redline(root, &["run"]);
    assert!(run.status.success(), "run failed: {run:?}");
    assert!(stdout(&run).contains("ingest: 1 sanitized"));
    assert!(root.join("plans/scan-cli.plan.enc").exists());

    let sanitized =
        std::fs::read_to_string(root.join("sanitized/scan-cli.json")).expect("sanitized");
    assert!(!sanitized.contains("192.168.100.55"));

    let chat = redline(root, &["chat", "scan-cli", "--request-plan"]);
    assert!(chat.status.success(), "chat failed: {chat:?}");
    let response: Value = serde_json::from_slice(&chat.stdout).expect("json response");
    assert_eq!(response["planStatus"], json!("ready"));
    assert_eq!(response["plan"]["steps"].as_array().map(Vec::len), Some(3));
}

#[test]
fn chat_without_plan_request_is_quick_only() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert!(redline(tmp.path(), &["init"]).status.success());

    let chat = redline(tmp.path(), &["chat", "scan-none", "--question", "phishing?"]);
    assert!(chat.status.success());
    let response: Value = serde_json::from_slice(&chat.stdout).expect("json response");
    assert_eq!(response["planStatus"], json!("not_requested"));
}

#[test]
fn keygen_refuses_to_overwrite_without_force() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert!(redline(tmp.path(), &["init"]).status.success());

    assert!(!redline(tmp.path(), &["keygen"]).status.success());
    assert!(redline(tmp.path(), &["keygen", "--force"]).status.success());
}

#[test]
fn ingest_without_hash_key_fails_before_touching_the_inbox() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    assert!(redline(root, &["init"]).status.success());
    std::fs::write(root.join(".env"), "REDLINE_GATEWAY_TOKEN=abc\n").expect("rewrite env");
    std::fs::write(root.join("inbox/pending.enc"), b"{}").expect("write artifact");

    assert!(!redline(root, &["ingest"]).status.success());
    assert!(root.join("inbox/pending.enc").exists());
    assert!(!root.join("quarantine/pending.enc").exists());
}

#[test]
fn plan_rejects_path_like_scan_ids() {
    let tmp = tempfile::tempdir().expect("tempdir");
    assert!(redline(tmp.path(), &["init"]).status.success());
    assert!(!redline(tmp.path(), &["plan", "../outside"]).status.success());
}

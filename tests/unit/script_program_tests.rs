//! Unit tests for TOML skill programs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use botkeeper::game::ConnectionHandle;
use botkeeper::scripts::program::{ScriptLoader, TomlScript, TomlScriptLoader};
use botkeeper::scripts::FailureKind;
use botkeeper::AppError;

use crate::support::FakeConnection;

const GATHER: &str = r#"
name = "gather"
description = "Collect logs and craft planks"
timeout_seconds = 30

[[steps]]
primitive = "mine_block"
args = { block = "oak_log", count = 4 }

[[steps]]
primitive = "craft_item"
args = { item = "oak_planks" }
"#;

fn load_error(name: &str, source: &str) -> String {
    match TomlScript::parse(name, source) {
        Err(AppError::ScriptLoad(msg)) => msg,
        other => panic!("expected a load error, got {other:?}"),
    }
}

#[test]
fn parses_a_valid_program() {
    let script = TomlScript::parse("gather", GATHER).expect("valid program");
    assert_eq!(script.description(), Some("Collect logs and craft planks"));
    assert_eq!(script.steps().len(), 2);
    assert_eq!(script.steps()[0].primitive, "mine_block");
    assert_eq!(script.steps()[0].args, json!({"block": "oak_log", "count": 4}));
}

#[test]
fn step_args_default_to_empty_object() {
    let script = TomlScript::parse("idle", "name = \"idle\"\n[[steps]]\nprimitive = \"look_around\"\n")
        .expect("valid program");
    assert_eq!(script.steps()[0].args, json!({}));
}

#[test]
fn loader_exposes_name_and_timeout() {
    let script = TomlScriptLoader.load("gather", GATHER).expect("load");
    assert_eq!(script.name(), "gather");
    assert_eq!(script.timeout(), Some(Duration::from_secs(30)));
}

#[test]
fn rejects_malformed_toml() {
    assert!(load_error("gather", "name = ").contains("malformed program"));
}

#[test]
fn rejects_name_mismatch() {
    assert!(load_error("other", GATHER).contains("declares 'gather'"));
}

#[test]
fn rejects_empty_program() {
    assert!(load_error("empty", "name = \"empty\"\n").contains("no steps"));
}

#[test]
fn rejects_invalid_primitive_name() {
    let source = "name = \"bad\"\n[[steps]]\nprimitive = \"../rm\"\n";
    assert!(load_error("bad", source).contains("invalid primitive"));
}

#[test]
fn rejects_zero_timeout() {
    let source = "name = \"z\"\ntimeout_seconds = 0\n[[steps]]\nprimitive = \"noop\"\n";
    assert!(load_error("z", source).contains("timeout_seconds"));
}

#[tokio::test]
async fn runs_steps_in_order_and_collects_output() {
    let fake = FakeConnection::standalone("conn-p");
    fake.set_outcome("mine_block", true, &["mined 4 oak_log"]);
    let connection: ConnectionHandle = Arc::clone(&fake) as ConnectionHandle;

    let script = TomlScriptLoader.load("gather", GATHER).expect("load");
    let outcome = script.execute(&connection).await.expect("execute");

    assert!(outcome.success);
    assert_eq!(outcome.output, vec!["mined 4 oak_log", "craft_item done"]);
    assert_eq!(fake.calls(), vec!["primitive:mine_block", "primitive:craft_item"]);
}

#[tokio::test]
async fn first_failing_step_ends_the_run() {
    let fake = FakeConnection::standalone("conn-p");
    fake.set_outcome("mine_block", false, &["no oak_log nearby"]);
    let connection: ConnectionHandle = Arc::clone(&fake) as ConnectionHandle;

    let script = TomlScriptLoader.load("gather", GATHER).expect("load");
    let outcome = script.execute(&connection).await.expect("execute");

    assert!(!outcome.success);
    assert_eq!(outcome.failure, Some(FailureKind::Execution));
    assert_eq!(
        outcome.output,
        vec!["no oak_log nearby", "step 1 (mine_block) failed"]
    );
    assert_eq!(fake.calls(), vec!["primitive:mine_block"]);
}

#[tokio::test]
async fn faulting_step_reports_partial_output() {
    let fake = FakeConnection::standalone("conn-p");
    let connection: ConnectionHandle = Arc::clone(&fake) as ConnectionHandle;
    fake.break_connection();

    let script = TomlScriptLoader.load("gather", GATHER).expect("load");
    let outcome = script.execute(&connection).await.expect("execute");

    assert!(!outcome.success);
    assert_eq!(outcome.output.len(), 1);
    assert!(outcome.output[0].starts_with("step 1 (mine_block) faulted"));
}

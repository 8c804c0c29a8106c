//! Integration tests for the HTTP API.
//!
//! Each test serves the real router on an ephemeral loopback port with the
//! in-memory connector and viewer, and a temporary script library.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use botkeeper::game::ConnectionEvent;
use botkeeper::http;
use botkeeper::scripts::program::TomlScriptLoader;
use botkeeper::scripts::store::FsScriptStore;
use botkeeper::state::AppState;
use botkeeper::GlobalConfig;

use crate::support::{FakeConnector, FakeViewers};

const GATHER: &str = r#"
name = "gather"

[[steps]]
primitive = "mine_block"
args = { block = "oak_log" }

[[steps]]
primitive = "craft_item"
args = { item = "oak_planks" }
"#;

struct Server {
    base: String,
    client: reqwest::Client,
    state: Arc<AppState>,
    connector: Arc<FakeConnector>,
    ct: CancellationToken,
    _library: TempDir,
}

impl Server {
    async fn start() -> Self {
        let library = tempfile::tempdir().expect("temp dir");
        let mut config = GlobalConfig::default();
        config.scripts.root = library.path().join("library");
        config.stuck.enabled = false;
        config.viewer.port_min = 40_000;
        config.viewer.port_max = 40_100;

        let store = Arc::new(FsScriptStore::new(&config.scripts.root).expect("open library"));
        let connector = FakeConnector::new();
        let state = Arc::new(AppState::new(
            config,
            connector.clone(),
            FakeViewers::new(),
            store,
            Arc::new(TomlScriptLoader),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind api");
        let addr = listener.local_addr().expect("api addr");
        let ct = CancellationToken::new();
        tokio::spawn(http::serve_on(listener, Arc::clone(&state), ct.clone()));

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("client");

        Self {
            base: format!("http://{addr}"),
            client,
            state,
            connector,
            ct,
            _library: library,
        }
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .expect("request");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = self.client.post(format!("{}{path}", self.base));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.expect("request");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }

    async fn tool(&self, id: &str, name: &str, args: Value) -> (StatusCode, Value) {
        self.post(
            &format!("/tool-call/{id}"),
            Some(json!({ "toolName": name, "toolArgs": args })),
        )
        .await
    }

    async fn start_session(&self) -> String {
        let (status, body) = self.post("/start", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["data"]["id"].as_str().expect("session id").to_owned()
    }

    async fn wait_spawned(&self, id: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let (_, body) = self.get(&format!("/status/{id}")).await;
                if body["data"]["lifecycle"]["spawned"] == true {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("session spawned");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

#[tokio::test]
async fn health_returns_ok() {
    let server = Server::start().await;
    let response = server
        .client
        .get(format!("{}/health", server.base))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.expect("body"), "ok");
}

#[tokio::test]
async fn start_registers_a_session() {
    let server = Server::start().await;
    let (status, body) = server.post("/start", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "started");
    assert!(body["data"]["username"]
        .as_str()
        .expect("username")
        .starts_with("Agent"));
    let port = body["data"]["viewer_port"].as_u64().expect("viewer port");
    assert!((40_000..40_100).contains(&port));

    let id = body["data"]["id"].as_str().expect("id");
    assert!(server.state.sessions.get(id).is_some());

    let (status, body) = server.get(&format!("/status/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["lifecycle"]["connection_id"], "conn-1");
    assert_eq!(body["data"]["lifecycle"]["spawned"], false);
    assert_eq!(body["data"]["entity"], Value::Null);
}

#[tokio::test]
async fn failed_start_is_reported() {
    let server = Server::start().await;
    server.connector.refuse(true);

    let (status, body) = server.post("/start", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"]
        .as_str()
        .expect("error")
        .contains("initial connection"));
    assert!(server.state.sessions.is_empty());
}

#[tokio::test]
async fn skill_lifecycle_through_tool_calls() {
    let server = Server::start().await;
    let id = server.start_session().await;

    let (status, body) = server
        .tool(&id, "call_skill", json!({ "name": "gather" }))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "agent is not connected to the server");

    let (status, body) = server
        .tool(&id, "create_skill", json!({ "name": "gather", "code": GATHER }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"], "Skill gather created successfully");

    let (_, body) = server
        .tool(&id, "get_skills_or_primitives", json!({ "type": "skill" }))
        .await;
    assert_eq!(body["data"], json!(["gather"]));

    let (_, body) = server
        .tool(&id, "get_skill_or_primitive_code", json!({ "name": "gather" }))
        .await;
    assert_eq!(body["data"], GATHER);

    server.connector.emit(1, ConnectionEvent::Spawn).await;
    server.wait_spawned(&id).await;

    let (status, body) = server
        .tool(&id, "call_skill", json!({ "name": "gather" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["success"], true);
    assert_eq!(
        body["data"]["output"],
        json!(["mine_block done", "craft_item done"])
    );

    let (_, body) = server.get(&format!("/status/{id}")).await;
    assert_eq!(body["data"]["cached_scripts"], json!(["gather"]));

    server
        .connector
        .connection(1)
        .set_outcome("craft_item", false, &["no crafting table"]);
    let (status, body) = server
        .tool(&id, "call_skill", json!({ "name": "gather" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], Value::Null);
    assert_eq!(body["data"]["failure"], "execution");
    assert_eq!(
        body["data"]["output"],
        json!(["mine_block done", "no crafting table", "step 2 (craft_item) failed"])
    );
}

#[tokio::test]
async fn recreating_a_skill_replaces_the_cached_module() {
    let server = Server::start().await;
    let id = server.start_session().await;
    server.connector.emit(1, ConnectionEvent::Spawn).await;
    server.wait_spawned(&id).await;

    let v1 = "name = \"dig\"\n[[steps]]\nprimitive = \"dig_down\"\n";
    let v2 = "name = \"dig\"\n[[steps]]\nprimitive = \"dig_sideways\"\n";

    server
        .tool(&id, "create_skill", json!({ "name": "dig", "code": v1 }))
        .await;
    let (_, body) = server.tool(&id, "call_skill", json!({ "name": "dig" })).await;
    assert_eq!(body["data"]["output"], json!(["dig_down done"]));

    server
        .tool(&id, "create_skill", json!({ "name": "dig", "code": v2 }))
        .await;
    let (_, body) = server.tool(&id, "call_skill", json!({ "name": "dig" })).await;
    assert_eq!(body["data"]["output"], json!(["dig_sideways done"]));
}

#[tokio::test]
async fn missing_and_invalid_skills() {
    let server = Server::start().await;
    let id = server.start_session().await;
    server.connector.emit(1, ConnectionEvent::Spawn).await;
    server.wait_spawned(&id).await;

    let (status, _) = server.tool(&id, "call_skill", json!({ "name": "ghost" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server
        .tool(&id, "create_skill", json!({ "name": "../evil", "code": "x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    server
        .tool(&id, "create_skill", json!({ "name": "broken", "code": "name = \"broken\"" }))
        .await;
    let (status, body) = server.tool(&id, "call_skill", json!({ "name": "broken" })).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["data"]["failure"], "load");
}

#[tokio::test]
async fn malformed_tool_calls_are_rejected() {
    let server = Server::start().await;
    let id = server.start_session().await;

    let (status, body) = server.tool(&id, "fly", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown tool: fly");

    let response = server
        .client
        .post(format!("{}/tool-call/{id}", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["error"], "invalid request body");
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let server = Server::start().await;

    let (status, body) = server.get("/status/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "session not found");

    let (status, _) = server.tool("nope", "call_skill", json!({ "name": "x" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.post("/stop/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = server.get("/viewer/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn viewer_route_redirects_to_the_assigned_port() {
    let server = Server::start().await;
    let (_, body) = server.post("/start", None).await;
    let id = body["data"]["id"].as_str().expect("id");
    let port = body["data"]["viewer_port"].as_u64().expect("port");

    let response = server
        .client
        .get(format!("{}/viewer/{id}", server.base))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()["location"],
        format!("http://localhost:{port}").as_str()
    );
}

#[tokio::test]
async fn stop_removes_the_session_and_its_cache() {
    let server = Server::start().await;
    let id = server.start_session().await;
    server.connector.emit(1, ConnectionEvent::Spawn).await;
    server.wait_spawned(&id).await;
    server
        .tool(&id, "create_skill", json!({ "name": "gather", "code": GATHER }))
        .await;
    server.tool(&id, "call_skill", json!({ "name": "gather" })).await;
    assert_eq!(server.state.scripts.cached_scripts(&id), vec!["gather"]);

    let (status, body) = server.post(&format!("/stop/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "stopped");
    assert!(server.state.scripts.cached_scripts(&id).is_empty());
    assert_eq!(
        server.connector.connection(1).calls().last().map(String::as_str),
        Some("quit")
    );

    let (status, _) = server.get(&format!("/status/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = server.post(&format!("/stop/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stop_all_drains_every_session() {
    let server = Server::start().await;
    server.start_session().await;
    server.start_session().await;
    assert_eq!(server.state.sessions.len(), 2);

    server.state.stop_all().await;
    assert!(server.state.sessions.is_empty());
    assert_eq!(server.connector.connection(1).calls().last().map(String::as_str), Some("quit"));
    assert_eq!(server.connector.connection(2).calls().last().map(String::as_str), Some("quit"));
}

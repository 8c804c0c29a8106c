//! Route handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::game::EntityState;
use crate::models::session::SessionSummary;
use crate::orchestrator::registry::ManagedSession;
use crate::scripts::{ScriptKind, ScriptOutcome};
use crate::state::AppState;
use crate::AppError;

/// Response envelope shared by every JSON route.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload.
    pub data: Option<T>,
    /// Error message when `success` is false.
    pub error: Option<String>,
}

fn respond<T: Serialize>(status: StatusCode, envelope: Envelope<T>) -> Response {
    (status, Json(envelope)).into_response()
}

fn ok<T: Serialize>(data: T) -> Response {
    respond(
        StatusCode::OK,
        Envelope {
            success: true,
            data: Some(data),
            error: None,
        },
    )
}

fn fail(status: StatusCode, message: impl Into<String>) -> Response {
    respond::<Value>(
        status,
        Envelope {
            success: false,
            data: None,
            error: Some(message.into()),
        },
    )
}

fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn from_error(err: &AppError) -> Response {
    fail(status_for(err), err.to_string())
}

fn lookup(state: &AppState, id: &str) -> Result<Arc<ManagedSession>, Response> {
    state.sessions.get(id).ok_or_else(|| {
        warn!(session_id = id, "session not found");
        fail(StatusCode::NOT_FOUND, "session not found")
    })
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct Started {
    id: String,
    status: &'static str,
    viewer_port: Option<u16>,
    username: String,
}

/// `POST /start`
pub async fn start(State(state): State<Arc<AppState>>) -> Response {
    match state.start_session().await {
        Ok(session) => ok(Started {
            id: session.id.clone(),
            status: "started",
            viewer_port: session.viewer_port,
            username: session.username.clone(),
        }),
        Err(err) => {
            warn!(%err, "failed to start session");
            from_error(&err)
        }
    }
}

/// `POST /stop/{id}`
pub async fn stop(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.stop_session(&id).await {
        Ok(()) => ok(json!({ "id": id, "status": "stopped" })),
        Err(err) => from_error(&err),
    }
}

#[derive(Debug, Serialize)]
struct StatusView {
    #[serde(flatten)]
    session: SessionSummary,
    entity: Option<EntityState>,
    cached_scripts: Vec<String>,
}

/// `GET /status/{id}`
pub async fn status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let session = match lookup(&state, &id) {
        Ok(session) => session,
        Err(response) => return response,
    };
    ok(StatusView {
        session: session.summary(),
        entity: session.handle.active_handle().entity_state(),
        cached_scripts: state.scripts.cached_scripts(&id),
    })
}

/// `GET /viewer/{id}`: redirect to the session's viewer.
pub async fn viewer(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let session = match lookup(&state, &id) {
        Ok(session) => session,
        Err(response) => return response,
    };
    match session.viewer_port {
        Some(port) => Redirect::temporary(&format!("http://localhost:{port}")).into_response(),
        None => fail(StatusCode::NOT_FOUND, "viewer port not found"),
    }
}

/// Body of `POST /tool-call/{id}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Tool to run.
    pub tool_name: String,
    /// Tool arguments.
    #[serde(default)]
    pub tool_args: ToolArgs,
}

/// Arguments accepted by the tools.
#[derive(Debug, Default, Deserialize)]
pub struct ToolArgs {
    /// Script identifier.
    #[serde(default)]
    pub name: Option<String>,
    /// Skill source for `create_skill`.
    #[serde(default)]
    pub code: Option<String>,
    /// `skill` or `primitive`.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl ToolArgs {
    fn name(&self) -> Result<&str, AppError> {
        self.name
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("toolArgs.name is required".into()))
    }

    fn kind(&self) -> Result<ScriptKind, AppError> {
        match self.kind.as_deref() {
            Some(kind) => kind.parse(),
            None => Ok(ScriptKind::Skill),
        }
    }
}

/// `POST /tool-call/{id}`
pub async fn tool_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<ToolCall>, JsonRejection>,
) -> Response {
    let session = match lookup(&state, &id) {
        Ok(session) => session,
        Err(response) => return response,
    };
    let Json(call) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(session_id = %id, %rejection, "invalid tool-call body");
            return fail(StatusCode::BAD_REQUEST, "invalid request body");
        }
    };

    let started = Instant::now();
    let response = match call.tool_name.as_str() {
        "create_skill" => create_skill(&state, &id, &call.tool_args).await,
        "get_skills_or_primitives" => list_scripts(&state, &id, &call.tool_args).await,
        "get_skill_or_primitive_code" => show_script(&state, &id, &call.tool_args).await,
        "call_skill" => call_skill(&state, &session, &call.tool_args).await,
        other => {
            warn!(session_id = %id, tool = other, "unknown tool");
            return fail(StatusCode::BAD_REQUEST, format!("unknown tool: {other}"));
        }
    };
    info!(
        session_id = %id,
        tool = %call.tool_name,
        status = response.status().as_u16(),
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "tool call completed"
    );
    response
}

async fn create_skill(state: &AppState, id: &str, args: &ToolArgs) -> Response {
    let result = async {
        let name = crate::scripts::validate_script_name(args.name()?)?;
        let code = args
            .code
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("toolArgs.code is required".into()))?;
        state.store.write(id, &name, ScriptKind::Skill, code).await?;
        state.scripts.evict_script(id, &name);
        Ok::<_, AppError>(name)
    }
    .await;

    match result {
        Ok(name) => ok(format!("Skill {name} created successfully")),
        Err(err) => from_error(&err),
    }
}

async fn list_scripts(state: &AppState, id: &str, args: &ToolArgs) -> Response {
    let result = async {
        let kind = args.kind()?;
        state.store.list(id, kind).await
    }
    .await;
    match result {
        Ok(names) => ok(names),
        Err(err) => from_error(&err),
    }
}

async fn show_script(state: &AppState, id: &str, args: &ToolArgs) -> Response {
    let result = async {
        let kind = args.kind()?;
        state.store.read(id, args.name()?, kind).await
    }
    .await;
    match result {
        Ok(source) => ok(source),
        Err(err) => from_error(&err),
    }
}

async fn call_skill(state: &AppState, session: &ManagedSession, args: &ToolArgs) -> Response {
    let name = match args.name() {
        Ok(name) => name,
        Err(err) => return from_error(&err),
    };
    if !session.handle.status().spawned {
        return fail(
            StatusCode::SERVICE_UNAVAILABLE,
            "agent is not connected to the server",
        );
    }

    let connection = session.handle.active_handle();
    match state.scripts.invoke(&session.id, name, connection).await {
        Ok(outcome) if outcome.success => ok(outcome),
        Ok(outcome) => respond::<ScriptOutcome>(
            StatusCode::INTERNAL_SERVER_ERROR,
            Envelope {
                success: false,
                data: Some(outcome),
                error: None,
            },
        ),
        Err(err) => from_error(&err),
    }
}

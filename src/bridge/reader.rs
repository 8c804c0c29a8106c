//! Bridge reader task.
//!
//! Reads newline-delimited JSON from the bridge socket and routes each
//! message: responses resolve pending requests, `state` updates refresh the
//! cached entity state, and lifecycle methods are forwarded as
//! [`ConnectionEvent`]s.
//!
//! | Method   | Effect                                      |
//! |----------|---------------------------------------------|
//! | `spawn`  | [`ConnectionEvent::Spawn`]                  |
//! | `kicked` | [`ConnectionEvent::Kicked`]                 |
//! | `end`    | [`ConnectionEvent::End`]                    |
//! | `error`  | [`ConnectionEvent::Error`]                  |
//! | `state`  | cached [`EntityState`] replaced             |
//! | other    | skipped, logged at `DEBUG`                  |

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::codec::BridgeCodec;
use super::BridgeShared;
use crate::game::{ConnectionEvent, EntityState};
use crate::{AppError, Result};

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to an earlier request.
    Response {
        /// Correlation id of the request.
        id: String,
        /// Result payload or the bridge's error message.
        outcome: std::result::Result<Value, String>,
    },
    /// Lifecycle event.
    Lifecycle(ConnectionEvent),
    /// Position and ground-contact update.
    State(EntityState),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse one NDJSON line from the bridge.
///
/// Returns `Ok(None)` for blank lines and unknown methods.
///
/// # Errors
///
/// Returns [`AppError::Bridge`] for invalid JSON, messages with neither a
/// method nor an id, and `state` updates missing required fields.
pub fn parse_inbound_line(connection_id: &str, line: &str) -> Result<Option<Inbound>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| AppError::Bridge(format!("malformed json: {e}")))?;

    match (envelope.method.as_deref(), envelope.id) {
        (Some(method), _) => parse_event(connection_id, method, envelope.params),
        (None, Some(id)) => {
            let outcome = match envelope.error {
                Some(message) => Err(message),
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            };
            Ok(Some(Inbound::Response { id, outcome }))
        }
        (None, None) => Err(AppError::Bridge(
            "message has neither method nor id".into(),
        )),
    }
}

fn parse_event(connection_id: &str, method: &str, params: Value) -> Result<Option<Inbound>> {
    let event = match method {
        "spawn" => ConnectionEvent::Spawn,
        "kicked" => ConnectionEvent::Kicked(text_param(&params, "reason", "no reason given")),
        "end" => ConnectionEvent::End(text_param(&params, "reason", "connection ended")),
        "error" => ConnectionEvent::Error(text_param(&params, "message", "unknown error")),
        "state" => {
            let state: EntityState = serde_json::from_value(params)
                .map_err(|e| AppError::Bridge(format!("invalid state update: {e}")))?;
            return Ok(Some(Inbound::State(state)));
        }
        other => {
            debug!(method = other, connection_id, "skipping unknown bridge method");
            return Ok(None);
        }
    };
    Ok(Some(Inbound::Lifecycle(event)))
}

/// Kick reasons arrive either as plain text or as structured chat JSON.
fn text_param(params: &Value, key: &str, fallback: &str) -> String {
    match params.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => fallback.to_owned(),
        Some(other) => other.to_string(),
    }
}

/// Reader task: decode lines from `source` until EOF, failure or
/// cancellation.
///
/// When the stream ends on its own, all pending requests are failed and a
/// final [`ConnectionEvent::End`] is emitted. Lifecycle events are dropped
/// silently once the receiving side has been detached; responses keep being
/// resolved so teardown requests still complete.
pub async fn run_reader<R>(
    connection_id: String,
    source: R,
    shared: Arc<BridgeShared>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(source, BridgeCodec::new());

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(connection_id, "bridge reader cancelled");
                shared.fail_pending("connection closed").await;
                return;
            }

            frame = frames.next() => match frame {
                None => break "bridge stream closed".to_owned(),
                Some(Err(AppError::Io(err))) => break format!("bridge stream failed: {err}"),
                Some(Err(err)) => {
                    warn!(connection_id, %err, "skipping undecodable bridge line");
                }
                Some(Ok(line)) => match parse_inbound_line(&connection_id, &line) {
                    Ok(Some(inbound)) => dispatch(&connection_id, inbound, &shared, &event_tx).await,
                    Ok(None) => {}
                    Err(err) => warn!(connection_id, %err, "skipping malformed bridge message"),
                },
            },
        }
    };

    debug!(connection_id, reason, "bridge reader finished");
    shared.fail_pending(&reason).await;
    if event_tx.send(ConnectionEvent::End(reason)).await.is_err() {
        debug!(connection_id, "end event dropped; listeners already detached");
    }
}

async fn dispatch(
    connection_id: &str,
    inbound: Inbound,
    shared: &BridgeShared,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) {
    match inbound {
        Inbound::Response { id, outcome } => shared.resolve(&id, outcome).await,
        Inbound::State(state) => shared.set_state(state),
        Inbound::Lifecycle(event) => {
            let kind = event.kind();
            if event_tx.send(event).await.is_err() {
                debug!(connection_id, kind, "event dropped; listeners already detached");
            }
        }
    }
}

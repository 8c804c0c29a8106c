//! Client bridge: the shipped [`Connector`] implementation.
//!
//! The game protocol is spoken by an external client bridge process. This
//! module connects to it over TCP and exchanges newline-delimited JSON:
//!
//! - requests: `{"id": "<uuid>", "method": "...", "params": {...}}`
//! - responses: `{"id": "<uuid>", "result": ...}` or `{"id": "<uuid>", "error": "..."}`
//! - events: `{"method": "spawn" | "kicked" | "end" | "error" | "state", "params": {...}}`
//!
//! One TCP stream carries exactly one game connection. Reconnecting opens a
//! new stream.

pub mod codec;
pub mod reader;
pub mod writer;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::game::{
    ConnectOptions, Connected, Connector, EntityState, GameConnection, Plugin, PrimitiveOutcome,
};
use crate::{AppError, Result};

type Responder = oneshot::Sender<std::result::Result<Value, String>>;

/// State shared between a [`BridgeConnection`] and its reader task.
#[derive(Debug, Default)]
pub struct BridgeShared {
    pending: Mutex<HashMap<String, Responder>>,
    state: RwLock<Option<EntityState>>,
}

impl BridgeShared {
    /// Register a pending request and return the receiver for its reply.
    pub async fn register(&self, id: String) -> oneshot::Receiver<std::result::Result<Value, String>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        rx
    }

    /// Drop a pending request without resolving it.
    pub async fn forget(&self, id: &str) {
        self.pending.lock().await.remove(id);
    }

    /// Deliver a reply to the matching pending request.
    pub async fn resolve(&self, id: &str, outcome: std::result::Result<Value, String>) {
        let responder = self.pending.lock().await.remove(id);
        match responder {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(id, "response for unknown or expired request"),
        }
    }

    /// Fail every pending request with `reason`.
    pub async fn fail_pending(&self, reason: &str) {
        let drained: Vec<Responder> = self.pending.lock().await.drain().map(|(_, tx)| tx).collect();
        for tx in drained {
            let _ = tx.send(Err(reason.to_owned()));
        }
    }

    /// Replace the cached entity state.
    pub fn set_state(&self, state: EntityState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }

    /// Last cached entity state.
    #[must_use]
    pub fn state(&self) -> Option<EntityState> {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Opens connections through a client bridge listening on a TCP address.
#[derive(Debug, Clone)]
pub struct BridgeConnector {
    addr: String,
    request_timeout: Duration,
}

impl BridgeConnector {
    /// Create a connector for the bridge at `addr`.
    #[must_use]
    pub fn new(addr: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            request_timeout,
        }
    }

    async fn open(&self, options: &ConnectOptions) -> Result<Connected> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|err| {
            AppError::Connection(format!("failed to reach bridge at {}: {err}", self.addr))
        })?;
        let (read_half, write_half) = stream.into_split();

        let connection_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        let shared = Arc::new(BridgeShared::default());
        let (msg_tx, msg_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(32);

        let span = info_span!("bridge", connection_id = %connection_id, username = %options.username);

        tokio::spawn(
            {
                let connection_id = connection_id.clone();
                let cancel = cancel.clone();
                async move {
                    if let Err(err) = writer::run_writer(connection_id, write_half, msg_rx, cancel).await {
                        warn!(%err, "bridge writer exited with error");
                    }
                }
            }
            .instrument(span.clone()),
        );

        tokio::spawn(
            reader::run_reader(
                connection_id.clone(),
                read_half,
                Arc::clone(&shared),
                event_tx,
                cancel.clone(),
            )
            .instrument(span),
        );

        let connection = BridgeConnection {
            connection_id,
            outbound: msg_tx,
            shared,
            cancel,
            request_timeout: self.request_timeout,
        };

        let params = serde_json::to_value(options)
            .map_err(|err| AppError::Bridge(format!("failed to encode connect options: {err}")))?;
        if let Err(err) = connection.request("connect", params, Some(self.request_timeout)).await {
            connection.cancel.cancel();
            return Err(AppError::Connection(format!("bridge refused connect: {err}")));
        }

        info!(
            connection_id = %connection.connection_id,
            host = %options.host,
            port = options.port,
            "bridge connection opened"
        );

        Ok(Connected {
            handle: Arc::new(connection),
            events: event_rx,
        })
    }
}

impl Connector for BridgeConnector {
    fn connect<'a>(&'a self, options: &'a ConnectOptions) -> BoxFuture<'a, Result<Connected>> {
        self.open(options).boxed()
    }
}

/// One game connection carried over a bridge stream.
#[derive(Debug)]
pub struct BridgeConnection {
    connection_id: String,
    outbound: mpsc::Sender<Value>,
    shared: Arc<BridgeShared>,
    cancel: CancellationToken,
    request_timeout: Duration,
}

impl BridgeConnection {
    /// Send one request and wait for its reply.
    ///
    /// `timeout` of `None` waits until the bridge answers or the stream
    /// closes.
    async fn request(&self, method: &str, params: Value, timeout: Option<Duration>) -> Result<Value> {
        let id = Uuid::new_v4().to_string();
        let reply = self.shared.register(id.clone()).await;

        let message = json!({ "id": id, "method": method, "params": params });
        if self.outbound.send(message).await.is_err() {
            self.shared.forget(&id).await;
            return Err(AppError::Connection(format!(
                "connection {} is closed",
                self.connection_id
            )));
        }

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(received) => received,
                Err(_) => {
                    self.shared.forget(&id).await;
                    return Err(AppError::Bridge(format!("{method} timed out after {limit:?}")));
                }
            },
            None => reply.await,
        };

        match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(AppError::Bridge(format!("{method} failed: {message}"))),
            Err(_) => Err(AppError::Connection(format!(
                "connection closed during {method}"
            ))),
        }
    }

    async fn command(&self, method: &str, params: Value) -> Result<()> {
        self.request(method, params, Some(self.request_timeout))
            .await
            .map(drop)
    }
}

impl GameConnection for BridgeConnection {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn entity_state(&self) -> Option<EntityState> {
        self.shared.state()
    }

    fn load_plugin(&self, plugin: Plugin) -> BoxFuture<'_, Result<()>> {
        async move {
            self.command("plugin/load", json!({ "name": plugin.as_str() }))
                .await
                .map_err(|err| AppError::Subsystem(format!("failed to load {plugin}: {err}")))
        }
        .boxed()
    }

    fn clear_goal(&self) -> BoxFuture<'_, Result<()>> {
        self.command("pathfinder/clear_goal", Value::Null).boxed()
    }

    fn stop_combat(&self) -> BoxFuture<'_, Result<()>> {
        self.command("pvp/stop", Value::Null).boxed()
    }

    fn stop_collecting(&self) -> BoxFuture<'_, Result<()>> {
        self.command("collect/cancel", Value::Null).boxed()
    }

    fn run_primitive<'a>(
        &'a self,
        name: &'a str,
        args: &'a Value,
    ) -> BoxFuture<'a, Result<PrimitiveOutcome>> {
        async move {
            // Long-running actions are bounded by the calling script's timeout.
            let value = self
                .request("primitive/run", json!({ "name": name, "args": args }), None)
                .await?;
            serde_json::from_value(value).map_err(|err| {
                AppError::Bridge(format!("invalid outcome from primitive {name}: {err}"))
            })
        }
        .boxed()
    }

    fn quit(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let result = self.command("quit", Value::Null).await;
            self.cancel.cancel();
            result
        }
        .boxed()
    }
}

impl Drop for BridgeConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

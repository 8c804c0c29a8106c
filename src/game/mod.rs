//! Narrow interface over the external game client library.
//!
//! Everything the supervisor and the script cache need from a live agent
//! connection goes through [`GameConnection`] and [`Connector`]. The game
//! protocol itself lives behind these traits; the shipped implementation
//! talks to a client bridge (see [`crate::bridge`]) and tests substitute
//! in-memory fakes.

pub mod viewer;

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;

/// Live, replaceable reference to an agent's active connection.
pub type ConnectionHandle = Arc<dyn GameConnection>;

/// Plugins attached to every fresh connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Plugin {
    /// Movement and path planning.
    Pathfinder,
    /// Block collection.
    CollectBlock,
    /// Melee combat.
    Pvp,
    /// Ranged combat.
    Hawkeye,
}

impl Plugin {
    /// Wire name understood by the client bridge.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pathfinder => "pathfinder",
            Self::CollectBlock => "collect_block",
            Self::Pvp => "pvp",
            Self::Hawkeye => "hawkeye",
        }
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// World coordinates of the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Position {
    /// East/west axis.
    pub x: f64,
    /// Vertical axis.
    pub y: f64,
    /// North/south axis.
    pub z: f64,
}

impl Position {
    /// Construct a position.
    #[must_use]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Absolute vertical distance to `other`.
    #[must_use]
    pub fn vertical_distance(&self, other: &Self) -> f64 {
        (self.y - other.y).abs()
    }

    /// Distance to `other` in the horizontal plane.
    #[must_use]
    pub fn horizontal_distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.z - other.z)
    }
}

/// Position and ground contact as last reported by the connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EntityState {
    /// Current position.
    pub position: Position,
    /// Whether the agent stands on a solid block.
    pub on_ground: bool,
}

/// Lifecycle events emitted by a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The agent entered the world.
    Spawn,
    /// The server kicked the agent.
    Kicked(String),
    /// The connection ended.
    End(String),
    /// The client library reported an error.
    Error(String),
}

impl ConnectionEvent {
    /// Whether the event means the connection is gone.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Spawn)
    }

    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Kicked(_) => "kicked",
            Self::End(_) => "end",
            Self::Error(_) => "error",
        }
    }
}

/// Result of one primitive action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrimitiveOutcome {
    /// Whether the action achieved its goal.
    pub success: bool,
    /// Human-readable progress lines.
    #[serde(default)]
    pub output: Vec<String>,
}

/// Options used for every connection of a session, including reconnects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectOptions {
    /// In-game username.
    pub username: String,
    /// Game server host.
    pub host: String,
    /// Game server port.
    pub port: u16,
    /// Protocol version, or `None` to auto-detect.
    pub version: Option<String>,
}

/// A freshly opened connection together with its event stream.
pub struct Connected {
    /// The connection handle.
    pub handle: ConnectionHandle,
    /// Lifecycle events for this connection only.
    pub events: mpsc::Receiver<ConnectionEvent>,
}

/// Operations the core needs from a live agent connection.
pub trait GameConnection: Send + Sync {
    /// Identifier unique to this connection instance.
    fn connection_id(&self) -> &str;

    /// Last known position and ground contact; `None` before spawn.
    fn entity_state(&self) -> Option<EntityState>;

    /// Attach a plugin to this connection.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Subsystem`](crate::AppError::Subsystem) when the
    /// plugin cannot be attached.
    fn load_plugin(&self, plugin: Plugin) -> BoxFuture<'_, Result<()>>;

    /// Drop the current movement goal.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be delivered.
    fn clear_goal(&self) -> BoxFuture<'_, Result<()>>;

    /// Stop any active combat.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be delivered.
    fn stop_combat(&self) -> BoxFuture<'_, Result<()>>;

    /// Stop any active block collection.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be delivered.
    fn stop_collecting(&self) -> BoxFuture<'_, Result<()>>;

    /// Run one primitive action and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is gone or the bridge rejects
    /// the request.
    fn run_primitive<'a>(
        &'a self,
        name: &'a str,
        args: &'a serde_json::Value,
    ) -> BoxFuture<'a, Result<PrimitiveOutcome>>;

    /// Gracefully leave the game.
    ///
    /// # Errors
    ///
    /// Returns an error when the quit request fails.
    fn quit(&self) -> BoxFuture<'_, Result<()>>;
}

/// Factory for fresh connections.
pub trait Connector: Send + Sync {
    /// Open a new connection with the given options.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Connection`](crate::AppError::Connection) when
    /// the connection cannot be established.
    fn connect<'a>(&'a self, options: &'a ConnectOptions) -> BoxFuture<'a, Result<Connected>>;
}

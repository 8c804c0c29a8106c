//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Agent connection could not be established or was lost.
    Connection(String),
    /// A dependent subsystem (viewer, plugin) failed; never fatal to a session.
    Subsystem(String),
    /// Game-client bridge returned malformed or unexpected traffic.
    Bridge(String),
    /// Script source could not be turned into an executable module.
    ScriptLoad(String),
    /// Script failed while running against a connection.
    ScriptExecution(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller supplied an unusable argument.
    InvalidInput(String),
    /// HTTP surface failure (bind, serve).
    Http(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::Subsystem(msg) => write!(f, "subsystem: {msg}"),
            Self::Bridge(msg) => write!(f, "bridge: {msg}"),
            Self::ScriptLoad(msg) => write!(f, "script load: {msg}"),
            Self::ScriptExecution(msg) => write!(f, "script execution: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

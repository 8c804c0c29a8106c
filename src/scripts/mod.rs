//! Per-agent script library: storage, loading and the residency cache.
//!
//! Skills are authored at runtime, persisted through a [`store::ScriptStore`],
//! turned into executable [`program::Script`]s by a [`program::ScriptLoader`]
//! and kept warm by the [`cache::ScriptCache`].

pub mod cache;
pub mod program;
pub mod store;
pub mod watcher;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// File extension of script sources.
pub const SCRIPT_EXTENSION: &str = "toml";

/// Which half of the library a script belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    /// Agent-authored composite behaviour.
    Skill,
    /// Shared leaf action provided by the client bridge.
    Primitive,
}

impl ScriptKind {
    /// Lowercase label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Primitive => "primitive",
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skill" | "skills" => Ok(Self::Skill),
            "primitive" | "primitives" => Ok(Self::Primitive),
            other => Err(AppError::InvalidInput(format!(
                "unknown script kind '{other}' (expected 'skill' or 'primitive')"
            ))),
        }
    }
}

/// Why an invocation did not succeed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The script could not be loaded.
    Load,
    /// The script ran and failed, faulted or timed out.
    Execution,
}

/// Structured result of one script invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptOutcome {
    /// Whether the script reported success.
    pub success: bool,
    /// Output lines in the order they were produced.
    pub output: Vec<String>,
    /// Set when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ScriptOutcome {
    /// Outcome reported by a script that ran to completion.
    #[must_use]
    pub fn completed(success: bool, output: Vec<String>) -> Self {
        Self {
            success,
            output,
            failure: (!success).then_some(FailureKind::Execution),
        }
    }

    /// Outcome for a script that could not be loaded.
    #[must_use]
    pub fn load_failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: vec![message.into()],
            failure: Some(FailureKind::Load),
        }
    }

    /// Outcome for a script whose execution faulted.
    #[must_use]
    pub fn execution_failed(mut output: Vec<String>, message: impl Into<String>) -> Self {
        output.push(message.into());
        Self {
            success: false,
            output,
            failure: Some(FailureKind::Execution),
        }
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::expect_used)] // Literal pattern, checked by tests.
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("script name pattern is valid")
    })
}

/// Normalise a script identifier: strip an optional `.toml` suffix and
/// require an identifier-shaped name.
///
/// # Errors
///
/// Returns [`AppError::InvalidInput`] for empty names or names containing
/// anything other than ASCII letters, digits and underscores.
pub fn validate_script_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    let stem = trimmed
        .strip_suffix(".toml")
        .unwrap_or(trimmed);
    if name_pattern().is_match(stem) {
        Ok(stem.to_owned())
    } else {
        Err(AppError::InvalidInput(format!("invalid script name '{name}'")))
    }
}

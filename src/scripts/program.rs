//! Executable scripts and the loader that builds them from source.
//!
//! A skill source is a small TOML program:
//!
//! ```toml
//! name = "gather_wood"
//! description = "Collect a few logs"
//! timeout_seconds = 120
//!
//! [[steps]]
//! primitive = "mine_block"
//! args = { block = "oak_log", count = 4 }
//! ```
//!
//! `name` must equal the identifier the script is invoked by. Steps run in
//! order through [`GameConnection::run_primitive`]; the first step that
//! reports failure ends the run.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{validate_script_name, ScriptOutcome};
use crate::game::{ConnectionHandle, GameConnection};
use crate::{AppError, Result};

/// A loaded, executable script.
pub trait Script: Send + Sync {
    /// Identifier the script was loaded under.
    fn name(&self) -> &str;

    /// Bound on a whole run, if the script declares one.
    fn timeout(&self) -> Option<Duration>;

    /// Run the script against `connection`.
    ///
    /// A script that runs and fails reports `Ok` with `success: false`.
    ///
    /// # Errors
    ///
    /// Returns an error when execution faults outside the script's control.
    fn execute<'a>(&'a self, connection: &'a ConnectionHandle) -> BoxFuture<'a, Result<ScriptOutcome>>;
}

/// Turns script source into an executable [`Script`].
pub trait ScriptLoader: Send + Sync {
    /// Build the script named `name` from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ScriptLoad`] for malformed source or when the
    /// source does not define `name`.
    fn load(&self, name: &str, source: &str) -> Result<Arc<dyn Script>>;
}

/// One step of a skill program.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Step {
    /// Primitive to run.
    pub primitive: String,
    /// Arguments passed to the primitive.
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Deserialize)]
struct ProgramSource {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
    #[serde(default)]
    steps: Vec<Step>,
}

/// Skill built from a TOML program.
#[derive(Debug, Clone, PartialEq)]
pub struct TomlScript {
    name: String,
    description: Option<String>,
    timeout: Option<Duration>,
    steps: Vec<Step>,
}

impl TomlScript {
    /// Parse and validate a program.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ScriptLoad`] when the TOML is malformed, the
    /// declared name differs from `name`, there are no steps, a primitive
    /// name is invalid or the timeout is zero.
    pub fn parse(name: &str, source: &str) -> Result<Self> {
        let program: ProgramSource = toml::from_str(source)
            .map_err(|err| AppError::ScriptLoad(format!("{name}: malformed program: {err}")))?;

        if program.name != name {
            return Err(AppError::ScriptLoad(format!(
                "{name}: program declares '{}' instead of '{name}'",
                program.name
            )));
        }
        if program.steps.is_empty() {
            return Err(AppError::ScriptLoad(format!("{name}: program has no steps")));
        }
        for (index, step) in program.steps.iter().enumerate() {
            validate_script_name(&step.primitive).map_err(|_| {
                AppError::ScriptLoad(format!(
                    "{name}: step {} names invalid primitive '{}'",
                    index + 1,
                    step.primitive
                ))
            })?;
        }
        let timeout = match program.timeout_seconds {
            Some(0) => {
                return Err(AppError::ScriptLoad(format!(
                    "{name}: timeout_seconds must be positive"
                )))
            }
            Some(secs) => Some(Duration::from_secs(secs)),
            None => None,
        };

        Ok(Self {
            name: program.name,
            description: program.description,
            timeout,
            steps: program.steps,
        })
    }

    /// Optional human description.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Program steps in execution order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    async fn run(&self, connection: &dyn GameConnection) -> ScriptOutcome {
        let mut output = Vec::new();
        for (index, step) in self.steps.iter().enumerate() {
            let outcome = match connection.run_primitive(&step.primitive, &step.args).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    return ScriptOutcome::execution_failed(
                        output,
                        format!("step {} ({}) faulted: {err}", index + 1, step.primitive),
                    );
                }
            };
            output.extend(outcome.output);
            if !outcome.success {
                output.push(format!("step {} ({}) failed", index + 1, step.primitive));
                return ScriptOutcome::completed(false, output);
            }
        }
        ScriptOutcome::completed(true, output)
    }
}

impl Script for TomlScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn execute<'a>(&'a self, connection: &'a ConnectionHandle) -> BoxFuture<'a, Result<ScriptOutcome>> {
        async move { Ok(self.run(connection.as_ref()).await) }.boxed()
    }
}

/// Loader for [`TomlScript`] programs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlScriptLoader;

impl ScriptLoader for TomlScriptLoader {
    fn load(&self, name: &str, source: &str) -> Result<Arc<dyn Script>> {
        Ok(Arc::new(TomlScript::parse(name, source)?))
    }
}

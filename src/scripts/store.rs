//! Script storage collaborator.
//!
//! Layout under the library root:
//!
//! ```text
//! <root>/agents/<agent_id>/skills/<name>.toml   per-agent authored skills
//! <root>/primitives/<name>.toml                 shared primitive catalog
//! ```
//!
//! Primitives describe actions provided by the client bridge. They are
//! readable through the store but never written by it.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, info};

use super::{validate_script_name, ScriptKind, SCRIPT_EXTENSION};
use crate::{AppError, Result};

const AGENTS_DIR: &str = "agents";
const SKILLS_DIR: &str = "skills";
const PRIMITIVES_DIR: &str = "primitives";

/// Read/write access to script sources.
pub trait ScriptStore: Send + Sync {
    /// Read the source of one script.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] when no such script exists and
    /// [`AppError::InvalidInput`] for malformed identifiers.
    fn read<'a>(
        &'a self,
        agent_id: &'a str,
        name: &'a str,
        kind: ScriptKind,
    ) -> BoxFuture<'a, Result<String>>;

    /// Create or overwrite a script.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] for malformed identifiers or
    /// read-only kinds, [`AppError::Io`] when the write fails.
    fn write<'a>(
        &'a self,
        agent_id: &'a str,
        name: &'a str,
        kind: ScriptKind,
        source: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Names of every script of `kind` visible to the agent, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] for malformed agent ids.
    fn list<'a>(&'a self, agent_id: &'a str, kind: ScriptKind) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Create the agent's storage area.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if directories cannot be created.
    fn prepare_agent<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Filesystem-backed [`ScriptStore`].
#[derive(Debug, Clone)]
pub struct FsScriptStore {
    root: PathBuf,
}

impl FsScriptStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the root or primitive directory cannot be
    /// created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(PRIMITIVES_DIR)).map_err(|err| {
            AppError::Io(format!(
                "failed to create script library at {}: {err}",
                root.display()
            ))
        })?;
        Ok(Self { root })
    }

    /// Library root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the agent's skills.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] for malformed agent ids.
    pub fn skills_dir(&self, agent_id: &str) -> Result<PathBuf> {
        validate_agent_id(agent_id)?;
        Ok(self.root.join(AGENTS_DIR).join(agent_id).join(SKILLS_DIR))
    }

    /// Directory holding the shared primitive catalog.
    #[must_use]
    pub fn primitives_dir(&self) -> PathBuf {
        self.root.join(PRIMITIVES_DIR)
    }

    fn dir_for(&self, agent_id: &str, kind: ScriptKind) -> Result<PathBuf> {
        match kind {
            ScriptKind::Skill => self.skills_dir(agent_id),
            ScriptKind::Primitive => {
                validate_agent_id(agent_id)?;
                Ok(self.primitives_dir())
            }
        }
    }

    /// Path of one script file after validating both identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidInput`] for malformed identifiers.
    pub fn script_path(&self, agent_id: &str, name: &str, kind: ScriptKind) -> Result<PathBuf> {
        let name = validate_script_name(name)?;
        Ok(self
            .dir_for(agent_id, kind)?
            .join(format!("{name}.{SCRIPT_EXTENSION}")))
    }

    async fn read_source(&self, agent_id: &str, name: &str, kind: ScriptKind) -> Result<String> {
        let path = self.script_path(agent_id, name, kind)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(source) => Ok(source),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(AppError::NotFound(format!(
                "{kind} '{}' not found",
                validate_script_name(name)?
            ))),
            Err(err) => Err(AppError::Io(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    async fn write_source(
        &self,
        agent_id: &str,
        name: &str,
        kind: ScriptKind,
        source: &str,
    ) -> Result<()> {
        if kind == ScriptKind::Primitive {
            return Err(AppError::InvalidInput(
                "primitives are read-only".into(),
            ));
        }
        let path = self.script_path(agent_id, name, kind)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| AppError::Io(format!("failed to create {}: {err}", parent.display())))?;
        }
        tokio::fs::write(&path, source)
            .await
            .map_err(|err| AppError::Io(format!("failed to write {}: {err}", path.display())))?;
        debug!(agent_id, path = %path.display(), "script written");
        Ok(())
    }

    fn list_sources(&self, agent_id: &str, kind: ScriptKind) -> Result<Vec<String>> {
        let dir = self.dir_for(agent_id, kind)?;
        let dir_str = dir.to_str().ok_or_else(|| {
            AppError::InvalidInput(format!("non-utf8 library path {}", dir.display()))
        })?;
        let pattern = format!("{}/*.{SCRIPT_EXTENSION}", glob::Pattern::escape(dir_str));

        let entries = glob::glob(&pattern)
            .map_err(|err| AppError::Io(format!("invalid listing pattern: {err}")))?;

        let mut names: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(str::to_owned)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    async fn prepare(&self, agent_id: &str) -> Result<()> {
        let skills = self.skills_dir(agent_id)?;
        tokio::fs::create_dir_all(&skills)
            .await
            .map_err(|err| AppError::Io(format!("failed to create {}: {err}", skills.display())))?;
        info!(agent_id, dir = %skills.display(), "agent skill directory ready");
        Ok(())
    }
}

impl ScriptStore for FsScriptStore {
    fn read<'a>(
        &'a self,
        agent_id: &'a str,
        name: &'a str,
        kind: ScriptKind,
    ) -> BoxFuture<'a, Result<String>> {
        self.read_source(agent_id, name, kind).boxed()
    }

    fn write<'a>(
        &'a self,
        agent_id: &'a str,
        name: &'a str,
        kind: ScriptKind,
        source: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        self.write_source(agent_id, name, kind, source).boxed()
    }

    fn list<'a>(&'a self, agent_id: &'a str, kind: ScriptKind) -> BoxFuture<'a, Result<Vec<String>>> {
        async move { self.list_sources(agent_id, kind) }.boxed()
    }

    fn prepare_agent<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<()>> {
        self.prepare(agent_id).boxed()
    }
}

/// Agent ids become directory names; allow only ASCII letters, digits,
/// `-` and `_`.
///
/// # Errors
///
/// Returns [`AppError::InvalidInput`] otherwise.
pub fn validate_agent_id(agent_id: &str) -> Result<()> {
    let valid = !agent_id.is_empty()
        && agent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("invalid agent id '{agent_id}'")))
    }
}

/// Map a path inside the library to the `(agent_id, skill)` it stores.
///
/// Returns `None` for anything that is not a skill source file.
#[must_use]
pub fn skill_identity(root: &Path, path: &Path) -> Option<(String, String)> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    let [AGENTS_DIR, agent_id, SKILLS_DIR, file] = parts.as_slice() else {
        return None;
    };
    let stem = file.strip_suffix(&format!(".{SCRIPT_EXTENSION}"))?;
    let name = validate_script_name(stem).ok()?;
    validate_agent_id(agent_id).ok()?;
    Some(((*agent_id).to_owned(), name))
}

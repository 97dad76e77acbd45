//! External scrape sessions: identifiers, parameter handoff, spawning and result files.
//!
//! A session is one run of a browser script over a chunk of targets. The script is
//! told where to write its JSON result; that file is the only evidence the session
//! ran and is removed once reconciled.
use std::{
    collections::BTreeMap,
    fmt,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use metrics::counter;
use rand::{Rng as _, distributions::Alphanumeric};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::{config::LauncherConfig, error::Error, metrics::SESSIONS_LAUNCHED};

/// Length of a session identifier.
pub const SESSION_ID_LEN: usize = 30;

/// A random session identifier, e.g. `aZ3k...` (30 characters of `[A-Za-z0-9]`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(
            rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SESSION_ID_LEN)
                .map(char::from)
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The directory one domain's sessions write their results into.
#[derive(Debug, Clone)]
pub struct ResultDir {
    path: PathBuf,
}

impl ResultDir {
    /// `<root>/<domain>/`, created if missing.
    pub async fn create(root: &Path, domain: &str) -> Result<Self> {
        let path = root.join(domain);
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("failed to create result directory {}", path.display()))?;
        Ok(Self { path })
    }

    /// Where `session` writes its result.
    pub fn path(&self, session: &SessionId) -> PathBuf {
        self.path.join(format!("{session}.json"))
    }

    /// Read and parse a session's result. A missing file is an error.
    pub async fn read<T: DeserializeOwned>(&self, session: &SessionId) -> crate::error::Result<T> {
        self.read_optional(session)
            .await?
            .ok_or_else(|| Error::ResultMissing {
                session: session.to_string(),
                path: self.path(session),
            })
    }

    /// Read and parse a session's result, if the session wrote one.
    pub async fn read_optional<T: DeserializeOwned>(
        &self,
        session: &SessionId,
    ) -> crate::error::Result<Option<T>> {
        let raw = match tokio::fs::read(self.path(session)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::ResultUnreadable {
                    session: session.to_string(),
                    source,
                });
            }
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| Error::ResultMalformed {
                session: session.to_string(),
                source,
            })
    }

    /// Remove a session's result. Already-removed results are fine.
    pub async fn cleanup(&self, session: &SessionId) -> Result<()> {
        match tokio::fs::remove_file(self.path(session)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to remove result of session {session}"))
            }
        }
    }
}

/// Everything a spawned session needs, handed over explicitly.
#[derive(Clone)]
pub struct SessionRequest {
    /// Script name, e.g. `comment_stats`.
    pub script: &'static str,
    pub session: SessionId,
    /// Where the session must write its JSON result.
    pub result_path: PathBuf,
    /// Named string parameters, exposed to the child as environment variables.
    pub params: BTreeMap<String, String>,
}

impl fmt::Debug for SessionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Parameters carry credentials.
        f.debug_struct("SessionRequest")
            .field("script", &self.script)
            .field("session", &self.session)
            .field("result_path", &self.result_path)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Runs a scrape session to completion.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    /// Start the session and wait for it to exit. The result file, not the exit
    /// status, tells whether it produced anything.
    async fn launch(&self, request: SessionRequest) -> Result<()>;
}

/// Launches sessions as child processes.
pub struct ProcessLauncher {
    config: LauncherConfig,
}

impl ProcessLauncher {
    pub const fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    fn args(&self, script: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{script}", script))
            .collect()
    }
}

#[async_trait]
impl SessionLauncher for ProcessLauncher {
    async fn launch(&self, request: SessionRequest) -> Result<()> {
        let args = self.args(request.script);
        info!(
            session = %request.session,
            program = %self.config.program,
            ?args,
            "launching session"
        );

        let mut command = tokio::process::Command::new(&self.config.program);
        _ = command
            .args(&args)
            .envs(&request.params)
            .env("SESSION_RESULT_PATH", &request.result_path)
            .stdin(Stdio::null())
            .kill_on_drop(false);
        if let Some(workdir) = &self.config.workdir {
            _ = command.current_dir(workdir);
        }

        counter!(SESSIONS_LAUNCHED, "script" => request.script).increment(1);
        let status = command
            .status()
            .await
            .with_context(|| format!("failed to spawn {}", self.config.program))?;

        if status.success() {
            debug!(session = %request.session, "session exited");
        } else {
            warn!(session = %request.session, %status, "session exited unsuccessfully");
        }
        Ok(())
    }
}

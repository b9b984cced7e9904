//! Process-wide session registry: id → session with lifecycle control.
//!
//! Input-producing tools create a session on first use of an unknown id;
//! view-only tools against an unknown id fail with `no-such-session`. A
//! terminated id stays reserved: it never respawns, and once evicted the
//! registry hands out a sentinel that still knows where the transcript
//! lives on disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PilotyError, Result};
use crate::semantic::{SessionStatus, StateSampler};
use crate::session::{Session, ToolResponse};

/// What remains of a session after eviction: enough to answer tools with
/// `terminated` and point at the on-disk history.
#[derive(Debug, Clone)]
pub struct TerminatedSentinel {
    pub id: String,
    pub transcript_dir: PathBuf,
    pub last_screen: String,
}

impl TerminatedSentinel {
    pub fn response(&self) -> ToolResponse {
        ToolResponse {
            status: SessionStatus::Terminated,
            output: String::new(),
            screen: self.last_screen.clone(),
            state_reason: "session terminated".to_string(),
        }
    }
}

/// Result of a registry lookup.
pub enum SessionHandle {
    Live(Arc<Session>),
    Terminated(TerminatedSentinel),
}

enum Entry {
    Live(Arc<Session>),
    Evicted(TerminatedSentinel),
}

/// One row of `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub id: String,
    pub terminated: bool,
    pub evicted: bool,
    pub tag: Option<String>,
    pub transcript_dir: String,
}

pub struct Registry {
    config: Config,
    sampler: Option<Arc<dyn StateSampler>>,
    sessions: RwLock<HashMap<String, Entry>>,
}

impl Registry {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            sampler: None,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_sampler(config: Config, sampler: Arc<dyn StateSampler>) -> Self {
        Self {
            config,
            sampler: Some(sampler),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve `id` for an input-producing tool, creating the session on
    /// first use. A reserved (terminated) id yields the sentinel instead of
    /// a fresh shell.
    pub async fn session_for_input(
        &self,
        id: &str,
        cwd: Option<PathBuf>,
    ) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(Entry::Live(session)) => Ok(SessionHandle::Live(Arc::clone(session))),
            Some(Entry::Evicted(sentinel)) => Ok(SessionHandle::Terminated(sentinel.clone())),
            None => {
                let session = Session::spawn(id, cwd, self.config.clone(), self.sampler.clone())?;
                sessions.insert(id.to_string(), Entry::Live(Arc::clone(&session)));
                info!(session = id, "session registered");
                Ok(SessionHandle::Live(session))
            }
        }
    }

    /// Resolve `id` for a view-only tool. Unknown ids are an error.
    pub async fn lookup(&self, id: &str) -> Result<SessionHandle> {
        let sessions = self.sessions.read().await;
        match sessions.get(id) {
            Some(Entry::Live(session)) => Ok(SessionHandle::Live(Arc::clone(session))),
            Some(Entry::Evicted(sentinel)) => Ok(SessionHandle::Terminated(sentinel.clone())),
            None => Err(PilotyError::NoSuchSession(id.to_string())),
        }
    }

    pub async fn list(&self) -> Vec<RegistrySummary> {
        let sessions = self.sessions.read().await;
        let mut rows: Vec<RegistrySummary> = sessions
            .iter()
            .map(|(id, entry)| match entry {
                Entry::Live(session) => {
                    let meta = session.get_metadata();
                    RegistrySummary {
                        id: id.clone(),
                        terminated: meta.terminated,
                        evicted: false,
                        tag: meta.tag,
                        transcript_dir: meta.transcript_dir,
                    }
                }
                Entry::Evicted(sentinel) => RegistrySummary {
                    id: id.clone(),
                    terminated: true,
                    evicted: true,
                    tag: None,
                    transcript_dir: sentinel.transcript_dir.display().to_string(),
                },
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Terminate a session. The entry stays registered so the id remains
    /// reserved and the last screen stays readable until eviction.
    pub async fn terminate(&self, id: &str) -> Result<ToolResponse> {
        let handle = self.lookup(id).await?;
        match handle {
            SessionHandle::Live(session) => Ok(session.terminate().await),
            SessionHandle::Terminated(sentinel) => Ok(sentinel.response()),
        }
    }

    /// Free a session's runtime resources. The transcript stays on disk and
    /// the id keeps answering with `terminated`.
    pub async fn evict(&self, id: &str) -> Result<()> {
        let session = {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(Entry::Live(session)) => Arc::clone(session),
                Some(Entry::Evicted(_)) => return Ok(()),
                None => return Err(PilotyError::NoSuchSession(id.to_string())),
            }
        };
        session.terminate().await;
        let sentinel = TerminatedSentinel {
            id: id.to_string(),
            transcript_dir: session.transcript_dir(),
            last_screen: session.last_screen(),
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(id.to_string(), Entry::Evicted(sentinel));
        info!(session = id, "session evicted");
        Ok(())
    }

    /// Terminate every live session; used on server shutdown.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<Session>> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter_map(|entry| match entry {
                    Entry::Live(session) => Some(Arc::clone(session)),
                    Entry::Evicted(_) => None,
                })
                .collect()
        };
        for session in live {
            let resp = session.terminate().await;
            if resp.status != SessionStatus::Terminated {
                warn!(session = session.id(), "session did not report terminated");
            }
        }
        info!("all sessions shut down");
    }
}

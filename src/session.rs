//! Scoped session orchestration.
//!
//! [`ScopedSession::run_scoped`] drives one agent lifecycle around a nested
//! unit of work:
//!
//! 1. resolve every credential reference (all failures collected);
//! 2. start a dedicated agent;
//! 3. load the resolved keys;
//! 4. run the nested task with the agent's environment;
//! 5. tear the agent down: on success, on nested failure, and (via the
//!    handle's drop guard) when the session future is cancelled mid-task.
//!
//! The nested task is opaque: the session neither inspects nor constrains
//! it, and its error is propagated unchanged after teardown.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentEnv, AgentProcess};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::loader::KeyLoader;
use crate::resolve;
use crate::store::{CredentialStore, SecurityContext};

/// Runs nested tasks under a scoped, key-loaded SSH agent.
///
/// One `run_scoped` call owns exactly one agent; concurrent calls on the
/// same session each get their own.  Callers that pin an explicit socket
/// path must not run concurrent sessions over it; that is a configuration
/// error this crate does not arbitrate.
pub struct ScopedSession {
    store: Arc<dyn CredentialStore>,
    context: SecurityContext,
    agent: AgentProcess,
    loader: KeyLoader,
}

impl ScopedSession {
    /// Build a session, discovering `ssh-agent` and `ssh-add` on `PATH`.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        context: SecurityContext,
    ) -> Result<Self, SessionError> {
        Ok(Self::with_tooling(
            store,
            context,
            AgentProcess::discover()?,
            KeyLoader::discover()?,
        ))
    }

    /// Build a session around explicit tooling (custom binaries, timeouts).
    pub fn with_tooling(
        store: Arc<dyn CredentialStore>,
        context: SecurityContext,
        agent: AgentProcess,
        loader: KeyLoader,
    ) -> Self {
        Self {
            store,
            context,
            agent,
            loader,
        }
    }

    /// Run `task` under a fresh agent loaded with `config`'s credentials.
    ///
    /// The task receives the agent's [`AgentEnv`] and runs to completion
    /// before the agent is stopped; its result (or error, unchanged) is the
    /// session's result.  Whatever happens, the agent is gone by the time
    /// this returns.
    pub async fn run_scoped<T, F, Fut>(
        &self,
        config: SessionConfig,
        task: F,
    ) -> Result<T, SessionError>
    where
        F: FnOnce(AgentEnv) -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let session_id = Uuid::new_v4();
        debug!(
            session = %session_id,
            credentials = config.credentials().len(),
            principal = %self.context.principal_name(),
            "session starting"
        );

        let resolutions =
            resolve::resolve_all(self.store.as_ref(), &self.context, config.credentials()).await;
        let (materials, missing) = resolve::partition(resolutions);
        if !missing.is_empty() {
            if !config.ignore_missing() {
                return Err(SessionError::MissingCredentials(missing));
            }
            for failure in &missing {
                warn!(
                    session = %session_id,
                    credential = %failure.id,
                    error = %failure.error,
                    "skipping unresolved credential"
                );
            }
        }

        let mut handle = self.agent.start(config.socket_path()).await?;

        // The handle must be stopped on every path below; its drop guard
        // only covers cancellation.
        let env = handle.env();
        let (loaded, load_failures) = self.loader.load_all(&env, materials).await;
        if !load_failures.is_empty() && !config.ignore_missing() {
            let teardown = handle.stop().await.err();
            return Err(SessionError::KeyLoad {
                failures: load_failures,
                teardown,
            });
        }
        info!(
            session = %session_id,
            keys = loaded.len(),
            skipped = load_failures.len(),
            socket = %env.socket_path().display(),
            pid = env.agent_pid(),
            "ssh agent ready"
        );

        let outcome = task(env).await;

        let teardown = handle.stop().await.err();
        match (outcome, teardown) {
            (Ok(value), None) => {
                debug!(session = %session_id, "session closed");
                Ok(value)
            }
            (Ok(_), Some(teardown)) => Err(SessionError::Teardown(teardown)),
            (Err(error), teardown) => {
                if let Some(td) = &teardown {
                    warn!(
                        session = %session_id,
                        error = %td,
                        "teardown failed while handling nested task failure"
                    );
                }
                Err(SessionError::NestedTask { error, teardown })
            }
        }
    }
}

impl fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSession")
            .field("principal", &self.context.principal_name())
            .finish_non_exhaustive()
    }
}

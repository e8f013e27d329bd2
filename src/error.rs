//! Session-level error taxonomy.
//!
//! Per-item failures (credential resolution, key loads) are collected in
//! full before the proceed-or-abort decision, so a caller investigating a
//! batch failure sees the complete list rather than the first hit.  Teardown
//! failures ride along as secondary diagnostics and never displace the
//! failure that actually ended the session.

use std::path::PathBuf;

use crate::agent::AgentStartError;
use crate::loader::KeyLoadFailure;
use crate::resolve::ResolutionFailure;

#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("failed to signal agent process {pid}: {source}")]
    Kill {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("agent process {pid} survived SIGKILL")]
    StillRunning { pid: u32 },
    #[error("failed to remove agent socket {}: {}", .path.display(), .source)]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Terminal failure of a scoped session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// One or more credential references failed to resolve and the session
    /// was not configured to ignore them.  The agent was never started.
    #[error("{} credential(s) failed to resolve: {}", .0.len(), join(.0))]
    MissingCredentials(Vec<ResolutionFailure>),

    #[error("ssh-agent failed to start: {0}")]
    AgentStart(#[from] AgentStartError),

    /// One or more keys failed to load and the session was not configured to
    /// ignore them.  The agent was torn down before this was returned.
    #[error("{} key(s) failed to load: {}", .failures.len(), join(.failures))]
    KeyLoad {
        failures: Vec<KeyLoadFailure>,
        teardown: Option<TeardownError>,
    },

    /// Opaque failure from the nested task, reported unchanged after
    /// teardown ran.
    #[error("nested task failed: {error}")]
    NestedTask {
        error: anyhow::Error,
        teardown: Option<TeardownError>,
    },

    /// Teardown failed after the nested task had already succeeded.
    #[error("agent teardown failed: {0}")]
    Teardown(#[from] TeardownError),
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ResolveError;

    #[test]
    fn missing_credentials_lists_every_id() {
        let err = SessionError::MissingCredentials(vec![
            ResolutionFailure {
                id: "cred-a".into(),
                error: ResolveError::NotFound,
            },
            ResolutionFailure {
                id: "cred-b".into(),
                error: ResolveError::AccessDenied,
            },
        ]);
        let rendered = err.to_string();
        assert!(rendered.contains("cred-a"));
        assert!(rendered.contains("cred-b"));
        assert!(rendered.starts_with("2 credential(s)"));
    }
}

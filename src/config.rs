//! Session configuration.
//!
//! [`SessionConfig`] is an immutable value validated at construction: the
//! credential list must be non-empty, and a blank socket-path override is
//! normalized to "use the agent's default path".  It derives `Deserialize`
//! so pipeline definitions can carry it verbatim; no secret material ever
//! passes through it.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("session requires at least one credential reference")]
    NoCredentials,
}

/// Immutable configuration for one scoped agent session.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawSessionConfig")]
pub struct SessionConfig {
    credentials: Vec<String>,
    ignore_missing: bool,
    socket_path: Option<PathBuf>,
}

/// Wire shape; converted through [`SessionConfig::try_from`] so deserialized
/// configs pass the same validation as programmatic ones.
#[derive(Debug, Deserialize)]
struct RawSessionConfig {
    credentials: Vec<String>,
    #[serde(default)]
    ignore_missing: bool,
    #[serde(default)]
    socket_path: Option<PathBuf>,
}

impl TryFrom<RawSessionConfig> for SessionConfig {
    type Error = ConfigError;

    fn try_from(raw: RawSessionConfig) -> Result<Self, ConfigError> {
        let mut config = SessionConfig::new(raw.credentials)?.with_ignore_missing(raw.ignore_missing);
        if let Some(path) = raw.socket_path {
            config = config.with_socket_path(path);
        }
        Ok(config)
    }
}

impl SessionConfig {
    /// Create a config for the given ordered credential references.
    ///
    /// Fails if `credentials` is empty: a session with nothing to load is a
    /// caller mistake, not a degenerate success.
    pub fn new(credentials: Vec<String>) -> Result<Self, ConfigError> {
        if credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        Ok(Self {
            credentials,
            ignore_missing: false,
            socket_path: None,
        })
    }

    /// When `true`, credentials that fail to resolve or load are skipped and
    /// the session proceeds with whatever subset remains (possibly none).
    /// Defaults to `false`: any failure aborts before the task runs.
    pub fn with_ignore_missing(mut self, ignore_missing: bool) -> Self {
        self.ignore_missing = ignore_missing;
        self
    }

    /// Bind the agent to an explicit socket path instead of letting
    /// `ssh-agent` pick one.  A blank path means "use the default".
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.socket_path = (!path.as_os_str().is_empty()).then_some(path);
        self
    }

    pub fn credentials(&self) -> &[String] {
        &self.credentials
    }

    pub fn ignore_missing(&self) -> bool {
        self.ignore_missing
    }

    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_credential_list() {
        assert!(matches!(
            SessionConfig::new(Vec::new()),
            Err(ConfigError::NoCredentials)
        ));
    }

    #[test]
    fn defaults_are_strict() {
        let config = SessionConfig::new(vec!["deploy-key".into()]).unwrap();
        assert!(!config.ignore_missing());
        assert!(config.socket_path().is_none());
        assert_eq!(config.credentials(), ["deploy-key".to_string()]);
    }

    #[test]
    fn blank_socket_path_means_default() {
        let config = SessionConfig::new(vec!["k".into()])
            .unwrap()
            .with_socket_path("");
        assert!(config.socket_path().is_none());

        let config = SessionConfig::new(vec!["k".into()])
            .unwrap()
            .with_socket_path("/run/agent.sock");
        assert_eq!(config.socket_path(), Some(Path::new("/run/agent.sock")));
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"credentials": ["cred-a", "cred-b"]}"#).unwrap();
        assert_eq!(config.credentials().len(), 2);
        assert!(!config.ignore_missing());
        assert!(config.socket_path().is_none());
    }

    #[test]
    fn deserialization_validates_too() {
        let result: Result<SessionConfig, _> = serde_json::from_str(r#"{"credentials": []}"#);
        assert!(result.is_err());
    }

    #[test]
    fn deserializes_full_shape() {
        let config: SessionConfig = serde_json::from_str(
            r#"{"credentials": ["c"], "ignore_missing": true, "socket_path": "/tmp/a.sock"}"#,
        )
        .unwrap();
        assert!(config.ignore_missing());
        assert_eq!(config.socket_path(), Some(Path::new("/tmp/a.sock")));
    }
}

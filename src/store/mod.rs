//! Credential store interface.
//!
//! Credential storage is an external collaborator: the pipeline engine (or
//! whatever hosts this crate) implements [`CredentialStore`] over its own
//! secret store and hands it to [`ScopedSession`](crate::session::ScopedSession).
//! The crate ships two adapters only: [`FileStore`] for local PEM files
//! (used by the `sshscope` binary) and [`MemoryStore`] for tests.
//!
//! Lookups are always performed under an explicit [`SecurityContext`] rather
//! than whatever identity happens to be ambient in the host process.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use zeroize::Zeroizing;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Identity under which credential lookups are permitted.
///
/// Stores are expected to enforce their own access rules against this:
/// typically the pipeline run's effective user, or the system identity for
/// unattended jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityContext {
    principal: Option<String>,
}

impl SecurityContext {
    /// The unattended system identity.
    pub fn system() -> Self {
        Self { principal: None }
    }

    /// A named principal (e.g. the user a pipeline run is attributed to).
    pub fn principal(name: impl Into<String>) -> Self {
        Self {
            principal: Some(name.into()),
        }
    }

    pub fn principal_name(&self) -> &str {
        self.principal.as_deref().unwrap_or("SYSTEM")
    }
}

/// Resolved private-key material for one credential.
///
/// The PEM bytes and passphrase live in zeroizing buffers and are scrubbed
/// on drop.  Instances are consumed by the key-loading step and must not be
/// retained beyond it.
#[derive(Clone)]
pub struct KeyMaterial {
    label: String,
    pem: Zeroizing<Vec<u8>>,
    passphrase: Option<Zeroizing<String>>,
}

impl KeyMaterial {
    pub fn new(label: impl Into<String>, pem: Vec<u8>) -> Self {
        Self {
            label: label.into(),
            pem: Zeroizing::new(pem),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.into()));
        self
    }

    /// Human-readable display label (never secret).
    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn pem(&self) -> &[u8] {
        &self.pem
    }

    pub(crate) fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref().map(String::as_str)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("label", &self.label)
            .field("pem", &"[redacted]")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Why a single credential reference could not be resolved.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("credential not found")]
    NotFound,
    #[error("credential is not a private key")]
    WrongKind,
    #[error("access denied")]
    AccessDenied,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Listing entry for credential-selection UIs.  Metadata only.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub id: String,
    pub label: String,
}

/// External credential store, consumed one lookup at a time.
///
/// Implementations must not cache results across sessions; credentials may
/// be rotated between pipeline runs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Resolve one credential id to private-key material.
    async fn resolve(&self, id: &str, context: &SecurityContext)
    -> Result<KeyMaterial, ResolveError>;

    /// Enumerate the private-key-capable credentials visible to `context`.
    ///
    /// Only used to populate credential-selection forms; the session itself
    /// never calls this.  The default implementation advertises nothing.
    async fn list_private_key_ids(
        &self,
        _context: &SecurityContext,
    ) -> Result<Vec<CredentialSummary>, ResolveError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret_fields() {
        let material = KeyMaterial::new("deploy", b"-----BEGIN...".to_vec()).with_passphrase("pw");
        let rendered = format!("{material:?}");
        assert!(rendered.contains("deploy"));
        assert!(rendered.contains("[redacted]"));
        assert!(!rendered.contains("BEGIN"));
        assert!(!rendered.contains("pw"));
    }

    #[test]
    fn security_context_names() {
        assert_eq!(SecurityContext::system().principal_name(), "SYSTEM");
        assert_eq!(SecurityContext::principal("alice").principal_name(), "alice");
    }
}

//! Scoped SSH agent sessions for automation pipelines.
//!
//! Given a set of stored private-key credential references, [`ScopedSession`]
//! starts a dedicated `ssh-agent(1)` process, loads the referenced keys into
//! it, hands the agent's socket to a caller-supplied unit of work through the
//! conventional `SSH_AUTH_SOCK` / `SSH_AGENT_PID` environment variables, and
//! guarantees the agent and all decrypted key material are gone when that
//! work finishes, whether it returns, fails, or is cancelled.
//!
//! # Architecture
//!
//! ```text
//! pipeline engine ──► ScopedSession::run_scoped(config, task)
//!                          │
//!      CredentialStore ◄───┤ resolve credential ids (order-preserving)
//!                          │
//!        AgentProcess ◄────┤ spawn ssh-agent, parse socket/pid, handshake
//!                          │
//!           KeyLoader ◄────┤ pipe each key to `ssh-add -` (never on disk)
//!                          │
//!                          ├──► task(AgentEnv)        ← SSH_AUTH_SOCK set
//!                          │
//!                          └──► AgentHandle::stop()   ← every exit path
//! ```
//!
//! Credential storage itself is external: callers implement
//! [`CredentialStore`] over whatever secret store they have. The crate ships
//! [`store::FileStore`] (local PEM files, used by the `sshscope` binary) and
//! [`store::MemoryStore`] (tests and examples) only.
//!
//! Key material is held in [`zeroize::Zeroizing`] buffers, decrypted
//! in-memory when passphrase-protected, and dropped as soon as the agent has
//! accepted it.

pub mod agent;
pub mod config;
pub mod error;
pub mod loader;
pub mod resolve;
pub mod session;
pub mod store;

pub use agent::{AgentEnv, AgentHandle, AgentProcess, AgentStartError};
pub use config::{ConfigError, SessionConfig};
pub use error::{SessionError, TeardownError};
pub use loader::{KeyLoadError, KeyLoadFailure, KeyLoader, LoadedKey};
pub use resolve::{Resolution, ResolutionFailure, resolve_all};
pub use session::ScopedSession;
pub use store::{CredentialStore, CredentialSummary, KeyMaterial, ResolveError, SecurityContext};

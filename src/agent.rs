//! SSH agent process supervision.
//!
//! [`AgentProcess`] launches the system `ssh-agent(1)`.  The launcher process
//! forks and exits immediately after printing its Bourne-shell environment
//! lines; the daemonized agent's pid and socket path are parsed out of that
//! output and held in an [`AgentHandle`].
//!
//! ## Lifecycle
//!
//! 1. [`AgentProcess::start`] spawns the launcher, parses its output,
//!    then performs a connect handshake against the socket.  A spawned but
//!    unreachable agent is killed before the error is returned.
//! 2. [`AgentHandle::stop`]: SIGTERM, bounded wait, SIGKILL escalation,
//!    socket removal.  Idempotent: a second call is a no-op.
//! 3. Drop of a still-live [`AgentHandle`] kills the agent synchronously;
//!    the last line of defense when the owning session future is cancelled
//!    before its teardown phase runs.

use std::ffi::OsString;
use std::os::unix::fs::PermissionsExt as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, warn};

use crate::error::TeardownError;

/// Environment variable standard SSH tooling reads to locate the agent socket.
pub const AUTH_SOCK_VAR: &str = "SSH_AUTH_SOCK";
/// Environment variable carrying the agent's process id.
pub const AGENT_PID_VAR: &str = "SSH_AGENT_PID";

const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10);
/// How long [`AgentHandle::stop`] waits after each signal before escalating.
/// `ssh-agent` can take over a second to run its exit handlers on a loaded
/// host.
const STOP_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum AgentStartError {
    #[error("`{name}` not found in PATH")]
    BinaryNotFound { name: &'static str },
    #[error("socket path {} is already served by a live agent", .path.display())]
    SocketInUse { path: PathBuf },
    #[error("failed to prepare socket path {}: {}", .path.display(), .source)]
    SocketPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch ssh-agent: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("ssh-agent exited with {status}: {stderr}")]
    Launch {
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unexpected ssh-agent output: {0}")]
    Parse(String),
    #[error("agent socket {} never became connectable: {}", .path.display(), .source)]
    Handshake {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0:?} waiting for ssh-agent to start")]
    Timeout(Duration),
}

/// The environment a running agent exposes to clients.
#[derive(Debug, Clone)]
pub struct AgentEnv {
    socket_path: PathBuf,
    agent_pid: u32,
}

impl AgentEnv {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn agent_pid(&self) -> u32 {
        self.agent_pid
    }

    /// The `SSH_AUTH_SOCK` / `SSH_AGENT_PID` pairs to inject into a nested
    /// task's environment.
    pub fn vars(&self) -> [(&'static str, OsString); 2] {
        [
            (AUTH_SOCK_VAR, self.socket_path.as_os_str().to_os_string()),
            (AGENT_PID_VAR, self.agent_pid.to_string().into()),
        ]
    }

    /// Apply [`Self::vars`] to a command about to be spawned.
    pub fn apply_to(&self, command: &mut Command) {
        for (name, value) in self.vars() {
            command.env(name, value);
        }
    }
}

/// Launcher for `ssh-agent` processes.
#[derive(Debug, Clone)]
pub struct AgentProcess {
    ssh_agent: PathBuf,
    start_timeout: Duration,
}

impl AgentProcess {
    /// Locate `ssh-agent` on `PATH`.
    pub fn discover() -> Result<Self, AgentStartError> {
        let ssh_agent = which::which("ssh-agent")
            .map_err(|_| AgentStartError::BinaryNotFound { name: "ssh-agent" })?;
        Ok(Self::with_binary(ssh_agent))
    }

    /// Use an explicit `ssh-agent` binary.
    pub fn with_binary(ssh_agent: impl Into<PathBuf>) -> Self {
        Self {
            ssh_agent: ssh_agent.into(),
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }

    /// Bound the launch-and-handshake wait.  An exceeded bound is a start
    /// failure.
    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Launch a new agent, optionally bound to `socket_override`.
    ///
    /// With no override the agent picks its own unique socket path, so
    /// concurrent sessions never collide.  An override path occupied by a
    /// live agent fails with [`AgentStartError::SocketInUse`]; a stale
    /// socket file left by a dead agent is removed first.
    pub async fn start(&self, socket_override: Option<&Path>) -> Result<AgentHandle, AgentStartError> {
        if let Some(path) = socket_override {
            prepare_socket_path(path).await?;
        }

        let mut command = Command::new(&self.ssh_agent);
        command
            .arg("-s")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = socket_override {
            command.arg("-a").arg(path);
        }

        let child = command.spawn().map_err(AgentStartError::Spawn)?;

        let output = match time::timeout(self.start_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(AgentStartError::Spawn(e)),
            Err(_) => return Err(AgentStartError::Timeout(self.start_timeout)),
        };

        if !output.status.success() {
            return Err(AgentStartError::Launch {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let (socket_path, agent_pid) = parse_agent_output(&stdout)?;
        let mut handle = AgentHandle {
            agent_pid,
            socket_path,
            stopped: false,
        };

        // The agent has daemonized, but it only counts as started once its
        // socket accepts a connection.  On handshake failure the process is
        // killed here rather than leaked.
        if let Err(e) = await_socket(&handle.socket_path, self.start_timeout).await {
            let path = handle.socket_path.clone();
            if let Err(cleanup) = handle.kill_now() {
                warn!(error = %cleanup, "cleanup after failed agent handshake");
            }
            return Err(AgentStartError::Handshake { path, source: e });
        }

        debug!(
            pid = handle.agent_pid,
            socket = %handle.socket_path.display(),
            "ssh-agent started"
        );
        Ok(handle)
    }
}

/// A running, not-yet-stopped agent.  Owned by exactly one session.
#[derive(Debug)]
pub struct AgentHandle {
    agent_pid: u32,
    socket_path: PathBuf,
    stopped: bool,
}

impl AgentHandle {
    pub fn agent_pid(&self) -> u32 {
        self.agent_pid
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// The environment to hand to agent clients.
    pub fn env(&self) -> AgentEnv {
        AgentEnv {
            socket_path: self.socket_path.clone(),
            agent_pid: self.agent_pid,
        }
    }

    /// Terminate the agent and remove its socket.
    ///
    /// Idempotent: calling on an already-stopped handle is a no-op.  A pid
    /// that is already gone (ESRCH) counts as stopped, not as an error.
    pub async fn stop(&mut self) -> Result<(), TeardownError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if process_alive(self.agent_pid) {
            signal(self.agent_pid, libc::SIGTERM).map_err(|source| TeardownError::Kill {
                pid: self.agent_pid,
                source,
            })?;
            if !await_exit(self.agent_pid, STOP_GRACE).await {
                warn!(pid = self.agent_pid, "agent ignored SIGTERM, sending SIGKILL");
                signal(self.agent_pid, libc::SIGKILL).map_err(|source| TeardownError::Kill {
                    pid: self.agent_pid,
                    source,
                })?;
                if !await_exit(self.agent_pid, STOP_GRACE).await {
                    return Err(TeardownError::StillRunning {
                        pid: self.agent_pid,
                    });
                }
            }
        }

        remove_socket(&self.socket_path)?;
        debug!(pid = self.agent_pid, "ssh-agent stopped");
        Ok(())
    }

    /// Synchronous best-effort termination, without the graceful wait.
    fn kill_now(&mut self) -> Result<(), TeardownError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if process_alive(self.agent_pid) {
            signal(self.agent_pid, libc::SIGTERM).map_err(|source| TeardownError::Kill {
                pid: self.agent_pid,
                source,
            })?;
        }
        remove_socket(&self.socket_path)
    }
}

impl Drop for AgentHandle {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        warn!(
            pid = self.agent_pid,
            "agent handle dropped while live, killing agent"
        );
        if let Err(e) = self.kill_now() {
            warn!(pid = self.agent_pid, error = %e, "drop-guard agent cleanup failed");
        }
    }
}

/// Vet a caller-supplied socket path before handing it to `ssh-agent -a`.
async fn prepare_socket_path(path: &Path) -> Result<(), AgentStartError> {
    let socket_error = |source| AgentStartError::SocketPath {
        path: path.to_path_buf(),
        source,
    };

    if path.exists() {
        match UnixStream::connect(path).await {
            Ok(_) => {
                return Err(AgentStartError::SocketInUse {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                // Leftover from a dead agent, safe to reclaim.
                warn!(path = %path.display(), error = %e, "removing stale agent socket");
                tokio::fs::remove_file(path).await.map_err(socket_error)?;
            }
        }
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        tokio::fs::create_dir_all(parent).await.map_err(socket_error)?;
        tokio::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(socket_error)?;
    }
    Ok(())
}

/// Extract the socket path and agent pid from `ssh-agent -s` output.
fn parse_agent_output(output: &str) -> Result<(PathBuf, u32), AgentStartError> {
    let socket = extract_var(output, AUTH_SOCK_VAR)
        .ok_or_else(|| AgentStartError::Parse(format!("missing {AUTH_SOCK_VAR}")))?;
    let pid = extract_var(output, AGENT_PID_VAR)
        .ok_or_else(|| AgentStartError::Parse(format!("missing {AGENT_PID_VAR}")))?;
    let pid = pid
        .parse::<u32>()
        .map_err(|_| AgentStartError::Parse(format!("invalid agent pid `{pid}`")))?;
    Ok((PathBuf::from(socket), pid))
}

/// Pull `value` out of a Bourne-style `NAME=value; export NAME;` line.
fn extract_var(output: &str, name: &str) -> Option<String> {
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix(name)
            && let Some(value) = rest.strip_prefix('=')
        {
            let value = value.split(';').next().unwrap_or(value);
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Poll until the socket accepts a connection or `timeout` elapses.
async fn await_socket(path: &Path, timeout: Duration) -> Result<(), std::io::Error> {
    let deadline = time::Instant::now() + timeout;
    loop {
        match UnixStream::connect(path).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                if time::Instant::now() >= deadline {
                    return Err(e);
                }
                time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// True if `pid` still exists (EPERM counts as alive).
fn process_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only performs the existence check.
    let ret = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if ret == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

fn signal(pid: u32, sig: libc::c_int) -> Result<(), std::io::Error> {
    // SAFETY: kill with a parsed agent pid and a constant signal number.
    let ret = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if ret == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Already gone, which is what teardown wanted anyway.
        return Ok(());
    }
    Err(err)
}

async fn await_exit(pid: u32, grace: Duration) -> bool {
    let deadline = time::Instant::now() + grace;
    while time::Instant::now() < deadline {
        if !process_alive(pid) {
            return true;
        }
        time::sleep(Duration::from_millis(50)).await;
    }
    !process_alive(pid)
}

fn remove_socket(path: &Path) -> Result<(), TeardownError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(TeardownError::Socket {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_OUTPUT: &str = "\
SSH_AUTH_SOCK=/tmp/ssh-XXXXXXabcdef/agent.12345; export SSH_AUTH_SOCK;
SSH_AGENT_PID=12346; export SSH_AGENT_PID;
echo Agent pid 12346;
";

    #[test]
    fn parses_bourne_shell_output() {
        let (socket, pid) = parse_agent_output(AGENT_OUTPUT).unwrap();
        assert_eq!(socket, PathBuf::from("/tmp/ssh-XXXXXXabcdef/agent.12345"));
        assert_eq!(pid, 12346);
    }

    #[test]
    fn rejects_output_missing_socket() {
        let err = parse_agent_output("SSH_AGENT_PID=1; export SSH_AGENT_PID;\n").unwrap_err();
        assert!(matches!(err, AgentStartError::Parse(msg) if msg.contains(AUTH_SOCK_VAR)));
    }

    #[test]
    fn rejects_output_missing_pid() {
        let err = parse_agent_output("SSH_AUTH_SOCK=/tmp/a.sock; export SSH_AUTH_SOCK;\n")
            .unwrap_err();
        assert!(matches!(err, AgentStartError::Parse(msg) if msg.contains(AGENT_PID_VAR)));
    }

    #[test]
    fn rejects_non_numeric_pid() {
        let bad = "SSH_AUTH_SOCK=/tmp/a.sock; export SSH_AUTH_SOCK;\nSSH_AGENT_PID=oops; export SSH_AGENT_PID;\n";
        assert!(matches!(
            parse_agent_output(bad),
            Err(AgentStartError::Parse(_))
        ));
    }

    #[test]
    fn extract_var_ignores_unrelated_lines() {
        let output = "echo Agent pid 99;\nSSH_AUTH_SOCK=/run/agent.sock; export SSH_AUTH_SOCK;\n";
        assert_eq!(
            extract_var(output, AUTH_SOCK_VAR).as_deref(),
            Some("/run/agent.sock")
        );
        assert_eq!(extract_var(output, AGENT_PID_VAR), None);
    }

    #[test]
    fn env_vars_use_conventional_names() {
        let env = AgentEnv {
            socket_path: PathBuf::from("/run/agent.sock"),
            agent_pid: 42,
        };
        let vars = env.vars();
        assert_eq!(vars[0].0, "SSH_AUTH_SOCK");
        assert_eq!(vars[0].1, OsString::from("/run/agent.sock"));
        assert_eq!(vars[1].0, "SSH_AGENT_PID");
        assert_eq!(vars[1].1, OsString::from("42"));
    }
}

//! `sshscope`: run a command under a scoped SSH agent.
//!
//! Loads the given identity files into a fresh agent, runs the command with
//! `SSH_AUTH_SOCK`/`SSH_AGENT_PID` set, and kills the agent when the command
//! exits.  The command's exit status is forwarded.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};

use sshscope::config::SessionConfig;
use sshscope::loader::KeyLoader;
use sshscope::session::ScopedSession;
use sshscope::store::{FileStore, SecurityContext};

#[tokio::main]
async fn main() -> ExitCode {
    // Reset SIGPIPE to default so piping output to `head` etc. exits cleanly
    // instead of panicking with "broken pipe".
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sshscope: {e:#}");
            ExitCode::FAILURE
        }
    }
}

struct Args {
    identities: Vec<PathBuf>,
    socket: Option<PathBuf>,
    ignore_missing: bool,
    verbose: bool,
    command: Vec<String>,
}

async fn run() -> Result<ExitCode> {
    let Some(args) = parse_args(std::env::args().skip(1))? else {
        return Ok(ExitCode::SUCCESS);
    };

    // Passphrases come through the environment, never argv (argv is visible
    // to every process on the host).
    let passphrase = std::env::var("SSHSCOPE_PASSPHRASE").ok();

    let mut store = FileStore::new();
    let mut ids = Vec::new();
    for path in &args.identities {
        let id = path.display().to_string();
        match &passphrase {
            Some(p) => store.insert_with_passphrase(&id, path, p.clone()),
            None => store.insert(&id, path),
        }
        ids.push(id);
    }

    let mut config = SessionConfig::new(ids)?.with_ignore_missing(args.ignore_missing);
    if let Some(socket) = &args.socket {
        config = config.with_socket_path(socket);
    }

    let loader = KeyLoader::discover()?;
    let session = ScopedSession::new(Arc::new(store), SecurityContext::system())?;

    let verbose = args.verbose;
    let command = args.command;
    let status = session
        .run_scoped(config, |env| async move {
            if verbose {
                for line in loader.list_identities(&env).await? {
                    eprintln!("sshscope: {line}");
                }
            }
            let mut cmd = tokio::process::Command::new(&command[0]);
            cmd.args(&command[1..]);
            env.apply_to(&mut cmd);
            let status = cmd
                .status()
                .await
                .with_context(|| format!("failed to run `{}`", command[0]))?;
            Ok(status)
        })
        .await?;

    Ok(match status.code() {
        Some(code) => ExitCode::from(code.clamp(0, 255) as u8),
        // Terminated by signal.
        None => ExitCode::FAILURE,
    })
}

fn parse_args(mut argv: impl Iterator<Item = String>) -> Result<Option<Args>> {
    let mut args = Args {
        identities: Vec::new(),
        socket: None,
        ignore_missing: false,
        verbose: false,
        command: Vec::new(),
    };

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "-i" | "--identity" => {
                let path = argv.next().context("-i/--identity requires a path")?;
                args.identities.push(path.into());
            }
            "--socket" => {
                let path = argv.next().context("--socket requires a path")?;
                args.socket = Some(path.into());
            }
            "--ignore-missing" => args.ignore_missing = true,
            "-v" | "--verbose" => args.verbose = true,
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "--" => {
                args.command = argv.collect();
                break;
            }
            other => bail!("unknown argument: {other} (see --help)"),
        }
    }

    if args.identities.is_empty() {
        bail!("at least one -i/--identity is required");
    }
    if args.command.is_empty() {
        bail!("no command given (separate it with --)");
    }
    Ok(Some(args))
}

fn print_help() {
    println!(
        "\
sshscope - run a command under a scoped ssh-agent

USAGE:
    sshscope [OPTIONS] -i <key-file> [-i <key-file>...] -- <command> [args...]

OPTIONS:
    -i, --identity <path>    private key file to load (repeatable)
        --socket <path>      bind the agent to an explicit socket path
        --ignore-missing     skip keys that cannot be read or loaded
    -v, --verbose            list the loaded identities before running
    -h, --help               show this help

ENVIRONMENT:
    SSHSCOPE_PASSPHRASE      passphrase for encrypted identity files
    RUST_LOG                 log filter (default: warn)

The agent is started fresh for this invocation, the command runs with
SSH_AUTH_SOCK and SSH_AGENT_PID pointing at it, and the agent is killed
when the command exits. The command's exit status is forwarded."
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> impl Iterator<Item = String> {
        parts
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_full_invocation() {
        let args = parse_args(argv(&[
            "-i",
            "/keys/deploy",
            "--socket",
            "/run/agent.sock",
            "--ignore-missing",
            "-v",
            "--",
            "git",
            "fetch",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(args.identities, [PathBuf::from("/keys/deploy")]);
        assert_eq!(args.socket, Some(PathBuf::from("/run/agent.sock")));
        assert!(args.ignore_missing);
        assert!(args.verbose);
        assert_eq!(args.command, ["git", "fetch"]);
    }

    #[test]
    fn requires_an_identity() {
        assert!(parse_args(argv(&["--", "true"])).is_err());
    }

    #[test]
    fn requires_a_command() {
        assert!(parse_args(argv(&["-i", "/keys/deploy"])).is_err());
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(parse_args(argv(&["--frobnicate", "--", "true"])).is_err());
    }

    #[test]
    fn help_short_circuits() {
        assert!(parse_args(argv(&["--help"])).unwrap().is_none());
    }
}

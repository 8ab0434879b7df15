//! Host command execution.
//!
//! All adapters run their privileged operations (proxy reload, certificate
//! issuance) through a [`HostExecutor`], so the same code works whether the
//! orchestrator runs on the bare host or inside its own container.
//!
//! `ShellExecutor` detects once, cached for the process lifetime, whether it
//! is running inside an isolated process namespace (presence of the
//! `/.dockerenv` marker file). If so, commands are executed by entering the
//! host's mount/UTS/network/IPC namespaces via PID 1; the command travels as
//! a single quoted argument so it is opaque to the outer shell. Otherwise
//! the program is spawned directly with an argument list — no shell is
//! involved at all.

use std::path::Path;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{ProvisionError, ProvisionResult};

/// Marker file present when running inside a container namespace.
const NAMESPACE_MARKER: &str = "/.dockerenv";

/// Per-command execution timeout.
const EXEC_TIMEOUT: Duration = Duration::from_secs(120);

/// Boxed future returned by [`HostExecutor::run`].
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Executes a program with arguments on the host and returns its stdout.
pub trait HostExecutor: Send + Sync {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, ProvisionResult<String>>;
}

/// Cached result of the namespace detection.
static CONTAINERIZED: OnceLock<bool> = OnceLock::new();

/// Quote a string for a POSIX shell as a single argument.
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// The production executor: direct spawn, or a host-namespace hop when
/// containerized.
#[derive(Debug, Clone, Copy)]
pub struct ShellExecutor {
    containerized: bool,
}

impl ShellExecutor {
    /// Detect the execution environment (cached for the process lifetime).
    pub fn new() -> Self {
        let containerized =
            *CONTAINERIZED.get_or_init(|| Path::new(NAMESPACE_MARKER).exists());
        if containerized {
            debug!("namespace marker present, commands will enter host namespaces");
        }
        Self { containerized }
    }

    /// Build an executor with explicit containerization (for tests).
    pub fn with_containerized(containerized: bool) -> Self {
        Self { containerized }
    }

    async fn run_inner(&self, program: &str, args: &[String]) -> ProvisionResult<String> {
        let mut cmd = if self.containerized {
            // Enter the host's mount, UTS, network, and IPC namespaces via
            // the init process. The whole command is one quoted sh argument
            // so the outer shell never interprets it.
            let quoted: Vec<String> = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .map(|part| shell_quote(&part))
                .collect();
            let mut cmd = Command::new("nsenter");
            cmd.args(["-t", "1", "-m", "-u", "-n", "-i", "sh", "-c"])
                .arg(quoted.join(" "));
            cmd
        } else {
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        };

        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = tokio::time::timeout(EXEC_TIMEOUT, cmd.output())
            .await
            .map_err(|_| {
                ProvisionError::tool(program, format!("timed out after {}s", EXEC_TIMEOUT.as_secs()))
            })?
            .map_err(|e| ProvisionError::tool(program, e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(%program, code = output.status.code(), "host command failed");
            Err(ProvisionError::tool(
                program,
                format!(
                    "exit {}: {}",
                    output.status.code().unwrap_or(-1),
                    stderr.trim()
                ),
            ))
        }
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HostExecutor for ShellExecutor {
    fn run<'a>(&'a self, program: &'a str, args: &'a [String]) -> BoxFuture<'a, ProvisionResult<String>> {
        Box::pin(self.run_inner(program, args))
    }
}

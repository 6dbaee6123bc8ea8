// Shell executor implementation
// reason: tokio for async process management with a hard timeout
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use queuectl_core::port::command_executor::{CommandExecutor, ExecutionOutcome};

#[cfg(unix)]
const DEFAULT_SHELL: (&str, &str) = ("sh", "-c");
#[cfg(windows)]
const DEFAULT_SHELL: (&str, &str) = ("cmd", "/C");

/// Shell executor
///
/// Runs each command line through the platform shell (`sh -c` / `cmd /C`),
/// so pipes, redirects and variable expansion behave as typed. The command
/// string is trusted input: anyone who can enqueue can run arbitrary code
/// as the worker's user.
///
/// On unix the shell leads its own process group; when the timeout elapses
/// the whole group gets SIGKILL, background children included.
pub struct ShellExecutor {
    shell: String,
    shell_flag: String,
    timeout: Duration,
}

impl ShellExecutor {
    /// Create a new shell executor
    ///
    /// # Arguments
    /// * `timeout` - Wall-clock limit per command; the child is killed when it elapses
    ///
    /// # Example
    /// ```ignore
    /// let executor = ShellExecutor::new(config.job_timeout);
    /// ```
    pub fn new(timeout: Duration) -> Self {
        Self {
            shell: DEFAULT_SHELL.0.to_string(),
            shell_flag: DEFAULT_SHELL.1.to_string(),
            timeout,
        }
    }

    /// Use a different shell program (e.g. `bash`, `-c`)
    pub fn with_shell(mut self, shell: impl Into<String>, flag: impl Into<String>) -> Self {
        self.shell = shell.into();
        self.shell_flag = flag.into();
        self
    }

    /// Spawn the shell and wait for output, bounded by the timeout
    async fn spawn_and_wait(&self, command: &str) -> ExecutionOutcome {
        let mut cmd = Command::new(&self.shell);
        cmd.arg(&self.shell_flag)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout kills the shell itself
            .kill_on_drop(true);

        // Own process group, so a timeout can take down everything the shell forked
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return ExecutionOutcome::LaunchError {
                    message: format!("{}: {}", self.shell, e),
                }
            }
        };
        let pid = child.id();

        match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => build_outcome(output),
            Ok(Err(e)) => ExecutionOutcome::LaunchError {
                message: format!("failed waiting for process: {}", e),
            },
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                ExecutionOutcome::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }
            }
        }
    }
}

/// SIGKILL the whole process group led by the timed-out shell
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        warn!(pgid = pgid, "Process group id out of range, cannot kill");
        return;
    };

    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // Group already gone
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid = raw, error = %e, "Failed to kill process group"),
    }
}

// Windows has no process groups here; kill_on_drop covers the shell only
#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Build execution outcome from process output
fn build_outcome(output: std::process::Output) -> ExecutionOutcome {
    if output.status.success() {
        ExecutionOutcome::Success
    } else {
        ExecutionOutcome::ExecutionFailure {
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(&self, command: &str) -> ExecutionOutcome {
        let start = Instant::now();

        info!(
            command = %command,
            shell = %self.shell,
            timeout_ms = self.timeout.as_millis() as u64,
            "Starting command"
        );

        let outcome = self.spawn_and_wait(command).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        if outcome.is_success() {
            info!(command = %command, duration_ms = duration_ms, "Command succeeded");
        } else {
            warn!(
                command = %command,
                duration_ms = duration_ms,
                reason = %outcome.diagnostic(),
                "Command failed"
            );
        }

        outcome
    }
}

//! Wall-clock deadline enforcement (§4.7). Bounds a future's execution; for child
//! processes specifically, runs a process-group watchdog that sends `SIGTERM` then
//! `SIGKILL` to the whole group when the interval elapses, since no `timeout` binary
//! is assumed to exist on the host.

use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::warn;

use crate::error::{OrchestratorError, Result};

/// Race an arbitrary future against a wall-clock deadline.
pub async fn with_deadline<F, T>(deadline: Duration, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let start = Instant::now();
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::DeadlineExceeded {
            elapsed: start.elapsed(),
        }),
    }
}

/// Spawn `command` in its own process group and enforce `deadline` against the whole
/// group, escalating `SIGTERM` then `SIGKILL` on expiry.
///
/// # Errors
///
/// Returns `DeadlineExceeded` if the process did not exit before the deadline (after
/// the escalation sequence completes), or `Io`/`TransientOperation` for spawn/wait
/// failures.
#[cfg(unix)]
pub async fn run_with_watchdog(
    mut command: Command,
    deadline: Duration,
    term_to_kill_grace: Duration,
) -> Result<std::process::Output> {
    use std::os::unix::process::ExitStatusExt;

    unsafe {
        command.pre_exec(|| {
            // New process group, so signals can be delivered to every descendant.
            if libc::setpgid(0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let mut child: Child = command.spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| OrchestratorError::runtime_unreachable("child exited before pid was available"))?;

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    tokio::select! {
        result = &mut wait => {
            let output = result?;
            Ok(output)
        }
        () = tokio::time::sleep(deadline) => {
            warn!(pid, "deadline exceeded, sending SIGTERM to process group");
            send_to_group(pid, libc::SIGTERM);
            let escalate = tokio::time::timeout(term_to_kill_grace, &mut wait).await;
            match escalate {
                Ok(Ok(output)) => {
                    if let Some(sig) = output.status.signal() {
                        warn!(pid, signal = sig, "process exited after SIGTERM during deadline teardown");
                    }
                    Err(OrchestratorError::DeadlineExceeded { elapsed: deadline })
                }
                _ => {
                    warn!(pid, "process survived SIGTERM, sending SIGKILL");
                    send_to_group(pid, libc::SIGKILL);
                    let _ = wait.await;
                    Err(OrchestratorError::DeadlineExceeded { elapsed: deadline + term_to_kill_grace })
                }
            }
        }
    }
}

/// Non-unix fallback: no process groups or signals, so the best we can do is drop the
/// child on timeout. `kill_on_drop` asks the OS to reap it when the `Child` is dropped.
#[cfg(not(unix))]
pub async fn run_with_watchdog(
    mut command: Command,
    deadline: Duration,
    _term_to_kill_grace: Duration,
) -> Result<std::process::Output> {
    command.kill_on_drop(true);
    with_deadline(deadline, async {
        command
            .output()
            .await
            .map_err(|e| OrchestratorError::runtime_unreachable(format!("failed to spawn command: {e}")))
    })
    .await
}

#[cfg(unix)]
fn send_to_group(pid: u32, signal: i32) {
    // SAFETY: kill with a negative pid targets the process group; always safe to call,
    // failure (e.g. group already gone) is reported via errno and ignored here.
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

/// Translate a terminating signal number to whether it represents a deadline-driven
/// kill, per spec.md's 143/137 mapping ("translate signals to 'timed out'").
#[must_use]
pub fn signal_means_timed_out(signal: i32) -> bool {
    matches!(signal, 15 | 9)
}

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClipscribeError, Result};

/// Default grace period between SIGTERM and SIGKILL
const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Captured output of a finished external command
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CapturedOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs external executables as supervised child processes.
///
/// Every child is placed in its own process group so that termination
/// reaches grandchildren (yt-dlp spawns ffmpeg, whisper spawns workers).
/// When the caller's token is cancelled or the per-call deadline expires,
/// the group receives SIGTERM, then SIGKILL after the grace period, and
/// only then does the call return `Cancelled`.
pub struct Supervisor {
    kill_grace: Duration,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            kill_grace: DEFAULT_KILL_GRACE,
        }
    }

    pub fn with_kill_grace(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Run a command to completion, capturing stdout and stderr.
    ///
    /// Blocks until the process exits, the token is cancelled, or the
    /// optional deadline expires. A non-zero exit is reported as
    /// `ExternalToolFailed` carrying the captured stderr; a missing
    /// executable as `ExternalToolMissing`; cancellation as `Cancelled`,
    /// returned only after the child has been terminated.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
        deadline: Option<Duration>,
    ) -> Result<CapturedOutput> {
        let mut child = spawn_piped(program, args)?;

        let stdout_task = drain(child.stdout.take());
        let stderr_task = drain(child.stderr.take());

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| ClipscribeError::ExternalToolFailed(
                    format!("failed waiting for {}: {}", program, e)
                ))?
            }
            _ = cancel.cancelled() => {
                self.terminate(&mut child, program).await;
                return Err(ClipscribeError::Cancelled(format!(
                    "{} cancelled while running", program
                )));
            }
            _ = sleep_until_deadline(deadline) => {
                self.terminate(&mut child, program).await;
                return Err(ClipscribeError::Cancelled(format!(
                    "{} exceeded its deadline of {:?}", program, deadline.unwrap_or_default()
                )));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let diag = String::from_utf8_lossy(&stderr);
            return Err(ClipscribeError::ExternalToolFailed(format!(
                "{} exited with {}: {}",
                program,
                status,
                diag.trim()
            )));
        }

        Ok(CapturedOutput { stdout, stderr })
    }

    /// Start a command and hand back a handle for incremental observation.
    ///
    /// The child is still bound to the token: cancellation terminates its
    /// process group even while the caller holds the handle.
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        program: &str,
        args: &[&str],
    ) -> Result<SupervisedChild> {
        let child = spawn_piped(program, args)?;
        let pid = child.id();

        let watcher = pid.map(|pid| {
            let token = cancel.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                debug!("cancellation observed, terminating process group {}", pid);
                signal_group(pid, libc::SIGTERM);
            })
        });

        Ok(SupervisedChild {
            child,
            program: program.to_string(),
            kill_grace: self.kill_grace,
            watcher,
        })
    }

    /// Forcibly bring down a child and its process group.
    async fn terminate(&self, child: &mut Child, program: &str) {
        let Some(pid) = child.id() else {
            return;
        };

        debug!("sending SIGTERM to {} process group {}", program, pid);
        signal_group(pid, libc::SIGTERM);

        if tokio::time::timeout(self.kill_grace, child.wait()).await.is_ok() {
            return;
        }

        warn!(
            "{} did not exit within {:?} after SIGTERM, sending SIGKILL",
            program, self.kill_grace
        );
        signal_group(pid, libc::SIGKILL);
        let _ = child.kill().await;
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running supervised process
pub struct SupervisedChild {
    child: Child,
    program: String,
    kill_grace: Duration,
    watcher: Option<JoinHandle<()>>,
}

impl SupervisedChild {
    /// OS process id, if the child has not been reaped yet
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.wait().await.map_err(|e| {
            ClipscribeError::ExternalToolFailed(format!(
                "failed waiting for {}: {}",
                self.program, e
            ))
        })?;
        self.stop_watcher();
        Ok(status)
    }

    /// Terminate the process group: SIGTERM, grace period, SIGKILL.
    /// Returns once the child has been reaped.
    pub async fn kill(&mut self) -> Result<()> {
        if let Some(pid) = self.child.id() {
            signal_group(pid, libc::SIGTERM);
            if tokio::time::timeout(self.kill_grace, self.child.wait())
                .await
                .is_err()
            {
                signal_group(pid, libc::SIGKILL);
                self.child.kill().await.map_err(|e| {
                    ClipscribeError::ExternalToolFailed(format!(
                        "failed to kill {}: {}",
                        self.program, e
                    ))
                })?;
            }
        }
        self.stop_watcher();
        Ok(())
    }

    /// Deliver a raw signal to the child process.
    ///
    /// `signal(0)` probes liveness: it fails once the child has exited
    /// and been reaped.
    pub fn signal(&self, sig: i32) -> Result<()> {
        let pid = self.child.id().ok_or_else(|| {
            ClipscribeError::ExternalToolFailed(format!("{} has already exited", self.program))
        })?;

        let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
        if rc == 0 {
            Ok(())
        } else {
            Err(ClipscribeError::ExternalToolFailed(format!(
                "failed to signal {} (pid {})",
                self.program, pid
            )))
        }
    }

    fn stop_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for SupervisedChild {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

fn spawn_piped(program: &str, args: &[&str]) -> Result<Child> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    cmd.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ClipscribeError::ExternalToolMissing(format!(
            "{} is not installed or not on PATH",
            program
        )),
        _ => ClipscribeError::ExternalToolFailed(format!("failed to spawn {}: {}", program, e)),
    })
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Signal an entire process group
fn signal_group(pid: u32, sig: i32) {
    unsafe {
        libc::kill(-(pid as libc::pid_t), sig);
    }
}

async fn sleep_until_deadline(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let sup = Supervisor::new();
        let cancel = CancellationToken::new();

        let output = sup
            .run(&cancel, "sh", &["-c", "echo transcript"], None)
            .await
            .unwrap();

        assert_eq!(output.stdout_lossy().trim(), "transcript");
    }

    #[tokio::test]
    async fn test_missing_executable_is_classified() {
        let sup = Supervisor::new();
        let cancel = CancellationToken::new();

        let err = sup
            .run(&cancel, "definitely-not-a-real-tool", &[], None)
            .await
            .unwrap_err();

        assert!(matches!(err, ClipscribeError::ExternalToolMissing(_)));
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let sup = Supervisor::new();
        let cancel = CancellationToken::new();

        let err = sup
            .run(&cancel, "sh", &["-c", "echo boom >&2; exit 3"], None)
            .await
            .unwrap_err();

        match err {
            ClipscribeError::ExternalToolFailed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_terminates_child() {
        let sup = Supervisor::with_kill_grace(Duration::from_millis(200));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = sup.run(&cancel, "sleep", &["30"], None).await.unwrap_err();

        assert!(matches!(err, ClipscribeError::Cancelled(_)));
        // the call must not have waited out the sleep
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_terminates_child() {
        let sup = Supervisor::with_kill_grace(Duration::from_millis(200));
        let cancel = CancellationToken::new();

        let started = Instant::now();
        let err = sup
            .run(&cancel, "sleep", &["30"], Some(Duration::from_millis(100)))
            .await
            .unwrap_err();

        assert!(matches!(err, ClipscribeError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_kill_leaves_no_process_behind() {
        let sup = Supervisor::new();
        let cancel = CancellationToken::new();

        let mut child = sup.start(&cancel, "sleep", &["30"]).await.unwrap();
        child.signal(0).expect("child should be alive after start");

        child.kill().await.unwrap();

        // reaped: liveness probe must now fail
        assert!(child.signal(0).is_err());
    }

    #[tokio::test]
    async fn test_start_wait_observes_exit() {
        let sup = Supervisor::new();
        let cancel = CancellationToken::new();

        let mut child = sup.start(&cancel, "sh", &["-c", "exit 0"]).await.unwrap();
        let status = child.wait().await.unwrap();

        assert!(status.success());
    }
}

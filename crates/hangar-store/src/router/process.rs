//! Out-of-process invocation: one child per call, JSON over stdio.
//!
//! The child runs in its own process group so a timeout or shutdown can
//! kill everything it started, not just the direct child.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use hangar_core::{CapabilityId, truncate_to_boundary};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::descriptor::InvocationResponse;
use crate::error::ErrorKind;
use crate::provision::EnvHandle;

/// How long output is still collected once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Output keys accepted as the response text, in priority order.
const TEXT_KEYS: [&str; 3] = ["text", "response", "result"];

/// Process groups of running children, by leader pid.
#[derive(Debug, Default)]
pub(super) struct ChildTracker {
    live: Mutex<HashSet<u32>>,
}

impl ChildTracker {
    fn register(self: &Arc<Self>, pid: u32) -> ChildSlot {
        self.lock().insert(pid);
        ChildSlot {
            pid,
            tracker: Arc::clone(self),
            reaped: false,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(super) fn kill_all(&self) {
        for pid in self.lock().iter().copied() {
            kill_group(pid);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of one live child. Kills the group if dropped before the
/// child was reaped (e.g. the invoking future was dropped).
struct ChildSlot {
    pid: u32,
    tracker: Arc<ChildTracker>,
    reaped: bool,
}

impl Drop for ChildSlot {
    fn drop(&mut self) {
        if !self.reaped {
            kill_group(self.pid);
        }
        self.tracker.lock().remove(&self.pid);
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {},
        Err(e) => warn!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

/// One out-of-process call.
pub(super) struct ProcessCall<'a> {
    pub(super) capability: &'a CapabilityId,
    pub(super) program: &'a str,
    pub(super) args: &'a [String],
    pub(super) working_dir: &'a Path,
    pub(super) python_path: &'a Path,
    pub(super) env: Option<&'a EnvHandle>,
    pub(super) excerpt_bytes: usize,
    pub(super) max_output_bytes: usize,
}

impl ProcessCall<'_> {
    /// Spawn, feed `payload`, and wait up to `timeout`.
    pub(super) async fn run(
        &self,
        payload: &[u8],
        timeout: Duration,
        shutdown: &CancellationToken,
        children: &Arc<ChildTracker>,
    ) -> InvocationResponse {
        let mut cmd = self.command();
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return InvocationResponse::failure(
                    ErrorKind::EntryPointNotFound,
                    format!("command not found: {}", self.program),
                );
            },
            Err(e) => {
                return InvocationResponse::failure(
                    ErrorKind::ProcessError,
                    format!("failed to start {}: {e}", self.program),
                );
            },
        };

        let Some(pid) = child.id() else {
            return InvocationResponse::failure(
                ErrorKind::ProcessError,
                format!("{} exited before it could be tracked", self.program),
            );
        };
        let mut slot = children.register(pid);
        debug!(capability = %self.capability, pid, "Spawned capability process");

        let writer = tokio::spawn(write_payload(child.stdin.take(), payload.to_vec()));
        let mut stdout = tokio::spawn(drain(child.stdout.take(), self.max_output_bytes));
        let mut stderr = tokio::spawn(drain(child.stderr.take(), self.excerpt_bytes));

        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, child.wait()) => match res {
                Ok(status) => Outcome::Exited(status),
                Err(_) => Outcome::TimedOut,
            },
            () = shutdown.cancelled() => Outcome::Cancelled,
        };
        writer.abort();

        match outcome {
            Outcome::Exited(status) => {
                // Descendants left behind in the group go down with it.
                kill_group(slot.pid);
                slot.reaped = true;
                drop(slot);
                let (out, err) = collect(&mut stdout, &mut stderr).await;
                self.classify(status, &out, &err)
            },
            Outcome::TimedOut => {
                self.terminate(&mut child, slot).await;
                stdout.abort();
                stderr.abort();
                warn!(capability = %self.capability, timeout_s = timeout.as_secs_f64(), "Invocation timed out");
                InvocationResponse::failure(
                    ErrorKind::InvocationTimeout,
                    format!(
                        "{} did not respond within {}s",
                        self.capability,
                        timeout.as_secs_f64()
                    ),
                )
            },
            Outcome::Cancelled => {
                self.terminate(&mut child, slot).await;
                stdout.abort();
                stderr.abort();
                InvocationResponse::failure(
                    ErrorKind::InvocationCancelled,
                    format!("{} was cancelled by shutdown", self.capability),
                )
            },
        }
    }

    fn command(&self) -> Command {
        let program = match (self.program, self.env.and_then(|e| e.interpreter.as_ref())) {
            ("python" | "python3", Some(interpreter)) => interpreter.as_os_str().to_owned(),
            (p, _) => p.into(),
        };

        let mut cmd = Command::new(program);
        cmd.args(self.args)
            .current_dir(self.working_dir)
            .env("PYTHONPATH", self.python_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = self.env {
            let inherited = std::env::var_os("PATH").unwrap_or_default();
            let mut paths = vec![env.bin_dir.clone()];
            paths.extend(std::env::split_paths(&inherited));
            match std::env::join_paths(paths) {
                Ok(joined) => {
                    cmd.env("PATH", joined);
                },
                Err(e) => warn!(error = %e, "Cannot prefix PATH with environment bin dir"),
            }
            cmd.env("VIRTUAL_ENV", &env.root);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }

    /// Kill the whole group and reap the child.
    async fn terminate(&self, child: &mut tokio::process::Child, mut slot: ChildSlot) {
        kill_group(slot.pid);
        if let Err(e) = child.start_kill()
            && e.kind() != std::io::ErrorKind::InvalidInput
        {
            warn!(capability = %self.capability, error = %e, "Failed to kill child");
        }
        if let Err(e) = child.wait().await {
            warn!(capability = %self.capability, error = %e, "Failed to reap child");
        }
        slot.reaped = true;
    }

    fn classify(
        &self,
        status: std::io::Result<std::process::ExitStatus>,
        stdout: &[u8],
        stderr: &[u8],
    ) -> InvocationResponse {
        let status = match status {
            Ok(s) => s,
            Err(e) => {
                return InvocationResponse::failure(
                    ErrorKind::ProcessError,
                    format!("failed to wait for {}: {e}", self.capability),
                );
            },
        };

        if !status.success() {
            let stderr = String::from_utf8_lossy(stderr);
            let stderr = truncate_to_boundary(stderr.trim(), self.excerpt_bytes);
            let message = if stderr.is_empty() {
                format!("{} exited with {status}", self.capability)
            } else {
                format!("{} exited with {status}: {stderr}", self.capability)
            };
            return InvocationResponse::failure(ErrorKind::ProcessError, message);
        }

        InvocationResponse::ok(parse_output(&String::from_utf8_lossy(stdout)))
    }
}

/// Structured text when the output is a JSON object carrying one, else
/// the raw trimmed output.
pub(super) fn parse_output(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(trimmed)
        && let Some(text) = TEXT_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(serde_json::Value::as_str))
    {
        return text.to_owned();
    }
    trimmed.to_owned()
}

async fn write_payload(stdin: Option<ChildStdin>, payload: Vec<u8>) {
    if let Some(mut stdin) = stdin {
        // A child that never reads its input is not an error.
        let _ = stdin.write_all(&payload).await;
        let _ = stdin.write_all(b"\n").await;
        let _ = stdin.shutdown().await;
    }
}

/// Output gathered by the drain tasks, waiting at most [`DRAIN_GRACE`].
/// A stream still held open by a process outside the group is abandoned.
async fn collect(
    stdout: &mut JoinHandle<Vec<u8>>,
    stderr: &mut JoinHandle<Vec<u8>>,
) -> (Vec<u8>, Vec<u8>) {
    match tokio::time::timeout(DRAIN_GRACE, async { tokio::join!(&mut *stdout, &mut *stderr) }).await {
        Ok((out, err)) => (out.unwrap_or_default(), err.unwrap_or_default()),
        Err(_) => {
            stdout.abort();
            stderr.abort();
            (Vec::new(), Vec::new())
        },
    }
}

/// Read a stream to its end, keeping at most `cap` bytes.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut kept = Vec::new();
    let mut buf = [0_u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            },
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_output_prefers_text_keys() {
        assert_eq!(parse_output(r#"{"text": "hello"}"#), "hello");
        assert_eq!(parse_output(r#"{"response": "via response"}"#), "via response");
        assert_eq!(parse_output(r#"{"result": "via result"}"#), "via result");
    }

    #[test]
    fn parse_output_falls_back_to_raw() {
        assert_eq!(parse_output("  plain words \n"), "plain words");
        assert_eq!(parse_output(r#"{"text": 5}"#), r#"{"text": 5}"#);
        assert_eq!(parse_output("[1, 2]"), "[1, 2]");
        assert_eq!(parse_output("{broken"), "{broken");
    }

    #[tokio::test]
    async fn drain_caps_kept_bytes() {
        let data: &[u8] = &[7_u8; 20_000];
        let kept = drain(Some(data), 100).await;
        assert_eq!(kept.len(), 100);
    }
}

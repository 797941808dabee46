//! AgentRunner: spawns an agent executable with the composed prompt as its
//! final argument and captures what it prints.
//!
//! Two modes:
//!   - buffered: wait for exit, return stdout and stderr chunks in arrival order
//!   - streaming: one reader task per pipe, each sanitizing and forwarding
//!     lines as they arrive; both append to a shared output buffer
//!
//! Every invocation has a deadline and honours a cancellation token. On
//! either, the child is killed. The deadline also bounds draining the
//! pipes after the child exits.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::AgentError;
use crate::pipeline::schema::AgentInvocation;
use crate::sanitize::sanitize;

/// Receives each sanitized line in streaming mode. Called from both pipe
/// readers, possibly at the same time.
pub type LineCallback = Arc<dyn Fn(String) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AgentRunner {
    workspace_root: PathBuf,
    default_timeout: Duration,
}

impl AgentRunner {
    pub fn new(workspace_root: impl AsRef<Path>, default_timeout: Duration) -> Self {
        Self {
            workspace_root: workspace_root.as_ref().to_path_buf(),
            default_timeout,
        }
    }

    /// Deadline for an invocation: its own `timeout_secs`, else the default.
    pub fn timeout_for(&self, invocation: &AgentInvocation) -> Duration {
        invocation
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    /// Run to completion and return the sanitized combined output.
    pub async fn run_buffered(
        &self,
        invocation: &AgentInvocation,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AgentError> {
        let timeout = self.timeout_for(invocation);
        let deadline = Instant::now() + timeout;
        let mut child = self.spawn(invocation, prompt)?;

        let raw = Arc::new(Mutex::new(Vec::new()));
        let collectors: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|p| spawn_collector(p, raw.clone())),
            child.stderr.take().map(|p| spawn_collector(p, raw.clone())),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = wait_then_drain(&mut child, collectors, deadline, timeout, cancel).await?;

        let captured = raw.lock().await;
        let output = sanitize(&String::from_utf8_lossy(&captured));
        finish(invocation, status, output)
    }

    /// Run while forwarding each sanitized line to `on_line`, then return the
    /// aggregated output.
    pub async fn run_streaming(
        &self,
        invocation: &AgentInvocation,
        prompt: &str,
        cancel: &CancellationToken,
        on_line: LineCallback,
    ) -> Result<String, AgentError> {
        let timeout = self.timeout_for(invocation);
        let deadline = Instant::now() + timeout;
        let mut child = self.spawn(invocation, prompt)?;

        let buffer = Arc::new(Mutex::new(String::new()));
        let readers: Vec<JoinHandle<()>> = [
            child.stdout.take().map(|p| spawn_line_reader(p, buffer.clone(), on_line.clone())),
            child.stderr.take().map(|p| spawn_line_reader(p, buffer.clone(), on_line.clone())),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = wait_then_drain(&mut child, readers, deadline, timeout, cancel).await?;

        let output = buffer.lock().await.clone();
        finish(invocation, status, output)
    }

    fn spawn(&self, invocation: &AgentInvocation, prompt: &str) -> Result<Child, AgentError> {
        tracing::info!(
            "[AgentRunner] Spawning: {} {} (+ prompt, {} chars, cwd: {})",
            invocation.cmd,
            invocation.args.join(" "),
            prompt.len(),
            self.workspace_root.display(),
        );

        Command::new(&invocation.cmd)
            .args(&invocation.args)
            .arg(prompt)
            .envs(&invocation.env)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::Spawn {
                command: invocation.cmd.clone(),
                message: e.to_string(),
            })
    }
}

/// Wait for the child to exit and for its pipe readers to reach EOF, both
/// bounded by the same deadline. Background processes that inherited the
/// pipes can keep them open after the child exits.
async fn wait_then_drain(
    child: &mut Child,
    mut readers: Vec<JoinHandle<()>>,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExitStatus, AgentError> {
    let result = match wait_for_exit(child, deadline, timeout, cancel).await {
        Ok(status) => {
            let drain = async {
                for reader in readers.iter_mut() {
                    let _ = reader.await;
                }
            };
            tokio::select! {
                () = drain => Ok(status),
                () = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(
                        "[AgentRunner] Agent output still open after {}s, giving up",
                        timeout.as_secs()
                    );
                    Err(AgentError::Timeout(timeout))
                }
                () = cancel.cancelled() => Err(AgentError::Cancelled),
            }
        }
        Err(e) => Err(e),
    };

    if result.is_err() {
        for reader in &readers {
            reader.abort();
        }
    }
    result
}

async fn wait_for_exit(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ExitStatus, AgentError> {
    tokio::select! {
        status = child.wait() => status.map_err(|e| AgentError::Io(format!("Process wait failed: {}", e))),
        () = tokio::time::sleep_until(deadline) => {
            let _ = child.kill().await;
            tracing::warn!("[AgentRunner] Agent timed out after {}s, killed", timeout.as_secs());
            Err(AgentError::Timeout(timeout))
        }
        () = cancel.cancelled() => {
            let _ = child.kill().await;
            tracing::info!("[AgentRunner] Agent cancelled, killed");
            Err(AgentError::Cancelled)
        }
    }
}

fn finish(
    invocation: &AgentInvocation,
    status: ExitStatus,
    output: String,
) -> Result<String, AgentError> {
    if status.success() {
        tracing::debug!(
            "[AgentRunner] {} exited successfully ({} chars of output)",
            invocation.cmd,
            output.len()
        );
        Ok(output)
    } else {
        Err(AgentError::NonZeroExit {
            status: status.to_string(),
            output,
        })
    }
}

/// Append raw chunks from one pipe to the shared buffer as they arrive, so
/// stdout and stderr interleave in arrival order.
fn spawn_collector<R>(mut pipe: R, buffer: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    tracing::debug!("[AgentRunner] Pipe read failed: {}", e);
                    break;
                }
            }
        }
    })
}

fn spawn_line_reader<R>(pipe: R, buffer: Arc<Mutex<String>>, on_line: LineCallback) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&raw);
                    let line = sanitize(text.trim_end_matches(|c: char| c == '\n' || c == '\r'));
                    {
                        let mut buffer = buffer.lock().await;
                        buffer.push_str(&line);
                        buffer.push('\n');
                    }
                    on_line(line);
                }
                Err(e) => {
                    tracing::debug!("[AgentRunner] Pipe read failed: {}", e);
                    break;
                }
            }
        }
    })
}

// ABOUTME: Executor trait turning a command into a stream of execution events.
// ABOUTME: ProcessExecutor runs the executable as a subprocess and streams its stdout in chunks.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command as ProcessCommand};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Largest stdout chunk forwarded as one event.
pub const OUTPUT_CHUNK_SIZE: usize = 128;

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub executable: String,
    pub args: Vec<String>,
}

/// Events emitted while a command runs. The stream ends right after `Finished`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    /// The work has actually started (e.g. the process was spawned).
    Started,
    /// A piece of output, in the order produced.
    Output(String),
    /// Final outcome, exactly once.
    Finished { success: bool, message: String },
}

impl ExecEvent {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecEvent::Finished {
            success: false,
            message: message.into(),
        }
    }
}

/// Runs commands on behalf of the agent.
///
/// Failures are reported in-band as `Finished { success: false, .. }`; an
/// executor never fails the agent itself. Dropping the stream abandons the
/// work.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Unique name for this executor
    fn name(&self) -> &'static str;

    async fn execute(&self, spec: &ExecSpec) -> BoxStream<'static, ExecEvent>;
}

/// Configuration for the subprocess executor
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutorConfig {
    /// Kill the process after this long. None means no limit.
    pub timeout: Option<Duration>,
}

/// Runs the executable with its arguments, streaming stdout as output events.
pub struct ProcessExecutor {
    config: ProcessExecutorConfig,
}

impl ProcessExecutor {
    pub fn new(config: ProcessExecutorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn execute(&self, spec: &ExecSpec) -> BoxStream<'static, ExecEvent> {
        let (tx, rx) = mpsc::channel::<ExecEvent>(32);
        let spec = spec.clone();
        let timeout = self.config.timeout;

        tokio::spawn(async move {
            let (mut child, stdout) = match spawn_process(&spec) {
                Ok(spawned) => spawned,
                Err(message) => {
                    tracing::warn!(executable = %spec.executable, "{message}");
                    let _ = tx.send(ExecEvent::failed(message)).await;
                    return;
                }
            };

            if tx.send(ExecEvent::Started).await.is_err() {
                return;
            }

            let outcome = tokio::select! {
                // Consumer went away; returning drops (and kills) the child.
                () = tx.closed() => return,
                outcome = run_with_timeout(&mut child, stdout, &tx, timeout) => outcome,
            };

            let finished = match outcome {
                Ok(finished) => finished,
                Err(Elapsed(limit)) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill timed-out process");
                    }
                    ExecEvent::failed(format!("Timed out after {}s", limit.as_secs()))
                }
            };
            let _ = tx.send(finished).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

struct Elapsed(Duration);

async fn run_with_timeout(
    child: &mut Child,
    stdout: ChildStdout,
    tx: &mpsc::Sender<ExecEvent>,
    timeout: Option<Duration>,
) -> Result<ExecEvent, Elapsed> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, stream_output(child, stdout, tx))
            .await
            .map_err(|_| Elapsed(limit)),
        None => Ok(stream_output(child, stdout, tx).await),
    }
}

fn spawn_process(spec: &ExecSpec) -> Result<(Child, ChildStdout), String> {
    let mut child = ProcessCommand::new(&spec.executable)
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Setup error: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "Setup error: stdout was not captured".to_string())?;
    Ok((child, stdout))
}

/// Forward stdout chunks, then wait for the exit status.
///
/// A multi-byte character split across reads is held back until it is whole,
/// so every chunk is valid UTF-8 and at most `OUTPUT_CHUNK_SIZE` bytes.
async fn stream_output(
    child: &mut Child,
    mut stdout: ChildStdout,
    tx: &mpsc::Sender<ExecEvent>,
) -> ExecEvent {
    let mut buf = [0u8; OUTPUT_CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::with_capacity(OUTPUT_CHUNK_SIZE);
    loop {
        let room = OUTPUT_CHUNK_SIZE - pending.len();
        match stdout.read(&mut buf[..room]).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let chunk = drain_utf8(&mut pending);
                if chunk.is_empty() {
                    continue;
                }
                if tx.send(ExecEvent::Output(chunk)).await.is_err() {
                    return ExecEvent::failed("Output consumer closed");
                }
            }
            Err(e) => return ExecEvent::failed(format!("Read error: {e}")),
        }
    }

    // A character cut off by EOF will never complete.
    if !pending.is_empty() {
        let rest = String::from_utf8_lossy(&pending).into_owned();
        if tx.send(ExecEvent::Output(rest)).await.is_err() {
            return ExecEvent::failed("Output consumer closed");
        }
    }

    match child.wait().await {
        Ok(status) => exit_event(status),
        Err(e) => ExecEvent::failed(format!("Execution failed: {e}")),
    }
}

/// Decode everything in `pending` except an incomplete trailing character,
/// which stays behind for the next read. Invalid bytes become U+FFFD.
fn drain_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::with_capacity(pending.len());
    loop {
        match std::str::from_utf8(&pending[..]) {
            Ok(text) => {
                out.push_str(text);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    None => {
                        pending.drain(..valid);
                        return out;
                    }
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                }
            }
        }
    }
}

fn exit_event(status: ExitStatus) -> ExecEvent {
    if status.success() {
        ExecEvent::Finished {
            success: true,
            message: "Workflow executed successfully.".to_string(),
        }
    } else {
        ExecEvent::failed(format!("Execution failed: {status}"))
    }
}

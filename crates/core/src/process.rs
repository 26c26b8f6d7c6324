// crates/core/src/process.rs
//! Supervision of one external tool invocation.
//!
//! [`ProcessRunner::start`] spawns the program with an argument vector (never
//! through a shell), merges stdout and stderr into a single chunk channel,
//! and hands the child to a supervisor task that owns it until exit. Stop
//! requests travel through a [`StopSignal`]: the supervisor sends SIGTERM,
//! waits for the grace period, then kills.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::error::ProcessError;
use crate::tail::Utf8Decoder;

const READ_BUF_SIZE: usize = 8 * 1024;

/// A fully planned invocation: program plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl TransferCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Human-readable rendering for logs. Never executed.
    pub fn display(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Cloneable stop request shared between the orchestrator and a supervisor.
///
/// A stop requested before the process is launched is honoured as soon as
/// it starts.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Debug, Default)]
struct StopInner {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination. Returns `false` if a stop was already requested.
    pub fn signal_stop(&self) -> bool {
        let first = !self.inner.requested.swap(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        first
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Whether both handles control the same process.
    pub fn same_as(&self, other: &StopSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve once a stop has been requested.
    pub async fn requested(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

/// How a supervised process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Raw exit code; `128 + signal` when the process died from a signal.
    pub code: i32,
    /// A stop was requested before the process exited.
    pub stopped: bool,
    /// The grace period ran out and the process was killed.
    pub killed: bool,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Launches supervised processes with a common stop grace period.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    grace: Duration,
}

impl ProcessRunner {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Spawn `command`. Launch failures are reported here, synchronously,
    /// so the caller can fail the job immediately.
    pub fn start(
        &self,
        command: &TransferCommand,
        stop: StopSignal,
    ) -> Result<RunningProcess, ProcessError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            // Null stdin so the child never blocks waiting for input
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            tracing::warn!(program = %command.program.display(), error = %e, "failed to spawn");
            ProcessError::launch(&command.program, e)
        })?;

        let stdout = child.stdout.take().ok_or_else(|| ProcessError::MissingPipe {
            program: command.program.clone(),
            stream: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or_else(|| ProcessError::MissingPipe {
            program: command.program.clone(),
            stream: "stderr",
        })?;

        let pid = child.id();
        tracing::debug!(pid, command = %command.display(), "process started");

        let (tx, rx) = mpsc::channel::<String>(64);
        tokio::spawn(pump(stdout, tx.clone()));
        tokio::spawn(pump(stderr, tx));

        let supervisor = tokio::spawn(supervise(child, stop.clone(), self.grace));

        Ok(RunningProcess {
            pid,
            output: OutputStream { rx },
            exit: ExitWaiter { handle: supervisor },
            stop,
        })
    }
}

/// Handle to a live process: its merged output and its eventual exit.
#[derive(Debug)]
pub struct RunningProcess {
    pid: Option<u32>,
    output: OutputStream,
    exit: ExitWaiter,
    stop: StopSignal,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next chunk of output (stdout and stderr interleaved). `None` once both
    /// streams have closed.
    pub async fn read_output(&mut self) -> Option<String> {
        self.output.next_chunk().await
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ask the process to terminate, escalating after the grace period.
    pub fn signal_stop(&self) -> bool {
        self.stop.signal_stop()
    }

    /// Block until the process has exited.
    pub async fn wait(self) -> Result<ProcessExit, ProcessError> {
        self.exit.await
    }

    /// Split into the output stream and the exit future so both can be
    /// polled from one `select!`.
    pub fn into_parts(self) -> (OutputStream, ExitWaiter) {
        (self.output, self.exit)
    }
}

/// Merged stdout/stderr chunks of a running process.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<String>,
}

impl OutputStream {
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Non-blocking variant used to drain whatever is already buffered.
    pub fn try_next_chunk(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Resolves with the process exit once the supervisor task finishes.
#[derive(Debug)]
pub struct ExitWaiter {
    handle: JoinHandle<Result<ProcessExit, ProcessError>>,
}

impl Future for ExitWaiter {
    type Output = Result<ProcessExit, ProcessError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined
                .map_err(|e| ProcessError::Supervisor(e.to_string()))
                .and_then(|exit| exit)
        })
    }
}

async fn pump<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = Utf8Decoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && tx.send(text).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "output pipe read failed");
                break;
            }
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = tx.send(rest).await;
    }
}

async fn supervise(
    mut child: Child,
    stop: StopSignal,
    grace: Duration,
) -> Result<ProcessExit, ProcessError> {
    let status = tokio::select! {
        status = child.wait() => status.map_err(ProcessError::Wait)?,
        _ = stop.requested() => {
            return terminate(child, grace).await;
        }
    };
    Ok(ProcessExit {
        code: exit_code(status),
        stopped: stop.is_requested(),
        killed: false,
    })
}

async fn terminate(mut child: Child, grace: Duration) -> Result<ProcessExit, ProcessError> {
    let pid = child.id();
    send_terminate(pid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => Ok(ProcessExit {
            code: exit_code(status.map_err(ProcessError::Wait)?),
            stopped: true,
            killed: false,
        }),
        Err(_) => {
            tracing::warn!(pid, grace_secs = grace.as_secs_f64(), "grace period elapsed, killing");
            if let Err(e) = child.start_kill() {
                tracing::warn!(pid, error = %e, "kill failed");
            }
            let status = child.wait().await.map_err(ProcessError::Wait)?;
            Ok(ProcessExit {
                code: exit_code(status),
                stopped: true,
                killed: true,
            })
        }
    }
}

#[cfg(unix)]
fn send_terminate(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    if let Err(errno) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::warn!(pid, %errno, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_terminate(_pid: Option<u32>) {
    // No graceful signal available; the grace timeout escalates to a kill.
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

//! Supervised worker processes
//!
//! A [`WorkerSupervisor`] owns at most one child process and drives it
//! through the engine state machine:
//!
//! ```text
//! Stopped/Failed --start--> Starting --marker--> Running --stop--> Stopping --> Stopped
//!                              |                    |
//!                              | timeout / exit     | exit
//!                              v                    v
//!                           Failed              Stopped (0) / Failed(ExitCode)
//! ```
//!
//! `start` and `stop` are serialized by an async lifecycle lock. The lock is
//! released while `start` waits for readiness so that `stop` can cancel a
//! pending start. A background listener owns the child: it forwards output to
//! the log, reports readiness and records the exit.

use crate::{EngineError, Result};

use parking_lot::Mutex;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tensor_core::{EngineState, FailureReason, FrontendConfig, WorkerConfig};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// How long to wait for a process to disappear after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// How long to keep reading output after the process has exited
const OUTPUT_DRAIN: Duration = Duration::from_millis(100);

/// Per-worker supervision settings
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOptions {
    /// Label used in logs
    pub name: String,

    /// Substring of a stdout line that marks the worker as ready
    pub readiness_marker: String,

    pub startup_timeout: Duration,

    /// Time between SIGTERM and SIGKILL
    pub shutdown_grace: Duration,
}

impl WorkerOptions {
    pub fn new(name: impl Into<String>, readiness_marker: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            readiness_marker: readiness_marker.into(),
            startup_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Options for the tensor worker
    pub fn tensor_worker(config: &WorkerConfig) -> Self {
        Self::new("tensor-worker", config.readiness_marker.clone())
            .with_startup_timeout(config.startup_timeout())
            .with_shutdown_grace(config.shutdown_grace())
    }

    /// Options for the model-serving front end
    pub fn frontend(config: &FrontendConfig) -> Self {
        Self::new("frontend", config.readiness_marker.clone())
            .with_startup_timeout(config.startup_timeout())
            .with_shutdown_grace(config.shutdown_grace())
    }
}

/// What to execute for one start attempt
#[derive(Debug)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
    pub working_dir: Option<PathBuf>,

    /// Deleted when the worker handle is released
    pub config_file: Option<TempPath>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            working_dir: None,
            config_file: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_config_file(mut self, file: TempPath) -> Self {
        self.config_file = Some(file);
        self
    }
}

/// Result of a successful `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was spawned and signalled readiness
    Started { pid: u32 },
    /// A process was already starting or running; nothing was spawned
    AlreadyActive { pid: Option<u32> },
}

impl StartOutcome {
    pub fn pid(&self) -> Option<u32> {
        match self {
            StartOutcome::Started { pid } => Some(*pid),
            StartOutcome::AlreadyActive { pid } => *pid,
        }
    }
}

/// Result of a successful `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process was terminated; `None` when its exit could not be confirmed
    Stopped { exit_code: Option<i32> },
    NotRunning,
}

/// Notification of a worker exiting on its own while running
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerExit {
    pub pid: u32,
    pub code: i32,
    pub state: EngineState,
}

type ExitHook = Arc<dyn Fn(&WorkerExit) + Send + Sync>;

struct WorkerHandle {
    pid: u32,
    generation: u64,
    started_at: Instant,
    exit_rx: watch::Receiver<Option<i32>>,
    _config_file: Option<TempPath>,
}

#[derive(Default)]
struct Slot {
    state: EngineState,
    handle: Option<WorkerHandle>,
}

impl Slot {
    fn holds(&self, generation: u64) -> bool {
        self.handle.as_ref().map(|h| h.generation) == Some(generation)
    }
}

/// Owner of a single supervised worker process
pub struct WorkerSupervisor {
    options: WorkerOptions,
    lifecycle: tokio::sync::Mutex<()>,
    slot: Arc<Mutex<Slot>>,
    generation: AtomicU64,
    spawns: AtomicUsize,
    exit_hook: Option<ExitHook>,
}

impl WorkerSupervisor {
    pub fn new(options: WorkerOptions) -> Self {
        Self {
            options,
            lifecycle: tokio::sync::Mutex::new(()),
            slot: Arc::new(Mutex::new(Slot::default())),
            generation: AtomicU64::new(0),
            spawns: AtomicUsize::new(0),
            exit_hook: None,
        }
    }

    /// Call `hook` whenever a running worker exits without being asked to
    pub fn with_exit_hook(mut self, hook: impl Fn(&WorkerExit) + Send + Sync + 'static) -> Self {
        self.exit_hook = Some(Arc::new(hook));
        self
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn state(&self) -> EngineState {
        self.slot.lock().state.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.slot.lock().handle.as_ref().map(|h| h.pid)
    }

    pub fn uptime(&self) -> Option<Duration> {
        self.slot.lock().handle.as_ref().map(|h| h.started_at.elapsed())
    }

    /// Number of processes spawned over the supervisor's lifetime
    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    /// Start the worker unless one is already starting or running.
    ///
    /// `prepare` runs under the lifecycle lock, only when a new process is
    /// actually needed. If it fails nothing is spawned and the state becomes
    /// `Failed`. Returns once the readiness marker is seen, the startup timeout
    /// elapses, the process exits or a concurrent `stop` cancels the attempt.
    pub async fn start<F>(&self, prepare: F) -> Result<StartOutcome>
    where
        F: FnOnce() -> Result<LaunchSpec>,
    {
        let lifecycle = self.lifecycle.lock().await;

        {
            let slot = self.slot.lock();
            if slot.state.is_active() {
                debug!("{} already {}, not starting another", self.options.name, slot.state);
                return Ok(StartOutcome::AlreadyActive {
                    pid: slot.handle.as_ref().map(|h| h.pid),
                });
            }
        }

        let launch = match prepare() {
            Ok(launch) => launch,
            Err(e) => return Err(self.fail(e)),
        };

        let mut child = match self.spawn(&launch) {
            Ok(child) => child,
            Err(e) => return Err(self.fail(e)),
        };

        let pid = child.id().unwrap_or_default();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (ready_tx, ready_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        {
            let mut slot = self.slot.lock();
            slot.state = EngineState::Starting;
            slot.handle = Some(WorkerHandle {
                pid,
                generation,
                started_at: Instant::now(),
                exit_rx,
                _config_file: launch.config_file,
            });
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        info!(pid, worker = %self.options.name, "Worker spawned, waiting for readiness");

        let listener = Listener {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            marker: self.options.readiness_marker.clone(),
            ready_tx: Some(ready_tx),
            exit_tx,
            slot: Arc::clone(&self.slot),
            generation,
            pid,
            name: self.options.name.clone(),
            hook: self.exit_hook.clone(),
        };
        tokio::spawn(listener.run());

        drop(lifecycle);

        match tokio::time::timeout(self.options.startup_timeout, ready_rx).await {
            Ok(Ok(())) => self.promote(generation, pid),
            // The listener gave up on readiness: the process is gone
            Ok(Err(_)) => Err(self.settled_error()),
            Err(_) => self.abort_start(generation).await,
        }
    }

    /// Stop the worker: SIGTERM, then SIGKILL after the grace period.
    ///
    /// Always ends in `Stopped` within the grace period plus a short kill wait.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let _lifecycle = self.lifecycle.lock().await;

        let handle = {
            let mut slot = self.slot.lock();
            match slot.handle.take() {
                Some(handle) => {
                    slot.state = EngineState::Stopping;
                    handle
                }
                None => {
                    debug!("{} is not running ({})", self.options.name, slot.state);
                    return Ok(StopOutcome::NotRunning);
                }
            }
        };

        let pid = handle.pid;
        info!(pid, worker = %self.options.name, "Stopping worker");
        let exit_code = self.terminate(handle).await;

        self.slot.lock().state = EngineState::Stopped;
        info!(pid, worker = %self.options.name, ?exit_code, "Worker stopped");
        Ok(StopOutcome::Stopped { exit_code })
    }

    fn spawn(&self, launch: &LaunchSpec) -> Result<Child> {
        debug!("Spawning {} {:?}", launch.program.display(), launch.args);

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .envs(launch.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &launch.working_dir {
            command.current_dir(dir);
        }

        command
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", launch.program.display(), e)))
    }

    /// Record a failed start attempt and hand the error back
    fn fail(&self, err: EngineError) -> EngineError {
        let reason = err
            .failure_reason()
            .unwrap_or_else(|| FailureReason::SpawnError(err.to_string()));
        error!(worker = %self.options.name, "Start failed: {}", err);
        self.slot.lock().state = EngineState::Failed(reason);
        err
    }

    fn promote(&self, generation: u64, pid: u32) -> Result<StartOutcome> {
        let mut slot = self.slot.lock();
        if slot.holds(generation) && matches!(slot.state, EngineState::Starting) {
            slot.state = EngineState::Running;
            info!(pid, worker = %self.options.name, "Worker ready");
            return Ok(StartOutcome::Started { pid });
        }
        drop(slot);
        Err(self.settled_error())
    }

    async fn abort_start(&self, generation: u64) -> Result<StartOutcome> {
        let _lifecycle = self.lifecycle.lock().await;

        let handle = {
            let mut slot = self.slot.lock();
            if slot.holds(generation) && matches!(slot.state, EngineState::Starting) {
                slot.state = EngineState::Stopping;
                slot.handle.take()
            } else {
                None
            }
        };

        let Some(handle) = handle else {
            return Err(self.settled_error());
        };

        warn!(
            pid = handle.pid,
            worker = %self.options.name,
            "No readiness marker within {:?}, terminating",
            self.options.startup_timeout
        );
        self.terminate(handle).await;
        self.slot.lock().state = EngineState::Failed(FailureReason::Timeout);
        Err(EngineError::Timeout(self.options.startup_timeout))
    }

    /// Error describing why a start attempt no longer owns the worker
    fn settled_error(&self) -> EngineError {
        match self.slot.lock().state.failure() {
            Some(FailureReason::ExitCode(code)) => EngineError::ExitCode(*code),
            Some(FailureReason::Timeout) => EngineError::Timeout(self.options.startup_timeout),
            Some(FailureReason::SpawnError(msg)) => EngineError::Spawn(msg.clone()),
            _ => EngineError::Cancelled,
        }
    }

    async fn terminate(&self, mut handle: WorkerHandle) -> Option<i32> {
        let exited = *handle.exit_rx.borrow();
        if exited.is_some() {
            return exited;
        }

        send_signal(handle.pid, Signal::Term);
        if let Ok(code) =
            tokio::time::timeout(self.options.shutdown_grace, wait_exit(&mut handle.exit_rx)).await
        {
            return code;
        }

        warn!(
            pid = handle.pid,
            worker = %self.options.name,
            "Still running after {:?}, forcing kill",
            self.options.shutdown_grace
        );
        send_signal(handle.pid, Signal::Kill);
        match tokio::time::timeout(KILL_WAIT, wait_exit(&mut handle.exit_rx)).await {
            Ok(code) => code,
            Err(_) => {
                error!(pid = handle.pid, "Process did not exit after SIGKILL");
                None
            }
        }
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        if let Some(handle) = self.slot.lock().handle.take() {
            warn!(pid = handle.pid, "WorkerSupervisor dropped with live worker, killing");
            send_signal(handle.pid, Signal::Kill);
        }
    }
}

impl std::fmt::Debug for WorkerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSupervisor")
            .field("name", &self.options.name)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

/// Background task owning the child process
struct Listener {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    marker: String,
    ready_tx: Option<oneshot::Sender<()>>,
    exit_tx: watch::Sender<Option<i32>>,
    slot: Arc<Mutex<Slot>>,
    generation: u64,
    pid: u32,
    name: String,
    hook: Option<ExitHook>,
}

impl Listener {
    async fn run(mut self) {
        let mut stdout = self.stdout.take().map(OutputLines::new);
        let mut stderr = self.stderr.take().map(OutputLines::new);

        let status = loop {
            tokio::select! {
                line = next_line(&mut stdout) => match line {
                    Some(line) => self.on_stdout(line),
                    None => stdout = None,
                },
                line = next_line(&mut stderr) => match line {
                    Some(line) => warn!(pid = self.pid, worker = %self.name, "{}", line),
                    None => stderr = None,
                },
                status = self.child.wait() => break status,
            }
        };

        if stdout.is_some() {
            let drain = async {
                while let Some(line) = next_line(&mut stdout).await {
                    self.on_stdout(line);
                }
            };
            let _ = tokio::time::timeout(OUTPUT_DRAIN, drain).await;
        }

        let code = match status {
            Ok(status) => exit_code(&status),
            Err(e) => {
                error!(pid = self.pid, "Failed to wait for worker: {}", e);
                -1
            }
        };

        self.on_exit(code);
    }

    fn on_stdout(&mut self, line: String) {
        info!(pid = self.pid, worker = %self.name, "{}", line);
        if line.contains(&self.marker) {
            if let Some(tx) = self.ready_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    fn on_exit(self, code: i32) {
        let (released, was_running, next) = {
            let mut slot = self.slot.lock();
            if !slot.holds(self.generation) {
                // Already released by stop or a startup timeout
                (None, false, None)
            } else {
                let was_running = slot.state.is_running();
                let next = if was_running && code == 0 {
                    EngineState::Stopped
                } else {
                    EngineState::Failed(FailureReason::ExitCode(code))
                };
                slot.state = next.clone();
                (slot.handle.take(), was_running, Some(next))
            }
        };

        // Publish the exit only after the slot reflects it
        self.exit_tx.send_replace(Some(code));
        drop(released);

        let Some(state) = next else {
            return;
        };

        if !was_running {
            warn!(pid = self.pid, worker = %self.name, code, "Worker exited before signalling readiness");
            return;
        }

        if code == 0 {
            info!(pid = self.pid, worker = %self.name, "Worker exited");
        } else {
            warn!(pid = self.pid, worker = %self.name, code, "Worker exited unexpectedly");
        }
        if let Some(hook) = &self.hook {
            hook(&WorkerExit {
                pid: self.pid,
                code,
                state,
            });
        }
    }
}

/// Line reader that tolerates output which is not valid UTF-8
struct OutputLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// Next line with invalid sequences replaced, `None` at end of stream.
    ///
    /// Cancel safe: bytes of a partially read line stay in `buf` until the
    /// newline arrives on a later call.
    async fn next(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) if self.buf.is_empty() => None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&self.buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                self.buf.clear();
                Some(line)
            }
            Err(e) => {
                debug!("Worker output closed: {}", e);
                None
            }
        }
    }
}

async fn next_line<R>(lines: &mut Option<OutputLines<R>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_exit(rx: &mut watch::Receiver<Option<i32>>) -> Option<i32> {
    match rx.wait_for(Option::is_some).await {
        Ok(code) => *code,
        Err(_) => None,
    }
}

/// Exit code, or 128 + signal number for signal deaths
fn exit_code(status: &ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(-1)
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal as NixSignal};
        use nix::unistd::Pid;

        let sig = match signal {
            Signal::Term => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
        };
        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => debug!(pid, "Sent {:?}", sig),
            Err(e) => debug!(pid, "Failed to send {:?}: {}", sig, e),
        }
    }

    #[cfg(not(unix))]
    {
        warn!(pid, "Cannot deliver {:?} on this platform", signal);
    }
}

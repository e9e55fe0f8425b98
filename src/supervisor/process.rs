//! Process supervision for one client
//!
//! `start()` provisions the binary, spawns it with piped stdio and hands the
//! child to a monitor task. The monitor owns the child and is the only place
//! output is read and exit is observed; the supervisor talks to it through
//! shared state and a control channel.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};

use super::bridge::{BridgeLine, Inbound, LineKind, ProtocolBridge, dispatch};
use super::events::{Notification, OutputStream, SupervisorEvent, SupervisorFailure};
use super::state::SupervisorState;
use crate::clients::ClientDescriptor;
use crate::config::SupervisorConfig;
use crate::error::{GridError, Result};
use crate::flags::{self, SettingsMap};
use crate::release::{Release, ReleaseProvider, VersionConstraint};

/// How long to keep reading output after the process has exited
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const READ_BUFFER_SIZE: usize = 8192;
const SPAWN_ATTEMPTS: u32 = 5;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(50);

// ============================================================================
// Shared state
// ============================================================================

enum Control {
    Interrupt(oneshot::Sender<io::Result<()>>),
}

/// Handle to the attached process. Present only while the monitor runs.
struct ProcessHandle {
    pid: Option<u32>,
    control_tx: mpsc::UnboundedSender<Control>,
}

struct Shared {
    client_name: String,
    state: watch::Sender<SupervisorState>,
    event_tx: broadcast::Sender<SupervisorEvent>,
    logs: RwLock<Vec<String>>,
    release: RwLock<Option<Release>>,
    settings: RwLock<SettingsMap>,
    process: Mutex<Option<ProcessHandle>>,
    /// Kept apart from `process`: a write can park on a full pipe, and
    /// stop must still reach the monitor meanwhile
    stdin: Mutex<Option<ChildStdin>>,
    /// Bumped every time a process exit has been fully handled
    exits: watch::Sender<u64>,
}

impl Shared {
    fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    fn emit(&self, event: SupervisorEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn transition(&self, to: SupervisorState) -> Result<()> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(to) {
                *current = to;
                true
            } else {
                result = Err(GridError::InvalidTransition { from: *current, to });
                false
            }
        });
        result
    }

    /// Transition and emit the matching lifecycle event.
    /// Returns false (and logs) if the edge is not allowed.
    fn set_state(&self, to: SupervisorState) -> bool {
        if let Err(e) = self.transition(to) {
            debug!(client = %self.client_name, error = %e, "Ignoring state change");
            return false;
        }
        debug!(client = %self.client_name, state = %to, "State changed");
        let event = match to {
            SupervisorState::Starting => SupervisorEvent::Starting,
            SupervisorState::Started => SupervisorEvent::Started,
            SupervisorState::Connected => SupervisorEvent::Connect,
            SupervisorState::Stopping => SupervisorEvent::Stopping,
            SupervisorState::Stopped => SupervisorEvent::Stopped,
            // failures carry their own payload, see fail()
            SupervisorState::Error => return true,
        };
        self.emit(event);
        true
    }

    /// Move to Error and report `err`
    fn fail(&self, err: &GridError) {
        error!(client = %self.client_name, error = %err, "Supervisor error");
        if self.state() != SupervisorState::Error {
            self.set_state(SupervisorState::Error);
        }
        self.emit(SupervisorEvent::Error(SupervisorFailure::from(err)));
    }

    async fn last_logs(&self, n: usize) -> Vec<String> {
        let logs = self.logs.read().await;
        logs[logs.len().saturating_sub(n)..].to_vec()
    }

    /// Write one JSON line to the child's stdin
    async fn write_message<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        if self.process.lock().await.is_none() {
            return Err(GridError::NotRunning);
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(GridError::NotRunning)?;

        let line = format!("{}\n", serde_json::to_string(message)?);
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;

        trace!(client = %self.client_name, line = %line.trim_end(), "Sent message");
        Ok(())
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Owns one subprocess instance for one client.
///
/// Concurrent `start()` calls on the same instance are a caller error; pair
/// each start with a stop.
pub struct ProcessSupervisor {
    client: Arc<ClientDescriptor>,
    provider: Arc<ReleaseProvider>,
    config: SupervisorConfig,
    shared: Arc<Shared>,
}

impl ProcessSupervisor {
    pub fn new(
        client: impl Into<Arc<ClientDescriptor>>,
        provider: Arc<ReleaseProvider>,
        config: SupervisorConfig,
    ) -> Self {
        let client = client.into();
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (state, _) = watch::channel(SupervisorState::Stopped);
        let (exits, _) = watch::channel(0);

        let shared = Arc::new(Shared {
            client_name: client.name.clone(),
            state,
            event_tx,
            logs: RwLock::new(Vec::new()),
            release: RwLock::new(None),
            settings: RwLock::new(SettingsMap::new()),
            process: Mutex::new(None),
            stdin: Mutex::new(None),
            exits,
        });

        Self {
            client,
            provider,
            config,
            shared,
        }
    }

    pub fn client(&self) -> &ClientDescriptor {
        &self.client
    }

    /// Subscribe to lifecycle, log and notification events
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.state()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.shared.state.subscribe()
    }

    /// Abnormal exit counts as not running
    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Every line the process has written, across restarts
    pub async fn logs(&self) -> Vec<String> {
        self.shared.logs.read().await.clone()
    }

    pub async fn last_logs(&self, n: usize) -> Vec<String> {
        self.shared.last_logs(n).await
    }

    /// Release resolved by the most recent start
    pub async fn release(&self) -> Option<Release> {
        self.shared.release.read().await.clone()
    }

    /// User settings (without schema defaults)
    pub async fn settings(&self) -> SettingsMap {
        self.shared.settings.read().await.clone()
    }

    /// User settings layered over the client's defaults
    pub async fn effective_settings(&self) -> SettingsMap {
        flags::merge_with_defaults(&*self.shared.settings.read().await, &self.client.settings)
    }

    /// Replace the user settings; used by the next start
    pub async fn set_settings(&self, settings: SettingsMap) {
        *self.shared.settings.write().await = settings;
    }

    pub async fn pid(&self) -> Option<u32> {
        self.shared.process.lock().await.as_ref().and_then(|h| h.pid)
    }

    pub async fn ipc_path(&self) -> Option<PathBuf> {
        let logs = self.shared.logs.read().await;
        self.client.resolve_ipc(&logs)
    }

    // ------------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------------

    /// Provision, spawn, and wait for the first output line
    pub async fn start(&self) -> Result<()> {
        match self.state() {
            SupervisorState::Stopped => {}
            SupervisorState::Error => {
                self.shared.transition(SupervisorState::Stopped)?;
                debug!(client = %self.client.name, "Recovering from error state");
            }
            other => {
                return Err(GridError::start(GridError::InvalidTransition {
                    from: other,
                    to: SupervisorState::Starting,
                }));
            }
        }

        info!(client = %self.client.name, "Starting client");
        self.shared.set_state(SupervisorState::Starting);

        match self.launch().await {
            Ok(()) => {
                info!(client = %self.client.name, "Client started");
                Ok(())
            }
            Err(e) => {
                // already reported by the monitor or by a concurrent stop
                if !matches!(
                    self.state(),
                    SupervisorState::Error | SupervisorState::Stopping | SupervisorState::Stopped
                ) {
                    self.shared.fail(&e);
                }
                Err(GridError::start(e))
            }
        }
    }

    fn constraint(&self) -> Result<Option<VersionConstraint>> {
        self.config
            .version_constraint
            .as_deref()
            .or(self.client.version_constraint.as_deref())
            .map(VersionConstraint::parse)
            .transpose()
    }

    async fn launch(&self) -> Result<()> {
        let constraint = self.constraint()?;
        let events = self.shared.event_tx.clone();
        let release = self
            .provider
            .get_latest_release(constraint.as_ref(), move |percent| {
                let _ = events.send(SupervisorEvent::DownloadProgress { percent });
            })
            .await?;
        // visible for diagnostics even if extraction fails
        *self.shared.release.write().await = Some(release.clone());

        let binary = self.provider.extract_binary(&release).await?;
        let release = release.with_binary_path(binary.clone());
        *self.shared.release.write().await = Some(release.clone());
        let settings = self.shared.settings.read().await.clone();
        let args = self.client.launch_flags(&settings, self.provider.cache_dir())?;

        info!(
            client = %self.client.name,
            version = %release.version,
            binary = %binary.display(),
            args = ?args,
            "Spawning process"
        );
        let mut child = spawn_with_retry(&binary, &args).await?;
        let pid = child.id();

        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(OutputStream::Stdout, stdout, chunk_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(OutputStream::Stderr, stderr, chunk_tx.clone());
        }
        drop(chunk_tx);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        *self.shared.stdin.lock().await = child.stdin.take();
        *self.shared.process.lock().await = Some(ProcessHandle { pid, control_tx });

        let monitor = Monitor {
            shared: self.shared.clone(),
            bridge: ProtocolBridge::new(self.client.readiness_marker.clone()),
            child,
            chunks: chunk_rx,
            control: control_rx,
            ready: Some(ready_tx),
            auto_ack: self.config.auto_ack_notifications,
            error_log_lines: self.config.error_log_lines,
        };
        tokio::spawn(monitor.run());

        let outcome = match self.config.startup_timeout {
            Some(limit) => match tokio::time::timeout(limit, ready_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = GridError::StartupTimeout(limit);
                    self.shared.fail(&err);
                    self.request_interrupt().await;
                    return Err(err);
                }
            },
            None => ready_rx.await,
        };

        // sender dropped: the monitor finished without a verdict (stopped mid-start)
        outcome.unwrap_or(Err(GridError::Cancelled))
    }

    /// Fire an interrupt without waiting for the process to exit
    async fn request_interrupt(&self) {
        let control = self
            .shared
            .process
            .lock()
            .await
            .as_ref()
            .map(|h| h.control_tx.clone());
        if let Some(control) = control {
            let (tx, _rx) = oneshot::channel();
            let _ = control.send(Control::Interrupt(tx));
        }
    }

    // ------------------------------------------------------------------------
    // Stop
    // ------------------------------------------------------------------------

    /// Interrupt the process and wait for it to exit.
    /// Returns immediately when nothing is attached.
    pub async fn stop(&self) -> Result<bool> {
        let mut exits = self.shared.exits.subscribe();
        let control = {
            let guard = self.shared.process.lock().await;
            match guard.as_ref() {
                Some(handle) => handle.control_tx.clone(),
                None => return Ok(true),
            }
        };

        info!(client = %self.client.name, "Stopping client");
        if self.state().can_transition_to(SupervisorState::Stopping) {
            self.shared.set_state(SupervisorState::Stopping);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if control.send(Control::Interrupt(reply_tx)).is_ok() {
            // a dropped reply means the process exited before the signal was sent
            if let Ok(Err(e)) = reply_rx.await {
                let err = GridError::Stop(format!("failed to interrupt process: {}", e));
                self.shared.fail(&err);
                return Err(err);
            }
        }

        let _ = exits.changed().await;
        debug!(client = %self.client.name, "Process exit observed");
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Write `message` as one JSON line to the process. Fire-and-forget.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        self.shared.write_message(message).await
    }

    /// `{"jsonrpc":"2.0","id":<id>,"result":<result>}`
    pub async fn reply(&self, id: Value, result: Value) -> Result<()> {
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await
    }

    /// Answer an approval request. Notifications without an id need no reply.
    pub async fn approve(&self, notification: &Notification, approved: bool) -> Result<()> {
        match &notification.id {
            Some(id) if !id.is_null() => self.reply(id.clone(), Value::Bool(approved)).await,
            _ => {
                debug!(method = %notification.method, "No reply expected");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("client", &self.client.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Spawning and reading
// ============================================================================

async fn spawn_with_retry(binary: &Path, args: &[String]) -> Result<Child> {
    let mut attempt = 1;
    loop {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(child) => return Ok(child),
            // a freshly extracted binary may still be open for writing elsewhere
            Err(e) if is_text_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                debug!(attempt, binary = %binary.display(), "Binary busy, retrying spawn");
                attempt += 1;
                tokio::time::sleep(SPAWN_RETRY_DELAY).await;
            }
            Err(source) => {
                return Err(GridError::Spawn {
                    binary: binary.display().to_string(),
                    source,
                });
            }
        }
    }
}

#[cfg(unix)]
fn is_text_busy(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_err: &io::Error) -> bool {
    false
}

enum Chunk {
    Data(OutputStream, Vec<u8>),
    Closed(OutputStream),
}

fn spawn_reader<R>(stream: OutputStream, mut reader: R, tx: mpsc::Sender<Chunk>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Chunk::Data(stream, buf[..n].to_vec())).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(stream = stream.as_str(), error = %e, "Output read failed");
                    break;
                }
            }
        }
        let _ = tx.send(Chunk::Closed(stream)).await;
    });
}

// ============================================================================
// Monitor
// ============================================================================

/// Owns the child; runs until the process has exited and its output drained
struct Monitor {
    shared: Arc<Shared>,
    bridge: ProtocolBridge,
    child: Child,
    chunks: mpsc::Receiver<Chunk>,
    control: mpsc::UnboundedReceiver<Control>,
    ready: Option<oneshot::Sender<Result<()>>>,
    auto_ack: bool,
    error_log_lines: usize,
}

impl Monitor {
    async fn run(mut self) {
        let mut exit: Option<io::Result<ExitStatus>> = None;
        let mut output_done = false;
        let mut control_open = true;
        let drain = tokio::time::sleep(Duration::from_secs(86_400));
        tokio::pin!(drain);

        loop {
            tokio::select! {
                chunk = self.chunks.recv(), if !output_done => match chunk {
                    Some(Chunk::Data(stream, bytes)) => {
                        for line in self.bridge.feed(stream, &bytes) {
                            self.on_line(line).await;
                        }
                    }
                    Some(Chunk::Closed(stream)) => {
                        if let Some(line) = self.bridge.finish(stream) {
                            self.on_line(line).await;
                        }
                    }
                    None => output_done = true,
                },
                status = self.child.wait(), if exit.is_none() => {
                    exit = Some(status);
                    drain.as_mut().reset(tokio::time::Instant::now() + DRAIN_TIMEOUT);
                }
                control = self.control.recv(), if control_open && exit.is_none() => match control {
                    Some(Control::Interrupt(reply)) => {
                        let _ = reply.send(self.interrupt());
                    }
                    None => control_open = false,
                },
                _ = &mut drain, if exit.is_some() && !output_done => {
                    debug!(client = %self.shared.client_name, "Output still open after exit, detaching");
                    output_done = true;
                }
                else => break,
            }

            if exit.is_some() && output_done {
                break;
            }
        }

        let status = exit.unwrap_or_else(|| Err(io::Error::other("process status unavailable")));
        self.handle_exit(status).await;
    }

    async fn on_line(&mut self, line: BridgeLine) {
        trace!(
            client = %self.shared.client_name,
            stream = line.stream.as_str(),
            line = %line.text,
            "Output"
        );
        self.shared.logs.write().await.push(line.text.clone());
        self.shared.emit(SupervisorEvent::Log {
            stream: line.stream,
            line: line.text.clone(),
        });

        if self.shared.state() == SupervisorState::Starting
            && self.shared.set_state(SupervisorState::Started)
        {
            if let Some(ready) = self.ready.take() {
                let _ = ready.send(Ok(()));
            }
        }

        match line.kind {
            LineKind::Text => {}
            LineKind::Malformed(error) => {
                warn!(client = %self.shared.client_name, error = %error, "Failed to parse protocol line");
                self.shared.emit(SupervisorEvent::ParseWarning {
                    line: line.text.clone(),
                    error,
                });
            }
            LineKind::Message(message) => self.on_message(dispatch(message)).await,
        }

        if line.ready && self.shared.state() == SupervisorState::Started {
            info!(client = %self.shared.client_name, "Endpoint ready");
            self.shared.set_state(SupervisorState::Connected);
        }
    }

    async fn on_message(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Notification(notification) => {
                if notification.kind.is_unknown() {
                    warn!(
                        client = %self.shared.client_name,
                        method = %notification.method,
                        "Unhandled protocol method"
                    );
                } else {
                    info!(
                        client = %self.shared.client_name,
                        method = %notification.method,
                        summary = %notification.summary(),
                        "Notification"
                    );
                }

                let ack = self.auto_ack
                    && notification.kind.auto_acknowledged()
                    && notification.expects_reply();
                let id = notification.id.clone();
                self.shared.emit(SupervisorEvent::Notification(notification));

                if ack {
                    let reply = json!({ "jsonrpc": "2.0", "id": id, "result": true });
                    if let Err(e) = self.shared.write_message(&reply).await {
                        warn!(client = %self.shared.client_name, error = %e, "Failed to acknowledge notification");
                    }
                }
            }
            Inbound::ProtocolError { method, id, error } => {
                warn!(
                    client = %self.shared.client_name,
                    method = ?method,
                    error = %error,
                    "Protocol error"
                );
                self.shared.emit(SupervisorEvent::ProtocolError { method, id, error });
            }
            Inbound::Response { id, .. } => {
                debug!(client = %self.shared.client_name, id = ?id, "Response");
            }
        }
    }

    /// SIGINT on unix; elsewhere the process is killed
    fn interrupt(&mut self) -> io::Result<()> {
        #[cfg(unix)]
        {
            let Some(pid) = self.child.id() else {
                // already reaped
                return Ok(());
            };
            let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            Err(err)
        }
        #[cfg(not(unix))]
        {
            self.child.start_kill()
        }
    }

    async fn handle_exit(mut self, status: io::Result<ExitStatus>) {
        for stream in [OutputStream::Stdout, OutputStream::Stderr] {
            if let Some(line) = self.bridge.finish(stream) {
                self.on_line(line).await;
            }
        }

        self.shared.process.lock().await.take();
        // a writer parked on a full pipe keeps the lock until EPIPE releases it
        if let Ok(mut stdin) = self.shared.stdin.try_lock() {
            stdin.take();
        }

        let code = status.as_ref().ok().and_then(|s| s.code());
        let success = status.as_ref().is_ok_and(|s| s.success());
        info!(client = %self.shared.client_name, code = ?code, "Process exited");

        match self.shared.state() {
            SupervisorState::Stopping => {
                self.shared.set_state(SupervisorState::Stopped);
            }
            // timeout or failed interrupt, already reported
            SupervisorState::Error => {}
            SupervisorState::Starting => {
                let err = GridError::AbnormalExit {
                    code,
                    last_logs: self.shared.last_logs(self.error_log_lines).await,
                };
                self.shared.fail(&err);
                if let Some(ready) = self.ready.take() {
                    let _ = ready.send(Err(err));
                }
            }
            _ if success => {
                self.shared.set_state(SupervisorState::Stopped);
            }
            _ => {
                let err = GridError::AbnormalExit {
                    code,
                    last_logs: self.shared.last_logs(self.error_log_lines).await,
                };
                self.shared.fail(&err);
            }
        }

        self.shared.exits.send_modify(|n| *n += 1);
    }
}

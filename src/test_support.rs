//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here stand in for the provider, the remote-management
//! transport, the channel implementation, and time, so launch flows can be
//! driven deterministically without a real Windows host.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant, SystemTime};

use tokio::io::{AsyncWrite, DuplexStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::{ChannelBuilder, ChannelError, CloseHook};
use crate::clock::{Clock, SleepFuture};
use crate::instance::{InstanceDescriber, InstanceSnapshot, UNASSIGNED_ADDRESS};
use crate::launch_log::LaunchLog;
use crate::node::{Credentials, TransportScheme};
use crate::session::{
    RemoteProcess, RemoteReader, RemoteWriter, Session, SessionFactory, TransportError,
    TransportFuture,
};

/// Exit code reported by a [`FakeProcess`] that was terminated.
pub const TERMINATED_EXIT_CODE: i32 = -1;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Launch log that keeps every line in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the lines written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// Returns `true` when any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|line| line.contains(needle))
    }
}

impl LaunchLog for MemoryLog {
    fn line(&self, message: &str) {
        lock(&self.lines).push(message.to_owned());
    }
}

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    wall_origin: SystemTime,
    offset: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual clock: sleeping advances time instantly and is recorded.
#[derive(Clone, Debug)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    /// Creates a clock whose wall time starts at `wall_origin`.
    #[must_use]
    pub fn new(wall_origin: SystemTime) -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                origin: Instant::now(),
                wall_origin,
                offset: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Returns every sleep requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        lock(&self.state).sleeps.clone()
    }

    /// Returns the number of sleeps equal to `duration`.
    #[must_use]
    pub fn sleeps_of(&self, duration: Duration) -> usize {
        lock(&self.state)
            .sleeps
            .iter()
            .filter(|slept| **slept == duration)
            .count()
    }

    /// Returns the virtual time elapsed since creation.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        lock(&self.state).offset
    }

    /// Advances time without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = lock(&self.state);
        state.offset = state.offset.saturating_add(duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = lock(&self.state);
        state.origin + state.offset
    }

    fn wall_time(&self) -> SystemTime {
        let state = lock(&self.state);
        state.wall_origin + state.offset
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        {
            let mut state = lock(&self.state);
            state.sleeps.push(duration);
            state.offset = state.offset.saturating_add(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

/// Builds a snapshot with a private address and an optional public one.
#[must_use]
pub fn snapshot(private_ip: &str, public_ip: Option<&str>, created_at: SystemTime) -> InstanceSnapshot {
    InstanceSnapshot {
        private_dns: Some(format!("ip-{}.internal", private_ip.replace('.', "-"))),
        private_ip: Some(private_ip.to_owned()),
        public_dns: public_ip.map(|ip| format!("ec2-{}.compute.example", ip.replace('.', "-"))),
        public_ip: public_ip.map(str::to_owned),
        network_id: Some(String::from("vpc-test")),
        created_at,
    }
}

/// Builds a snapshot for an instance still waiting for an address.
#[must_use]
pub fn unassigned_snapshot(created_at: SystemTime) -> InstanceSnapshot {
    InstanceSnapshot {
        private_dns: Some(UNASSIGNED_ADDRESS.to_owned()),
        private_ip: Some(UNASSIGNED_ADDRESS.to_owned()),
        public_dns: None,
        public_ip: None,
        network_id: None,
        created_at,
    }
}

#[derive(Debug, Default)]
struct DescriberState {
    queue: VecDeque<Result<InstanceSnapshot, TransportError>>,
    last: Option<Result<InstanceSnapshot, TransportError>>,
    calls: u32,
}

/// Instance describer returning pre-seeded snapshots in FIFO order.
///
/// Once the queue is drained the last response repeats.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDescriber {
    state: Arc<Mutex<DescriberState>>,
}

impl ScriptedDescriber {
    /// Creates a describer with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a snapshot.
    pub fn push_snapshot(&self, snapshot: InstanceSnapshot) {
        lock(&self.state).queue.push_back(Ok(snapshot));
    }

    /// Queues a metadata failure.
    pub fn push_error(&self, error: TransportError) {
        lock(&self.state).queue.push_back(Err(error));
    }

    /// Returns the number of `describe` calls made.
    #[must_use]
    pub fn calls(&self) -> u32 {
        lock(&self.state).calls
    }
}

impl InstanceDescriber for ScriptedDescriber {
    fn describe(&self) -> TransportFuture<'_, InstanceSnapshot> {
        let response = {
            let mut state = lock(&self.state);
            state.calls = state.calls.saturating_add(1);
            match state.queue.pop_front() {
                Some(next) => {
                    state.last = Some(next.clone());
                    next
                }
                None => state.last.clone().unwrap_or_else(|| {
                    Err(TransportError::Protocol(String::from(
                        "no scripted snapshot available",
                    )))
                }),
            }
        };
        Box::pin(std::future::ready(response))
    }
}

/// Behaviour of a process started on a [`FakeHost`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessScript {
    exit_code: Option<i32>,
    output: Vec<String>,
    stdout: bool,
}

impl ProcessScript {
    /// A process that prints nothing and exits with `code` immediately.
    #[must_use]
    pub const fn exits(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            output: Vec::new(),
            stdout: true,
        }
    }

    /// A process that keeps running until terminated or finished.
    #[must_use]
    pub const fn long_running() -> Self {
        Self {
            exit_code: None,
            output: Vec::new(),
            stdout: true,
        }
    }

    /// Adds stdout lines emitted before exit.
    #[must_use]
    pub fn with_output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|line| (*line).to_owned()).collect();
        self
    }

    /// Spawns the process without a stdout stream.
    #[must_use]
    pub const fn without_stdout(mut self) -> Self {
        self.stdout = false;
        self
    }
}

/// Command recorded by a [`FakeSession`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExecRecord {
    /// Command line passed to `exec`.
    pub command: String,
    /// Execution timeout passed to `exec`.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
struct HostState {
    files: BTreeMap<String, Vec<u8>>,
    uploads: Vec<String>,
    commands: Vec<ExecRecord>,
    scripts: Vec<(String, ProcessScript)>,
    failing_uploads: Vec<String>,
    closes: u32,
    terminations: u32,
}

/// Simulated remote Windows host shared by every session opened on it.
#[derive(Clone, Debug, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    /// Creates an empty host. Commands exit with status 0 unless scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a session on this host whose probes always succeed.
    #[must_use]
    pub fn session(&self) -> FakeSession {
        FakeSession::new(self.clone(), "127.0.0.1", ProbeScript::new(true))
    }

    /// Seeds a remote file.
    pub fn put(&self, path: &str, bytes: &[u8]) {
        lock(&self.state).files.insert(path.to_owned(), bytes.to_vec());
    }

    /// Scripts every command starting with `prefix`. Later registrations
    /// take precedence.
    pub fn on_command(&self, prefix: &str, script: ProcessScript) {
        lock(&self.state).scripts.push((prefix.to_owned(), script));
    }

    /// Makes uploads to `path` fail.
    pub fn fail_upload(&self, path: &str) {
        lock(&self.state).failing_uploads.push(path.to_owned());
    }

    /// Returns the contents of a remote file.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state).files.get(path).cloned()
    }

    /// Returns the number of completed uploads to `path`.
    #[must_use]
    pub fn upload_count(&self, path: &str) -> usize {
        lock(&self.state)
            .uploads
            .iter()
            .filter(|uploaded| uploaded.as_str() == path)
            .count()
    }

    /// Returns every command executed on this host.
    #[must_use]
    pub fn commands(&self) -> Vec<ExecRecord> {
        lock(&self.state).commands.clone()
    }

    /// Returns the number of executed commands starting with `prefix`.
    #[must_use]
    pub fn command_count(&self, prefix: &str) -> usize {
        lock(&self.state)
            .commands
            .iter()
            .filter(|record| record.command.starts_with(prefix))
            .count()
    }

    /// Returns the number of session closes.
    #[must_use]
    pub fn closes(&self) -> u32 {
        lock(&self.state).closes
    }

    /// Returns the number of process terminations.
    #[must_use]
    pub fn terminations(&self) -> u32 {
        lock(&self.state).terminations
    }

    fn script_for(&self, command: &str) -> ProcessScript {
        lock(&self.state)
            .scripts
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map_or_else(|| ProcessScript::exits(0), |(_, script)| script.clone())
    }

    fn record_exec(&self, command: &str, timeout: Option<Duration>) {
        lock(&self.state).commands.push(ExecRecord {
            command: command.to_owned(),
            timeout,
        });
    }

    fn upload_fails(&self, path: &str) -> bool {
        lock(&self.state)
            .failing_uploads
            .iter()
            .any(|failing| failing == path)
    }

    fn commit(&self, path: &str, bytes: Vec<u8>) {
        let mut state = lock(&self.state);
        state.files.insert(path.to_owned(), bytes);
        state.uploads.push(path.to_owned());
    }

    fn record_close(&self) {
        let mut state = lock(&self.state);
        state.closes = state.closes.saturating_add(1);
    }

    fn record_termination(&self) {
        let mut state = lock(&self.state);
        state.terminations = state.terminations.saturating_add(1);
    }
}

/// Shared queue of probe results with a fallback once drained.
#[derive(Clone, Debug)]
struct ProbeScript {
    queue: Arc<Mutex<VecDeque<Result<bool, TransportError>>>>,
    fallback: Arc<AtomicBool>,
}

impl ProbeScript {
    fn new(fallback: bool) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(AtomicBool::new(fallback)),
        }
    }

    fn next(&self) -> Result<bool, TransportError> {
        lock(&self.queue)
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.load(Ordering::SeqCst)))
    }
}

/// Session on a [`FakeHost`].
#[derive(Clone, Debug)]
pub struct FakeSession {
    host: FakeHost,
    ip: String,
    probes: ProbeScript,
    closed: Arc<AtomicBool>,
}

impl FakeSession {
    fn new(host: FakeHost, ip: &str, probes: ProbeScript) -> Self {
        Self {
            host,
            ip: ip.to_owned(),
            probes,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Address the session was opened against.
    #[must_use]
    pub fn ip(&self) -> &str {
        &self.ip
    }

    /// Returns `true` once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Session for FakeSession {
    fn probe(&self) -> TransportFuture<'_, bool> {
        Box::pin(std::future::ready(self.probes.next()))
    }

    fn exec<'a>(
        &'a self,
        command: &'a str,
        timeout: Option<Duration>,
    ) -> TransportFuture<'a, Box<dyn RemoteProcess>> {
        Box::pin(async move {
            self.host.record_exec(command, timeout);
            let script = self.host.script_for(command);
            let process: Box<dyn RemoteProcess> = Box::new(FakeProcess::spawn(&script, &self.host));
            Ok(process)
        })
    }

    fn put_file<'a>(&'a self, path: &'a str) -> TransportFuture<'a, RemoteWriter> {
        Box::pin(async move {
            if self.host.upload_fails(path) {
                return Err(TransportError::Io(format!("simulated upload failure for {path}")));
            }
            let sink: RemoteWriter = Box::new(FileSink {
                host: self.host.clone(),
                path: path.to_owned(),
                buffer: Vec::new(),
                committed: false,
            });
            Ok(sink)
        })
    }

    fn exists<'a>(&'a self, path: &'a str) -> TransportFuture<'a, bool> {
        Box::pin(async move { Ok(self.host.file(path).is_some()) })
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
            self.host.record_close();
            Ok(())
        })
    }
}

/// Remote file writer that commits its contents on shutdown.
struct FileSink {
    host: FakeHost,
    path: String,
    buffer: Vec<u8>,
    committed: bool,
}

impl AsyncWrite for FileSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let sink = self.get_mut();
        if !sink.committed {
            sink.committed = true;
            sink.host.commit(&sink.path, std::mem::take(&mut sink.buffer));
        }
        Poll::Ready(Ok(()))
    }
}

/// Process started on a [`FakeHost`].
pub struct FakeProcess {
    host: FakeHost,
    stdout: Mutex<Option<RemoteReader>>,
    stdin: Mutex<Option<RemoteWriter>>,
    remote_end: Mutex<Option<DuplexStream>>,
    exit: watch::Sender<Option<i32>>,
}

impl std::fmt::Debug for FakeProcess {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("FakeProcess")
            .field("exit", &*self.exit.borrow())
            .finish_non_exhaustive()
    }
}

impl FakeProcess {
    /// Starts a process following `script` on `host`.
    #[must_use]
    pub fn spawn(script: &ProcessScript, host: &FakeHost) -> Self {
        let (exit, _) = watch::channel(script.exit_code);
        let process = match script.exit_code {
            Some(_) => {
                let mut output = Vec::new();
                for line in &script.output {
                    output.extend_from_slice(line.as_bytes());
                    output.extend_from_slice(b"\r\n");
                }
                let stdout: RemoteReader = Box::new(io::Cursor::new(output));
                let stdin: RemoteWriter = Box::new(tokio::io::sink());
                Self {
                    host: host.clone(),
                    stdout: Mutex::new(Some(stdout)),
                    stdin: Mutex::new(Some(stdin)),
                    remote_end: Mutex::new(None),
                    exit,
                }
            }
            None => {
                let (local, remote) = tokio::io::duplex(4096);
                let (reader, writer) = tokio::io::split(local);
                Self {
                    host: host.clone(),
                    stdout: Mutex::new(Some(Box::new(reader))),
                    stdin: Mutex::new(Some(Box::new(writer))),
                    remote_end: Mutex::new(Some(remote)),
                    exit,
                }
            }
        };
        if !script.stdout {
            lock(&process.stdout).take();
        }
        process
    }

    /// Makes the process exit with `code`, closing its stdout.
    pub fn finish(&self, code: i32) {
        self.exit.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(code);
            true
        });
        lock(&self.remote_end).take();
    }

    /// Returns the exit code once the process has exited.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit.borrow()
    }
}

impl RemoteProcess for FakeProcess {
    fn take_stdout(&self) -> Option<RemoteReader> {
        lock(&self.stdout).take()
    }

    fn take_stdin(&self) -> Option<RemoteWriter> {
        lock(&self.stdin).take()
    }

    fn wait_for_exit(&self) -> TransportFuture<'_, i32> {
        let mut receiver = self.exit.subscribe();
        Box::pin(async move {
            loop {
                let current = *receiver.borrow_and_update();
                if let Some(code) = current {
                    return Ok(code);
                }
                receiver
                    .changed()
                    .await
                    .map_err(|_| TransportError::Closed)?;
            }
        })
    }

    fn terminate(&self) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.host.record_termination();
            self.finish(TERMINATED_EXIT_CODE);
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    opened: Vec<String>,
    schemes: Vec<TransportScheme>,
    open_failures: VecDeque<TransportError>,
}

/// Session factory opening [`FakeSession`]s on one [`FakeHost`].
///
/// Probe results are consumed in FIFO order across every session the
/// factory opens; once drained, probes report the endpoint unreachable
/// unless [`ScriptedFactory::answer_probes`] says otherwise.
#[derive(Clone, Debug)]
pub struct ScriptedFactory {
    host: FakeHost,
    probes: ProbeScript,
    state: Arc<Mutex<FactoryState>>,
}

impl ScriptedFactory {
    /// Creates a factory for `host`.
    #[must_use]
    pub fn new(host: FakeHost) -> Self {
        Self {
            host,
            probes: ProbeScript::new(false),
            state: Arc::new(Mutex::new(FactoryState::default())),
        }
    }

    /// Queues a probe result.
    pub fn push_probe(&self, reachable: bool) {
        lock(&self.probes.queue).push_back(Ok(reachable));
    }

    /// Queues several probe results.
    pub fn push_probes(&self, results: &[bool]) {
        for reachable in results {
            self.push_probe(*reachable);
        }
    }

    /// Sets the probe result used once the queue is drained.
    pub fn answer_probes(&self, reachable: bool) {
        self.probes.fallback.store(reachable, Ordering::SeqCst);
    }

    /// Queues a probe failure.
    pub fn push_probe_error(&self, error: TransportError) {
        lock(&self.probes.queue).push_back(Err(error));
    }

    /// Makes the next `open` call fail with `error`.
    pub fn fail_next_open(&self, error: TransportError) {
        lock(&self.state).open_failures.push_back(error);
    }

    /// Returns every address a session was opened against, in order.
    #[must_use]
    pub fn opened(&self) -> Vec<String> {
        lock(&self.state).opened.clone()
    }

    /// Returns the transport scheme of every opened session, in order.
    #[must_use]
    pub fn schemes(&self) -> Vec<TransportScheme> {
        lock(&self.state).schemes.clone()
    }

    /// Returns the host sessions are opened on.
    #[must_use]
    pub const fn host(&self) -> &FakeHost {
        &self.host
    }
}

impl SessionFactory for ScriptedFactory {
    type Session = FakeSession;

    fn open<'a>(
        &'a self,
        ip: &'a str,
        _credentials: &'a Credentials,
        scheme: TransportScheme,
    ) -> TransportFuture<'a, Self::Session> {
        let result = {
            let mut state = lock(&self.state);
            state.opened.push(ip.to_owned());
            state.schemes.push(scheme);
            match state.open_failures.pop_front() {
                Some(error) => Err(error),
                None => Ok(FakeSession::new(self.host.clone(), ip, self.probes.clone())),
            }
        };
        Box::pin(std::future::ready(result))
    }
}

/// Channel produced by [`RecordingChannelBuilder`].
pub struct RecordedChannel {
    /// Agent stdout handed to the channel, unless a reader task drains it.
    pub stdout: Option<RemoteReader>,
    /// Agent stdin handed to the channel.
    pub stdin: RemoteWriter,
    /// Close hook registered by the bootstrapper.
    pub on_close: CloseHook,
    /// Task draining stdout and firing the hook at EOF. Yields whether that
    /// fire did the work.
    pub eof_reader: Option<JoinHandle<bool>>,
}

impl std::fmt::Debug for RecordedChannel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RecordedChannel")
            .field("on_close", &self.on_close)
            .finish_non_exhaustive()
    }
}

impl RecordedChannel {
    /// Simulates the channel closing.
    pub async fn close(&self) -> bool {
        self.on_close.fire().await
    }
}

/// Channel builder that records builds and can be told to fail.
#[derive(Clone, Debug, Default)]
pub struct RecordingChannelBuilder {
    builds: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    close_on_eof: Arc<AtomicBool>,
}

impl RecordingChannelBuilder {
    /// Creates a builder that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent builds fail.
    pub fn fail_builds(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Makes built channels drain stdout and fire their close hook at EOF,
    /// the way a remoting channel notices the far end going away.
    pub fn close_on_eof(&self) {
        self.close_on_eof.store(true, Ordering::SeqCst);
    }

    /// Returns the number of build calls.
    #[must_use]
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ChannelBuilder for RecordingChannelBuilder {
    type Channel = RecordedChannel;

    fn build(
        &self,
        stdout: RemoteReader,
        stdin: RemoteWriter,
        _log: Arc<dyn LaunchLog>,
        on_close: CloseHook,
    ) -> Result<Self::Channel, ChannelError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::Build(String::from("simulated build failure")));
        }
        if !self.close_on_eof.load(Ordering::SeqCst) {
            return Ok(RecordedChannel {
                stdout: Some(stdout),
                stdin,
                on_close,
                eof_reader: None,
            });
        }

        let hook = on_close.clone();
        let mut stdout = stdout;
        let eof_reader = tokio::spawn(async move {
            let mut sink = tokio::io::sink();
            tokio::io::copy(&mut stdout, &mut sink).await.ok();
            hook.fire().await
        });
        Ok(RecordedChannel {
            stdout: None,
            stdin,
            on_close,
            eof_reader: Some(eof_reader),
        })
    }
}

//! # Session Module
//!
//! [`SerialLinkSession`] owns one connection at a time: the device handle,
//! its split read/write endpoints, the background receive loop, and the
//! components layered on the byte stream (codec, activity log, statistics,
//! auto-send). External layers drive it through a narrow imperative API and
//! observe it through one render hook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use log::{error, info, warn};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::error::{Result, SerialProbeError};
use crate::export::{ExportSink, export_filename};

use super::autosend::AutoSendScheduler;
use super::encoding::{self, DataMode};
use super::log::{ActivityLog, LogCategory, LogEntry};
use super::port::{self, DeviceEvent, LinkConfig};
use super::stats::{Statistics, StatsSnapshot};

/// Callback fired once per appended [`LogEntry`].
pub type RenderHook = Box<dyn Fn(&LogEntry) + Send + Sync>;

/// Anything the session can treat as a full-duplex device stream.
pub(crate) trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> LinkStream for T {}

type BoxedStream = Box<dyn LinkStream>;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl LinkState {
    /// Whether the link is live and ready for traffic.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }

    /// Whether the session holds no connection at all.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, LinkState::Disconnected)
    }
}

/// Most-recent-last history of typed payloads, navigable from the input
/// field. Consecutive duplicates collapse; the oldest entries roll off.
pub struct SendHistory {
    entries: Vec<String>,
    cursor: usize,
    cap: usize,
}

impl SendHistory {
    const DEFAULT_CAP: usize = 50;

    #[must_use]
    fn new() -> Self {
        SendHistory {
            entries: Vec::new(),
            cursor: 0,
            cap: Self::DEFAULT_CAP,
        }
    }

    fn push(&mut self, payload: &str) {
        if self.entries.last().is_some_and(|last| last == payload) {
            self.cursor = self.entries.len();
            return;
        }
        self.entries.push(payload.to_string());
        if self.entries.len() > self.cap {
            self.entries.remove(0);
        }
        self.cursor = self.entries.len();
    }

    fn previous(&mut self) -> Option<String> {
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        self.entries.get(self.cursor).cloned()
    }

    fn next(&mut self) -> Option<String> {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
        self.entries.get(self.cursor).cloned()
    }
}

struct SessionInner {
    state: StdMutex<LinkState>,
    port_name: StdMutex<Option<String>>,
    log: ActivityLog,
    stats: Statistics,
    autosend: AutoSendScheduler,
    paused: AtomicBool,
    pause_buffer: StdMutex<Vec<u8>>,
    receive_mode: StdMutex<DataMode>,
    append_newline: AtomicBool,
    timestamps: AtomicBool,
    render_hook: StdMutex<Option<RenderHook>>,
    history: StdMutex<SendHistory>,
    /// Write endpoint; the lock serializes manual and auto-send writers.
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    /// Receive loop handle; resolves to the read endpoint on cooperative exit.
    reader_task: Mutex<Option<JoinHandle<Option<ReadHalf<BoxedStream>>>>>,
    shutdown: StdMutex<Option<watch::Sender<bool>>>,
    events_task: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    fn state(&self) -> LinkState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(LinkState::Disconnected)
    }

    fn set_state(&self, state: LinkState) {
        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
    }

    /// Appends to the activity log and fires the render hook.
    fn log_entry(&self, category: LogCategory, text: impl Into<String>) {
        let with_ts = self.timestamps.load(Ordering::Relaxed);
        let entry = self.log.append(category, text, with_ts);
        if let Ok(hook) = self.render_hook.lock()
            && let Some(hook) = hook.as_ref()
        {
            hook(&entry);
        }
    }

    fn receive_mode(&self) -> DataMode {
        self.receive_mode
            .lock()
            .map(|m| *m)
            .unwrap_or(DataMode::Text)
    }

    /// Handles one inbound chunk. Statistics always accrue; rendering is
    /// suppressed while paused, with the raw bytes retained.
    fn process_inbound(&self, chunk: &[u8]) {
        self.stats.record_received(chunk.len() as u64);
        if self.paused.load(Ordering::Relaxed) {
            if let Ok(mut buffer) = self.pause_buffer.lock() {
                buffer.extend_from_slice(chunk);
            }
            return;
        }
        let text = encoding::decode_inbound(chunk, self.receive_mode());
        self.log_entry(LogCategory::Data, text);
    }
}

/// A terminal-style debugging session over one serial link.
///
/// Cloning is cheap and shares the underlying session.
#[derive(Clone)]
pub struct SerialLinkSession {
    inner: Arc<SessionInner>,
}

impl Default for SerialLinkSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialLinkSession {
    #[must_use]
    pub fn new() -> Self {
        SerialLinkSession {
            inner: Arc::new(SessionInner {
                state: StdMutex::new(LinkState::Disconnected),
                port_name: StdMutex::new(None),
                log: ActivityLog::new(),
                stats: Statistics::new(),
                autosend: AutoSendScheduler::new(),
                paused: AtomicBool::new(false),
                pause_buffer: StdMutex::new(Vec::new()),
                receive_mode: StdMutex::new(DataMode::Text),
                append_newline: AtomicBool::new(false),
                timestamps: AtomicBool::new(false),
                render_hook: StdMutex::new(None),
                history: StdMutex::new(SendHistory::new()),
                writer: Mutex::new(None),
                reader_task: Mutex::new(None),
                shutdown: StdMutex::new(None),
                events_task: StdMutex::new(None),
            }),
        }
    }

    fn from_inner(inner: Arc<SessionInner>) -> Self {
        SerialLinkSession { inner }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.inner.state()
    }

    /// Name of the currently open port, if any.
    #[must_use]
    pub fn port_name(&self) -> Option<String> {
        self.inner.port_name.lock().ok().and_then(|p| p.clone())
    }

    /// Installs the callback fired once per appended log entry.
    pub fn set_render_hook(&self, hook: RenderHook) {
        if let Ok(mut slot) = self.inner.render_hook.lock() {
            *slot = Some(hook);
        }
    }

    /// Opens the configured device and starts the receive loop.
    ///
    /// # Errors
    ///
    /// `AlreadyConnected` unless the session is `Disconnected`; open
    /// failures (`NoPortSelected`, `PermissionDenied`,
    /// `ConfigurationRejected`, `DeviceIo`) leave no partial state behind.
    pub async fn connect(&self, config: &LinkConfig) -> Result<()> {
        {
            let Ok(mut state) = self.inner.state.lock() else {
                return Err(SerialProbeError::device_io("session state unavailable"));
            };
            if *state != LinkState::Disconnected {
                return Err(SerialProbeError::AlreadyConnected);
            }
            *state = LinkState::Connecting;
        }
        match port::open_port(config).await {
            Ok(stream) => {
                self.attach(Box::new(stream), config.port_name.clone(), config.describe())
                    .await;
                Ok(())
            }
            Err(e) => {
                self.inner.set_state(LinkState::Disconnected);
                self.inner
                    .log_entry(LogCategory::Error, format!("connect failed: {e}"));
                Err(e)
            }
        }
    }

    /// Wires an already-open stream into the session. Split off from
    /// `connect` so the session logic runs against any duplex byte stream.
    pub(crate) async fn attach(&self, stream: BoxedStream, port_name: String, description: String) {
        let (read_half, write_half) = io::split(stream);
        let inner = &self.inner;
        inner.stats.reset();
        inner.paused.store(false, Ordering::Relaxed);
        if let Ok(mut buffer) = inner.pause_buffer.lock() {
            buffer.clear();
        }
        if let Ok(mut name) = inner.port_name.lock() {
            *name = Some(port_name);
        }
        *inner.writer.lock().await = Some(write_half);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if let Ok(mut shutdown) = inner.shutdown.lock() {
            *shutdown = Some(shutdown_tx);
        }
        let loop_session = self.clone();
        let handle = tokio::spawn(receive_loop(loop_session, read_half, shutdown_rx.clone()));
        *inner.reader_task.lock().await = Some(handle);
        tokio::spawn(rate_sampler(Arc::downgrade(inner), shutdown_rx));

        inner.set_state(LinkState::Connected);
        inner.log_entry(LogCategory::System, format!("connected to {description}"));
    }

    /// Tears the connection down in fixed order: auto-send first, then the
    /// receive loop (signalled and awaited), then the write endpoint, the
    /// read endpoint, and finally the device handle. No-op when already
    /// disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        self.disconnect_with_reason(Some("disconnected")).await
    }

    async fn disconnect_with_reason(&self, announce: Option<&str>) -> Result<()> {
        let inner = &self.inner;
        {
            let Ok(mut state) = inner.state.lock() else {
                return Ok(());
            };
            match *state {
                LinkState::Disconnected | LinkState::Disconnecting => return Ok(()),
                LinkState::Connecting | LinkState::Connected => {
                    *state = LinkState::Disconnecting;
                }
            }
        }
        // The scheduler must not race a send against a closing writer.
        inner.autosend.stop();

        // Cooperative cancellation: signal, then block until the loop has
        // observably exited before releasing anything it may be reading.
        let shutdown = inner.shutdown.lock().ok().and_then(|mut s| s.take());
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }
        let read_half = match inner.reader_task.lock().await.take() {
            Some(handle) => handle.await.ok().flatten(),
            None => None,
        };

        // Endpoint release order matters: write half, read half, handle.
        // Each step tolerates "already released".
        let write_half = inner.writer.lock().await.take();
        drop(write_half);
        drop(read_half);

        if let Ok(mut name) = inner.port_name.lock() {
            *name = None;
        }
        inner.stats.mark_disconnected();
        inner.set_state(LinkState::Disconnected);
        if let Some(message) = announce {
            inner.log_entry(LogCategory::System, message);
        }
        info!("session disconnected");
        Ok(())
    }

    /// Encodes and writes one outbound frame.
    ///
    /// On success the sent byte count is recorded and the typed text is
    /// echoed to the log behind the `>> ` marker. A write failure is logged
    /// and reported but does not change session state; only the receive
    /// loop decides the link is down.
    ///
    /// # Errors
    ///
    /// `NotConnected` outside the `Connected` state, `InvalidHexFormat` for
    /// malformed hex payloads (nothing is written), `DeviceIo` for write
    /// failures.
    pub async fn send(&self, text: &str, mode: DataMode) -> Result<usize> {
        let inner = &self.inner;
        if !inner.state().is_connected() {
            let e = SerialProbeError::NotConnected;
            inner.log_entry(LogCategory::Error, format!("send failed: {e}"));
            return Err(e);
        }
        let append_newline = inner.append_newline.load(Ordering::Relaxed);
        let bytes = match encoding::encode_outbound(text, mode, append_newline) {
            Ok(bytes) => bytes,
            Err(e) => {
                inner.log_entry(LogCategory::Error, e.to_string());
                return Err(e);
            }
        };

        let mut writer = inner.writer.lock().await;
        let Some(writer_ref) = writer.as_mut() else {
            drop(writer);
            let e = SerialProbeError::NotConnected;
            inner.log_entry(LogCategory::Error, format!("send failed: {e}"));
            return Err(e);
        };
        match writer_ref.write_all(&bytes).await {
            Ok(()) => {
                drop(writer);
                inner.stats.record_sent(bytes.len() as u64);
                if let Ok(mut history) = inner.history.lock() {
                    history.push(text);
                }
                inner.log_entry(LogCategory::System, format!(">> {text}"));
                Ok(bytes.len())
            }
            Err(e) => {
                drop(writer);
                inner.log_entry(LogCategory::Error, format!("send failed: {e}"));
                Err(SerialProbeError::device_io(e.to_string()))
            }
        }
    }

    /// Flips receive pausing. Draining continues either way; resuming
    /// flushes the retained bytes through the codec.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.inner.paused.load(Ordering::Relaxed);
        self.inner.paused.store(paused, Ordering::Relaxed);
        if !paused {
            self.flush_pause_buffer();
        }
        paused
    }

    /// Whether inbound rendering is currently suppressed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Relaxed)
    }

    /// Discards bytes retained while paused.
    pub fn clear_pause_buffer(&self) {
        if let Ok(mut buffer) = self.inner.pause_buffer.lock() {
            buffer.clear();
        }
    }

    fn flush_pause_buffer(&self) {
        let buffered = match self.inner.pause_buffer.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(_) => return,
        };
        if buffered.is_empty() {
            return;
        }
        // Counted by statistics on arrival; only rendering was deferred.
        let text = encoding::decode_inbound(&buffered, self.inner.receive_mode());
        self.inner.log_entry(LogCategory::Data, text);
    }

    /// Begins auto-repeat sending. The payload producer is re-read on every
    /// tick so edits take effect on the next send.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a live connection; `ConfigurationRejected` for
    /// a zero interval.
    pub fn start_auto_send<F>(&self, interval: Duration, produce: F) -> Result<()>
    where
        F: Fn() -> (String, DataMode) + Send + Sync + 'static,
    {
        if !self.inner.state().is_connected() {
            return Err(SerialProbeError::NotConnected);
        }
        if interval.is_zero() {
            return Err(SerialProbeError::configuration_rejected(
                "auto-send interval must be positive",
            ));
        }
        let weak = Arc::downgrade(&self.inner);
        let produce = Arc::new(produce);
        self.inner.autosend.start(interval, move || {
            let weak = Weak::clone(&weak);
            let produce = Arc::clone(&produce);
            async move {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                if !inner.state().is_connected() {
                    return false;
                }
                let (payload, mode) = produce();
                let session = SerialLinkSession::from_inner(inner);
                // Failures are already logged by `send`; a dead link stops
                // the timer on the next state check.
                let _ = session.send(&payload, mode).await;
                true
            }
        });
        self.inner.log_entry(
            LogCategory::System,
            format!("auto-send started ({} ms interval)", interval.as_millis()),
        );
        Ok(())
    }

    /// Cancels auto-repeat sending; no-op when not running.
    pub fn stop_auto_send(&self) {
        if self.inner.autosend.stop() {
            self.inner
                .log_entry(LogCategory::System, "auto-send stopped");
        }
    }

    /// Whether auto-repeat sending is active.
    #[must_use]
    pub fn auto_send_enabled(&self) -> bool {
        self.inner.autosend.is_enabled()
    }

    /// Subscribes the session to host device events; removal of the
    /// currently open port triggers an implicit disconnect.
    pub fn bind_device_events(&self, mut events: broadcast::Receiver<DeviceEvent>) {
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DeviceEvent::Removed(name)) => {
                        let Some(inner) = weak.upgrade() else {
                            return;
                        };
                        let is_current = inner
                            .port_name
                            .lock()
                            .is_ok_and(|p| p.as_deref() == Some(name.as_str()));
                        if is_current && !inner.state().is_disconnected() {
                            warn!("open device {name} was removed");
                            inner.log_entry(
                                LogCategory::Error,
                                format!("device removed: {name}"),
                            );
                            let session = SerialLinkSession::from_inner(inner);
                            let _ = session.disconnect_with_reason(None).await;
                        }
                    }
                    Ok(DeviceEvent::Attached(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("device event stream lagged by {missed}");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        if let Ok(mut task) = self.inner.events_task.lock() {
            if let Some(previous) = task.take() {
                previous.abort();
            }
            *task = Some(handle);
        }
    }

    /// Sets how inbound chunks are rendered.
    pub fn set_receive_mode(&self, mode: DataMode) {
        if let Ok(mut current) = self.inner.receive_mode.lock() {
            *current = mode;
        }
    }

    #[must_use]
    pub fn receive_mode(&self) -> DataMode {
        self.inner.receive_mode()
    }

    /// Toggles appending `\r\n` to outbound text frames.
    pub fn set_append_newline(&self, enabled: bool) {
        self.inner.append_newline.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn append_newline(&self) -> bool {
        self.inner.append_newline.load(Ordering::Relaxed)
    }

    /// Toggles per-entry timestamps.
    pub fn set_timestamps(&self, enabled: bool) {
        self.inner.timestamps.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub fn timestamps_enabled(&self) -> bool {
        self.inner.timestamps.load(Ordering::Relaxed)
    }

    /// Snapshot of the activity log, oldest first.
    #[must_use]
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.inner.log.entries()
    }

    /// Empties the activity log.
    pub fn clear_log(&self) {
        self.inner.log.clear();
    }

    /// Non-blocking statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Steps back through the send history.
    pub fn history_previous(&self) -> Option<String> {
        self.inner.history.lock().ok()?.previous()
    }

    /// Steps forward through the send history.
    pub fn history_next(&self) -> Option<String> {
        self.inner.history.lock().ok()?.next()
    }

    /// Hands the rendered log to an export sink under a timestamp-derived
    /// filename. Returns the filename, or `None` when the log was empty.
    ///
    /// # Errors
    ///
    /// Sink failures propagate after being logged.
    pub fn export_log(&self, sink: &dyn ExportSink) -> Result<Option<String>> {
        let content = self.inner.log.export_text();
        if content.trim().is_empty() {
            self.inner
                .log_entry(LogCategory::System, "log is empty, nothing to export");
            return Ok(None);
        }
        let filename = export_filename();
        match sink.export_blob(&filename, &content) {
            Ok(()) => {
                self.inner
                    .log_entry(LogCategory::System, format!("log saved to {filename}"));
                Ok(Some(filename))
            }
            Err(e) => {
                self.inner
                    .log_entry(LogCategory::Error, format!("export failed: {e}"));
                Err(e)
            }
        }
    }
}

/// The receive loop: sole reader of the inbound endpoint for the life of one
/// connection. Returns the read half on cooperative cancellation so
/// `disconnect` controls the release order; on end-of-stream or a read error
/// it performs the teardown itself and returns nothing.
async fn receive_loop(
    session: SerialLinkSession,
    mut reader: ReadHalf<BoxedStream>,
    mut shutdown: watch::Receiver<bool>,
) -> Option<ReadHalf<BoxedStream>> {
    let mut buffer = [0u8; 1024];
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                return Some(reader);
            }
            read = reader.read(&mut buffer) => match read {
                Ok(0) => {
                    info!("inbound stream ended");
                    session
                        .inner
                        .log_entry(LogCategory::System, "link closed by peer");
                    teardown_from_loop(&session, reader).await;
                    return None;
                }
                Ok(n) => session.inner.process_inbound(&buffer[..n]),
                Err(e) => {
                    error!("read failed: {e}");
                    session
                        .inner
                        .log_entry(LogCategory::Error, format!("read failed: {e}"));
                    teardown_from_loop(&session, reader).await;
                    return None;
                }
            }
        }
    }
}

/// Loop-side teardown for link-down conditions the loop itself detected.
/// Mirrors `disconnect`'s release order; the state change is the observable
/// "link is down" signal.
async fn teardown_from_loop(session: &SerialLinkSession, reader: ReadHalf<BoxedStream>) {
    let inner = &session.inner;
    inner.autosend.stop();
    // Wakes the rate sampler; nobody is left to signal the loop itself.
    let shutdown = inner.shutdown.lock().ok().and_then(|mut s| s.take());
    drop(shutdown);
    let write_half = inner.writer.lock().await.take();
    drop(write_half);
    drop(reader);
    if let Ok(mut name) = inner.port_name.lock() {
        *name = None;
    }
    inner.stats.mark_disconnected();
    inner.set_state(LinkState::Disconnected);
}

/// Once-per-second statistics sampler, one per connection.
async fn rate_sampler(inner: Weak<SessionInner>, mut shutdown: watch::Receiver<bool>) {
    let mut timer = tokio::time::interval(Duration::from_secs(1));
    timer.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = timer.tick() => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if !inner.state().is_connected() {
                    return;
                }
                inner.stats.sample_rate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binds a session to one end of an in-memory duplex pipe.
    async fn connected_session() -> (SerialLinkSession, tokio::io::DuplexStream) {
        let session = SerialLinkSession::new();
        let (local, remote) = tokio::io::duplex(1024);
        session
            .attach(Box::new(local), "loop0".into(), "loop0 @ 115200 8-none-1".into())
            .await;
        (session, remote)
    }

    /// Polls a condition until it holds or a generous deadline passes.
    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within deadline");
    }

    fn data_entries(session: &SerialLinkSession) -> Vec<LogEntry> {
        session
            .log_entries()
            .into_iter()
            .filter(|e| e.category == LogCategory::Data)
            .collect()
    }

    #[tokio::test]
    async fn test_connect_resets_statistics() {
        let (session, _remote) = connected_session().await;
        assert_eq!(session.state(), LinkState::Connected);
        let stats = session.stats();
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.bytes_sent, 0);
    }

    #[tokio::test]
    async fn test_send_text_with_newline_appends_crlf() {
        let (session, mut remote) = connected_session().await;
        session.set_append_newline(true);

        let sent = session.send("AT", DataMode::Text).await.unwrap();
        assert_eq!(sent, 4);

        let mut received = [0u8; 8];
        let n = remote.read(&mut received).await.unwrap();
        assert_eq!(&received[..n], &[0x41, 0x54, 0x0D, 0x0A]);
        assert_eq!(session.stats().bytes_sent, 4);

        let echoed = session
            .log_entries()
            .into_iter()
            .find(|e| e.category == LogCategory::System && e.text.starts_with(">> "))
            .expect("send echo entry");
        assert_eq!(echoed.text, ">> AT");
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let session = SerialLinkSession::new();
        let result = session.send("AT", DataMode::Text).await;
        assert!(matches!(result, Err(SerialProbeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_send_invalid_hex_writes_nothing() {
        let (session, mut remote) = connected_session().await;
        let result = session.send("4G", DataMode::Hex).await;
        assert!(matches!(
            result,
            Err(SerialProbeError::InvalidHexFormat(_))
        ));
        assert_eq!(session.stats().bytes_sent, 0);

        let mut received = [0u8; 4];
        let read = tokio::time::timeout(
            Duration::from_millis(100),
            remote.read(&mut received),
        )
        .await;
        assert!(read.is_err(), "no bytes must reach the device");

        let errors: Vec<_> = session
            .log_entries()
            .into_iter()
            .filter(|e| e.category == LogCategory::Error)
            .collect();
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn test_inbound_chunk_is_rendered_and_counted() {
        let (session, mut remote) = connected_session().await;
        remote.write_all(b"hello").await.unwrap();

        wait_for(|| session.stats().bytes_received == 5).await;
        wait_for(|| !data_entries(&session).is_empty()).await;
        assert_eq!(data_entries(&session)[0].text, "hello");
    }

    #[tokio::test]
    async fn test_inbound_hex_rendering() {
        let (session, mut remote) = connected_session().await;
        session.set_receive_mode(DataMode::Hex);
        remote.write_all(&[0xDE, 0xAD]).await.unwrap();

        wait_for(|| !data_entries(&session).is_empty()).await;
        assert_eq!(data_entries(&session)[0].text, "DE AD");
    }

    #[tokio::test]
    async fn test_pause_suppresses_rendering_but_counts_bytes() {
        let (session, mut remote) = connected_session().await;
        assert!(session.toggle_pause());

        remote.write_all(&[0x41, 0x42]).await.unwrap();
        wait_for(|| session.stats().bytes_received == 2).await;
        assert!(data_entries(&session).is_empty());

        // Resuming flushes the retained bytes through the codec.
        assert!(!session.toggle_pause());
        wait_for(|| !data_entries(&session).is_empty()).await;
        assert_eq!(data_entries(&session)[0].text, "AB");
        assert_eq!(session.stats().bytes_received, 2);
    }

    #[tokio::test]
    async fn test_clear_pause_buffer_discards_bytes() {
        let (session, mut remote) = connected_session().await;
        session.toggle_pause();
        remote.write_all(b"xyz").await.unwrap();
        wait_for(|| session.stats().bytes_received == 3).await;

        session.clear_pause_buffer();
        session.toggle_pause();
        assert!(data_entries(&session).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (session, _remote) = connected_session().await;
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), LinkState::Disconnected);
        session.disconnect().await.unwrap();
        assert_eq!(session.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_peer_close_triggers_implicit_disconnect() {
        let (session, remote) = connected_session().await;
        drop(remote);
        wait_for(|| session.state() == LinkState::Disconnected).await;
        assert!(
            session
                .log_entries()
                .iter()
                .any(|e| e.text.contains("link closed by peer"))
        );
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_rejected() {
        let (session, _remote) = connected_session().await;
        let config = LinkConfig::for_port("/dev/ttyUSB0");
        let result = session.connect(&config).await;
        assert!(matches!(result, Err(SerialProbeError::AlreadyConnected)));
        assert_eq!(session.state(), LinkState::Connected);
    }

    #[tokio::test]
    async fn test_auto_send_requires_connection() {
        let session = SerialLinkSession::new();
        let result = session.start_auto_send(Duration::from_millis(100), || {
            ("PING".to_string(), DataMode::Text)
        });
        assert!(matches!(result, Err(SerialProbeError::NotConnected)));
    }

    #[tokio::test]
    async fn test_auto_send_paces_and_never_overlaps() {
        let (session, mut remote) = connected_session().await;
        session
            .start_auto_send(Duration::from_millis(100), || {
                ("PING".to_string(), DataMode::Text)
            })
            .unwrap();

        let mut collected = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_millis(350));
        tokio::pin!(deadline);
        let mut chunk = [0u8; 64];
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                read = remote.read(&mut chunk) => {
                    let n = read.unwrap();
                    collected.extend_from_slice(&chunk[..n]);
                }
            }
        }
        session.stop_auto_send();
        assert!(!session.auto_send_enabled());

        assert_eq!(collected.len() % 4, 0, "sends must never interleave");
        let sends = collected.len() / 4;
        assert!((2..=4).contains(&sends), "got {sends} sends");
    }

    #[tokio::test]
    async fn test_auto_send_producer_is_reread_each_tick() {
        let (session, mut remote) = connected_session().await;
        let payload = Arc::new(StdMutex::new("A".to_string()));
        let source = Arc::clone(&payload);
        session
            .start_auto_send(Duration::from_millis(50), move || {
                let current = source.lock().map(|p| p.clone()).unwrap_or_default();
                (current, DataMode::Text)
            })
            .unwrap();

        let mut first = [0u8; 1];
        remote.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"A");

        if let Ok(mut p) = payload.lock() {
            *p = "B".to_string();
        }
        let mut buffer = [0u8; 1];
        // The edit lands on a following tick.
        for _ in 0..4 {
            remote.read_exact(&mut buffer).await.unwrap();
            if &buffer == b"B" {
                break;
            }
        }
        assert_eq!(&buffer, b"B");
        session.stop_auto_send();
    }

    #[tokio::test]
    async fn test_disconnect_stops_auto_send() {
        let (session, _remote) = connected_session().await;
        session
            .start_auto_send(Duration::from_millis(50), || {
                ("PING".to_string(), DataMode::Text)
            })
            .unwrap();
        assert!(session.auto_send_enabled());
        session.disconnect().await.unwrap();
        assert!(!session.auto_send_enabled());
    }

    #[tokio::test]
    async fn test_device_removal_disconnects_once() {
        let (session, _remote) = connected_session().await;
        let (tx, rx) = broadcast::channel(8);
        session.bind_device_events(rx);

        tx.send(DeviceEvent::Removed("other0".into())).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.state(), LinkState::Connected);

        tx.send(DeviceEvent::Removed("loop0".into())).unwrap();
        wait_for(|| session.state() == LinkState::Disconnected).await;
        assert!(!session.auto_send_enabled());

        let removal_entries = session
            .log_entries()
            .into_iter()
            .filter(|e| e.text.contains("device removed"))
            .count();
        assert_eq!(removal_entries, 1);
    }

    #[tokio::test]
    async fn test_history_navigation() {
        let (session, _remote) = connected_session().await;
        session.send("first", DataMode::Text).await.unwrap();
        session.send("second", DataMode::Text).await.unwrap();

        assert_eq!(session.history_previous().as_deref(), Some("second"));
        assert_eq!(session.history_previous().as_deref(), Some("first"));
        assert_eq!(session.history_next().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_export_log_hands_rendered_lines_to_sink() {
        use crate::export::MockExportSink;

        let session = SerialLinkSession::new();
        let sink = MockExportSink::new();
        // Nothing to export on a fresh session.
        assert_eq!(session.export_log(&sink).unwrap(), None);

        let (session, _remote) = connected_session().await;
        session.send("AT", DataMode::Text).await.unwrap();

        let mut sink = MockExportSink::new();
        sink.expect_export_blob()
            .withf(|name, content| {
                name.starts_with("serial_data_") && content.contains(">> AT")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let filename = session.export_log(&sink).unwrap();
        assert!(filename.is_some());
    }

    #[test]
    fn test_send_history_collapses_duplicates_and_caps() {
        let mut history = SendHistory::new();
        history.push("AT");
        history.push("AT");
        assert_eq!(history.entries.len(), 1);
        for i in 0..60 {
            history.push(&format!("cmd {i}"));
        }
        assert_eq!(history.entries.len(), SendHistory::DEFAULT_CAP);
    }
}

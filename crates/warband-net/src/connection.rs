//! Connection lifecycle: the state machine and the per-connection worker.
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!      ^                          |                 |
//!      +--------- failed ---------+                 |
//!      +------------ Disconnecting <-- close/error -+
//! ```
//!
//! The [`ConnectionController`] owns the state and the handle of the live link
//! behind one lock. Whoever takes the link out from under that lock (an
//! explicit [`ConnectionController::disconnect`] or the worker noticing an I/O
//! error) performs the teardown and emits the single
//! [`NetEvent::ConnectionLost`]; the loser of a race finds the slot empty.
//!
//! Each connect attempt spawns one worker task that owns the read half and
//! the [`FrameCodec`], so no partially received frame survives into the next
//! connection. Once connected, the write half gets a task of its own so a
//! send stuck on backpressure never stalls reads or a disconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::envelope::publish_frames;
use crate::error::{NetError, TransportError};
use crate::event::{EventSender, NetEvent};
use crate::framing::{FrameCodec, FrameConfig};
use crate::transport::{self, Endpoint, TransportKind, TransportWriter};

/// How long a closing writer may take to flush before it is aborted.
const WRITER_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport exists.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// The transport is open and frames flow.
    Connected,
    /// Teardown in progress.
    Disconnecting,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
    rx: watch::Receiver<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, rx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        let _ = self.tx.send(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.rx.clone()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.rx.borrow()
    }
}

/// Everything a worker needs to open and run one connection.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Transport to open.
    pub transport: TransportKind,
    /// Where to connect.
    pub endpoint: Endpoint,
    /// WebSocket path suffix.
    pub protocol_version: String,
    /// Bound on DNS + connect + handshake.
    pub connect_timeout: Duration,
    /// Framing limits.
    pub frame: FrameConfig,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
}

/// Controller-side handle of the live link.
struct Link {
    id: u64,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
}

/// Worker-side ends of a link, returned by [`ConnectionController::begin_connect`].
pub struct LinkTicket {
    id: u64,
    outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
}

impl LinkTicket {
    /// Identifier of the connect attempt.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Serializes connection state transitions for one client.
pub struct ConnectionController {
    state: ConnectionStateWatch,
    /// The disconnection lock: guards the link slot and every state change.
    link: Mutex<Option<Link>>,
    next_link_id: AtomicU64,
    events: EventSender,
}

impl ConnectionController {
    /// Create a disconnected controller reporting to `events`.
    pub fn new(events: EventSender) -> Self {
        Self {
            state: ConnectionStateWatch::new(),
            link: Mutex::new(None),
            next_link_id: AtomicU64::new(1),
            events,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Observable state.
    pub fn state_watch(&self) -> &ConnectionStateWatch {
        &self.state
    }

    /// Start a connect attempt.
    ///
    /// Returns `None` (and logs) if a connection is already connecting or
    /// connected.
    pub fn begin_connect(&self) -> Option<LinkTicket> {
        let mut link = self.lock_link();
        let current = self.state.current();
        if matches!(
            current,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::info!("connect ignored, already {current:?}");
            return None;
        }

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *link = Some(Link {
            id,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        });
        self.state.set(ConnectionState::Connecting);

        Some(LinkTicket {
            id,
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        })
    }

    /// The transport for attempt `id` opened.
    ///
    /// Returns `false` if the attempt was cancelled meanwhile; the attempt is
    /// then reported as failed and the caller must drop the transport.
    pub fn attempt_succeeded(&self, id: u64) -> bool {
        let link = self.lock_link();
        let current = link.as_ref().is_some_and(|l| l.id == id)
            && self.state.current() == ConnectionState::Connecting;

        if current {
            self.state.set(ConnectionState::Connected);
            self.events.send(NetEvent::Connected {
                success: true,
                error: None,
            });
        } else {
            self.events.send(NetEvent::Connected {
                success: false,
                error: Some(TransportError::Cancelled.to_string()),
            });
        }
        current
    }

    /// The transport for attempt `id` could not be opened.
    pub fn attempt_failed(&self, id: u64, error: String) {
        let mut link = self.lock_link();
        if link.as_ref().is_some_and(|l| l.id == id) {
            *link = None;
            self.state.set(ConnectionState::Disconnected);
        }
        self.events.send(NetEvent::Connected {
            success: false,
            error: Some(error),
        });
    }

    /// The worker of link `id` saw its transport close or fail.
    ///
    /// Returns `true` if this call performed the teardown.
    pub fn connection_closed(&self, id: u64) -> bool {
        self.teardown(Some(id))
    }

    /// Close the current connection or abandon the current connect attempt.
    ///
    /// Returns `true` if there was anything to tear down.
    pub fn disconnect(&self) -> bool {
        self.teardown(None)
    }

    /// Queue framed bytes on the live connection.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), NetError> {
        let link = self.lock_link();
        match link.as_ref() {
            Some(l) if self.state.current() == ConnectionState::Connected => {
                l.outbound.send(bytes).map_err(|_| NetError::NotConnected)
            }
            _ => Err(NetError::NotConnected),
        }
    }

    fn teardown(&self, expected: Option<u64>) -> bool {
        let mut slot = self.lock_link();
        let matches = match (slot.as_ref(), expected) {
            (Some(l), Some(id)) => l.id == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !matches {
            return false;
        }

        let was_connected = self.state.current() == ConnectionState::Connected;
        self.state.set(ConnectionState::Disconnecting);
        if let Some(link) = slot.take() {
            let _ = link.shutdown.send(true);
            tracing::debug!(link = link.id, "link torn down");
        }
        self.state.set(ConnectionState::Disconnected);

        if was_connected {
            self.events.send(NetEvent::ConnectionLost);
        }
        true
    }

    fn lock_link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolve once `disconnect` was requested or the controller dropped the link.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Drive one connect attempt and, if it succeeds, the connection itself.
///
/// Emits exactly one `Connected` event for the attempt and at most one
/// `ConnectionLost` (through the controller).
pub async fn run_link(
    controller: Arc<ConnectionController>,
    ticket: LinkTicket,
    settings: LinkSettings,
    events: EventSender,
) {
    let LinkTicket {
        id,
        outbound,
        mut shutdown,
    } = ticket;

    tracing::info!(
        "Connecting to {} over {:?}",
        settings.endpoint,
        settings.transport
    );
    let opened = tokio::select! {
        result = tokio::time::timeout(
            settings.connect_timeout,
            transport::open(
                settings.transport,
                &settings.endpoint,
                &settings.protocol_version,
                settings.read_buffer_size,
            ),
        ) => result.unwrap_or(Err(TransportError::Timeout(settings.connect_timeout))),
        () = shutdown_requested(&mut shutdown) => Err(TransportError::Cancelled),
    };

    let (mut reader, mut writer) = match opened {
        Ok(halves) => halves,
        Err(e) => {
            tracing::warn!("Connection to {} failed: {e}", settings.endpoint);
            controller.attempt_failed(id, e.to_string());
            return;
        }
    };

    if !controller.attempt_succeeded(id) {
        writer.close().await;
        return;
    }
    tracing::info!("Connected to {}", settings.endpoint);

    let mut writer_task = tokio::spawn(write_loop(writer, outbound, shutdown.clone()));
    let mut writer_done = false;
    let mut codec = FrameCodec::new(&settings.frame);
    let reason = loop {
        tokio::select! {
            read = reader.read_into(&mut codec) => match read {
                Ok(0) => break "closed by peer".to_string(),
                Ok(_) => {
                    if let Err(e) = publish_frames(&mut codec, &events) {
                        events.debug_message(format!("unrecoverable framing error: {e}"));
                        break e.to_string();
                    }
                }
                Err(e) => break e.to_string(),
            },
            written = &mut writer_task, if !writer_done => {
                writer_done = true;
                break written.unwrap_or_else(|e| e.to_string());
            }
            () = shutdown_requested(&mut shutdown) => break "disconnect requested".to_string(),
        }
    };

    drop(reader);
    if controller.connection_closed(id) {
        tracing::info!("Connection to {} lost: {reason}", settings.endpoint);
    } else {
        tracing::debug!("Connection to {} closed: {reason}", settings.endpoint);
    }
    // The writer sees the shutdown signal now that the link is torn down.
    if !writer_done
        && tokio::time::timeout(WRITER_CLOSE_GRACE, &mut writer_task)
            .await
            .is_err()
    {
        tracing::debug!("writer did not close in {WRITER_CLOSE_GRACE:?}, aborting");
        writer_task.abort();
    }
    if codec.buffered_len() > 0 {
        tracing::debug!("discarding {} buffered bytes", codec.buffered_len());
    }
}

/// Forward queued frames to the transport until the link is torn down or a
/// write fails. A write stuck on backpressure is abandoned on shutdown.
///
/// Returns why it stopped.
async fn write_loop(
    mut writer: TransportWriter,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) -> String {
    let reason = loop {
        let bytes = tokio::select! {
            next = outbound.recv() => match next {
                Some(bytes) => bytes,
                None => break "link dropped".to_string(),
            },
            () = shutdown_requested(&mut shutdown) => break "disconnect requested".to_string(),
        };
        tokio::select! {
            sent = writer.send(bytes) => {
                if let Err(e) = sent {
                    break e.to_string();
                }
            }
            () = shutdown_requested(&mut shutdown) => break "disconnect requested".to_string(),
        }
    };
    writer.close().await;
    reason
}

//! Events produced by network workers and the queue that carries them to the
//! game thread.
//!
//! Any number of producers (the connection worker, HTTP request tasks) hold an
//! [`EventSender`]. The game thread owns the [`EventQueue`] and drains it once
//! per tick; draining never blocks producers.

use crossbeam_channel::{Receiver, Sender};

use crate::correlation::CorrelationToken;
use crate::envelope::CommandId;

/// Everything the network layer reports to the game thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    /// Outcome of one connect attempt. Exactly one per attempt.
    Connected {
        /// Whether the transport is now open.
        success: bool,
        /// Human-readable reason when `success` is false.
        error: Option<String>,
    },
    /// An established connection was closed, locally or remotely.
    ConnectionLost,
    /// Diagnostic text, e.g. a dropped undecodable frame.
    DebugMessage(String),
    /// A decoded envelope from the socket or the HTTP fallback.
    Response {
        /// Routing key from the envelope.
        command_id: CommandId,
        /// Still-serialized application payload.
        payload: Vec<u8>,
    },
    /// Text body of a form/query HTTP call.
    HttpResponse {
        /// Command the request was issued for.
        command_id: CommandId,
        /// Response body.
        text: String,
    },
    /// Terminal notification of an HTTP call, sent whatever the outcome.
    HttpClosed(CorrelationToken),
    /// An HTTP call failed at the transport or status level.
    HttpError {
        /// Description of the failure.
        error: String,
        /// Token of the failed call.
        token: CorrelationToken,
    },
}

/// Discriminant of [`NetEvent`], useful for logging and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetEventKind {
    /// [`NetEvent::Connected`].
    Connected,
    /// [`NetEvent::ConnectionLost`].
    ConnectionLost,
    /// [`NetEvent::DebugMessage`].
    DebugMessage,
    /// [`NetEvent::Response`].
    Response,
    /// [`NetEvent::HttpResponse`].
    HttpResponse,
    /// [`NetEvent::HttpClosed`].
    HttpClosed,
    /// [`NetEvent::HttpError`].
    HttpError,
}

impl NetEvent {
    /// Return the kind of this event without consuming it.
    pub fn kind(&self) -> NetEventKind {
        match self {
            NetEvent::Connected { .. } => NetEventKind::Connected,
            NetEvent::ConnectionLost => NetEventKind::ConnectionLost,
            NetEvent::DebugMessage(_) => NetEventKind::DebugMessage,
            NetEvent::Response { .. } => NetEventKind::Response,
            NetEvent::HttpResponse { .. } => NetEventKind::HttpResponse,
            NetEvent::HttpClosed(_) => NetEventKind::HttpClosed,
            NetEvent::HttpError { .. } => NetEventKind::HttpError,
        }
    }
}

/// Cloneable producer handle.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<NetEvent>,
}

impl EventSender {
    /// Enqueue an event. Never blocks; the event is dropped only if the
    /// queue itself is gone.
    pub fn send(&self, event: NetEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event queue dropped, discarding event");
        }
    }

    /// Shorthand for [`NetEvent::DebugMessage`].
    pub fn debug_message(&self, text: impl Into<String>) {
        self.send(NetEvent::DebugMessage(text.into()));
    }
}

/// Single-consumer end of the event bridge.
pub struct EventQueue {
    tx: Sender<NetEvent>,
    rx: Receiver<NetEvent>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// Create an empty, unbounded queue.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Return a new producer handle.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every event queued so far, in enqueue order.
    ///
    /// Only events present when the call starts are taken, so events enqueued
    /// while the caller processes the batch wait for the next drain.
    pub fn drain(&self) -> Vec<NetEvent> {
        let pending = self.rx.len();
        self.rx.try_iter().take(pending).collect()
    }

    /// Number of events waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Return whether no events are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

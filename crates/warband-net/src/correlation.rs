//! Request correlation for the "waiting for server" indicator.
//!
//! Every outbound call that wants correlation takes a fresh
//! [`CorrelationToken`]. Only the most recent synchronous call owns the busy
//! state: completing an older token is a no-op, so a late reply to a
//! superseded request can never hide the indicator of the current one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::envelope::CommandId;

/// Monotonically increasing request identifier. Compared by equality/order only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationToken(pub u64);

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// UI hook shown while a synchronous request is outstanding.
pub trait WaitIndicator: Send + Sync {
    /// A synchronous request asked for the waiting state.
    fn show_waiting(&self);
    /// The current synchronous request completed.
    fn hide_waiting(&self);
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    token: CorrelationToken,
    command_id: Option<CommandId>,
    indicator_shown: bool,
}

/// Issues tokens and tracks the one synchronous call currently awaited.
pub struct RequestCorrelator {
    last_issued: AtomicU64,
    pending: Mutex<Option<Pending>>,
    indicator: Option<Arc<dyn WaitIndicator>>,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    /// Create a correlator without a UI indicator.
    pub fn new() -> Self {
        Self {
            last_issued: AtomicU64::new(0),
            pending: Mutex::new(None),
            indicator: None,
        }
    }

    /// Create a correlator that drives `indicator`.
    pub fn with_indicator(indicator: Arc<dyn WaitIndicator>) -> Self {
        Self {
            indicator: Some(indicator),
            ..Self::new()
        }
    }

    /// Issue the next token. The first token is 1; tokens are never reused.
    pub fn new_token(&self) -> CorrelationToken {
        CorrelationToken(self.last_issued.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// The most recently issued token, if any.
    pub fn last_issued(&self) -> Option<CorrelationToken> {
        match self.last_issued.load(Ordering::Relaxed) {
            0 => None,
            n => Some(CorrelationToken(n)),
        }
    }

    /// Mark the client busy until `token` (or a newer token) completes.
    ///
    /// `command_id` lets a socket response with that command complete the
    /// call; HTTP calls pass `None` and complete on their terminal event.
    pub fn fire_sync(
        &self,
        token: CorrelationToken,
        command_id: Option<CommandId>,
        show_wait: bool,
    ) {
        let show_now = {
            let mut pending = self.lock_pending();
            let already_shown = pending.is_some_and(|p| p.indicator_shown);
            *pending = Some(Pending {
                token,
                command_id,
                indicator_shown: already_shown || show_wait,
            });
            show_wait && !already_shown
        };

        tracing::trace!(%token, ?command_id, show_wait, "waiting on synchronous call");
        if show_now && let Some(indicator) = &self.indicator {
            indicator.show_waiting();
        }
    }

    /// Complete `token`. Returns `true` if this released the busy state.
    ///
    /// Tokens older than the one currently awaited are ignored.
    pub fn complete(&self, token: CorrelationToken) -> bool {
        let released = {
            let mut pending = self.lock_pending();
            match *pending {
                Some(current) if token >= current.token => pending.take(),
                _ => None,
            }
        };

        match released {
            Some(current) => {
                tracing::trace!(%token, "synchronous call completed");
                if current.indicator_shown && let Some(indicator) = &self.indicator {
                    indicator.hide_waiting();
                }
                true
            }
            None => {
                tracing::trace!(%token, "ignoring stale completion");
                false
            }
        }
    }

    /// Complete the awaited call if it was issued for `command_id`.
    pub fn complete_command(&self, command_id: CommandId) -> bool {
        let token = match *self.lock_pending() {
            Some(current) if current.command_id == Some(command_id) => current.token,
            _ => return false,
        };
        self.complete(token)
    }

    /// Whether a synchronous call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.lock_pending().is_some()
    }

    /// Token of the outstanding synchronous call.
    pub fn waiting_on(&self) -> Option<CorrelationToken> {
        self.lock_pending().map(|p| p.token)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Typed observer lists for [`NetEvent`]s.
//!
//! The [`Dispatcher`] lives on the game thread. Handlers are registered per
//! event kind; responses can additionally be routed by command id. Handlers
//! are invoked only from [`Dispatcher::dispatch`], which the client calls from
//! its per-tick pump, so they need not be `Send`.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::correlation::CorrelationToken;
use crate::envelope::{CommandId, Envelope};
use crate::event::NetEvent;

type ConnectionHandler = Box<dyn FnMut(bool, Option<&str>)>;
type LostHandler = Box<dyn FnMut()>;
type TextHandler = Box<dyn FnMut(&str)>;
type ResponseHandler = Box<dyn FnMut(CommandId, &[u8])>;
type CommandHandler = Box<dyn FnMut(&[u8])>;
type HttpResponseHandler = Box<dyn FnMut(CommandId, &str)>;
type HttpCloseHandler = Box<dyn FnMut(CorrelationToken)>;
type HttpErrorHandler = Box<dyn FnMut(&str, CorrelationToken)>;

/// Routes drained events to registered handlers.
#[derive(Default)]
pub struct Dispatcher {
    connection: Vec<ConnectionHandler>,
    connection_lost: Vec<LostHandler>,
    debug_message: Vec<TextHandler>,
    response: Vec<ResponseHandler>,
    commands: HashMap<CommandId, Vec<CommandHandler>>,
    http_response: Vec<HttpResponseHandler>,
    http_close: Vec<HttpCloseHandler>,
    http_error: Vec<HttpErrorHandler>,
}

impl Dispatcher {
    /// Create a dispatcher with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the outcome of every connect attempt.
    pub fn on_connection<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(bool, Option<&str>) + 'static,
    {
        self.connection.push(Box::new(handler));
        self
    }

    /// Observe loss of an established connection.
    pub fn on_connection_lost<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut() + 'static,
    {
        self.connection_lost.push(Box::new(handler));
        self
    }

    /// Observe diagnostic messages.
    pub fn on_debug_message<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&str) + 'static,
    {
        self.debug_message.push(Box::new(handler));
        self
    }

    /// Observe every response, whatever its command id.
    pub fn on_response<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(CommandId, &[u8]) + 'static,
    {
        self.response.push(Box::new(handler));
        self
    }

    /// Handle responses for one command id with the raw payload.
    pub fn on_command<F>(&mut self, command_id: CommandId, handler: F) -> &mut Self
    where
        F: FnMut(&[u8]) + 'static,
    {
        self.commands
            .entry(command_id)
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Handle responses for one command id, decoding the payload as `T`.
    ///
    /// Payloads that do not decode are logged and skipped.
    pub fn on_command_typed<T, F>(&mut self, command_id: CommandId, mut handler: F) -> &mut Self
    where
        T: DeserializeOwned + 'static,
        F: FnMut(T) + 'static,
    {
        self.on_command(command_id, move |payload| {
            let envelope = Envelope::from_raw(command_id, payload.to_vec());
            match envelope.decode_payload::<T>() {
                Ok(value) => handler(value),
                Err(e) => tracing::warn!("dropping response: {e}"),
            }
        })
    }

    /// Observe text bodies of form/query HTTP calls.
    pub fn on_http_response<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(CommandId, &str) + 'static,
    {
        self.http_response.push(Box::new(handler));
        self
    }

    /// Observe the terminal event of every HTTP call.
    pub fn on_http_close<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(CorrelationToken) + 'static,
    {
        self.http_close.push(Box::new(handler));
        self
    }

    /// Observe HTTP failures.
    pub fn on_http_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&str, CorrelationToken) + 'static,
    {
        self.http_error.push(Box::new(handler));
        self
    }

    /// Invoke every handler interested in `event`.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&mut self, event: &NetEvent) -> usize {
        match event {
            NetEvent::Connected { success, error } => {
                for handler in &mut self.connection {
                    handler(*success, error.as_deref());
                }
                self.connection.len()
            }
            NetEvent::ConnectionLost => {
                for handler in &mut self.connection_lost {
                    handler();
                }
                self.connection_lost.len()
            }
            NetEvent::DebugMessage(text) => {
                for handler in &mut self.debug_message {
                    handler(text.as_str());
                }
                self.debug_message.len()
            }
            NetEvent::Response {
                command_id,
                payload,
            } => {
                let mut invoked = 0;
                if let Some(handlers) = self.commands.get_mut(command_id) {
                    for handler in handlers.iter_mut() {
                        handler(payload.as_slice());
                    }
                    invoked += handlers.len();
                }
                for handler in &mut self.response {
                    handler(*command_id, payload.as_slice());
                }
                invoked += self.response.len();
                if invoked == 0 {
                    tracing::debug!("No handler registered for command {command_id}, dropping");
                }
                invoked
            }
            NetEvent::HttpResponse { command_id, text } => {
                for handler in &mut self.http_response {
                    handler(*command_id, text.as_str());
                }
                self.http_response.len()
            }
            NetEvent::HttpClosed(token) => {
                for handler in &mut self.http_close {
                    handler(*token);
                }
                self.http_close.len()
            }
            NetEvent::HttpError { error, token } => {
                for handler in &mut self.http_error {
                    handler(error.as_str(), *token);
                }
                self.http_error.len()
            }
        }
    }

    /// Return the command ids that have dedicated handlers.
    pub fn registered_commands(&self) -> impl Iterator<Item = &CommandId> {
        self.commands.keys()
    }
}

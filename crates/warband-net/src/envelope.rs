//! Command envelope wrapped around every frame payload.
//!
//! A frame payload is one postcard-encoded [`Envelope`]: an application
//! command id (`c`) and a nested, separately serialized payload (`p`). The
//! command id is opaque here; it only selects which handler receives the
//! payload, and the handler decodes `p` into the type it expects with
//! [`Envelope::decode_payload`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::{EventSender, NetEvent};
use crate::framing::{FrameCodec, FrameError};

/// Application-defined command identifier.
pub type CommandId = i32;

/// Errors that can occur while wrapping or unwrapping an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The nested payload could not be serialized.
    #[error("failed to encode payload for command {command_id}: {source}")]
    EncodePayload {
        /// Command the payload was meant for.
        command_id: CommandId,
        /// Underlying postcard error.
        #[source]
        source: postcard::Error,
    },

    /// The outer envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[source] postcard::Error),

    /// The frame payload is not a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(#[source] postcard::Error),

    /// The nested payload does not match the requested type.
    #[error("failed to decode payload of command {command_id}: {source}")]
    DecodePayload {
        /// Command whose payload failed to decode.
        command_id: CommandId,
        /// Underlying postcard error.
        #[source]
        source: postcard::Error,
    },
}

/// One routed message: a command id plus its serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Routing key.
    #[serde(rename = "c")]
    pub command_id: CommandId,
    /// Serialized application payload, decoded by whoever owns `command_id`.
    #[serde(rename = "p")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Serialize `payload` and wrap it for `command_id`.
    pub fn new<T: Serialize + ?Sized>(
        command_id: CommandId,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        let payload = postcard::to_allocvec(payload)
            .map_err(|source| EnvelopeError::EncodePayload { command_id, source })?;
        Ok(Self {
            command_id,
            payload,
        })
    }

    /// Wrap an already serialized payload.
    pub fn from_raw(command_id: CommandId, payload: Vec<u8>) -> Self {
        Self {
            command_id,
            payload,
        }
    }

    /// Serialize the whole envelope into a frame payload.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        postcard::to_allocvec(self).map_err(EnvelopeError::Encode)
    }

    /// Parse a frame payload back into an envelope.
    pub fn decode(frame: &[u8]) -> Result<Self, EnvelopeError> {
        postcard::from_bytes(frame).map_err(EnvelopeError::Decode)
    }

    /// Decode the nested payload as `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        postcard::from_bytes(&self.payload).map_err(|source| EnvelopeError::DecodePayload {
            command_id: self.command_id,
            source,
        })
    }
}

/// Drain every complete frame from `codec`, unwrap it and publish it.
///
/// A frame that is not a valid envelope is reported as a debug message and
/// dropped; the stream stays usable. Framing errors are returned because the
/// byte stream cannot be resynchronised after them.
pub(crate) fn publish_frames(
    codec: &mut FrameCodec,
    events: &EventSender,
) -> Result<usize, FrameError> {
    let mut published = 0;
    while let Some(frame) = codec.next_frame()? {
        match Envelope::decode(&frame) {
            Ok(envelope) => {
                tracing::trace!(
                    command_id = envelope.command_id,
                    len = envelope.payload.len(),
                    "frame received"
                );
                events.send(NetEvent::Response {
                    command_id: envelope.command_id,
                    payload: envelope.payload,
                });
                published += 1;
            }
            Err(e) => {
                tracing::warn!("dropping {}-byte frame: {e}", frame.len());
                events.debug_message(e.to_string());
            }
        }
    }
    Ok(published)
}

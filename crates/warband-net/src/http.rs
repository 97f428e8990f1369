//! HTTP fallback channel.
//!
//! Each call runs on its own task. Binary calls POST the framed envelope to
//! `<base>?cmd=<id>&jid=<session>` and feed the response body through a fresh
//! [`FrameCodec`], exactly like bytes read from the socket. Form calls send
//! `key=value` parameters (query string for GET, urlencoded body for POST)
//! and report the body as text.
//!
//! Whatever happens, every call ends with [`NetEvent::HttpClosed`] carrying
//! its token; failures additionally produce [`NetEvent::HttpError`] first.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{StatusCode, Url};
use tokio::runtime::Handle;

use crate::correlation::CorrelationToken;
use crate::envelope::{CommandId, Envelope, publish_frames};
use crate::error::NetError;
use crate::event::{EventSender, NetEvent};
use crate::framing::{FrameCodec, FrameConfig, encode_frame};

/// Content type of binary envelope calls.
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";
/// Content type of form calls.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP method of a form call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Parameters go in the query string.
    Get,
    /// Parameters go in a urlencoded body.
    Post,
}

/// Settings of the HTTP fallback channel.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Base URL the `cmd`/`jid` query is appended to.
    pub base_url: String,
    /// Value of the `jid` query parameter.
    pub session_id: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Framing limits for response bodies.
    pub frame: FrameConfig,
}

#[derive(Debug, thiserror::Error)]
enum CallError {
    #[error("HTTP status {0}")]
    Status(StatusCode),
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

enum Body {
    Envelope(Vec<u8>),
    Form {
        method: HttpMethod,
        params: BTreeMap<String, String>,
    },
}

/// Outbound HTTP path feeding the same event queue as the socket.
pub struct HttpChannel {
    client: reqwest::Client,
    base_url: Url,
    session_id: String,
    frame: FrameConfig,
    runtime: Handle,
    events: EventSender,
}

impl HttpChannel {
    /// Build the channel. Fails if `base_url` is not an absolute URL.
    pub fn new(
        settings: HttpSettings,
        runtime: Handle,
        events: EventSender,
    ) -> Result<Self, NetError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|_| NetError::InvalidAddress(settings.base_url.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            session_id: settings.session_id,
            frame: settings.frame,
            runtime,
            events,
        })
    }

    /// URL of a call for `command_id`: the base URL plus `cmd` and `jid`.
    pub fn command_url(&self, command_id: CommandId) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("cmd", &command_id.to_string())
            .append_pair("jid", &self.session_id);
        url
    }

    /// POST `envelope` as a binary frame; responses arrive as
    /// [`NetEvent::Response`].
    pub fn post_envelope(
        &self,
        token: CorrelationToken,
        envelope: &Envelope,
    ) -> Result<(), NetError> {
        let framed = encode_frame(&envelope.encode()?, &self.frame)?;
        self.spawn(token, envelope.command_id, Body::Envelope(framed));
        Ok(())
    }

    /// Send form parameters; the body arrives as [`NetEvent::HttpResponse`].
    pub fn request(
        &self,
        token: CorrelationToken,
        command_id: CommandId,
        method: HttpMethod,
        params: BTreeMap<String, String>,
    ) {
        self.spawn(token, command_id, Body::Form { method, params });
    }

    fn spawn(&self, token: CorrelationToken, command_id: CommandId, body: Body) {
        let url = self.command_url(command_id);
        let (request, binary) = match body {
            Body::Envelope(bytes) => (
                self.client
                    .post(url)
                    .header(CONTENT_TYPE, BINARY_CONTENT_TYPE)
                    .body(bytes),
                true,
            ),
            Body::Form {
                method: HttpMethod::Get,
                params,
            } => (self.client.get(url).query(&params), false),
            Body::Form {
                method: HttpMethod::Post,
                params,
            } => (self.client.post(url).form(&params), false),
        };

        let events = self.events.clone();
        let frame = self.frame.clone();
        tracing::debug!(%token, command_id, binary, "HTTP call started");
        self.runtime.spawn(async move {
            let outcome = async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(CallError::Status(status));
                }
                Ok(response.bytes().await?)
            }
            .await;

            match outcome {
                Ok(body) if binary => {
                    let mut codec = FrameCodec::new(&frame);
                    codec.extend(&body);
                    match publish_frames(&mut codec, &events) {
                        Ok(_) if codec.buffered_len() > 0 => events.debug_message(format!(
                            "HTTP response for command {command_id} ended mid-frame \
                             ({} bytes left)",
                            codec.buffered_len()
                        )),
                        Ok(_) => {}
                        Err(e) => events.send(NetEvent::HttpError {
                            error: e.to_string(),
                            token,
                        }),
                    }
                }
                Ok(body) => events.send(NetEvent::HttpResponse {
                    command_id,
                    text: String::from_utf8_lossy(&body).into_owned(),
                }),
                Err(e) => {
                    tracing::warn!(%token, command_id, "HTTP call failed: {e}");
                    events.send(NetEvent::HttpError {
                        error: e.to_string(),
                        token,
                    });
                }
            }

            events.send(NetEvent::HttpClosed(token));
        });
    }
}

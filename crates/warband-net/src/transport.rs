//! Byte transports: a TCP stream socket or a WebSocket.
//!
//! Both variants expose the same split capability: a [`TransportReader`] that
//! appends whatever arrives to a [`FrameCodec`], and a [`TransportWriter`] that
//! sends already-framed bytes. WebSocket messages carry the same length-prefixed
//! frames as the TCP stream, so the codec is shared.

use std::fmt;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
pub use warband_config::TransportKind;

use crate::error::{NetError, TransportError};
use crate::framing::FrameCodec;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A server endpoint parsed from a `host:port` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Parse `host:port`. The port follows the last colon; bracketed IPv6
    /// literals (`[::1]:7777`) are accepted.
    pub fn parse(address: &str) -> Result<Self, NetError> {
        let invalid = || NetError::InvalidAddress(address.to_string());

        let (host, port) = address.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// WebSocket URL for this endpoint: `ws://host:port/=<protocol_version>`.
    pub fn websocket_url(&self, protocol_version: &str) -> String {
        format!("ws://{self}/={protocol_version}")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Open a transport of the given kind and split it into its two halves.
///
/// For TCP this resolves the host and connects; for WebSocket it also runs the
/// opening handshake. The transport is open only once this returns `Ok`.
pub(crate) async fn open(
    kind: TransportKind,
    endpoint: &Endpoint,
    protocol_version: &str,
    read_buffer_size: usize,
) -> Result<(TransportReader, TransportWriter), TransportError> {
    match kind {
        TransportKind::Tcp => {
            let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
            stream.set_nodelay(true)?;
            let (reader, writer) = stream.into_split();
            Ok((
                TransportReader::Tcp {
                    half: reader,
                    buf: vec![0u8; read_buffer_size.max(1)],
                },
                TransportWriter::Tcp(writer),
            ))
        }
        TransportKind::WebSocket => {
            let url = endpoint.websocket_url(protocol_version);
            let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(Box::new)?;
            tracing::debug!("WebSocket handshake with {url} done ({})", response.status());
            let (sink, stream) = stream.split();
            Ok((
                TransportReader::WebSocket(stream),
                TransportWriter::WebSocket(sink),
            ))
        }
    }
}

/// Receiving half of an open transport.
pub(crate) enum TransportReader {
    Tcp { half: OwnedReadHalf, buf: Vec<u8> },
    WebSocket(SplitStream<WsStream>),
}

impl TransportReader {
    /// Wait for the next inbound bytes and append them to `codec`.
    ///
    /// Returns the number of bytes appended; `0` means the peer closed the
    /// transport. Cancel-safe: nothing is appended unless the call completes.
    pub(crate) async fn read_into(
        &mut self,
        codec: &mut FrameCodec,
    ) -> Result<usize, TransportError> {
        match self {
            TransportReader::Tcp { half, buf } => {
                let n = half.read(buf).await?;
                codec.extend(&buf[..n]);
                Ok(n)
            }
            TransportReader::WebSocket(stream) => loop {
                match stream.next().await {
                    None => return Ok(0),
                    Some(Err(e)) => return Err(Box::new(e).into()),
                    Some(Ok(Message::Binary(bytes))) => {
                        if bytes.is_empty() {
                            continue;
                        }
                        codec.extend(&bytes);
                        return Ok(bytes.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::debug!("WebSocket closed by peer: {frame:?}");
                        return Ok(0);
                    }
                    Some(Ok(Message::Text(text))) => {
                        tracing::warn!("ignoring {}-byte text message", text.len());
                    }
                    // Ping/pong replies are handled by tungstenite.
                    Some(Ok(_)) => {}
                }
            },
        }
    }
}

/// Sending half of an open transport.
pub(crate) enum TransportWriter {
    Tcp(OwnedWriteHalf),
    WebSocket(SplitSink<WsStream, Message>),
}

impl TransportWriter {
    /// Send one already-framed buffer.
    pub(crate) async fn send(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
        match self {
            TransportWriter::Tcp(half) => {
                half.write_all(&bytes).await?;
                Ok(())
            }
            TransportWriter::WebSocket(sink) => {
                sink.send(Message::Binary(bytes.into()))
                    .await
                    .map_err(Box::new)?;
                Ok(())
            }
        }
    }

    /// Best-effort graceful close.
    pub(crate) async fn close(&mut self) {
        let result = match self {
            TransportWriter::Tcp(half) => half.shutdown().await.map_err(TransportError::from),
            TransportWriter::WebSocket(sink) => {
                sink.close().await.map_err(|e| TransportError::from(Box::new(e)))
            }
        };
        if let Err(e) = result {
            tracing::trace!("error while closing transport: {e}");
        }
    }
}

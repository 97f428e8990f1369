//! Network access layer of the warband client: a TCP or WebSocket connection
//! carrying length-prefixed command envelopes, an HTTP fallback path, and an
//! event queue drained once per game tick.
//!
//! ```no_run
//! use warband_net::{ClientConfig, Dispatcher, NetClient};
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let client = NetClient::new(ClientConfig::default(), runtime.handle().clone()).unwrap();
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.on_command(12, |payload| println!("roster: {} bytes", payload.len()));
//! client.connect().unwrap();
//!
//! loop {
//!     client.pump(&mut dispatcher);
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ```

pub mod client;
pub mod connection;
pub mod correlation;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod event;
pub mod framing;
pub mod http;
pub mod transport;

pub use client::{ClientConfig, NetClient};
pub use connection::{ConnectionState, ConnectionStateWatch};
pub use correlation::{CorrelationToken, RequestCorrelator, WaitIndicator};
pub use dispatch::Dispatcher;
pub use envelope::{CommandId, Envelope, EnvelopeError};
pub use error::{NetError, Result, TransportError};
pub use event::{EventQueue, EventSender, NetEvent, NetEventKind};
pub use framing::{FrameCodec, FrameConfig, FrameError, LENGTH_PREFIX_SIZE, encode_frame};
pub use http::{HttpChannel, HttpMethod, HttpSettings};
pub use transport::{Endpoint, TransportKind};

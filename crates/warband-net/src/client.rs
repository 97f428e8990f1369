//! The client object the game owns: one connection, one event queue, one
//! correlator, and an optional HTTP fallback channel.
//!
//! Network work runs on the tokio runtime whose [`Handle`] the client was
//! built with. The game thread calls [`NetClient::pump`] once per tick; that
//! is the only place handlers run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use warband_config::Config;

use crate::connection::{self, ConnectionController, ConnectionState, LinkSettings};
use crate::correlation::{CorrelationToken, RequestCorrelator, WaitIndicator};
use crate::dispatch::Dispatcher;
use crate::envelope::{CommandId, Envelope};
use crate::error::NetError;
use crate::event::{EventQueue, EventSender, NetEvent};
use crate::framing::{FrameConfig, encode_frame};
use crate::http::{HttpChannel, HttpMethod, HttpSettings};
use crate::transport::{Endpoint, TransportKind};

/// Runtime configuration of a [`NetClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Default server address, `host:port`.
    pub address: String,
    /// Socket or WebSocket.
    pub transport: TransportKind,
    /// WebSocket path suffix (`ws://host:port/=<version>`).
    pub protocol_version: String,
    /// Bound on one connect attempt.
    pub connect_timeout: Duration,
    /// Framing limits, shared by both directions and the HTTP path.
    pub frame: FrameConfig,
    /// Socket read buffer size.
    pub read_buffer_size: usize,
    /// HTTP fallback; `None` disables it.
    pub http: Option<HttpSettings>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ClientConfig {
    /// Build the client configuration from the persisted one.
    ///
    /// The HTTP fallback is enabled only if `http.base_url` is set.
    pub fn from_config(config: &Config) -> Self {
        let frame = FrameConfig {
            max_payload_size: config.network.max_frame_size,
        };
        let base_url = config.http.base_url.trim();
        let http = (!base_url.is_empty()).then(|| HttpSettings {
            base_url: base_url.to_string(),
            session_id: config.http.session_id.clone(),
            timeout: Duration::from_secs(u64::from(config.http.timeout_seconds)),
            frame: frame.clone(),
        });

        Self {
            address: config.network.address.clone(),
            transport: config.network.transport,
            protocol_version: config.network.protocol_version.clone(),
            connect_timeout: Duration::from_secs(u64::from(
                config.network.connect_timeout_seconds,
            )),
            frame,
            read_buffer_size: config.network.read_buffer_size,
            http,
        }
    }
}

/// Network access layer of the game client.
pub struct NetClient {
    config: ClientConfig,
    runtime: Handle,
    queue: EventQueue,
    controller: Arc<ConnectionController>,
    correlator: RequestCorrelator,
    http: Option<HttpChannel>,
}

impl NetClient {
    /// Create a disconnected client. Fails only on an invalid HTTP base URL.
    pub fn new(config: ClientConfig, runtime: Handle) -> Result<Self, NetError> {
        Self::build(config, runtime, RequestCorrelator::new())
    }

    /// Like [`NetClient::new`], with a UI hook for synchronous calls.
    pub fn with_indicator(
        config: ClientConfig,
        runtime: Handle,
        indicator: Arc<dyn WaitIndicator>,
    ) -> Result<Self, NetError> {
        Self::build(config, runtime, RequestCorrelator::with_indicator(indicator))
    }

    fn build(
        config: ClientConfig,
        runtime: Handle,
        correlator: RequestCorrelator,
    ) -> Result<Self, NetError> {
        let queue = EventQueue::new();
        let http = match &config.http {
            Some(settings) => Some(HttpChannel::new(
                settings.clone(),
                runtime.clone(),
                queue.sender(),
            )?),
            None => None,
        };

        Ok(Self {
            controller: Arc::new(ConnectionController::new(queue.sender())),
            config,
            runtime,
            queue,
            correlator,
            http,
        })
    }

    /// Connect to the configured address.
    pub fn connect(&self) -> Result<bool, NetError> {
        let address = self.config.address.clone();
        self.connect_to(&address)
    }

    /// Start connecting to `address` (`host:port`).
    ///
    /// Returns `Ok(false)` without doing anything if the client is already
    /// connecting or connected. The outcome arrives later as
    /// [`NetEvent::Connected`].
    pub fn connect_to(&self, address: &str) -> Result<bool, NetError> {
        let endpoint = Endpoint::parse(address)?;
        let Some(ticket) = self.controller.begin_connect() else {
            return Ok(false);
        };

        let settings = LinkSettings {
            transport: self.config.transport,
            endpoint,
            protocol_version: self.config.protocol_version.clone(),
            connect_timeout: self.config.connect_timeout,
            frame: self.config.frame.clone(),
            read_buffer_size: self.config.read_buffer_size,
        };
        self.runtime.spawn(connection::run_link(
            Arc::clone(&self.controller),
            ticket,
            settings,
            self.queue.sender(),
        ));
        Ok(true)
    }

    /// Close the connection or abandon a pending connect attempt.
    pub fn disconnect(&self) -> bool {
        self.controller.disconnect()
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    /// Subscribe to connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.controller.state_watch().subscribe()
    }

    /// Serialize `payload` and send it as `command_id`.
    pub fn send<T: Serialize + ?Sized>(
        &self,
        command_id: CommandId,
        payload: &T,
    ) -> Result<(), NetError> {
        self.send_envelope(&Envelope::new(command_id, payload)?)
    }

    /// Send an already built envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> Result<(), NetError> {
        self.controller.send(self.frame(envelope)?)
    }

    fn frame(&self, envelope: &Envelope) -> Result<Vec<u8>, NetError> {
        let frame = encode_frame(&envelope.encode()?, &self.config.frame)?;
        tracing::trace!(command_id = envelope.command_id, len = frame.len(), "sending frame");
        Ok(frame)
    }

    /// Send and mark the client busy until a response for `command_id` is
    /// pumped.
    pub fn send_sync<T: Serialize + ?Sized>(
        &self,
        command_id: CommandId,
        payload: &T,
        show_wait: bool,
    ) -> Result<CorrelationToken, NetError> {
        let frame = self.frame(&Envelope::new(command_id, payload)?)?;
        // Busy before the frame leaves, so a fast response cannot be pumped first.
        let token = self.correlator.new_token();
        self.correlator.fire_sync(token, Some(command_id), show_wait);
        if let Err(e) = self.controller.send(frame) {
            self.correlator.complete(token);
            return Err(e);
        }
        Ok(token)
    }

    /// POST `payload` for `command_id` over HTTP. Responses arrive as
    /// [`NetEvent::Response`]; the call is finished once its
    /// [`NetEvent::HttpClosed`] is pumped.
    pub fn http_post<T: Serialize + ?Sized>(
        &self,
        command_id: CommandId,
        payload: &T,
        show_wait: bool,
    ) -> Result<CorrelationToken, NetError> {
        let channel = self.http.as_ref().ok_or(NetError::HttpNotConfigured)?;
        let envelope = Envelope::new(command_id, payload)?;
        let token = self.correlator.new_token();
        self.correlator.fire_sync(token, None, show_wait);
        if let Err(e) = channel.post_envelope(token, &envelope) {
            self.correlator.complete(token);
            return Err(e);
        }
        Ok(token)
    }

    /// Form/query HTTP call; the body arrives as [`NetEvent::HttpResponse`].
    pub fn http_request(
        &self,
        command_id: CommandId,
        method: HttpMethod,
        params: BTreeMap<String, String>,
        show_wait: bool,
    ) -> Result<CorrelationToken, NetError> {
        let channel = self.http.as_ref().ok_or(NetError::HttpNotConfigured)?;
        let token = self.correlator.new_token();
        self.correlator.fire_sync(token, None, show_wait);
        channel.request(token, command_id, method, params);
        Ok(token)
    }

    /// Whether a synchronous call is outstanding.
    pub fn is_busy(&self) -> bool {
        self.correlator.is_busy()
    }

    /// The correlator, for callers that complete tokens themselves.
    pub fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    /// Sender for host code that wants to inject events, e.g. diagnostics.
    pub fn events(&self) -> EventSender {
        self.queue.sender()
    }

    /// Deliver everything queued so far to `dispatcher`.
    ///
    /// Call once per tick from the game thread. Correlation tokens are
    /// completed before handlers run, so a handler sees the client idle.
    /// Returns the number of events delivered.
    pub fn pump(&self, dispatcher: &mut Dispatcher) -> usize {
        let events = self.queue.drain();
        for event in &events {
            match event {
                NetEvent::HttpClosed(token) => {
                    self.correlator.complete(*token);
                }
                NetEvent::Response { command_id, .. } => {
                    self.correlator.complete_command(*command_id);
                }
                _ => {}
            }
            dispatcher.dispatch(event);
        }
        events.len()
    }
}

impl Drop for NetClient {
    fn drop(&mut self) {
        self.controller.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message;

    type Log = Rc<RefCell<Vec<NetEvent>>>;

    /// A dispatcher that records every event it sees.
    fn recorder() -> (Dispatcher, Log) {
        let log: Log = Rc::default();
        let mut dispatcher = Dispatcher::new();
        let l = Rc::clone(&log);
        dispatcher.on_connection(move |success, error| {
            l.borrow_mut().push(NetEvent::Connected {
                success,
                error: error.map(str::to_string),
            });
        });
        let l = Rc::clone(&log);
        dispatcher.on_connection_lost(move || l.borrow_mut().push(NetEvent::ConnectionLost));
        let l = Rc::clone(&log);
        dispatcher.on_debug_message(move |text| {
            l.borrow_mut().push(NetEvent::DebugMessage(text.to_string()));
        });
        let l = Rc::clone(&log);
        dispatcher.on_response(move |command_id, payload| {
            l.borrow_mut().push(NetEvent::Response {
                command_id,
                payload: payload.to_vec(),
            });
        });
        let l = Rc::clone(&log);
        dispatcher.on_http_close(move |token| l.borrow_mut().push(NetEvent::HttpClosed(token)));
        let l = Rc::clone(&log);
        dispatcher.on_http_error(move |error, token| {
            l.borrow_mut().push(NetEvent::HttpError {
                error: error.to_string(),
                token,
            });
        });
        (dispatcher, log)
    }

    async fn pump_until(
        client: &NetClient,
        dispatcher: &mut Dispatcher,
        log: &Log,
        done: impl Fn(&[NetEvent]) -> bool,
    ) {
        for _ in 0..500 {
            client.pump(dispatcher);
            if done(log.borrow().as_slice()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached, events: {:?}", log.borrow());
    }

    fn has(kind: fn(&NetEvent) -> bool) -> impl Fn(&[NetEvent]) -> bool {
        move |events: &[NetEvent]| events.iter().any(kind)
    }

    fn client() -> NetClient {
        NetClient::new(ClientConfig::default(), Handle::current()).unwrap()
    }

    /// Counts indicator calls.
    #[derive(Default)]
    struct Counting {
        shown: AtomicUsize,
        hidden: AtomicUsize,
    }

    impl WaitIndicator for Counting {
        fn show_waiting(&self) {
            self.shown.fetch_add(1, Ordering::SeqCst);
        }
        fn hide_waiting(&self) {
            self.hidden.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// HTTP settings pointing at a port nothing listens on.
    fn refused_http_config() -> ClientConfig {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        ClientConfig {
            http: Some(HttpSettings {
                base_url: format!("http://127.0.0.1:{port}/gate"),
                session_id: "s".to_string(),
                timeout: Duration::from_secs(5),
                frame: FrameConfig::default(),
            }),
            ..ClientConfig::default()
        }
    }

    fn wire(command_id: CommandId, payload: &[u8]) -> Vec<u8> {
        let envelope = Envelope::from_raw(command_id, payload.to_vec());
        encode_frame(&envelope.encode().unwrap(), &FrameConfig::default()).unwrap()
    }

    /// Read one frame payload from a raw server-side socket.
    async fn read_envelope(stream: &mut TcpStream) -> Envelope {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(prefix) as usize];
        stream.read_exact(&mut body).await.unwrap();
        Envelope::decode(&body).unwrap()
    }

    #[test]
    fn test_client_config_from_config() {
        let mut config = Config::default();
        config.network.address = "10.1.1.1:9000".to_string();
        config.network.connect_timeout_seconds = 3;
        config.network.max_frame_size = 2048;

        let client_config = ClientConfig::from_config(&config);
        assert_eq!(client_config.address, "10.1.1.1:9000");
        assert_eq!(client_config.connect_timeout, Duration::from_secs(3));
        assert_eq!(client_config.frame.max_payload_size, 2048);
        assert!(client_config.http.is_none());

        config.http.base_url = "http://gate.example.com/cmd".to_string();
        config.http.session_id = "s1".to_string();
        let http = ClientConfig::from_config(&config).http.unwrap();
        assert_eq!(http.session_id, "s1");
        assert_eq!(http.timeout, Duration::from_secs(60));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_address_is_rejected() {
        let client = client();
        assert!(matches!(
            client.connect_to("no-port"),
            Err(NetError::InvalidAddress(_))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_while_disconnected_fails() {
        let client = client();
        assert!(matches!(client.send(1, &5u8), Err(NetError::NotConnected)));
        assert!(!client.is_busy());
        assert!(matches!(
            client.send_sync(1, &5u8, true),
            Err(NetError::NotConnected)
        ));
        assert!(!client.is_busy());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_without_base_url_is_not_configured() {
        let client = client();
        assert!(matches!(
            client.http_post(1, &(), false),
            Err(NetError::HttpNotConfigured)
        ));
        assert!(!client.is_busy());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connect_refused_reports_failure_once() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = client();
        let (mut dispatcher, log) = recorder();

        assert!(client.connect_to(&format!("127.0.0.1:{port}")).unwrap());
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Connected { .. })
        }))
        .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.pump(&mut dispatcher);

        let events = log.borrow();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            NetEvent::Connected {
                success: false,
                error: Some(_)
            }
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_call_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_envelope(&mut stream).await;
            let (unit, strength): (String, u32) = request.decode_payload().unwrap();
            assert_eq!(unit, "archers");
            stream
                .write_all(&wire(request.command_id, &(strength * 2).to_be_bytes()))
                .await
                .unwrap();
            stream
        });

        let client = client();
        let (mut dispatcher, log) = recorder();
        let routed = Rc::new(RefCell::new(Vec::new()));
        let r = Rc::clone(&routed);
        dispatcher.on_command(301, move |payload| r.borrow_mut().push(payload.to_vec()));

        client.connect_to(&addr.to_string()).unwrap();
        assert!(!client.connect_to(&addr.to_string()).unwrap());
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Connected { success: true, .. })
        }))
        .await;
        assert_eq!(client.state(), ConnectionState::Connected);

        client
            .send_sync(301, &("archers".to_string(), 21u32), false)
            .unwrap();
        assert!(client.is_busy());
        pump_until(&client, &mut dispatcher, &log, |_| !routed.borrow().is_empty()).await;

        assert_eq!(routed.borrow()[0], 42u32.to_be_bytes().to_vec());
        assert!(!client.is_busy());
        // The catch-all sees routed responses too.
        assert!(
            log.borrow()
                .iter()
                .any(|e| matches!(e, NetEvent::Response { command_id: 301, .. }))
        );
        drop(server.await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_server_close_emits_one_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(stream);
        });

        let client = client();
        let (mut dispatcher, log) = recorder();
        client.connect_to(&addr.to_string()).unwrap();
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::ConnectionLost)
        }))
        .await;
        client.disconnect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.pump(&mut dispatcher);

        let lost = log
            .borrow()
            .iter()
            .filter(|e| matches!(e, NetEvent::ConnectionLost))
            .count();
        assert_eq!(lost, 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconnect_discards_partial_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // First session: half a frame, then hang up.
            let (mut first, _) = listener.accept().await.unwrap();
            let stale = wire(1, &[0xAA; 16]);
            first.write_all(&stale[..10]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(first);

            // Second session: one complete frame.
            let (mut second, _) = listener.accept().await.unwrap();
            second.write_all(&wire(2, &[0xBB])).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let client = client();
        let (mut dispatcher, log) = recorder();
        client.connect_to(&addr.to_string()).unwrap();
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::ConnectionLost)
        }))
        .await;

        assert!(client.connect_to(&addr.to_string()).unwrap());
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Response { .. })
        }))
        .await;

        let responses: Vec<_> = log
            .borrow()
            .iter()
            .filter(|e| matches!(e, NetEvent::Response { .. }))
            .cloned()
            .collect();
        assert_eq!(
            responses,
            vec![NetEvent::Response {
                command_id: 2,
                payload: vec![0xBB]
            }]
        );
        assert!(!log.borrow().iter().any(|e| matches!(e, NetEvent::DebugMessage(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_bad_frame_is_reported_and_connection_survives() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut bytes = encode_frame(&[0xff; 6], &FrameConfig::default()).unwrap();
            bytes.extend(wire(7, &[1]));
            stream.write_all(&bytes).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let client = client();
        let (mut dispatcher, log) = recorder();
        client.connect_to(&addr.to_string()).unwrap();
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Response { .. })
        }))
        .await;

        let events = log.borrow();
        assert!(matches!(events[0], NetEvent::Connected { success: true, .. }));
        assert!(matches!(events[1], NetEvent::DebugMessage(_)));
        assert_eq!(
            events[2],
            NetEvent::Response {
                command_id: 7,
                payload: vec![1]
            }
        );
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_websocket_end_to_end() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Echo binary frames back unchanged.
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Binary(_) = message {
                    ws.send(message).await.unwrap();
                }
            }
        });

        let config = ClientConfig {
            transport: TransportKind::WebSocket,
            ..ClientConfig::default()
        };
        let client = NetClient::new(config, Handle::current()).unwrap();
        let (mut dispatcher, log) = recorder();
        client.connect_to(&addr.to_string()).unwrap();
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Connected { success: true, .. })
        }))
        .await;

        client.send(55, &"hold the line").unwrap();
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Response { .. })
        }))
        .await;

        let expected = Envelope::new(55, &"hold the line").unwrap();
        assert!(log.borrow().contains(&NetEvent::Response {
            command_id: 55,
            payload: expected.payload,
        }));

        assert!(client.disconnect());
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::ConnectionLost)
        }))
        .await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_failure_releases_indicator() {
        let indicator = Arc::new(Counting::default());
        let client =
            NetClient::with_indicator(refused_http_config(), Handle::current(), indicator.clone())
                .unwrap();
        let (mut dispatcher, log) = recorder();

        let token = client.http_post(12, &[1u8, 2, 3], true).unwrap();
        assert!(client.is_busy());
        assert_eq!(indicator.shown.load(Ordering::SeqCst), 1);

        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::HttpClosed(_))
        }))
        .await;

        let events = log.borrow();
        assert!(matches!(&events[0], NetEvent::HttpError { token: t, .. } if *t == token));
        assert_eq!(events[1], NetEvent::HttpClosed(token));
        assert!(!client.is_busy());
        assert_eq!(indicator.hidden.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_send_sync_releases_busy_state() {
        let indicator = Arc::new(Counting::default());
        let client =
            NetClient::with_indicator(ClientConfig::default(), Handle::current(), indicator.clone())
                .unwrap();

        assert!(matches!(
            client.send_sync(4, &7u32, true),
            Err(NetError::NotConnected)
        ));
        assert!(!client.is_busy());
        assert_eq!(indicator.shown.load(Ordering::SeqCst), 1);
        assert_eq!(indicator.hidden.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_calls_from_other_thread_never_leave_client_busy() {
        let indicator = Arc::new(Counting::default());
        let client =
            NetClient::with_indicator(refused_http_config(), Handle::current(), indicator.clone())
                .unwrap();
        let (mut dispatcher, log) = recorder();
        let closed = |events: &[NetEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, NetEvent::HttpClosed(_)))
                .count()
        };

        for round in 1..=20 {
            // The game thread pumps while another thread starts the call.
            std::thread::scope(|s| {
                let call = s.spawn(|| client.http_post(3, &(), true));
                while !call.is_finished() {
                    client.pump(&mut dispatcher);
                }
                call.join().unwrap().unwrap();
            });
            pump_until(&client, &mut dispatcher, &log, |events| closed(events) == round).await;
            assert!(!client.is_busy(), "round {round} left the client busy");
        }
        assert_eq!(indicator.shown.load(Ordering::SeqCst), 20);
        assert_eq!(indicator.hidden.load(Ordering::SeqCst), 20);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_instant_replies_never_leave_client_busy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            loop {
                let mut prefix = [0u8; 4];
                if stream.read_exact(&mut prefix).await.is_err() {
                    return;
                }
                let mut body = vec![0u8; u32::from_be_bytes(prefix) as usize];
                if stream.read_exact(&mut body).await.is_err() {
                    return;
                }
                let envelope = Envelope::decode(&body).unwrap();
                let reply = wire(envelope.command_id, b"ack");
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
        });

        let client = client();
        let (mut dispatcher, log) = recorder();
        client.connect_to(&addr.to_string()).unwrap();
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Connected { success: true, .. })
        }))
        .await;
        let replies = |events: &[NetEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, NetEvent::Response { command_id: 5, .. }))
                .count()
        };

        for round in 1..=20 {
            std::thread::scope(|s| {
                let call = s.spawn(|| client.send_sync(5, &round, false));
                while !call.is_finished() {
                    client.pump(&mut dispatcher);
                }
                call.join().unwrap().unwrap();
            });
            pump_until(&client, &mut dispatcher, &log, |events| replies(events) == round).await;
            assert!(!client.is_busy(), "round {round} left the client busy");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reads_continue_while_send_is_blocked() {
        const CHUNK: usize = 900_000;
        const CHUNKS: usize = 40;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            // Never read until released, so the client's writes back up.
            tokio::time::sleep(Duration::from_millis(300)).await;
            stream.write_all(&wire(9, b"scout report")).await.unwrap();
            let _ = release_rx.await;

            let mut received = 0usize;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
                    Ok(Ok(n)) if n > 0 => received += n,
                    _ => break received,
                }
            }
        });

        let client = client();
        let (mut dispatcher, log) = recorder();
        client.connect_to(&addr.to_string()).unwrap();
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Connected { success: true, .. })
        }))
        .await;

        for _ in 0..CHUNKS {
            client
                .send_envelope(&Envelope::from_raw(1, vec![0; CHUNK]))
                .unwrap();
        }
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::Response { command_id: 9, .. })
        }))
        .await;

        // The blocked write must not hold up the disconnect either.
        assert!(client.disconnect());
        pump_until(&client, &mut dispatcher, &log, has(|e| {
            matches!(e, NetEvent::ConnectionLost)
        }))
        .await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let _ = release_tx.send(());
        let received = server.await.unwrap();
        assert!(
            received < CHUNK * CHUNKS / 2,
            "queued frames kept flowing after disconnect: {received} bytes"
        );
    }
}

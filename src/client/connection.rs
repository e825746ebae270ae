//! Connection manager: one persistent WebSocket connection to the relay.
//!
//! Socket tasks only shuttle frames between the socket and two queues.
//! Handlers run on the owner's task inside [`Connection::next_event`] or
//! [`Connection::dispatch_pending`], one at a time, so no two handlers for the
//! same client ever run concurrently.

use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::client::handlers::{Handler, HandlerId, HandlerTable};
use crate::config::Config;
use crate::error::ConnectionError;
use crate::models::{ConnectedMessage, Envelope, Event, TransportErrorMessage};

/// Retry policy layered above a single [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl ReconnectPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Sending half of a connection, handed to handlers during dispatch.
pub struct Outbox {
    tx: mpsc::UnboundedSender<String>,
}

impl Outbox {
    /// An outbox whose frames land in the returned receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget.
    pub fn send<T: Serialize>(&self, event: Event, payload: &T) {
        match Envelope::encode(event, payload) {
            Ok(text) => {
                if self.tx.send(text).is_err() {
                    debug!("Dropping {} on closed connection", event);
                }
            }
            Err(e) => error!("Failed to encode {}: {}", event, e),
        }
    }
}

/// Items queued by the socket reader for the owner's task.
#[derive(Debug)]
pub enum Inbound {
    Frame(Envelope),
    TransportError(String),
    Closed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Open,
    /// The transport failed or the relay went away; handlers were told.
    Lost,
    /// Closed locally by `disconnect`.
    Closed,
}

pub struct Connection {
    id: String,
    url: String,
    outbox: Option<Outbox>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    handlers: HandlerTable,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    state: LinkState,
}

/// The far side of a detached connection.
pub struct RemoteEnd {
    outgoing: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::UnboundedSender<Inbound>,
}

impl RemoteEnd {
    /// Queue a frame for the connection, as if the relay had sent it.
    pub fn deliver<T: Serialize>(&self, event: Event, payload: &T) -> bool {
        match Envelope::new(event, payload) {
            Ok(envelope) => self.incoming.send(Inbound::Frame(envelope)).is_ok(),
            Err(_) => false,
        }
    }

    /// Queue raw frame text; malformed frames are dropped like on a socket.
    pub fn deliver_text(&self, text: &str) -> bool {
        match parse_frame(text) {
            Some(item) => self.incoming.send(item).is_ok(),
            None => false,
        }
    }

    pub fn fail(&self, message: &str) -> bool {
        self.incoming.send(Inbound::TransportError(message.to_string())).is_ok()
    }

    pub fn close(&self, message: &str) -> bool {
        self.incoming.send(Inbound::Closed(message.to_string())).is_ok()
    }

    /// Frames the connection has sent so far.
    pub fn sent(&mut self) -> Vec<Envelope> {
        let mut frames = Vec::new();
        while let Ok(text) = self.outgoing.try_recv() {
            match Envelope::parse(&text) {
                Ok(envelope) => frames.push(envelope),
                Err(e) => warn!("Connection sent an unparsable frame: {}", e),
            }
        }
        frames
    }

    /// True once the connection dropped its sending half.
    pub fn is_closed(&mut self) -> bool {
        matches!(
            self.outgoing.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        )
    }
}

impl Connection {
    fn new(
        url: String,
        outbox: Outbox,
        inbound: mpsc::UnboundedReceiver<Inbound>,
        reader: Option<JoinHandle<()>>,
        writer: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            id: String::new(),
            url,
            outbox: Some(outbox),
            inbound,
            handlers: HandlerTable::new(),
            reader,
            writer,
            state: LinkState::Open,
        }
    }

    /// A connection that is not bound to a socket; frames are exchanged
    /// through the returned [`RemoteEnd`].
    pub fn detached(id: impl Into<String>) -> (Self, RemoteEnd) {
        let (outbox, outgoing) = Outbox::channel();
        let (incoming, inbound) = mpsc::unbounded_channel();
        let mut connection = Self::new("detached".to_string(), outbox, inbound, None, None);
        connection.id = id.into();
        (connection, RemoteEnd { outgoing, incoming })
    }

    /// Wait for the relay's `CONNECTED` frame and adopt the assigned id.
    async fn handshake(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        let first = tokio::time::timeout(timeout, self.inbound.recv())
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout {
                url: self.url.clone(),
                timeout_ms: timeout.as_millis() as u64,
            })?;

        let reason = match first {
            Some(Inbound::Frame(envelope)) if envelope.event == Event::Connected => {
                match envelope.payload_as::<ConnectedMessage>() {
                    Ok(hello) if !hello.connection_id.is_empty() => {
                        self.id = hello.connection_id;
                        return Ok(());
                    }
                    Ok(_) => "empty connection id".to_string(),
                    Err(e) => e.to_string(),
                }
            }
            Some(Inbound::Frame(envelope)) => format!("expected CONNECTED, got {}", envelope.event),
            Some(Inbound::TransportError(message)) | Some(Inbound::Closed(message)) => message,
            None => "connection closed during handshake".to_string(),
        };
        Err(ConnectionError::Handshake {
            url: self.url.clone(),
            reason,
        })
    }

    /// Identity the relay assigned to this connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Open
    }

    pub fn outbox(&self) -> Option<&Outbox> {
        match self.state {
            LinkState::Closed => None,
            _ => self.outbox.as_ref(),
        }
    }

    /// Fire-and-forget. A no-op once the connection is closed.
    pub fn send<T: Serialize>(&self, event: Event, payload: &T) {
        match self.outbox() {
            Some(outbox) => outbox.send(event, payload),
            None => debug!("Connection {} closed; not sending {}", self.id, event),
        }
    }

    pub fn on(&mut self, event: Event, handler: Handler) -> HandlerId {
        self.handlers.register(event, handler)
    }

    pub fn off(&mut self, event: Event, id: HandlerId) -> bool {
        self.handlers.remove(event, id)
    }

    pub fn off_all(&mut self, event: Event) -> usize {
        self.handlers.remove_all(event)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Wait for the next inbound item and dispatch it.
    ///
    /// Returns false once the connection is closed or the transport is gone.
    pub async fn next_event(&mut self) -> bool {
        if self.state != LinkState::Open {
            return false;
        }
        match self.inbound.recv().await {
            Some(item) => self.dispatch(item),
            None => self.dispatch(Inbound::Closed("connection dropped".to_string())),
        }
        self.state == LinkState::Open
    }

    /// Dispatch everything already queued without waiting. Returns the number
    /// of items processed.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut processed = 0;
        while self.state == LinkState::Open {
            match self.inbound.try_recv() {
                Ok(item) => {
                    self.dispatch(item);
                    processed += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.dispatch(Inbound::Closed("connection dropped".to_string()));
                    processed += 1;
                }
            }
        }
        processed
    }

    fn dispatch(&mut self, item: Inbound) {
        let (event, payload) = match item {
            Inbound::Frame(envelope) => (envelope.event, envelope.payload),
            Inbound::TransportError(message) => {
                warn!("Connection {} transport error: {}", self.id, message);
                self.state = LinkState::Lost;
                (Event::ConnectError, transport_payload(message))
            }
            Inbound::Closed(message) => {
                warn!("Connection {} lost: {}", self.id, message);
                self.state = LinkState::Lost;
                (Event::ConnectFailed, transport_payload(message))
            }
        };

        let Some(outbox) = self.outbox.as_ref() else {
            return;
        };
        if self.handlers.dispatch(event, &payload, outbox) == 0 {
            debug!("No handler for {} on connection {}", event, self.id);
        }
    }

    /// Deregister every handler, then close the transport.
    ///
    /// Idempotent: returns false (and does nothing) when already closed.
    pub fn disconnect(&mut self) -> bool {
        if self.state == LinkState::Closed {
            return false;
        }
        let removed = self.handlers.clear();
        self.state = LinkState::Closed;

        // The writer drains what is queued, then sends the close frame.
        self.outbox = None;
        self.writer.take();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        info!("Connection {} closed ({} handler(s) removed)", self.id, removed);
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn transport_payload(message: String) -> Value {
    serde_json::to_value(TransportErrorMessage { message }).unwrap_or(Value::Null)
}

fn parse_frame(text: &str) -> Option<Inbound> {
    match Envelope::parse(text) {
        Ok(envelope) => Some(Inbound::Frame(envelope)),
        Err(violation) => {
            warn!("Skipping frame from relay: {}", violation);
            None
        }
    }
}

async fn read_frames<S>(mut stream: S, inbound: mpsc::UnboundedSender<Inbound>)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        let item = match msg {
            Ok(Message::Text(text)) => match parse_frame(text.as_str()) {
                Some(item) => item,
                None => continue,
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by relay".to_string());
                let _ = inbound.send(Inbound::Closed(reason));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = inbound.send(Inbound::TransportError(e.to_string()));
                return;
            }
        };
        if inbound.send(item).is_err() {
            return;
        }
    }
    let _ = inbound.send(Inbound::Closed("stream ended".to_string()));
}

/// Establishes connections to one relay endpoint.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    url: String,
    policy: ReconnectPolicy,
    handshake_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::default(),
            handshake_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.relay_url.clone())
            .with_policy(config.reconnect_policy())
            .with_handshake_timeout(config.handshake_timeout())
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Single attempt; never retries.
    pub async fn connect(&self) -> Result<Connection, ConnectionError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|source| ConnectionError::Transport {
                url: self.url.clone(),
                source,
            })?;
        let (mut sink, stream) = ws_stream.split();

        let (outbox, mut outgoing) = Outbox::channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(text) = outgoing.recv().await {
                if sink.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });
        let reader = tokio::spawn(read_frames(stream, inbound_tx));

        // Dropping the connection on failure tears both tasks down.
        let mut connection = Connection::new(self.url.clone(), outbox, inbound, Some(reader), Some(writer));
        connection.handshake(self.handshake_timeout).await?;
        info!("Connected to {} as {}", self.url, connection.id());
        Ok(connection)
    }

    /// `1 + max_retries` attempts with a fixed backoff; returns the last error.
    pub async fn connect_with_retry(&self) -> Result<Connection, ConnectionError> {
        let attempts = self.policy.max_retries + 1;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.connect().await {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    warn!("Connection attempt {}/{} to {} failed: {}", attempt, attempts, self.url, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }
        Err(last_error.unwrap_or(ConnectionError::Closed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PingMessage, TransportErrorMessage};
    use std::sync::{Arc, Mutex};

    fn capture(log: &Arc<Mutex<Vec<Value>>>) -> Handler {
        let log = log.clone();
        Box::new(move |payload, _| log.lock().unwrap().push(payload.clone()))
    }

    #[tokio::test]
    async fn dispatches_frames_to_registered_handlers() {
        let (mut conn, remote) = Connection::detached("c1");
        let log = Arc::new(Mutex::new(Vec::new()));
        conn.on(Event::Pong, capture(&log));

        remote.deliver(Event::Pong, &serde_json::json!({"date": "now"}));
        assert!(conn.next_event().await);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn off_stops_delivery() {
        let (mut conn, remote) = Connection::detached("c1");
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = conn.on(Event::Pong, capture(&log));
        assert!(conn.off(Event::Pong, id));

        remote.deliver(Event::Pong, &serde_json::json!({}));
        conn.dispatch_pending();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let (mut conn, remote) = Connection::detached("c1");
        assert!(!remote.deliver_text("{not json"));
        assert!(!remote.deliver_text(r#"{"event":"NOPE","payload":{}}"#));
        assert_eq!(conn.dispatch_pending(), 0);
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn transport_error_is_raised_as_connect_error() {
        let (mut conn, remote) = Connection::detached("c1");
        let log = Arc::new(Mutex::new(Vec::new()));
        conn.on(Event::ConnectError, capture(&log));

        remote.fail("reset by peer");
        assert!(!conn.next_event().await);
        let payload: TransportErrorMessage = serde_json::from_value(log.lock().unwrap()[0].clone()).unwrap();
        assert_eq!(payload.message, "reset by peer");
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn relay_going_away_is_raised_as_connect_failed() {
        let (mut conn, remote) = Connection::detached("c1");
        let log = Arc::new(Mutex::new(Vec::new()));
        conn.on(Event::ConnectFailed, capture(&log));

        drop(remote);
        assert!(!conn.next_event().await);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut conn, mut remote) = Connection::detached("c1");
        conn.on(Event::Pong, Box::new(|_, _| {}));
        conn.on(Event::Joined, Box::new(|_, _| {}));

        assert!(conn.disconnect());
        assert_eq!(conn.handler_count(), 0);
        assert!(remote.is_closed());
        assert!(!conn.disconnect());
        assert!(!conn.next_event().await);
    }

    #[tokio::test]
    async fn send_after_disconnect_is_a_noop() {
        let (mut conn, mut remote) = Connection::detached("c1");
        conn.send(Event::Ping, &PingMessage::default());
        conn.disconnect();
        conn.send(Event::Ping, &PingMessage::default());

        let sent = remote.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event, Event::Ping);
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails_after_retries() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let manager = ConnectionManager::new(format!("ws://127.0.0.1:{port}/ws")).with_policy(ReconnectPolicy {
            max_retries: 1,
            backoff: Duration::from_millis(10),
        });
        let err = manager.connect_with_retry().await.err().unwrap();
        assert!(matches!(err, ConnectionError::Transport { .. }));
    }

    #[tokio::test]
    async fn handshake_times_out_when_relay_stays_silent() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let manager = ConnectionManager::new(format!("ws://127.0.0.1:{port}"))
            .with_policy(ReconnectPolicy::none())
            .with_handshake_timeout(Duration::from_millis(100));
        let err = manager.connect().await.err().unwrap();
        assert!(matches!(err, ConnectionError::HandshakeTimeout { .. }));
    }
}

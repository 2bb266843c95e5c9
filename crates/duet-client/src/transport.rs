//! Relay transport
//!
//! A [`SignalTransport`] carries [`ClientMessage`]s to the relay and reports
//! what comes back as [`TransportEvent`]s. [`WsTransport`] is the WebSocket
//! implementation: it reconnects on its own with a fixed delay and gives up
//! after a bounded number of consecutive failures.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use duet_core::{ClientConfig, ClientMessage, ReconnectConfig, ServerMessage};

use crate::error::TransportError;

/// Timeout for a single connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the transport reports
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Link is up (initially or after a reconnect)
    Connected,
    /// Link dropped; reconnection is under way
    Disconnected,
    /// Reconnection gave up
    Exhausted,
    Message(ServerMessage),
}

/// A [`TransportEvent`] tagged with the transport that produced it
#[derive(Debug)]
pub struct TransportNotice {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Event sink handed to a transport
#[derive(Clone)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportNotice>,
}

impl TransportEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransportNotice>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once nobody is listening
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportNotice {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

impl fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportEvents")
            .field("generation", &self.generation)
            .finish()
    }
}

/// An open link to the relay
pub trait SignalTransport: Send {
    /// Queue a message. Dropped if the link is down.
    fn send(&self, msg: ClientMessage);

    /// Close for good; no further events are emitted
    fn close(&mut self);
}

/// Opens [`SignalTransport`]s
pub trait TransportFactory: Send + Sync {
    fn open(&self, events: TransportEvents) -> Box<dyn SignalTransport>;
}

/// WebSocket transport factory
#[derive(Debug, Clone)]
pub struct WsTransportFactory {
    url: Url,
    reconnect: ReconnectConfig,
    keepalive: Option<Duration>,
}

impl WsTransportFactory {
    pub fn new(
        server_url: &str,
        reconnect: ReconnectConfig,
        keepalive: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let url =
            Url::parse(server_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }
        Ok(Self {
            url,
            reconnect,
            keepalive,
        })
    }

    pub fn from_config(
        client: &ClientConfig,
        reconnect: &ReconnectConfig,
    ) -> Result<Self, TransportError> {
        Self::new(&client.server_url, reconnect.clone(), client.keepalive())
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl TransportFactory for WsTransportFactory {
    fn open(&self, events: TransportEvents) -> Box<dyn SignalTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_transport(
            self.url.clone(),
            self.reconnect.clone(),
            self.keepalive,
            rx,
            events,
        ));
        Box::new(WsTransport { outgoing: Some(tx) })
    }
}

/// Handle to a running WebSocket transport task
///
/// Dropping it closes the link.
pub struct WsTransport {
    outgoing: Option<mpsc::UnboundedSender<ClientMessage>>,
}

impl SignalTransport for WsTransport {
    fn send(&self, msg: ClientMessage) {
        if let Some(tx) = &self.outgoing {
            let _ = tx.send(msg);
        }
    }

    fn close(&mut self) {
        self.outgoing.take();
    }
}

/// Connection loop: connect, pump, retry
async fn run_transport(
    url: Url,
    reconnect: ReconnectConfig,
    keepalive: Option<Duration>,
    mut outgoing: mpsc::UnboundedReceiver<ClientMessage>,
    events: TransportEvents,
) {
    let mut failures = 0u32;

    loop {
        let attempt = tokio::select! {
            result = connect_ws(&url) => result,
            _ = closed(&mut outgoing) => return,
        };

        match attempt {
            Ok(ws) => {
                failures = 0;
                info!("Connected to signal server {}", url);
                events.emit(TransportEvent::Connected);

                if pump(ws, &mut outgoing, &events, keepalive).await {
                    debug!("Transport closed by owner");
                    return;
                }
                warn!("Lost connection to signal server");
                events.emit(TransportEvent::Disconnected);
            }
            Err(e) => {
                failures += 1;
                debug!("Connection attempt {} failed: {}", failures, e);
                if failures >= reconnect.max_attempts {
                    warn!("{}", TransportError::Exhausted(failures));
                    events.emit(TransportEvent::Exhausted);
                    return;
                }
            }
        }

        tokio::select! {
            _ = sleep(reconnect.delay()) => {}
            _ = closed(&mut outgoing) => return,
        }
    }
}

async fn connect_ws(url: &Url) -> Result<WsStream, TransportError> {
    debug!("Connecting to signal server: {}", url);
    match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => Ok(ws),
        Ok(Err(e)) => Err(TransportError::ConnectionFailed(e.to_string())),
        Err(_) => Err(TransportError::ConnectionFailed("timed out".into())),
    }
}

/// Resolves once the owner has closed the transport, discarding anything
/// queued while the link is down
async fn closed(outgoing: &mut mpsc::UnboundedReceiver<ClientMessage>) {
    while let Some(msg) = outgoing.recv().await {
        debug!("Not connected, dropping {:?}", msg);
    }
}

/// Move frames until the link drops. Returns true if the owner closed it.
async fn pump(
    ws: WsStream,
    outgoing: &mut mpsc::UnboundedReceiver<ClientMessage>,
    events: &TransportEvents,
    keepalive: Option<Duration>,
) -> bool {
    let (mut sink, mut stream) = ws.split();

    let period = keepalive.unwrap_or(Duration::from_secs(3600));
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else {
                    let _ = sink.send(Message::Close(None)).await;
                    return true;
                };
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode {:?}: {}", msg, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    debug!("Send failed: {}", e);
                    return false;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ServerMessage::from_json(&text) {
                    Ok(ServerMessage::Pong { timestamp }) => {
                        debug!("Pong for ping sent at {}", timestamp);
                    }
                    Ok(ServerMessage::Error { code, message }) => {
                        warn!("Signal server rejected a frame ({:?}): {}", code, message);
                    }
                    Ok(msg) => {
                        events.emit(TransportEvent::Message(msg));
                    }
                    Err(e) => warn!("Ignoring unreadable frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return false,
                Some(Err(e)) => {
                    debug!("WebSocket error: {}", e);
                    return false;
                }
                Some(Ok(_)) => {}
            },

            _ = ticker.tick(), if keepalive.is_some() => {
                let timestamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default();
                let ping = ClientMessage::Ping { timestamp };
                if let Ok(json) = ping.to_json() {
                    if sink.send(Message::Text(json)).await.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use duet_core::{
    ClientMessage, ErrorCode, ServerMessage, SessionId, SignalConfig, SignalEnvelope,
};

use crate::relay::{RelayStats, SignalingRelay};

/// Signal server state
pub struct SignalServer {
    relay: Arc<SignalingRelay>,
    config: SignalConfig,
}

impl SignalServer {
    pub fn new(config: SignalConfig) -> Self {
        Self {
            relay: Arc::new(SignalingRelay::new()),
            config,
        }
    }

    /// The relay shared by all connections
    pub fn relay(&self) -> Arc<SignalingRelay> {
        self.relay.clone()
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signal server listening on {}", addr);
        self.serve_listener(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        if let Some(timeout) = self.config.session_idle_timeout() {
            let relay = self.relay.clone();
            let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    relay.sweep_idle(timeout);
                }
            });
        }

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let relay = self.relay.clone();
            let max_message_bytes = self.config.max_message_bytes;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, relay, max_message_bytes).await
                {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }

    /// Current counters (for monitoring)
    pub fn stats(&self) -> RelayStats {
        self.relay.stats()
    }
}

impl Default for SignalServer {
    fn default() -> Self {
        Self::new(SignalConfig::default())
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    relay: Arc<SignalingRelay>,
    max_message_bytes: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Only the monitoring paths are served as plain HTTP; anything else is
    // handed to the WebSocket handshake
    let mut peek_buf = [0u8; ROUTE_PEEK_BYTES];
    let n = stream.peek(&mut peek_buf).await?;

    if let Some(route) = HttpRoute::from_head(&peek_buf[..n]) {
        return handle_http_request(&mut stream, route, relay.stats()).await;
    }

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let session_id = SessionId::generate();
    let mut outbox = relay.register(session_id.clone());
    debug!("New connection from {} as {}", peer_addr, session_id);

    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                let Some(msg) = outgoing else {
                    // Outbox closed by the relay (idle eviction)
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                };
                let json = match msg.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to encode message for {}: {}", session_id, e);
                        break;
                    }
                };
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        relay.touch(&session_id);
                        let _ = ws_sender.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("WebSocket error: {:?}", e);
                        break;
                    }
                };

                relay.touch(&session_id);
                match ClientMessage::from_json_limited(&text, max_message_bytes) {
                    Ok(request) => handle_message(request, &session_id, &relay),
                    Err(e) => {
                        warn!("Bad frame from {}: {}", session_id, e);
                        relay.deliver(
                            &session_id,
                            ServerMessage::error(ErrorCode::from(&e), e.to_string()),
                        );
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    relay.disconnect(&session_id);
    debug!("Connection closed: {}", session_id);
    Ok(())
}

/// Enough of the request line to recognize a monitoring request
const ROUTE_PEEK_BYTES: usize = 64;

/// Plain HTTP endpoints next to the WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpRoute {
    Health,
    Stats,
}

impl HttpRoute {
    /// Match a complete `GET /health` or `GET /stats` request line
    fn from_head(head: &[u8]) -> Option<Self> {
        let end = head.windows(2).position(|w| w == b"\r\n")?;
        let line = std::str::from_utf8(&head[..end]).ok()?;
        let mut parts = line.split(' ');
        if parts.next()? != "GET" {
            return None;
        }
        let target = parts.next()?;
        if !parts.next()?.starts_with("HTTP/") {
            return None;
        }
        let path = target.split('?').next().unwrap_or(target);
        match path {
            "/health" => Some(HttpRoute::Health),
            "/stats" => Some(HttpRoute::Stats),
            _ => None,
        }
    }
}

/// Handle an HTTP request (for health checks)
async fn handle_http_request(
    stream: &mut TcpStream,
    route: HttpRoute,
    stats: RelayStats,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = vec![0u8; 1024];
    let _ = stream.read(&mut buf).await?;

    let (status, body) = http_response(route, stats);

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

fn http_response(route: HttpRoute, stats: RelayStats) -> (&'static str, String) {
    match route {
        HttpRoute::Health => (
            "200 OK",
            serde_json::json!({
                "status": "healthy",
                "sessions": stats.sessions,
                "waiting": stats.waiting,
                "rooms": stats.rooms,
            })
            .to_string(),
        ),
        HttpRoute::Stats => (
            "200 OK",
            serde_json::to_string(&stats).unwrap_or_else(|_| "{}".to_string()),
        ),
    }
}

/// Dispatch one decoded client frame
fn handle_message(msg: ClientMessage, session_id: &SessionId, relay: &SignalingRelay) {
    match msg {
        ClientMessage::JoinQueue => relay.join(session_id),
        ClientMessage::Leave => relay.leave(session_id),
        ClientMessage::Next => relay.next(session_id),
        ClientMessage::Signal { to, signal } => {
            let envelope = SignalEnvelope::new(session_id.clone(), to, signal);
            relay.relay_signal(session_id, envelope);
        }
        ClientMessage::Ping { timestamp } => {
            relay.deliver(session_id, ServerMessage::Pong { timestamp });
        }
    }
}

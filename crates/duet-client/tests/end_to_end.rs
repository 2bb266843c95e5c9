//! Two clients meeting through a real signal server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;

use duet_client::{
    ClientSessionController, ControllerHandle, LocalMedia, MediaError, MediaHandle,
    MediaProvider, MediaStream, PeerConnection, PeerConnector, PeerError, PeerEvent, PeerEvents,
    PeerSetup, WsTransportFactory,
};
use duet_core::{ClientConfig, ConnectionStatus, ErrorKind, ReconnectConfig, SignalConfig};
use duet_signal::{SignalServer, SignalingRelay};

struct Stream(&'static str);

impl MediaStream for Stream {
    fn id(&self) -> &str {
        self.0
    }

    fn stop(&self) {}
}

struct Camera;

#[async_trait]
impl MediaProvider for Camera {
    async fn acquire(&self) -> Result<LocalMedia, MediaError> {
        Ok(MediaHandle::new(Stream("camera")))
    }
}

/// Offer/answer without a media engine: the answer side reports the remote
/// stream as soon as it sees the offer, the offer side once it sees the answer
struct Loopback;

struct LoopbackConnection {
    events: PeerEvents,
}

impl PeerConnection for LoopbackConnection {
    fn apply_signal(&mut self, signal: Value) -> Result<(), PeerError> {
        match signal["type"].as_str() {
            Some("offer") => {
                self.events.emit(PeerEvent::Signal(json!({"type": "answer"})));
                self.events.emit(PeerEvent::Stream(MediaHandle::new(Stream("remote"))));
            }
            Some("answer") => {
                self.events.emit(PeerEvent::Stream(MediaHandle::new(Stream("remote"))));
            }
            _ => return Err(PeerError::Signal("unknown payload".into())),
        }
        Ok(())
    }

    fn close(&mut self) {}
}

impl PeerConnector for Loopback {
    fn connect(
        &self,
        setup: PeerSetup,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerConnection>, PeerError> {
        if setup.initiator {
            events.emit(PeerEvent::Signal(json!({"type": "offer"})));
        }
        Ok(Box::new(LoopbackConnection { events }))
    }
}

async fn start_server() -> (SocketAddr, Arc<SignalingRelay>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = SignalServer::new(SignalConfig::default());
    let relay = server.relay();
    tokio::spawn(async move {
        let _ = server.serve_listener(listener).await;
    });
    (addr, relay)
}

fn client(addr: SocketAddr) -> ControllerHandle {
    let config = ClientConfig {
        server_url: format!("ws://{}", addr),
        settle_delay_ms: 100,
        keepalive_secs: 0,
        ..ClientConfig::default()
    };
    let reconnect = ReconnectConfig {
        max_attempts: 2,
        delay_ms: 50,
    };
    let transports = WsTransportFactory::from_config(&config, &reconnect).unwrap();
    ClientSessionController::spawn(
        config,
        Arc::new(Camera),
        Arc::new(Loopback),
        Arc::new(transports),
    )
}

async fn wait_status(handle: &ControllerHandle, status: ConnectionStatus) {
    let mut rx = handle.watch();
    timeout(Duration::from_secs(10), rx.wait_for(|s| s.status == status))
        .await
        .unwrap_or_else(|_| panic!("never reached {}", status))
        .unwrap();
}

#[tokio::test]
async fn test_two_clients_connect() {
    let (addr, _relay) = start_server().await;

    let alice = client(addr);
    let bob = client(addr);
    alice.start();
    bob.start();

    wait_status(&alice, ConnectionStatus::Connected).await;
    wait_status(&bob, ConnectionStatus::Connected).await;

    let a = alice.snapshot();
    let b = bob.snapshot();
    assert!(a.room.is_some());
    assert_eq!(a.room, b.room);
    assert_ne!(a.partner, b.partner);
    assert!(alice.remote_media().is_some());
}

#[tokio::test]
async fn test_partner_stop_requeues_survivor() {
    let (addr, relay) = start_server().await;

    let alice = client(addr);
    let bob = client(addr);
    alice.start();
    bob.start();
    wait_status(&alice, ConnectionStatus::Connected).await;
    wait_status(&bob, ConnectionStatus::Connected).await;

    bob.stop();
    wait_status(&bob, ConnectionStatus::Idle).await;

    wait_status(&alice, ConnectionStatus::Waiting).await;
    for _ in 0..200 {
        if relay.stats().waiting == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("survivor never re-entered the queue");
}

#[tokio::test]
async fn test_unreachable_server_surfaces_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let handle = client(addr);
    handle.start();
    wait_status(&handle, ConnectionStatus::Error).await;
    assert_eq!(
        handle.snapshot().error.map(|e| e.kind),
        Some(ErrorKind::Network)
    );
}

//! Peer connection management
//!
//! A [`PeerConnectionManager`] owns one handshake attempt with one partner:
//! the underlying [`PeerConnection`], the handshake deadline, and the remote
//! stream once it arrives. The real media engine sits behind the
//! [`PeerConnector`] seam.
//!
//! Every event a connection emits is stamped with its attempt number on the
//! way into the shared channel, so the controller can discard anything that
//! belongs to an attempt it already tore down.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use duet_core::{ClientMessage, SessionId};

use crate::error::PeerError;
use crate::media::{LocalMedia, RemoteMedia};
use crate::timer::TimerHandle;

/// Everything a connector needs to build a connection
#[derive(Debug, Clone)]
pub struct PeerSetup {
    /// Whether this side produces the opening offer
    pub initiator: bool,
    pub partner: SessionId,
    /// STUN/TURN URLs
    pub ice_servers: Vec<String>,
    /// Local capture to attach to the connection
    pub local_media: LocalMedia,
}

/// What a connection reports back
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Outgoing handshake payload for the partner
    Signal(Value),
    /// The partner's media arrived
    Stream(RemoteMedia),
    /// The connection failed
    Error(String),
    /// The connection closed
    Closed,
    /// Emitted by the manager itself when the handshake deadline passes
    TimedOut,
}

/// A [`PeerEvent`] tagged with the attempt that produced it
#[derive(Debug)]
pub struct PeerNotice {
    pub attempt: u64,
    pub event: PeerEvent,
}

/// Event sink handed to a connection
#[derive(Clone)]
pub struct PeerEvents {
    attempt: u64,
    tx: mpsc::UnboundedSender<PeerNotice>,
}

impl PeerEvents {
    pub fn new(attempt: u64, tx: mpsc::UnboundedSender<PeerNotice>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Returns false once nobody is listening
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(PeerNotice {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }
}

impl fmt::Debug for PeerEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEvents")
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// One direct connection to a partner
pub trait PeerConnection: Send {
    /// Feed a payload received from the partner
    fn apply_signal(&mut self, signal: Value) -> Result<(), PeerError>;

    /// Destroy the connection. Must not stop local media.
    fn close(&mut self);
}

/// Factory for [`PeerConnection`]s
pub trait PeerConnector: Send + Sync {
    fn connect(
        &self,
        setup: PeerSetup,
        events: PeerEvents,
    ) -> Result<Box<dyn PeerConnection>, PeerError>;
}

/// What the controller should do with a handled event
#[derive(Debug, Clone, PartialEq)]
pub enum PeerReport {
    /// Forward to the relay
    Outbound(ClientMessage),
    Connected,
    Failed(PeerError),
    Ignored,
}

/// Drives one handshake attempt
pub struct PeerConnectionManager {
    attempt: u64,
    partner: SessionId,
    timeout: Duration,
    connection: Option<Box<dyn PeerConnection>>,
    deadline: Option<TimerHandle>,
    remote: Option<RemoteMedia>,
    finished: bool,
}

impl PeerConnectionManager {
    /// Build the connection and arm the handshake deadline
    pub fn start(
        connector: &dyn PeerConnector,
        setup: PeerSetup,
        timeout: Duration,
        events: PeerEvents,
    ) -> Result<Self, PeerError> {
        let attempt = events.attempt();
        let partner = setup.partner.clone();
        info!(
            "Starting handshake {} with {} as {}",
            attempt,
            partner,
            if setup.initiator { "initiator" } else { "responder" }
        );

        let connection = connector.connect(setup, events.clone())?;

        let deadline = TimerHandle::start(timeout, move || async move {
            events.emit(PeerEvent::TimedOut);
        });

        Ok(Self {
            attempt,
            partner,
            timeout,
            connection: Some(connection),
            deadline: Some(deadline),
            remote: None,
            finished: false,
        })
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn partner(&self) -> &SessionId {
        &self.partner
    }

    pub fn remote_media(&self) -> Option<&RemoteMedia> {
        self.remote.as_ref()
    }

    /// Apply a payload from the partner, in arrival order
    pub fn apply_signal(&mut self, signal: Value) -> Result<(), PeerError> {
        match self.connection.as_mut() {
            Some(conn) => conn.apply_signal(signal),
            None => Err(PeerError::Closed),
        }
    }

    /// Translate a connection event into something the controller acts on
    pub fn handle(&mut self, event: PeerEvent) -> PeerReport {
        match event {
            PeerEvent::Signal(signal) => PeerReport::Outbound(ClientMessage::Signal {
                to: self.partner.clone(),
                signal,
            }),
            PeerEvent::Stream(remote) => {
                self.disarm();
                if let Some(previous) = self.remote.replace(remote) {
                    previous.stop();
                }
                if self.finished {
                    return PeerReport::Ignored;
                }
                self.finished = true;
                info!("Handshake {} connected", self.attempt);
                PeerReport::Connected
            }
            PeerEvent::Error(message) => {
                self.disarm();
                warn!("Handshake {} failed: {}", self.attempt, message);
                PeerReport::Failed(PeerError::Handshake(message))
            }
            PeerEvent::Closed => {
                self.disarm();
                debug!("Connection {} closed", self.attempt);
                PeerReport::Failed(PeerError::Closed)
            }
            PeerEvent::TimedOut => {
                if self.finished {
                    return PeerReport::Ignored;
                }
                warn!("Handshake {} timed out after {:?}", self.attempt, self.timeout);
                PeerReport::Failed(PeerError::Timeout(self.timeout))
            }
        }
    }

    fn disarm(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.cancel();
        }
    }

    /// Destroy the connection and the remote stream. Local media is untouched.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.disarm();
        if let Some(mut conn) = self.connection.take() {
            conn.close();
        }
        if let Some(remote) = self.remote.take() {
            remote.stop();
        }
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use crate::media::{MediaHandle, MediaStream};

    struct FakeStream {
        id: String,
        stopped: Arc<AtomicBool>,
    }

    impl MediaStream for FakeStream {
        fn id(&self) -> &str {
            &self.id
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    fn stream(id: &str) -> (MediaHandle, Arc<AtomicBool>) {
        let stopped = Arc::new(AtomicBool::new(false));
        let handle = MediaHandle::new(FakeStream {
            id: id.into(),
            stopped: stopped.clone(),
        });
        (handle, stopped)
    }

    #[derive(Default)]
    struct Recorded {
        applied: Vec<Value>,
        closed: bool,
    }

    struct FakeConnection(Arc<Mutex<Recorded>>);

    impl PeerConnection for FakeConnection {
        fn apply_signal(&mut self, signal: Value) -> Result<(), PeerError> {
            self.0.lock().applied.push(signal);
            Ok(())
        }

        fn close(&mut self) {
            self.0.lock().closed = true;
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        recorded: Arc<Mutex<Recorded>>,
        initiators: Mutex<Vec<bool>>,
    }

    impl PeerConnector for FakeConnector {
        fn connect(
            &self,
            setup: PeerSetup,
            events: PeerEvents,
        ) -> Result<Box<dyn PeerConnection>, PeerError> {
            self.initiators.lock().push(setup.initiator);
            if setup.initiator {
                events.emit(PeerEvent::Signal(json!({"type": "offer"})));
            }
            Ok(Box::new(FakeConnection(self.recorded.clone())))
        }
    }

    fn setup(initiator: bool, local: &LocalMedia) -> PeerSetup {
        PeerSetup {
            initiator,
            partner: "partner".into(),
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
            local_media: local.clone(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initiator_offer_is_addressed_to_partner() {
        let connector = FakeConnector::default();
        let (local, _) = stream("local");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut manager = PeerConnectionManager::start(
            &connector,
            setup(true, &local),
            Duration::from_secs(15),
            PeerEvents::new(7, tx),
        )
        .unwrap();

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.attempt, 7);
        assert_eq!(
            manager.handle(notice.event),
            PeerReport::Outbound(ClientMessage::Signal {
                to: "partner".into(),
                signal: json!({"type": "offer"}),
            })
        );
        assert_eq!(*connector.initiators.lock(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_applied_in_order() {
        let connector = FakeConnector::default();
        let (local, _) = stream("local");
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut manager = PeerConnectionManager::start(
            &connector,
            setup(false, &local),
            Duration::from_secs(15),
            PeerEvents::new(1, tx),
        )
        .unwrap();

        for n in 0..3 {
            manager.apply_signal(json!({ "n": n })).unwrap();
        }
        assert_eq!(
            connector.recorded.lock().applied,
            vec![json!({"n": 0}), json!({"n": 1}), json!({"n": 2})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_without_stream() {
        let connector = FakeConnector::default();
        let (local, _) = stream("local");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut manager = PeerConnectionManager::start(
            &connector,
            setup(false, &local),
            Duration::from_secs(15),
            PeerEvents::new(3, tx),
        )
        .unwrap();

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.attempt, 3);
        assert_eq!(
            manager.handle(notice.event),
            PeerReport::Failed(PeerError::Timeout(Duration::from_secs(15)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_disarms_deadline() {
        let connector = FakeConnector::default();
        let (local, _) = stream("local");
        let (remote, _) = stream("remote");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut manager = PeerConnectionManager::start(
            &connector,
            setup(false, &local),
            Duration::from_secs(15),
            PeerEvents::new(1, tx),
        )
        .unwrap();

        assert_eq!(manager.handle(PeerEvent::Stream(remote)), PeerReport::Connected);
        assert_eq!(manager.remote_media().map(|m| m.id()), Some("remote"));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_keeps_local_media() {
        let connector = FakeConnector::default();
        let (local, local_stopped) = stream("local");
        let (remote, remote_stopped) = stream("remote");
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut manager = PeerConnectionManager::start(
            &connector,
            setup(true, &local),
            Duration::from_secs(15),
            PeerEvents::new(1, tx),
        )
        .unwrap();
        manager.handle(PeerEvent::Stream(remote));
        manager.close();

        assert!(connector.recorded.lock().closed);
        assert!(remote_stopped.load(Ordering::SeqCst));
        assert!(!local_stopped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_manager_never_times_out() {
        let connector = FakeConnector::default();
        let (local, _) = stream("local");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let manager = PeerConnectionManager::start(
            &connector,
            setup(false, &local),
            Duration::from_secs(15),
            PeerEvents::new(1, tx),
        )
        .unwrap();
        drop(manager);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(connector.recorded.lock().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_event_fails_attempt() {
        let connector = FakeConnector::default();
        let (local, _) = stream("local");
        let (tx, _rx) = mpsc::unbounded_channel();

        let mut manager = PeerConnectionManager::start(
            &connector,
            setup(false, &local),
            Duration::from_secs(15),
            PeerEvents::new(1, tx),
        )
        .unwrap();

        assert_eq!(
            manager.handle(PeerEvent::Error("ice failed".into())),
            PeerReport::Failed(PeerError::Handshake("ice failed".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_stream_disarms_deadline() {
        let connector = FakeConnector::default();
        let (local, _) = stream("local");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut manager = PeerConnectionManager::start(
            &connector,
            setup(false, &local),
            Duration::from_secs(15),
            PeerEvents::new(2, tx),
        )
        .unwrap();

        assert_eq!(
            manager.handle(PeerEvent::Closed),
            PeerReport::Failed(PeerError::Closed)
        );
        assert_eq!(PeerError::Closed.to_string(), "connection closed");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }
}

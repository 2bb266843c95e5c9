//! Client session controller
//!
//! Owns the resources behind the state machine: local media, the relay
//! transport, the live peer-connection manager and the settle timer. Every
//! input (user command, relay message, peer event, timer expiry) is turned
//! into a [`ClientEvent`], run through [`transition`], and the resulting
//! [`Effect`]s are carried out before the next input is looked at.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use duet_core::{ClientConfig, ClientMessage, ConnectionStatus, RoomId, ServerMessage, SessionId};

use crate::error::{ClientError, MediaError, PeerError};
use crate::machine::{transition, ClientEvent, ClientState, Effect};
use crate::media::{LocalMedia, MediaProvider, RemoteMedia};
use crate::peer::{
    PeerConnectionManager, PeerConnector, PeerEvents, PeerNotice, PeerReport, PeerSetup,
};
use crate::timer::TimerHandle;
use crate::transport::{
    SignalTransport, TransportEvent, TransportEvents, TransportFactory, TransportNotice,
};

/// User intents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    Start,
    Retry,
    Next,
    Stop,
}

/// What the rendering layer shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSnapshot {
    pub status: ConnectionStatus,
    pub error: Option<ClientError>,
    pub partner: Option<SessionId>,
    pub room: Option<RoomId>,
}

impl From<&ClientState> for ClientSnapshot {
    fn from(state: &ClientState) -> Self {
        Self {
            status: state.status,
            error: state.error.clone(),
            partner: state.partner.clone(),
            room: state.room.clone(),
        }
    }
}

/// Completions of work the controller spawned
enum Internal {
    Media {
        token: u64,
        result: Result<LocalMedia, MediaError>,
    },
    SettleElapsed(u64),
}

/// Cheap, cloneable handle for the rendering layer
///
/// The controller shuts down once every handle is dropped.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<UserCommand>,
    snapshot: watch::Receiver<ClientSnapshot>,
    local: watch::Receiver<Option<LocalMedia>>,
    remote: watch::Receiver<Option<RemoteMedia>>,
}

impl ControllerHandle {
    pub fn start(&self) {
        self.send(UserCommand::Start);
    }

    pub fn retry(&self) {
        self.send(UserCommand::Retry);
    }

    pub fn next(&self) {
        self.send(UserCommand::Next);
    }

    pub fn stop(&self) {
        self.send(UserCommand::Stop);
    }

    pub fn send(&self, command: UserCommand) {
        if self.commands.send(command).is_err() {
            debug!("Controller gone, dropping {:?}", command);
        }
    }

    /// Current status
    pub fn snapshot(&self) -> ClientSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Subscribe to status changes
    pub fn watch(&self) -> watch::Receiver<ClientSnapshot> {
        self.snapshot.clone()
    }

    pub fn local_media(&self) -> Option<LocalMedia> {
        self.local.borrow().clone()
    }

    pub fn remote_media(&self) -> Option<RemoteMedia> {
        self.remote.borrow().clone()
    }
}

/// Drives one client session
pub struct ClientSessionController {
    config: ClientConfig,
    state: ClientState,

    media: Arc<dyn MediaProvider>,
    connector: Arc<dyn PeerConnector>,
    transports: Arc<dyn TransportFactory>,

    local_media: Option<LocalMedia>,
    transport: Option<Box<dyn SignalTransport>>,
    transport_generation: u64,
    peer: Option<PeerConnectionManager>,
    settle_timer: Option<TimerHandle>,
    pending: VecDeque<ClientEvent>,

    commands_rx: mpsc::UnboundedReceiver<UserCommand>,
    transport_tx: mpsc::UnboundedSender<TransportNotice>,
    transport_rx: mpsc::UnboundedReceiver<TransportNotice>,
    peer_tx: mpsc::UnboundedSender<PeerNotice>,
    peer_rx: mpsc::UnboundedReceiver<PeerNotice>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,

    snapshot_tx: watch::Sender<ClientSnapshot>,
    local_tx: watch::Sender<Option<LocalMedia>>,
    remote_tx: watch::Sender<Option<RemoteMedia>>,
}

impl ClientSessionController {
    pub fn new(
        config: ClientConfig,
        media: Arc<dyn MediaProvider>,
        connector: Arc<dyn PeerConnector>,
        transports: Arc<dyn TransportFactory>,
    ) -> (Self, ControllerHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ClientSnapshot::default());
        let (local_tx, local_rx) = watch::channel(None);
        let (remote_tx, remote_rx) = watch::channel(None);

        let controller = Self {
            config,
            state: ClientState::default(),
            media,
            connector,
            transports,
            local_media: None,
            transport: None,
            transport_generation: 0,
            peer: None,
            settle_timer: None,
            pending: VecDeque::new(),
            commands_rx,
            transport_tx,
            transport_rx,
            peer_tx,
            peer_rx,
            internal_tx,
            internal_rx,
            snapshot_tx,
            local_tx,
            remote_tx,
        };

        let handle = ControllerHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            local: local_rx,
            remote: remote_rx,
        };

        (controller, handle)
    }

    /// Spawn onto the current runtime
    pub fn spawn(
        config: ClientConfig,
        media: Arc<dyn MediaProvider>,
        connector: Arc<dyn PeerConnector>,
        transports: Arc<dyn TransportFactory>,
    ) -> ControllerHandle {
        let (controller, handle) = Self::new(config, media, connector, transports);
        tokio::spawn(controller.run());
        handle
    }

    /// Process inputs until every handle is dropped
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(notice) = self.transport_rx.recv() => self.on_transport(notice),
                Some(notice) = self.peer_rx.recv() => self.on_peer(notice),
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal),
            }
        }

        debug!("All handles dropped, shutting down");
        self.dispatch(ClientEvent::Stop);
    }

    fn on_command(&mut self, command: UserCommand) {
        debug!("Command: {:?}", command);
        let event = match command {
            UserCommand::Start => ClientEvent::Start,
            UserCommand::Retry => ClientEvent::Retry,
            UserCommand::Next => ClientEvent::Next,
            UserCommand::Stop => ClientEvent::Stop,
        };
        self.dispatch(event);
    }

    fn on_transport(&mut self, notice: TransportNotice) {
        if notice.generation != self.transport_generation || self.transport.is_none() {
            debug!("Ignoring event from closed transport {}", notice.generation);
            return;
        }

        let event = match notice.event {
            TransportEvent::Connected => ClientEvent::TransportOpened,
            TransportEvent::Disconnected => ClientEvent::TransportLost,
            TransportEvent::Exhausted => {
                self.transport = None;
                ClientEvent::TransportExhausted
            }
            TransportEvent::Message(msg) => match msg {
                ServerMessage::Matched {
                    partner_id,
                    initiator,
                    room_id,
                } => {
                    info!("Matched with {} in room {}", partner_id, room_id);
                    ClientEvent::Matched {
                        partner_id,
                        initiator,
                        room_id,
                    }
                }
                ServerMessage::Signal { from, signal } => ClientEvent::Signal { from, signal },
                ServerMessage::PeerLeft => {
                    info!("Partner left");
                    ClientEvent::PeerLeft
                }
                other => {
                    debug!("Ignoring {:?}", other);
                    return;
                }
            },
        };
        self.dispatch(event);
    }

    fn on_peer(&mut self, notice: PeerNotice) {
        let Some(peer) = self.peer.as_mut() else {
            debug!("Ignoring event from finished attempt {}", notice.attempt);
            return;
        };
        if peer.attempt() != notice.attempt {
            debug!("Ignoring event from finished attempt {}", notice.attempt);
            return;
        }

        let attempt = notice.attempt;
        match peer.handle(notice.event) {
            PeerReport::Outbound(msg) => self.send(msg),
            PeerReport::Connected => {
                self.remote_tx.send_replace(peer.remote_media().cloned());
                self.dispatch(ClientEvent::PeerConnected { attempt });
            }
            PeerReport::Failed(error) => self.dispatch(ClientEvent::PeerFailed { attempt, error }),
            PeerReport::Ignored => {}
        }
    }

    fn on_internal(&mut self, internal: Internal) {
        match internal {
            Internal::Media {
                token,
                result: Ok(media),
            } => {
                if !self.state.awaits_media(token) {
                    debug!("Releasing media {} from cancelled request {}", media.id(), token);
                    media.stop();
                    return;
                }
                info!("Local media ready: {}", media.id());
                if let Some(old) = self.local_media.replace(media.clone()) {
                    old.stop();
                }
                self.local_tx.send_replace(Some(media));
                self.dispatch(ClientEvent::MediaGranted { token });
            }
            Internal::Media {
                token,
                result: Err(error),
            } => {
                warn!("Media request failed: {}", error);
                self.dispatch(ClientEvent::MediaDenied { token, error });
            }
            Internal::SettleElapsed(token) => self.dispatch(ClientEvent::SettleElapsed { token }),
        }
    }

    /// Run an event through the machine and carry out its effects
    fn dispatch(&mut self, event: ClientEvent) {
        self.pending.push_back(event);

        while let Some(event) = self.pending.pop_front() {
            let (next, effects) = transition(&self.state, event);
            if next.status != self.state.status {
                debug!("Status {} -> {}", self.state.status, next.status);
            }
            self.state = next;
            for effect in effects {
                self.apply(effect);
            }
        }

        let fresh = ClientSnapshot::from(&self.state);
        self.snapshot_tx.send_if_modified(|current| {
            if *current == fresh {
                return false;
            }
            *current = fresh;
            true
        });
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::RequestMedia { token } => {
                let media = self.media.clone();
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = media.acquire().await;
                    let _ = tx.send(Internal::Media { token, result });
                });
            }

            Effect::ReleaseMedia => {
                if let Some(media) = self.local_media.take() {
                    info!("Releasing local media {}", media.id());
                    media.stop();
                }
                self.local_tx.send_replace(None);
            }

            Effect::OpenTransport => {
                self.transport_generation += 1;
                let events =
                    TransportEvents::new(self.transport_generation, self.transport_tx.clone());
                self.transport = Some(self.transports.open(events));
            }

            Effect::CloseTransport => {
                if let Some(mut transport) = self.transport.take() {
                    transport.close();
                }
            }

            Effect::Send(msg) => self.send(msg),

            Effect::StartPeer {
                attempt,
                partner,
                initiator,
            } => {
                let Some(local_media) = self.local_media.clone() else {
                    self.pending.push_back(ClientEvent::PeerFailed {
                        attempt,
                        error: PeerError::Setup("no local media".into()),
                    });
                    return;
                };
                let setup = PeerSetup {
                    initiator,
                    partner,
                    ice_servers: self.config.ice_servers.clone(),
                    local_media,
                };
                match PeerConnectionManager::start(
                    self.connector.as_ref(),
                    setup,
                    self.config.connection_timeout(),
                    PeerEvents::new(attempt, self.peer_tx.clone()),
                ) {
                    Ok(manager) => self.peer = Some(manager),
                    Err(error) => {
                        warn!("Failed to create peer connection: {}", error);
                        self.pending.push_back(ClientEvent::PeerFailed { attempt, error });
                    }
                }
            }

            Effect::ApplySignal(signal) => match self.peer.as_mut() {
                Some(peer) => {
                    if let Err(e) = peer.apply_signal(signal) {
                        warn!("Error processing signal: {}", e);
                    }
                }
                None => debug!("No peer connection for signal"),
            },

            Effect::TeardownPeer => {
                if let Some(peer) = self.peer.take() {
                    debug!("Tearing down attempt {} with {}", peer.attempt(), peer.partner());
                    peer.close();
                }
                self.remote_tx.send_replace(None);
            }

            Effect::StartSettle { token } => {
                let tx = self.internal_tx.clone();
                self.settle_timer = Some(TimerHandle::start(
                    self.config.settle_delay(),
                    move || async move {
                        let _ = tx.send(Internal::SettleElapsed(token));
                    },
                ));
            }

            Effect::CancelSettle => {
                if let Some(timer) = self.settle_timer.take() {
                    timer.cancel();
                }
            }
        }
    }

    fn send(&self, msg: ClientMessage) {
        match &self.transport {
            Some(transport) => transport.send(msg),
            None => debug!("No transport, dropping {:?}", msg),
        }
    }
}

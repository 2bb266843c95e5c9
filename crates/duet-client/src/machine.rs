//! Client connection state machine
//!
//! Pure transitions: [`transition`] takes the current [`ClientState`] and one
//! [`ClientEvent`] and returns the next state plus the [`Effect`]s the
//! controller must carry out. Nothing here touches a socket, a timer, or a
//! media device, so every transition can be tested on its own.
//!
//! Each media request, peer-connection attempt and settle timer is stamped
//! with a serial number. Events that come back carrying a serial that is no longer
//! live are ignored, which is what makes late events from a torn-down
//! manager or an aborted timer harmless.

use serde_json::Value;
use tracing::debug;

use duet_core::{ClientMessage, ConnectionStatus, ErrorKind, RoomId, SessionId};

use crate::error::{ClientError, MediaError, PeerError};

/// State of the link to the relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkState {
    #[default]
    Closed,
    Connecting,
    Open,
    /// Lost; the transport is retrying on its own
    Reconnecting,
}

/// Everything the controller knows, minus the resources it owns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientState {
    pub status: ConnectionStatus,
    pub error: Option<ClientError>,
    pub partner: Option<SessionId>,
    pub room: Option<RoomId>,
    pub link: LinkState,
    /// Local capture is held
    pub media_ready: bool,
    /// Serial of the live peer-connection attempt
    pub attempt: Option<u64>,
    /// Token of the pending settle timer
    pub settle: Option<u64>,
    /// Token of the outstanding media request
    pub media_request: Option<u64>,
    serial: u64,
}

/// Inputs to the state machine
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// User opened the chat
    Start,
    /// User pressed retry on a terminal error
    Retry,
    /// User asked for a different partner
    Next,
    /// User left the chat
    Stop,

    MediaGranted {
        token: u64,
    },
    MediaDenied {
        token: u64,
        error: MediaError,
    },

    TransportOpened,
    TransportLost,
    TransportExhausted,

    Matched {
        partner_id: SessionId,
        initiator: bool,
        room_id: RoomId,
    },
    Signal {
        from: SessionId,
        signal: Value,
    },
    PeerLeft,

    PeerConnected {
        attempt: u64,
    },
    PeerFailed {
        attempt: u64,
        error: PeerError,
    },

    SettleElapsed {
        token: u64,
    },
}

/// Work for the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RequestMedia {
        token: u64,
    },
    ReleaseMedia,
    OpenTransport,
    CloseTransport,
    Send(ClientMessage),
    StartPeer {
        attempt: u64,
        partner: SessionId,
        initiator: bool,
    },
    ApplySignal(Value),
    TeardownPeer,
    StartSettle {
        token: u64,
    },
    CancelSettle,
}

impl ClientState {
    /// Whether a media result stamped `token` would be accepted
    pub fn awaits_media(&self, token: u64) -> bool {
        self.status == ConnectionStatus::RequestingPermissions
            && self.media_request == Some(token)
    }

    fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Tear down the live attempt and any pending settle
    fn abandon_attempt(&mut self, effects: &mut Vec<Effect>) {
        if self.attempt.take().is_some() {
            effects.push(Effect::TeardownPeer);
        }
        if self.settle.take().is_some() {
            effects.push(Effect::CancelSettle);
        }
        self.partner = None;
        self.room = None;
    }

    /// Back to `waiting`, asking the relay for a partner if the link is up
    fn requeue(&mut self, msg: ClientMessage, effects: &mut Vec<Effect>) {
        self.status = ConnectionStatus::Waiting;
        match self.link {
            LinkState::Open => {
                self.error = None;
                effects.push(Effect::Send(msg));
            }
            LinkState::Closed => {
                self.error = None;
                self.link = LinkState::Connecting;
                effects.push(Effect::OpenTransport);
            }
            // join-queue goes out when the link comes back
            LinkState::Connecting => self.error = None,
            LinkState::Reconnecting => self.error = Some(ClientError::network_lost()),
        }
    }

    fn request_media(&mut self, effects: &mut Vec<Effect>) {
        self.status = ConnectionStatus::RequestingPermissions;
        self.error = None;
        let token = self.next_serial();
        self.media_request = Some(token);
        effects.push(Effect::RequestMedia { token });
    }

    /// Fail the live attempt and schedule the re-queue
    fn fail_attempt(&mut self, error: ClientError, effects: &mut Vec<Effect>) {
        self.abandon_attempt(effects);
        self.status = ConnectionStatus::Error;
        self.error = Some(error);
        let token = self.next_serial();
        self.settle = Some(token);
        effects.push(Effect::StartSettle { token });
    }
}

/// Compute the next state and the effects of `event`
pub fn transition(state: &ClientState, event: ClientEvent) -> (ClientState, Vec<Effect>) {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        ClientEvent::Start => {
            if state.status == ConnectionStatus::Idle {
                next.request_media(&mut effects);
            }
        }

        ClientEvent::Retry => match (state.status, state.error_kind()) {
            (ConnectionStatus::Error, Some(kind)) if kind.is_terminal() => {
                next.request_media(&mut effects);
            }
            (ConnectionStatus::Error, Some(ErrorKind::Network))
                if state.link == LinkState::Closed && state.media_ready =>
            {
                next.requeue(ClientMessage::JoinQueue, &mut effects);
            }
            _ => debug!("Retry ignored in {}", state.status),
        },

        ClientEvent::Next => {
            let recovering = state.status == ConnectionStatus::Error
                && state.error_kind() == Some(ErrorKind::Connection);
            let active = matches!(
                state.status,
                ConnectionStatus::Waiting | ConnectionStatus::Connecting | ConnectionStatus::Connected
            );
            if state.media_ready && (active || recovering) {
                next.abandon_attempt(&mut effects);
                next.requeue(ClientMessage::Next, &mut effects);
            }
        }

        ClientEvent::Stop => {
            if state.status == ConnectionStatus::Idle
                && !state.media_ready
                && state.link == LinkState::Closed
            {
                return (next, effects);
            }
            next.abandon_attempt(&mut effects);
            if state.link == LinkState::Open {
                effects.push(Effect::Send(ClientMessage::Leave));
            }
            if state.link != LinkState::Closed {
                effects.push(Effect::CloseTransport);
            }
            if state.media_ready {
                effects.push(Effect::ReleaseMedia);
            }
            next = ClientState {
                serial: next.serial,
                ..ClientState::default()
            };
        }

        ClientEvent::MediaGranted { token } => {
            if state.awaits_media(token) {
                next.media_request = None;
                next.media_ready = true;
                next.requeue(ClientMessage::JoinQueue, &mut effects);
            } else {
                // The controller never hands over a stale grant
                debug!("Ignoring media from cancelled request {}", token);
            }
        }

        ClientEvent::MediaDenied { token, error } => {
            if state.awaits_media(token) {
                next.media_request = None;
                next.status = ConnectionStatus::Error;
                next.error = Some(ClientError::permissions(&error));
            } else {
                debug!("Ignoring denial of cancelled request {}", token);
            }
        }

        ClientEvent::TransportOpened => {
            next.link = LinkState::Open;
            if state.media_ready && state.status != ConnectionStatus::Idle {
                // The relay sees a brand-new session, so any old room is gone
                next.abandon_attempt(&mut effects);
                next.requeue(ClientMessage::JoinQueue, &mut effects);
            }
        }

        ClientEvent::TransportLost => {
            next.link = LinkState::Reconnecting;
            if state.status != ConnectionStatus::Error {
                next.error = Some(ClientError::network_lost());
            }
        }

        ClientEvent::TransportExhausted => {
            next.abandon_attempt(&mut effects);
            next.link = LinkState::Closed;
            next.status = ConnectionStatus::Error;
            next.error = Some(ClientError::network_exhausted());
        }

        ClientEvent::Matched {
            partner_id,
            initiator,
            room_id,
        } => {
            if state.status == ConnectionStatus::Waiting && state.media_ready {
                next.abandon_attempt(&mut effects);
                let attempt = next.next_serial();
                next.attempt = Some(attempt);
                next.partner = Some(partner_id.clone());
                next.room = Some(room_id);
                next.status = ConnectionStatus::Connecting;
                next.error = None;
                effects.push(Effect::StartPeer {
                    attempt,
                    partner: partner_id,
                    initiator,
                });
            } else {
                debug!("Ignoring match with {} in {}", partner_id, state.status);
            }
        }

        ClientEvent::Signal { from, signal } => {
            if state.attempt.is_some() && state.partner.as_ref() == Some(&from) {
                effects.push(Effect::ApplySignal(signal));
            } else {
                debug!("Dropping signal from {}: no handshake in progress", from);
            }
        }

        ClientEvent::PeerLeft => {
            if state.attempt.is_some() {
                next.fail_attempt(ClientError::partner_left(), &mut effects);
            }
        }

        ClientEvent::PeerConnected { attempt } => {
            if state.attempt == Some(attempt) && state.status == ConnectionStatus::Connecting {
                next.status = ConnectionStatus::Connected;
                next.error = None;
            }
        }

        ClientEvent::PeerFailed { attempt, error } => {
            if state.attempt == Some(attempt) {
                let surfaced = match error {
                    PeerError::Timeout(_) => ClientError::handshake_timeout(),
                    _ => ClientError::handshake_failed(),
                };
                next.fail_attempt(surfaced, &mut effects);
            } else {
                debug!("Ignoring failure of stale attempt {}: {}", attempt, error);
            }
        }

        ClientEvent::SettleElapsed { token } => {
            if state.settle == Some(token) {
                next.settle = None;
                next.requeue(ClientMessage::JoinQueue, &mut effects);
            }
        }
    }

    (next, effects)
}

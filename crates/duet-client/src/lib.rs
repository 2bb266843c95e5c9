//! Duet Client
//!
//! Everything a participant needs between the rendering layer and the
//! signal server: acquire local media, join the match queue, drive the
//! peer-to-peer handshake with whoever the relay pairs us with, and recover
//! when the partner leaves, the handshake stalls, or the relay link drops.
//!
//! The decision logic lives in [`machine`] as a pure state machine.
//! [`ClientSessionController`] executes its effects against three seams the
//! embedding application provides: a [`MediaProvider`], a [`PeerConnector`]
//! and a [`TransportFactory`] ([`WsTransportFactory`] for a real relay).

pub mod controller;
pub mod error;
pub mod machine;
pub mod media;
pub mod peer;
pub mod timer;
pub mod transport;

pub use controller::{ClientSessionController, ClientSnapshot, ControllerHandle, UserCommand};
pub use error::{ClientError, MediaError, PeerError, TransportError};
pub use machine::{transition, ClientEvent, ClientState, Effect, LinkState};
pub use media::{LocalMedia, MediaHandle, MediaProvider, MediaStream, RemoteMedia};
pub use peer::{
    PeerConnection, PeerConnectionManager, PeerConnector, PeerEvent, PeerEvents, PeerNotice,
    PeerReport, PeerSetup,
};
pub use timer::TimerHandle;
pub use transport::{
    SignalTransport, TransportEvent, TransportEvents, TransportFactory, TransportNotice,
    WsTransport, WsTransportFactory,
};

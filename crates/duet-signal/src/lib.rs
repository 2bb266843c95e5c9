//! Duet Signal Server
//!
//! Pairs anonymous participants into two-person rooms and relays the
//! handshake messages they need to open a direct peer-to-peer connection.
//! Media never passes through here.
//!
//! # Protocol
//!
//! 1. Client sends `join-queue` and waits in the match queue
//! 2. When two clients are waiting, both receive `matched` with a shared room id;
//!    the one that waited longer is the initiator
//! 3. Clients exchange `signal` payloads, which are relayed only between the
//!    two members of the room
//! 4. `next`, `leave`, or a dropped connection dissolves the room and the
//!    remaining member receives `peer-left`

pub mod queue;
pub mod relay;
pub mod room;
pub mod server;
pub mod session;

pub use queue::MatchQueue;
pub use relay::{RelayStats, SignalingRelay};
pub use room::{Room, RoomError, RoomRegistry};
pub use server::SignalServer;
pub use session::{Session, SessionTable};

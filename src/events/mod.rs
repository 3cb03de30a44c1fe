//! The bidirectional event channel: wire shapes, per-connection delivery
//! and the dispatcher sitting between sockets and the engines.

mod hub;
mod protocol;
mod router;
pub mod ws;

pub use hub::{Hub, Outbox};
pub use protocol::{split_frame, ClientEvent, Notice, ServerEvent};
pub use router::{EventRouter, Session};

/// Lifecycle of one event-channel connection.
///
/// `Connecting -> Authenticated -> Bound -> Disconnected`, or `Rejected`
/// when the handshake credential does not verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Authenticated,
    Bound,
    Disconnected,
    Rejected,
}

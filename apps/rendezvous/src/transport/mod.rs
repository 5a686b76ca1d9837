//! Out-of-band signaling transport.
//!
//! The rendezvous server is a per-peer mailbox: a peer posts to the other
//! peer's id and polls its own. Bodies are opaque here; encoding lives in
//! `signal_wire`.

pub mod http;
pub mod memory;
pub mod poller;

use async_trait::async_trait;
use signal_wire::SignalMessage;

pub use http::HttpSignalTransport;
pub use memory::MemoryRendezvous;
pub use poller::{PollState, TransportPoller};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),
    #[error("unexpected signaling status {status}")]
    Status { status: u16 },
    #[error("invalid signaling endpoint: {0}")]
    Endpoint(String),
    #[error("transport closed")]
    Closed,
    #[error("unencodable message: {0}")]
    Encode(#[from] signal_wire::EncodeError),
}

#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Deliver `body` to `peer_id`'s mailbox.
    async fn post(&self, peer_id: &str, body: String) -> Result<(), TransportError>;

    /// Take the next message from `peer_id`'s mailbox, if any.
    async fn get(&self, peer_id: &str) -> Result<Option<String>, TransportError>;
}

/// Outbound half used by the session coordinator. Sends never block the caller.
pub trait SignalOutbox: Send + Sync {
    fn send(&self, message: SignalMessage);
}

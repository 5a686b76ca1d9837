pub mod coordinator;
pub mod driver;
pub mod state;

use std::fmt;

pub use coordinator::{Coordinator, SessionNotice};
pub use driver::{SessionCore, SessionOptions, SignalingSession};
pub use state::{PeerRole, RoundToken, SessionState};

/// A message or event that is valid on the wire but not in the current state.
/// Logged and dropped; the session carries on.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("offer received while an answer is already committed for this round")]
    DuplicateOffer,
    #[error("{message} is not valid for a {role}")]
    RoleMismatch {
        role: PeerRole,
        message: &'static str,
    },
    #[error("answer received in state {state}")]
    UnexpectedAnswer { state: SessionState },
    #[error("{event} is not valid in state {state}")]
    UnexpectedState {
        state: SessionState,
        event: &'static str,
    },
    #[error("unknown message type {message_type:?}")]
    UnknownMessage { message_type: String },
    #[error("{event} ignored: session is closed")]
    SessionClosed { event: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NegotiationStage {
    CreateOffer,
    CreateAnswer,
    ApplyRemoteDescription,
}

impl fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NegotiationStage::CreateOffer => "create offer",
            NegotiationStage::CreateAnswer => "create answer",
            NegotiationStage::ApplyRemoteDescription => "apply remote description",
        })
    }
}

/// Errors surfaced to the application. The session is closed when one is raised.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("negotiation failed during {stage}: {reason}")]
    NegotiationFailure {
        stage: NegotiationStage,
        reason: String,
    },
}

/// What the coordinator did with an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Held until a remote description is applied.
    Buffered,
    Discarded(ProtocolViolation),
    /// Completion from an earlier negotiation round.
    Stale,
    Failed(SessionError),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

use std::fmt;

use clap::ValueEnum;

/// Which side of the negotiation this peer plays. Fixed for the session's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, ValueEnum)]
pub enum PeerRole {
    /// Creates the offer once the settle delay elapses.
    Caller,
    /// Waits for an offer and answers it.
    #[default]
    Callee,
}

impl PeerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerRole::Caller => "caller",
            PeerRole::Callee => "callee",
        }
    }
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingLocalDescription,
    OfferSent,
    OfferReceived,
    AnswerSent,
    AnswerReceived,
    Connected,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AwaitingLocalDescription => "awaiting_local_description",
            SessionState::OfferSent => "offer_sent",
            SessionState::OfferReceived => "offer_received",
            SessionState::AnswerSent => "answer_sent",
            SessionState::AnswerReceived => "answer_received",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        }
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one negotiation round.
///
/// Every deferred native request carries the token that was current when it
/// was issued; completions whose token no longer matches are discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoundToken(u64);

impl RoundToken {
    pub const FIRST: RoundToken = RoundToken(1);

    pub fn next(self) -> RoundToken {
        RoundToken(self.0.wrapping_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for RoundToken {
    fn default() -> Self {
        RoundToken::FIRST
    }
}

impl fmt::Display for RoundToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "round-{}", self.0)
    }
}

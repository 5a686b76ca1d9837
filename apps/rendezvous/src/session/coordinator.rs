//! Offer/answer/ICE negotiation state machine.
//!
//! The coordinator lives on the application thread. It never blocks: native
//! work is requested through [`NativePeer`] and its results come back as calls
//! to the `on_*` methods, usually via the session's dispatcher.

use std::sync::Arc;

use signal_wire::{Decoded, IceCandidate, SdpType, SessionDescription, SignalMessage};
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use super::{
    NegotiationStage, Outcome, PeerRole, ProtocolViolation, RoundToken, SessionError, SessionState,
};
use crate::native::{IceConnectionState, NativePeer};
use crate::transport::SignalOutbox;

const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    StateChanged { from: SessionState, to: SessionState },
    Failed(SessionError),
}

pub struct Coordinator {
    role: PeerRole,
    state: SessionState,
    round: RoundToken,
    answer_latched: bool,
    remote_description_applied: bool,
    pending_candidates: Vec<IceCandidate>,
    native: Arc<dyn NativePeer>,
    outbox: Arc<dyn SignalOutbox>,
    notices: broadcast::Sender<SessionNotice>,
}

impl Coordinator {
    pub fn new(role: PeerRole, native: Arc<dyn NativePeer>, outbox: Arc<dyn SignalOutbox>) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            role,
            state: SessionState::Idle,
            round: RoundToken::FIRST,
            answer_latched: false,
            remote_description_applied: false,
            pending_candidates: Vec::new(),
            native,
            outbox,
            notices,
        }
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn round(&self) -> RoundToken {
        self.round
    }

    pub fn is_answer_latched(&self) -> bool {
        self.answer_latched
    }

    pub fn has_remote_description(&self) -> bool {
        self.remote_description_applied
    }

    pub fn pending_candidates(&self) -> &[IceCandidate] {
        &self.pending_candidates
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Caller only: request the local offer for the current round.
    pub fn start(&mut self) -> Outcome {
        if self.role != PeerRole::Caller {
            return self.discard(ProtocolViolation::RoleMismatch {
                role: self.role,
                message: "start",
            });
        }
        if self.state != SessionState::Idle {
            return self.discard(ProtocolViolation::UnexpectedState {
                state: self.state,
                event: "start",
            });
        }
        self.transition(SessionState::AwaitingLocalDescription);
        self.native.create_offer(self.round);
        Outcome::Applied
    }

    pub fn on_local_description_ready(
        &mut self,
        round: RoundToken,
        description: SessionDescription,
    ) -> Outcome {
        if let Some(outcome) = self.reject_stale(round, "local description") {
            return outcome;
        }
        if self.state != SessionState::AwaitingLocalDescription {
            return self.discard(ProtocolViolation::UnexpectedState {
                state: self.state,
                event: "local description",
            });
        }
        let next = match (self.role, description.sdp_type) {
            (PeerRole::Caller, SdpType::Offer) => SessionState::OfferSent,
            (PeerRole::Callee, SdpType::Answer) => SessionState::AnswerSent,
            (role, sdp_type) => {
                return self.discard(ProtocolViolation::RoleMismatch {
                    role,
                    message: sdp_type.as_str(),
                });
            }
        };
        self.outbox.send(SignalMessage::from(description));
        self.transition(next);
        Outcome::Applied
    }

    pub fn on_local_description_failed(&mut self, round: RoundToken, reason: String) -> Outcome {
        if let Some(outcome) = self.reject_stale(round, "local description failure") {
            return outcome;
        }
        let stage = match self.role {
            PeerRole::Caller => NegotiationStage::CreateOffer,
            PeerRole::Callee => NegotiationStage::CreateAnswer,
        };
        self.fail(SessionError::NegotiationFailure { stage, reason })
    }

    /// Entry point for everything the poller decodes.
    pub fn on_wire_message(&mut self, decoded: Decoded) -> Outcome {
        match decoded {
            Decoded::Message(message) => self.on_remote_message(message),
            Decoded::Unknown { message_type } => {
                self.discard(ProtocolViolation::UnknownMessage { message_type })
            }
        }
    }

    pub fn on_remote_message(&mut self, message: SignalMessage) -> Outcome {
        trace!(
            target: "rendezvous::session",
            message = message.label(),
            state = %self.state,
            "remote message"
        );
        match message {
            SignalMessage::Offer { sdp } => self.on_remote_offer(sdp),
            SignalMessage::Answer { sdp } => self.on_remote_answer(sdp),
            SignalMessage::Ice(candidate) => self.on_remote_ice_candidate(candidate),
        }
    }

    fn on_remote_offer(&mut self, sdp: String) -> Outcome {
        if self.state.is_closed() {
            return self.discard(ProtocolViolation::SessionClosed { event: "offer" });
        }
        if self.role != PeerRole::Callee {
            return self.discard(ProtocolViolation::RoleMismatch {
                role: self.role,
                message: "offer",
            });
        }
        if self.answer_latched {
            return self.discard(ProtocolViolation::DuplicateOffer);
        }
        self.answer_latched = true;
        self.transition(SessionState::OfferReceived);
        self.native
            .set_remote_description(self.round, SessionDescription::offer(sdp));
        Outcome::Applied
    }

    fn on_remote_answer(&mut self, sdp: String) -> Outcome {
        if self.state.is_closed() {
            return self.discard(ProtocolViolation::SessionClosed { event: "answer" });
        }
        if self.role != PeerRole::Caller {
            return self.discard(ProtocolViolation::RoleMismatch {
                role: self.role,
                message: "answer",
            });
        }
        if self.state != SessionState::OfferSent {
            return self.discard(ProtocolViolation::UnexpectedAnswer { state: self.state });
        }
        self.transition(SessionState::AnswerReceived);
        self.native
            .set_remote_description(self.round, SessionDescription::answer(sdp));
        Outcome::Applied
    }

    /// Forward now if a remote description is in place, otherwise hold in arrival order.
    pub fn on_remote_ice_candidate(&mut self, candidate: IceCandidate) -> Outcome {
        if self.state.is_closed() {
            return self.discard(ProtocolViolation::SessionClosed { event: "ice" });
        }
        if self.remote_description_applied {
            self.native.add_ice_candidate(candidate);
            return Outcome::Applied;
        }
        trace!(
            target: "rendezvous::session",
            buffered = self.pending_candidates.len() + 1,
            "buffering remote candidate"
        );
        self.pending_candidates.push(candidate);
        Outcome::Buffered
    }

    pub fn on_ice_candidate_ready(&mut self, candidate: IceCandidate) -> Outcome {
        if self.state.is_closed() {
            return self.discard(ProtocolViolation::SessionClosed {
                event: "local candidate",
            });
        }
        self.outbox.send(SignalMessage::Ice(candidate));
        Outcome::Applied
    }

    pub fn on_remote_description_applied(
        &mut self,
        round: RoundToken,
        result: Result<(), String>,
    ) -> Outcome {
        if let Some(outcome) = self.reject_stale(round, "remote description applied") {
            return outcome;
        }
        if let Err(reason) = result {
            return self.fail(SessionError::NegotiationFailure {
                stage: NegotiationStage::ApplyRemoteDescription,
                reason,
            });
        }
        let expected = match self.role {
            PeerRole::Caller => SessionState::AnswerReceived,
            PeerRole::Callee => SessionState::OfferReceived,
        };
        if self.state != expected {
            return self.discard(ProtocolViolation::UnexpectedState {
                state: self.state,
                event: "remote description applied",
            });
        }

        self.remote_description_applied = true;
        let buffered = std::mem::take(&mut self.pending_candidates);
        if !buffered.is_empty() {
            debug!(
                target: "rendezvous::session",
                count = buffered.len(),
                "flushing buffered candidates"
            );
        }
        for candidate in buffered {
            self.native.add_ice_candidate(candidate);
        }

        if self.role == PeerRole::Callee {
            self.transition(SessionState::AwaitingLocalDescription);
            self.native.create_answer(self.round);
        }
        Outcome::Applied
    }

    pub fn on_connected(&mut self) -> Outcome {
        match self.state {
            SessionState::AnswerSent | SessionState::AnswerReceived => {
                self.transition(SessionState::Connected);
                info!(
                    target: "rendezvous::session",
                    role = %self.role,
                    round = %self.round,
                    "session connected"
                );
                Outcome::Applied
            }
            SessionState::Closed => {
                self.discard(ProtocolViolation::SessionClosed { event: "connected" })
            }
            state => self.discard(ProtocolViolation::UnexpectedState {
                state,
                event: "connected",
            }),
        }
    }

    pub fn on_ice_state_changed(&mut self, ice: IceConnectionState) -> Outcome {
        if self.state.is_closed() {
            return self.discard(ProtocolViolation::SessionClosed {
                event: "ice state change",
            });
        }
        debug!(target: "rendezvous::session", ?ice, state = %self.state, "ice connection state");
        if ice.is_terminal() {
            self.reset();
        }
        Outcome::Applied
    }

    /// Start over: back to Idle with a fresh round token. Completions still in
    /// flight for the previous round will be reported as stale.
    pub fn reset(&mut self) {
        let dropped = self.pending_candidates.len();
        self.answer_latched = false;
        self.remote_description_applied = false;
        self.pending_candidates.clear();
        self.round = self.round.next();
        info!(
            target: "rendezvous::session",
            role = %self.role,
            round = %self.round,
            dropped_candidates = dropped,
            "session reset"
        );
        self.transition(SessionState::Idle);
    }

    /// Terminal shutdown requested by the application.
    pub fn close(&mut self) {
        if !self.state.is_closed() {
            self.pending_candidates.clear();
            self.transition(SessionState::Closed);
        }
    }

    fn fail(&mut self, err: SessionError) -> Outcome {
        error!(
            target: "rendezvous::session",
            error = %err,
            round = %self.round,
            "negotiation failed"
        );
        self.transition(SessionState::Closed);
        let _ = self.notices.send(SessionNotice::Failed(err.clone()));
        Outcome::Failed(err)
    }

    fn discard(&self, violation: ProtocolViolation) -> Outcome {
        warn!(
            target: "rendezvous::session",
            role = %self.role,
            state = %self.state,
            violation = %violation,
            "discarding"
        );
        Outcome::Discarded(violation)
    }

    fn reject_stale(&self, round: RoundToken, event: &'static str) -> Option<Outcome> {
        if round == self.round {
            return None;
        }
        debug!(
            target: "rendezvous::session",
            event,
            %round,
            current = %self.round,
            "stale completion"
        );
        Some(Outcome::Stale)
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(target: "rendezvous::session", %from, %to, "state change");
        let _ = self.notices.send(SessionNotice::StateChanged { from, to });
    }
}

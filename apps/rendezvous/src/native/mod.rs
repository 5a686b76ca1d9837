//! Seam between the session and the media engine.
//!
//! Native calls never block: each request returns immediately and its result
//! arrives later as a [`NativeEvent`] on an engine thread. Requests that
//! complete asynchronously carry the [`RoundToken`] they were issued under.

pub mod webrtc;

use std::sync::Arc;

use signal_wire::{IceCandidate, SessionDescription};

use crate::media::{DataChannelState, DataTrack, RemoteTrack};
use crate::session::RoundToken;

pub use self::webrtc::{WebRtcOptions, WebRtcPeer};

pub trait NativePeer: Send + Sync {
    fn create_offer(&self, round: RoundToken);
    fn create_answer(&self, round: RoundToken);
    fn set_remote_description(&self, round: RoundToken, description: SessionDescription);
    fn add_ice_candidate(&self, candidate: IceCandidate);
    fn close(&self);
}

/// Connectivity state reported by the engine's ICE agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// States after which the current negotiation round cannot make progress.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            IceConnectionState::Disconnected
                | IceConnectionState::Failed
                | IceConnectionState::Closed
        )
    }
}

#[derive(Debug)]
pub enum NativeEvent {
    LocalSdpReady {
        round: RoundToken,
        description: SessionDescription,
    },
    LocalSdpFailed {
        round: RoundToken,
        reason: String,
    },
    RemoteDescriptionApplied {
        round: RoundToken,
        result: Result<(), String>,
    },
    IceCandidateReady(IceCandidate),
    Connected,
    IceStateChanged(IceConnectionState),
    TrackPaired(RemoteTrack),
    TrackUnpaired(RemoteTrack),
    /// Delivered to the track's state callback on the application thread,
    /// after any pairing reported before it.
    DataChannelStateChanged {
        track: Arc<DataTrack>,
        state: DataChannelState,
    },
}

impl NativeEvent {
    pub fn label(&self) -> &'static str {
        match self {
            NativeEvent::LocalSdpReady { .. } => "local_sdp_ready",
            NativeEvent::LocalSdpFailed { .. } => "local_sdp_failed",
            NativeEvent::RemoteDescriptionApplied { .. } => "remote_description_applied",
            NativeEvent::IceCandidateReady(_) => "ice_candidate_ready",
            NativeEvent::Connected => "connected",
            NativeEvent::IceStateChanged(_) => "ice_state_changed",
            NativeEvent::TrackPaired(_) => "track_paired",
            NativeEvent::TrackUnpaired(_) => "track_unpaired",
            NativeEvent::DataChannelStateChanged { .. } => "data_channel_state_changed",
        }
    }
}

/// Callback the engine invokes from its own threads.
pub type NativeEventSink = Arc<dyn Fn(NativeEvent) + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum NativeError {
    #[error("native engine setup failed: {0}")]
    Setup(String),
    #[error("native peer already closed")]
    Closed,
    #[error("data channel not open")]
    ChannelNotOpen,
    #[error("data channel buffer full ({buffered} of {limit} bytes queued)")]
    BufferFull { buffered: usize, limit: usize },
    #[error("data channel send failed: {0}")]
    Send(String),
}

pub(crate) fn to_setup_error<E: std::fmt::Display>(err: E) -> NativeError {
    NativeError::Setup(err.to_string())
}

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use signal_wire::{IceCandidate, SdpType, SessionDescription};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{
    IceConnectionState, NativeError, NativeEvent, NativeEventSink, NativePeer, to_setup_error,
};
use crate::config::Config;
use crate::media::{DataChannelEvent, DataChannelState, DataTrack, RemoteTrack};
use crate::session::{PeerRole, RoundToken};

pub const DEFAULT_CHANNEL_LABEL: &str = "rendezvous";
/// Sends are refused once this much is queued on the data channel.
pub const MAX_BUFFERED_AMOUNT: usize = 16 * 1024 * 1024;
const BUFFERED_LOW_THRESHOLD: usize = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct WebRtcOptions {
    pub role: PeerRole,
    pub ice_servers: Vec<String>,
    pub channel_label: String,
}

impl From<&Config> for WebRtcOptions {
    fn from(config: &Config) -> Self {
        Self {
            role: config.role,
            ice_servers: config.ice_servers.clone(),
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
        }
    }
}

fn build_api() -> Result<API, NativeError> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;

    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// Per-channel state and buffering reports for the track a channel surfaces as.
struct ChannelEvents {
    track: Arc<DataTrack>,
    sink: NativeEventSink,
    state: Mutex<Option<DataChannelState>>,
    buffered: AtomicUsize,
}

impl ChannelEvents {
    fn new(track: Arc<DataTrack>, sink: NativeEventSink) -> Arc<Self> {
        Arc::new(Self {
            track,
            sink,
            state: Mutex::new(None),
            buffered: AtomicUsize::new(0),
        })
    }

    fn is_open(&self) -> bool {
        *self.state.lock() == Some(DataChannelState::Open)
    }

    /// Report `state` through the sink, once per change.
    fn transition(&self, state: DataChannelState) -> bool {
        {
            let mut current = self.state.lock();
            if *current == Some(state) {
                return false;
            }
            *current = Some(state);
        }
        trace!(
            target: "rendezvous::native",
            track = self.track.name(),
            ?state,
            "data channel state"
        );
        (self.sink)(NativeEvent::DataChannelStateChanged {
            track: Arc::clone(&self.track),
            state,
        });
        true
    }

    /// Deliver a buffering change straight to the track.
    fn buffering(&self, current: usize) -> bool {
        let previous = self.buffered.swap(current, Ordering::AcqRel);
        if previous == current {
            return false;
        }
        self.track.deliver_event(DataChannelEvent::Buffering {
            previous,
            current,
            limit: MAX_BUFFERED_AMOUNT,
        });
        true
    }
}

#[derive(Clone)]
struct ChannelLink {
    dc: Arc<RTCDataChannel>,
    events: Arc<ChannelEvents>,
}

enum Payload {
    Binary(Bytes),
    Text(String),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Binary(bytes) => bytes.len(),
            Payload::Text(text) => text.len(),
        }
    }
}

impl ChannelLink {
    async fn send(&self, payload: Payload) -> Result<usize, NativeError> {
        if !self.events.is_open() {
            return Err(NativeError::ChannelNotOpen);
        }
        let buffered = self.dc.buffered_amount().await;
        if buffered + payload.len() > MAX_BUFFERED_AMOUNT {
            self.events.buffering(buffered);
            return Err(NativeError::BufferFull {
                buffered,
                limit: MAX_BUFFERED_AMOUNT,
            });
        }
        let sent = match payload {
            Payload::Binary(bytes) => self.dc.send(&bytes).await,
            Payload::Text(text) => self.dc.send_text(text).await,
        }
        .map_err(|err| NativeError::Send(err.to_string()))?;
        self.events.buffering(self.dc.buffered_amount().await);
        Ok(sent)
    }
}

type ChannelSlot = Arc<Mutex<Option<ChannelLink>>>;

/// [`NativePeer`] backed by a webrtc-rs peer connection carrying one data channel.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    sink: NativeEventSink,
    runtime: Handle,
    channel: ChannelSlot,
    closed: AtomicBool,
}

impl WebRtcPeer {
    /// Create the peer connection and wire its callbacks into `sink`.
    ///
    /// The caller opens the data channel up front so its offer carries an
    /// application section; the callee adopts whichever channel the remote opens.
    pub async fn connect(
        options: WebRtcOptions,
        sink: NativeEventSink,
    ) -> Result<Arc<Self>, NativeError> {
        let api = build_api()?;
        let ice_servers = if options.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: options.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(to_setup_error)?,
        );
        let channel: ChannelSlot = Arc::new(Mutex::new(None));

        let candidate_sink = Arc::clone(&sink);
        pc.on_ice_candidate(Box::new(move |candidate| {
            let sink = Arc::clone(&candidate_sink);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    trace!(target: "rendezvous::native", "ice gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => sink(NativeEvent::IceCandidateReady(from_candidate_init(init))),
                    Err(err) => warn!(
                        target: "rendezvous::native",
                        error = %err,
                        "failed to serialize local candidate"
                    ),
                }
            })
        }));

        let state_sink = Arc::clone(&sink);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let sink = Arc::clone(&state_sink);
            Box::pin(async move {
                debug!(target: "rendezvous::native", ?state, "peer connection state");
                if state == RTCPeerConnectionState::Connected {
                    sink(NativeEvent::Connected);
                }
            })
        }));

        let ice_sink = Arc::clone(&sink);
        pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            let sink = Arc::clone(&ice_sink);
            Box::pin(async move {
                if let Some(state) = map_ice_state(state) {
                    sink(NativeEvent::IceStateChanged(state));
                }
            })
        }));

        match options.role {
            PeerRole::Caller => {
                let init = RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                };
                let dc = pc
                    .create_data_channel(&options.channel_label, Some(init))
                    .await
                    .map_err(to_setup_error)?;
                attach_channel(dc, Arc::clone(&sink), Arc::clone(&channel)).await;
            }
            PeerRole::Callee => {
                let channel_sink = Arc::clone(&sink);
                let slot = Arc::clone(&channel);
                pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let sink = Arc::clone(&channel_sink);
                    let slot = Arc::clone(&slot);
                    Box::pin(async move { attach_channel(dc, sink, slot).await })
                }));
            }
        }

        info!(
            target: "rendezvous::native",
            role = %options.role,
            ice_servers = options.ice_servers.len(),
            "peer connection created"
        );

        Ok(Arc::new(Self {
            pc,
            sink,
            runtime: Handle::current(),
            channel,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send bytes over the data channel. Fails unless the channel is open.
    pub async fn send_data(&self, data: Bytes) -> Result<usize, NativeError> {
        self.link()?.send(Payload::Binary(data)).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<usize, NativeError> {
        self.link()?.send(Payload::Text(text.into())).await
    }

    /// Start a graceful close of the data channel; `Closed` follows once the
    /// engine tears the stream down.
    pub async fn close_channel(&self) -> Result<(), NativeError> {
        let link = self.link()?;
        link.events.transition(DataChannelState::Closing);
        link.dc
            .close()
            .await
            .map_err(|err| NativeError::Send(err.to_string()))
    }

    fn link(&self) -> Result<ChannelLink, NativeError> {
        if self.is_closed() {
            return Err(NativeError::Closed);
        }
        self.channel.lock().clone().ok_or(NativeError::ChannelNotOpen)
    }

    fn spawn_local_description(&self, round: RoundToken, sdp_type: SdpType) {
        if self.is_closed() {
            return;
        }
        let pc = Arc::clone(&self.pc);
        let sink = Arc::clone(&self.sink);
        self.runtime.spawn(async move {
            let event = match create_local_description(&pc, sdp_type).await {
                Ok(sdp) => NativeEvent::LocalSdpReady {
                    round,
                    description: SessionDescription { sdp_type, sdp },
                },
                Err(err) => NativeEvent::LocalSdpFailed {
                    round,
                    reason: err.to_string(),
                },
            };
            sink(event);
        });
    }
}

async fn create_local_description(
    pc: &RTCPeerConnection,
    sdp_type: SdpType,
) -> Result<String, webrtc::error::Error> {
    let description = match sdp_type {
        SdpType::Offer => pc.create_offer(None).await?,
        SdpType::Answer => pc.create_answer(None).await?,
    };
    let sdp = description.sdp.clone();
    pc.set_local_description(description).await?;
    Ok(sdp)
}

impl NativePeer for WebRtcPeer {
    fn create_offer(&self, round: RoundToken) {
        trace!(target: "rendezvous::native", %round, "create offer");
        self.spawn_local_description(round, SdpType::Offer);
    }

    fn create_answer(&self, round: RoundToken) {
        trace!(target: "rendezvous::native", %round, "create answer");
        self.spawn_local_description(round, SdpType::Answer);
    }

    fn set_remote_description(&self, round: RoundToken, description: SessionDescription) {
        if self.is_closed() {
            return;
        }
        let pc = Arc::clone(&self.pc);
        let sink = Arc::clone(&self.sink);
        self.runtime.spawn(async move {
            let converted = match description.sdp_type {
                SdpType::Offer => RTCSessionDescription::offer(description.sdp),
                SdpType::Answer => RTCSessionDescription::answer(description.sdp),
            };
            let result = match converted {
                Ok(remote) => pc.set_remote_description(remote).await,
                Err(err) => Err(err),
            };
            sink(NativeEvent::RemoteDescriptionApplied {
                round,
                result: result.map_err(|err| err.to_string()),
            });
        });
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) {
        if self.is_closed() {
            return;
        }
        let pc = Arc::clone(&self.pc);
        self.runtime.spawn(async move {
            let init = to_candidate_init(candidate);
            if let Err(err) = pc.add_ice_candidate(init).await {
                warn!(
                    target: "rendezvous::native",
                    error = %err,
                    "failed to add remote ice candidate"
                );
            }
        });
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.channel.lock().take();
        let pc = Arc::clone(&self.pc);
        self.runtime.spawn(async move {
            if let Err(err) = pc.close().await {
                debug!(target: "rendezvous::native", error = %err, "peer connection close failed");
            }
        });
    }
}

impl Drop for WebRtcPeer {
    fn drop(&mut self) {
        self.close();
    }
}

async fn attach_channel(dc: Arc<RTCDataChannel>, sink: NativeEventSink, slot: ChannelSlot) {
    let track = DataTrack::new(dc.label());
    let events = ChannelEvents::new(Arc::clone(&track), Arc::clone(&sink));
    debug!(target: "rendezvous::native", label = dc.label(), "data channel attached");
    slot.lock().replace(ChannelLink {
        dc: Arc::clone(&dc),
        events: Arc::clone(&events),
    });

    let open_events = Arc::clone(&events);
    dc.on_open(Box::new(move || {
        let events = Arc::clone(&open_events);
        Box::pin(async move {
            debug!(target: "rendezvous::native", track = events.track.name(), "data channel open");
            (events.sink)(NativeEvent::TrackPaired(RemoteTrack::Data(Arc::clone(&events.track))));
            events.transition(DataChannelState::Open);
        })
    }));

    let message_track = Arc::clone(&track);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        message_track.deliver_event(DataChannelEvent::Message {
            binary: !msg.is_string,
            data: &msg.data,
        });
        Box::pin(async {})
    }));

    let close_events = Arc::clone(&events);
    dc.on_close(Box::new(move || {
        close_events.transition(DataChannelState::Closed);
        (close_events.sink)(NativeEvent::TrackUnpaired(RemoteTrack::Data(Arc::clone(
            &close_events.track,
        ))));
        Box::pin(async {})
    }));

    dc.on_error(Box::new(move |err: webrtc::error::Error| {
        warn!(target: "rendezvous::native", error = %err, "data channel error");
        Box::pin(async {})
    }));

    dc.set_buffered_amount_low_threshold(BUFFERED_LOW_THRESHOLD).await;
    let low_events = Arc::clone(&events);
    let low_channel: Weak<RTCDataChannel> = Arc::downgrade(&dc);
    dc.on_buffered_amount_low(Box::new(move || {
        let events = Arc::clone(&low_events);
        let channel = low_channel.clone();
        Box::pin(async move {
            if let Some(dc) = channel.upgrade() {
                events.buffering(dc.buffered_amount().await);
            }
        })
    }))
    .await;

    // A channel announced by the remote may already be past connecting.
    if let Some(state) = map_channel_state(dc.ready_state()) {
        if state != DataChannelState::Open {
            events.transition(state);
        }
    }
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate::new(
        init.candidate,
        init.sdp_mid.unwrap_or_default(),
        u32::from(init.sdp_mline_index.unwrap_or(0)),
    )
}

fn to_candidate_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: Some(candidate.sdp_mid).filter(|mid| !mid.is_empty()),
        sdp_mline_index: u16::try_from(candidate.mline_index).ok(),
        username_fragment: None,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    Some(match state {
        RTCIceConnectionState::New => IceConnectionState::New,
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        RTCIceConnectionState::Unspecified => return None,
    })
}

fn map_channel_state(state: RTCDataChannelState) -> Option<DataChannelState> {
    match state {
        RTCDataChannelState::Open => Some(DataChannelState::Open),
        RTCDataChannelState::Closing => Some(DataChannelState::Closing),
        RTCDataChannelState::Closed => Some(DataChannelState::Closed),
        RTCDataChannelState::Connecting | RTCDataChannelState::Unspecified => None,
    }
}

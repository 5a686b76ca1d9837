#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use rendezvous::media::DataTrack;
use rendezvous::native::{NativeEvent, NativeEventSink, NativePeer};
use rendezvous::session::{PeerRole, RoundToken, SessionOptions, SignalingSession};
use rendezvous::transport::SignalTransport;
use rendezvous::{IceCandidate, SdpType, SessionDescription};
use tokio::runtime::Handle;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

pub fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

pub fn options(role: PeerRole, local: &str, remote: &str) -> SessionOptions {
    SessionOptions {
        role,
        local_peer: local.to_string(),
        remote_peer: remote.to_string(),
        poll_interval: Duration::from_millis(5),
        settle_delay: Duration::from_millis(10),
        auto_renegotiate: false,
    }
}

pub async fn loopback_session(
    options: SessionOptions,
    transport: Arc<dyn SignalTransport>,
) -> (SignalingSession, Arc<LoopbackPeer>) {
    let peer = LoopbackPeer::new(&options.local_peer);
    let bound = Arc::clone(&peer);
    let session = SignalingSession::connect(options, transport, move |sink| async move {
        bound.bind(sink);
        Ok(bound as Arc<dyn NativePeer>)
    })
    .await
    .expect("session");
    (session, peer)
}

/// Polls `step` until it returns true, sleeping briefly between attempts.
pub async fn eventually(what: &str, mut step: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if step() {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Keep pumping for a while so late messages would have been handled.
pub async fn settle(mut step: impl FnMut()) {
    for _ in 0..40 {
        step();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Clone, Debug, Default)]
pub struct PeerLog {
    pub offers: usize,
    pub answers: usize,
    pub remote_descriptions: Vec<SdpType>,
    pub candidates: Vec<IceCandidate>,
    pub closed: bool,
}

/// Scripted engine: completes every request on a runtime task and treats the
/// link as up once an answer is settled on either side.
pub struct LoopbackPeer {
    name: String,
    sink: OnceLock<NativeEventSink>,
    runtime: Handle,
    data: Arc<DataTrack>,
    paired: AtomicBool,
    fail_next_local: AtomicBool,
    log: Mutex<PeerLog>,
}

impl LoopbackPeer {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            sink: OnceLock::new(),
            runtime: Handle::current(),
            data: DataTrack::new("rendezvous"),
            paired: AtomicBool::new(false),
            fail_next_local: AtomicBool::new(false),
            log: Mutex::new(PeerLog::default()),
        })
    }

    pub fn bind(&self, sink: NativeEventSink) {
        let _ = self.sink.set(sink);
    }

    /// Report an engine event directly, as an engine thread would.
    pub fn emit(&self, event: NativeEvent) {
        if let Some(sink) = self.sink.get() {
            sink(event);
        }
    }

    pub fn log(&self) -> PeerLog {
        self.log.lock().unwrap().clone()
    }

    pub fn data_track(&self) -> &Arc<DataTrack> {
        &self.data
    }

    pub fn fail_next_local_description(&self) {
        self.fail_next_local.store(true, Ordering::SeqCst);
    }

    pub fn local_candidate(&self) -> IceCandidate {
        IceCandidate::new(
            format!("candidate:{} 1 udp 2122260223 127.0.0.1 9 typ host", self.name),
            "0",
            0,
        )
    }

    fn sdp(&self, kind: &str) -> String {
        format!("v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns={}-{kind}\r\nt=0 0\r\n", self.name)
    }

    fn link_up(&self, events: &mut Vec<NativeEvent>) {
        events.push(NativeEvent::Connected);
        if !self.paired.swap(true, Ordering::SeqCst) {
            events.push(NativeEvent::TrackPaired(rendezvous::media::RemoteTrack::Data(
                Arc::clone(&self.data),
            )));
            events.push(NativeEvent::DataChannelStateChanged {
                track: Arc::clone(&self.data),
                state: rendezvous::media::DataChannelState::Open,
            });
        }
    }

    fn later(&self, events: Vec<NativeEvent>) {
        let Some(sink) = self.sink.get().cloned() else {
            return;
        };
        self.runtime.spawn(async move {
            tokio::task::yield_now().await;
            for event in events {
                sink(event);
            }
        });
    }

    fn local_description(&self, round: RoundToken, description: SessionDescription) {
        if self.fail_next_local.swap(false, Ordering::SeqCst) {
            self.later(vec![NativeEvent::LocalSdpFailed {
                round,
                reason: "scripted failure".into(),
            }]);
            return;
        }
        let is_answer = description.sdp_type == SdpType::Answer;
        let mut events = vec![
            NativeEvent::LocalSdpReady { round, description },
            NativeEvent::IceCandidateReady(self.local_candidate()),
        ];
        if is_answer {
            self.link_up(&mut events);
        }
        self.later(events);
    }
}

impl NativePeer for LoopbackPeer {
    fn create_offer(&self, round: RoundToken) {
        self.log.lock().unwrap().offers += 1;
        self.local_description(round, SessionDescription::offer(self.sdp("offer")));
    }

    fn create_answer(&self, round: RoundToken) {
        self.log.lock().unwrap().answers += 1;
        self.local_description(round, SessionDescription::answer(self.sdp("answer")));
    }

    fn set_remote_description(&self, round: RoundToken, description: SessionDescription) {
        let kind = description.sdp_type;
        self.log.lock().unwrap().remote_descriptions.push(kind);
        let mut events = vec![NativeEvent::RemoteDescriptionApplied {
            round,
            result: Ok(()),
        }];
        if kind == SdpType::Answer {
            self.link_up(&mut events);
        }
        self.later(events);
    }

    fn add_ice_candidate(&self, candidate: IceCandidate) {
        self.log.lock().unwrap().candidates.push(candidate);
    }

    fn close(&self) {
        self.log.lock().unwrap().closed = true;
    }
}

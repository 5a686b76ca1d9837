use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dispatch_queue::{DispatchHandle, Dispatcher};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use super::{Coordinator, Outcome, PeerRole, SessionNotice, SessionState};
use crate::config::Config;
use crate::media::{DataChannelEvent, MediaReceiver, MediaReceiverHandle};
use crate::native::{NativeError, NativeEvent, NativeEventSink, NativePeer};
use crate::transport::{SignalTransport, TransportPoller};

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub role: PeerRole,
    pub local_peer: String,
    pub remote_peer: String,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    /// Caller only: offer again after the connection drops.
    pub auto_renegotiate: bool,
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            role: config.role,
            local_peer: config.local_peer.clone(),
            remote_peer: config.remote_peer.clone(),
            poll_interval: config.poll_interval,
            settle_delay: config.settle_delay,
            auto_renegotiate: config.auto_renegotiate,
        }
    }
}

struct Restart {
    dispatch: DispatchHandle<SessionCore>,
    runtime: Handle,
    delay: Duration,
}

impl Restart {
    fn schedule(&self) {
        schedule_start(&self.dispatch, &self.runtime, self.delay);
    }
}

/// Everything the application thread owns; dispatched actions run against it.
pub struct SessionCore {
    pub coordinator: Coordinator,
    pub media: MediaReceiver,
    restart: Option<Restart>,
}

impl SessionCore {
    pub fn handle_native(&mut self, event: NativeEvent) -> Outcome {
        trace!(target: "rendezvous::session", event = event.label(), "native event");
        match event {
            NativeEvent::LocalSdpReady { round, description } => {
                self.coordinator.on_local_description_ready(round, description)
            }
            NativeEvent::LocalSdpFailed { round, reason } => {
                self.coordinator.on_local_description_failed(round, reason)
            }
            NativeEvent::RemoteDescriptionApplied { round, result } => {
                self.coordinator.on_remote_description_applied(round, result)
            }
            NativeEvent::IceCandidateReady(candidate) => {
                self.coordinator.on_ice_candidate_ready(candidate)
            }
            NativeEvent::Connected => self.coordinator.on_connected(),
            NativeEvent::IceStateChanged(state) => {
                let before = self.coordinator.round();
                let outcome = self.coordinator.on_ice_state_changed(state);
                if self.coordinator.round() != before {
                    if let Some(restart) = &self.restart {
                        debug!(target: "rendezvous::session", "scheduling renegotiation");
                        restart.schedule();
                    }
                }
                outcome
            }
            NativeEvent::TrackPaired(track) => {
                self.media.on_track_paired(track);
                Outcome::Applied
            }
            NativeEvent::TrackUnpaired(track) => {
                self.media.on_track_unpaired(track);
                Outcome::Applied
            }
            NativeEvent::DataChannelStateChanged { track, state } => {
                track.deliver_event(DataChannelEvent::State(state));
                Outcome::Applied
            }
        }
    }
}

impl AsMut<MediaReceiver> for SessionCore {
    fn as_mut(&mut self) -> &mut MediaReceiver {
        &mut self.media
    }
}

/// One signaling session: poller, coordinator, native peer and media state,
/// joined by a dispatcher drained on the thread that owns this value.
pub struct SignalingSession {
    dispatcher: Dispatcher<SessionCore>,
    core: SessionCore,
    poller: Arc<TransportPoller>,
    native: Arc<dyn NativePeer>,
    options: SessionOptions,
    runtime: Handle,
    started: bool,
    closed: bool,
}

impl SignalingSession {
    /// Build the session. `native` receives the event sink the engine must report through.
    pub async fn connect<F, Fut>(
        options: SessionOptions,
        transport: Arc<dyn SignalTransport>,
        native: F,
    ) -> Result<Self, NativeError>
    where
        F: FnOnce(NativeEventSink) -> Fut,
        Fut: Future<Output = Result<Arc<dyn NativePeer>, NativeError>>,
    {
        let runtime = Handle::current();
        let dispatcher = Dispatcher::new();
        let dispatch = dispatcher.handle();

        let native = native(event_sink(dispatch.clone())).await?;

        let poller = TransportPoller::new(
            transport,
            options.local_peer.clone(),
            options.remote_peer.clone(),
            runtime.clone(),
        );
        let inbound = dispatch.clone();
        poller.set_handler(move |decoded| {
            inbound.enqueue(move |core: &mut SessionCore| {
                core.coordinator.on_wire_message(decoded);
            });
        });

        let coordinator = Coordinator::new(options.role, Arc::clone(&native), poller.clone());
        let restarts = options.auto_renegotiate && options.role == PeerRole::Caller;
        let restart = restarts.then(|| Restart {
            dispatch,
            runtime: runtime.clone(),
            delay: options.settle_delay,
        });

        Ok(Self {
            dispatcher,
            core: SessionCore {
                coordinator,
                media: MediaReceiver::new(),
                restart,
            },
            poller,
            native,
            options,
            runtime,
            started: false,
            closed: false,
        })
    }

    /// Begin polling; a caller also schedules its offer after the settle delay.
    pub fn start(&mut self) {
        if self.started || self.closed {
            return;
        }
        self.started = true;
        self.poller.mark_ready();
        self.poller.start_polling(self.options.poll_interval);
        info!(
            target: "rendezvous::session",
            role = %self.options.role,
            local = %self.options.local_peer,
            remote = %self.options.remote_peer,
            "session started"
        );
        if self.options.role == PeerRole::Caller {
            schedule_start(
                &self.dispatcher.handle(),
                &self.runtime,
                self.options.settle_delay,
            );
        }
    }

    /// Run queued work on the calling thread. Returns the number of actions run.
    pub fn pump(&mut self) -> usize {
        self.dispatcher.drain(&mut self.core)
    }

    pub fn state(&self) -> SessionState {
        self.core.coordinator.state()
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.core.coordinator
    }

    pub fn media(&self) -> &MediaReceiver {
        &self.core.media
    }

    pub fn media_mut(&mut self) -> &mut MediaReceiver {
        &mut self.core.media
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.core.coordinator.subscribe()
    }

    pub fn poller(&self) -> &Arc<TransportPoller> {
        &self.poller
    }

    /// Producer handle for marshaling work onto this session's thread.
    pub fn dispatch_handle(&self) -> DispatchHandle<SessionCore> {
        self.dispatcher.handle()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.poller.stop_polling();
        self.dispatcher.close();
        self.core.media.clear();
        self.core.coordinator.close();
        self.native.close();
        info!(target: "rendezvous::session", "session shut down");
    }
}

impl Drop for SignalingSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event_sink(dispatch: DispatchHandle<SessionCore>) -> NativeEventSink {
    let media = MediaReceiverHandle::new(dispatch.clone());
    Arc::new(move |event: NativeEvent| {
        let label = event.label();
        let queued = match event {
            NativeEvent::TrackPaired(track) => media.on_track_paired(track),
            NativeEvent::TrackUnpaired(track) => media.on_track_unpaired(track),
            event => dispatch.enqueue(move |core: &mut SessionCore| {
                core.handle_native(event);
            }),
        };
        if !queued {
            trace!(target: "rendezvous::session", event = label, "event after teardown dropped");
        }
    })
}

fn schedule_start(dispatch: &DispatchHandle<SessionCore>, runtime: &Handle, delay: Duration) {
    let dispatch = dispatch.clone();
    runtime.spawn(async move {
        tokio::time::sleep(delay).await;
        dispatch.enqueue(|core: &mut SessionCore| {
            core.coordinator.start();
        });
    });
}

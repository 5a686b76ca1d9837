use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use signal_wire::{Decoded, SignalMessage};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use super::{SignalOutbox, SignalTransport, TransportError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    /// Not yet marked ready; no `get` is issued.
    Disabled,
    Idle,
    /// A `get` is outstanding; no other may start until it completes.
    InFlight,
}

pub type MessageHandler = Arc<dyn Fn(Decoded) + Send + Sync>;
pub type PostCompletion = oneshot::Receiver<Result<(), TransportError>>;

struct Outbound {
    label: &'static str,
    body: String,
    done: oneshot::Sender<Result<(), TransportError>>,
}

/// Returns the poller to idle when the `get` finishes or its future is dropped.
struct Flight<'a> {
    state: &'a Mutex<PollState>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if *state == PollState::InFlight {
            *state = PollState::Idle;
        }
    }
}

/// Paces inbound polling for the local peer and serializes outbound posts to
/// the remote peer.
pub struct TransportPoller {
    transport: Arc<dyn SignalTransport>,
    local_peer: String,
    remote_peer: String,
    runtime: Handle,
    state: Mutex<PollState>,
    ready: watch::Sender<bool>,
    handler: Mutex<Option<MessageHandler>>,
    poll_loop: Mutex<Option<watch::Sender<bool>>>,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportPoller {
    pub fn new(
        transport: Arc<dyn SignalTransport>,
        local_peer: impl Into<String>,
        remote_peer: impl Into<String>,
        runtime: Handle,
    ) -> Arc<Self> {
        let remote_peer = remote_peer.into();
        let (outbound, queue) = mpsc::unbounded_channel();
        runtime.spawn(run_writer(Arc::clone(&transport), remote_peer.clone(), queue));
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            transport,
            local_peer: local_peer.into(),
            remote_peer,
            runtime,
            state: Mutex::new(PollState::Disabled),
            ready,
            handler: Mutex::new(None),
            poll_loop: Mutex::new(None),
            outbound,
        })
    }

    pub fn local_peer(&self) -> &str {
        &self.local_peer
    }

    pub fn remote_peer(&self) -> &str {
        &self.remote_peer
    }

    pub fn state(&self) -> PollState {
        *self.state.lock()
    }

    pub fn set_handler(&self, handler: impl Fn(Decoded) + Send + Sync + 'static) {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Open the readiness gate. A loop started earlier begins polling now.
    pub fn mark_ready(&self) {
        {
            let mut state = self.state.lock();
            if *state == PollState::Disabled {
                *state = PollState::Idle;
            }
        }
        self.ready.send_replace(true);
        debug!(target: "rendezvous::poller", peer = %self.local_peer, "poller ready");
    }

    pub fn is_polling(&self) -> bool {
        self.poll_loop.lock().is_some()
    }

    /// Spawn the poll loop. Returns `false` (and does nothing) if one is running.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) -> bool {
        let mut slot = self.poll_loop.lock();
        if slot.is_some() {
            debug!(target: "rendezvous::poller", "poll loop already running");
            return false;
        }
        let (stop, stop_rx) = watch::channel(false);
        *slot = Some(stop);
        let poller = Arc::clone(self);
        self.runtime.spawn(async move { poller.run(interval, stop_rx).await });
        true
    }

    /// Ask the loop to exit. An outstanding `get` still completes and is delivered.
    pub fn stop_polling(&self) {
        if let Some(stop) = self.poll_loop.lock().take() {
            let _ = stop.send(true);
        }
    }

    /// Issue one `get` if idle. Returns whether a message reached the handler.
    pub async fn poll_once(&self) -> Result<bool, TransportError> {
        let Some(flight) = self.begin_flight() else {
            return Ok(false);
        };
        let result = self.transport.get(&self.local_peer).await;
        drop(flight);

        let Some(body) = result? else {
            return Ok(false);
        };
        let decoded = match signal_wire::decode(&body) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(target: "rendezvous::poller", error = %err, "dropping undecodable message");
                return Ok(false);
            }
        };
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(decoded);
                Ok(true)
            }
            None => {
                debug!(target: "rendezvous::poller", "no handler registered; dropping message");
                Ok(false)
            }
        }
    }

    /// Queue `message` for the remote peer. Posts go out in call order.
    pub fn post(&self, message: SignalMessage) -> PostCompletion {
        let (done, completion) = oneshot::channel();
        let label = message.label();
        let body = match signal_wire::encode(&message) {
            Ok(body) => body,
            Err(err) => {
                warn!(target: "rendezvous::poller", message = label, error = %err, "not posted");
                let _ = done.send(Err(err.into()));
                return completion;
            }
        };
        let outbound = Outbound { label, body, done };
        if let Err(mpsc::error::SendError(outbound)) = self.outbound.send(outbound) {
            warn!(target: "rendezvous::poller", message = outbound.label, "outbound queue closed");
            let _ = outbound.done.send(Err(TransportError::Closed));
        }
        completion
    }

    fn begin_flight(&self) -> Option<Flight<'_>> {
        let mut state = self.state.lock();
        match *state {
            PollState::Idle => {
                *state = PollState::InFlight;
                Some(Flight { state: &self.state })
            }
            PollState::Disabled | PollState::InFlight => None,
        }
    }

    async fn run(self: Arc<Self>, interval: Duration, mut stop: watch::Receiver<bool>) {
        let mut ready = self.ready.subscribe();
        tokio::select! {
            opened = wait_ready(&mut ready) => {
                if !opened {
                    return;
                }
            }
            _ = stopped(&mut stop) => return,
        }
        trace!(
            target: "rendezvous::poller",
            interval_ms = interval.as_millis() as u64,
            "poll loop start"
        );

        loop {
            if *stop.borrow() {
                break;
            }
            if let Err(err) = self.poll_once().await {
                warn!(
                    target: "rendezvous::poller",
                    peer = %self.local_peer,
                    error = %err,
                    "poll failed"
                );
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stopped(&mut stop) => break,
            }
        }
        debug!(target: "rendezvous::poller", peer = %self.local_peer, "poll loop stopped");
    }
}

impl SignalOutbox for TransportPoller {
    fn send(&self, message: SignalMessage) {
        drop(self.post(message));
    }
}

impl fmt::Debug for TransportPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportPoller")
            .field("local_peer", &self.local_peer)
            .field("remote_peer", &self.remote_peer)
            .field("state", &self.state())
            .field("polling", &self.is_polling())
            .finish()
    }
}

async fn wait_ready(ready: &mut watch::Receiver<bool>) -> bool {
    ready.wait_for(|ready| *ready).await.is_ok()
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    // A dropped sender also ends the loop.
    let _ = stop.wait_for(|stop| *stop).await;
}

async fn run_writer(
    transport: Arc<dyn SignalTransport>,
    remote_peer: String,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = queue.recv().await {
        let result = transport.post(&remote_peer, outbound.body).await;
        match &result {
            Ok(()) => {
                trace!(
                    target: "rendezvous::poller",
                    message = outbound.label,
                    peer = %remote_peer,
                    "posted"
                );
            }
            Err(err) => {
                warn!(
                    target: "rendezvous::poller",
                    message = outbound.label,
                    peer = %remote_peer,
                    error = %err,
                    "failed to post signaling message"
                );
            }
        }
        let _ = outbound.done.send(result);
    }
}

use std::collections::HashMap;
use std::fmt;

use dispatch_queue::DispatchHandle;
use tracing::{debug, trace};

use super::tracks::{RemoteTrack, TrackKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Started,
    Stopped,
}

/// Application-visible state of one paired track.
#[derive(Debug, Default)]
pub struct TrackSlot {
    track: Option<RemoteTrack>,
    live: bool,
    streaming: bool,
}

impl TrackSlot {
    pub fn track(&self) -> Option<&RemoteTrack> {
        self.track.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}

pub type StreamListener = Box<dyn FnMut(StreamEvent, &TrackSlot)>;

/// Owns paired remote tracks on the application thread.
///
/// Pairing runs: track set, live, `Started` notification, streaming. Unpairing
/// mirrors it: not streaming, not live, `Stopped` notification (the track is
/// still readable), then the track is detached and cleared.
#[derive(Default)]
pub struct MediaReceiver {
    slots: HashMap<String, TrackSlot>,
    listeners: Vec<StreamListener>,
}

impl MediaReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: impl FnMut(StreamEvent, &TrackSlot) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn slot(&self, name: &str) -> Option<&TrackSlot> {
        self.slots.get(name)
    }

    pub fn streaming(&self) -> impl Iterator<Item = &RemoteTrack> {
        self.slots
            .values()
            .filter(|slot| slot.streaming)
            .filter_map(TrackSlot::track)
    }

    pub fn streaming_count(&self, kind: TrackKind) -> usize {
        self.streaming().filter(|track| track.kind() == kind).count()
    }

    pub fn on_track_paired(&mut self, track: RemoteTrack) {
        let name = track.name().to_owned();
        if let Some(existing) = self.slots.get(&name).and_then(TrackSlot::track) {
            if existing.is_same(&track) {
                debug!(target: "rendezvous::media", track = %name, "track already paired");
                return;
            }
            let previous = existing.clone();
            self.on_track_unpaired(previous);
        }

        trace!(target: "rendezvous::media", track = %name, kind = ?track.kind(), "track paired");
        let slot = self.slots.entry(name).or_default();
        slot.track = Some(track);
        slot.live = true;
        notify(&mut self.listeners, StreamEvent::Started, slot);
        slot.streaming = true;
    }

    pub fn on_track_unpaired(&mut self, track: RemoteTrack) {
        let name = track.name();
        let Some(slot) = self.slots.get_mut(name) else {
            debug!(target: "rendezvous::media", track = %name, "unpairing unknown track");
            return;
        };
        if !slot.track.as_ref().is_some_and(|current| current.is_same(&track)) {
            debug!(target: "rendezvous::media", track = %name, "unpairing stale track");
            return;
        }

        trace!(target: "rendezvous::media", track = %name, "track unpaired");
        slot.streaming = false;
        slot.live = false;
        notify(&mut self.listeners, StreamEvent::Stopped, slot);
        if let Some(track) = slot.track.take() {
            track.detach();
        }
        self.slots.remove(name);
    }

    /// Unpair every track, e.g. on session teardown.
    pub fn clear(&mut self) {
        let tracks: Vec<RemoteTrack> = self
            .slots
            .values()
            .filter_map(|slot| slot.track.clone())
            .collect();
        for track in tracks {
            self.on_track_unpaired(track);
        }
    }
}

impl AsMut<MediaReceiver> for MediaReceiver {
    fn as_mut(&mut self) -> &mut MediaReceiver {
        self
    }
}

impl fmt::Debug for MediaReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaReceiver")
            .field("slots", &self.slots)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

fn notify(listeners: &mut [StreamListener], event: StreamEvent, slot: &TrackSlot) {
    for listener in listeners.iter_mut() {
        listener(event, slot);
    }
}

/// Thread-safe entry point for native pairing events.
///
/// Events are queued onto the owning thread's dispatcher and applied to the
/// [`MediaReceiver`] reachable from its context.
pub struct MediaReceiverHandle<C> {
    dispatch: DispatchHandle<C>,
}

impl<C: AsMut<MediaReceiver> + 'static> MediaReceiverHandle<C> {
    pub fn new(dispatch: DispatchHandle<C>) -> Self {
        Self { dispatch }
    }

    pub fn on_track_paired(&self, track: RemoteTrack) -> bool {
        self.dispatch
            .enqueue(move |context: &mut C| context.as_mut().on_track_paired(track))
    }

    pub fn on_track_unpaired(&self, track: RemoteTrack) -> bool {
        self.dispatch
            .enqueue(move |context: &mut C| context.as_mut().on_track_unpaired(track))
    }
}

impl<C> Clone for MediaReceiverHandle<C> {
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
        }
    }
}

//! Per-track observer registration.
//!
//! A track owns one [`ObserverSlot`]. The first callback set on the slot
//! creates an observer and registers it with the native source; clearing the
//! last callback unregisters it before the observer is released. Both steps
//! happen under the slot's mutex, so callers on any thread see a consistent
//! registration. Once a slot is detached it stays empty: later callbacks are
//! ignored.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// Receives native deliveries and routes them to the callbacks installed on it.
pub trait Observer: Default + Send + Sync + 'static {
    type Kind: Copy + fmt::Debug + Send;
    type Callback: Send + Sync;

    /// Replace (or clear, with `None`) the callback for one frame-encoding variant.
    fn install(&self, kind: Self::Kind, callback: Option<Self::Callback>);

    fn is_empty(&self) -> bool;
}

/// Native side of a track that fans deliveries out to registered sinks.
///
/// Implementations must linearize `remove_sink` against delivery: once it
/// returns, the removed sink is never invoked again.
pub trait SinkSource<O>: Send + Sync {
    fn add_sink(&self, sink: Arc<O>);
    fn remove_sink(&self, sink: &Arc<O>);
}

/// Scoped registration of an observer with a source.
pub(crate) struct Registration<O: Observer> {
    source: Arc<dyn SinkSource<O>>,
    observer: Arc<O>,
}

impl<O: Observer> Registration<O> {
    pub(crate) fn new(source: Arc<dyn SinkSource<O>>, observer: Arc<O>) -> Self {
        source.add_sink(Arc::clone(&observer));
        Self { source, observer }
    }

    pub(crate) fn observer(&self) -> &Arc<O> {
        &self.observer
    }
}

impl<O: Observer> Drop for Registration<O> {
    fn drop(&mut self) {
        // Unregister first; the observer Arc is released with the fields afterwards.
        self.source.remove_sink(&self.observer);
    }
}

struct SlotState<O: Observer> {
    registration: Option<Registration<O>>,
    detached: bool,
}

pub struct ObserverSlot<O: Observer> {
    track: String,
    source: Arc<dyn SinkSource<O>>,
    state: Mutex<SlotState<O>>,
}

impl<O: Observer> ObserverSlot<O> {
    pub fn new(track: impl Into<String>, source: Arc<dyn SinkSource<O>>) -> Self {
        Self {
            track: track.into(),
            source,
            state: Mutex::new(SlotState {
                registration: None,
                detached: false,
            }),
        }
    }

    /// Install or clear one callback. Callable from any thread.
    ///
    /// Callbacks must not call back into `set_callback` on the same track.
    pub fn set_callback(&self, kind: O::Kind, callback: Option<O::Callback>) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.detached {
            if callback.is_some() {
                debug!(
                    target: "rendezvous::media",
                    track = %self.track,
                    ?kind,
                    "ignoring callback on detached track"
                );
            }
            return;
        }
        match &state.registration {
            None => {
                if let Some(callback) = callback {
                    let observer = Arc::new(O::default());
                    observer.install(kind, Some(callback));
                    state.registration =
                        Some(Registration::new(Arc::clone(&self.source), observer));
                    trace!(
                        target: "rendezvous::media",
                        track = %self.track,
                        ?kind,
                        "observer registered"
                    );
                }
            }
            Some(current) => {
                current.observer().install(kind, callback);
                if current.observer().is_empty() {
                    // Unregisters while the slot is still locked.
                    state.registration = None;
                    trace!(
                        target: "rendezvous::media",
                        track = %self.track,
                        ?kind,
                        "observer released"
                    );
                }
            }
        }
    }

    /// Drop the observer and every callback for good, e.g. when the track goes away.
    pub fn detach(&self) {
        let mut state = self.state.lock();
        state.detached = true;
        if state.registration.take().is_some() {
            trace!(target: "rendezvous::media", track = %self.track, "observer detached");
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().registration.is_some()
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }
}

impl<O: Observer> Drop for ObserverSlot<O> {
    fn drop(&mut self) {
        self.state.get_mut().registration.take();
    }
}

impl<O: Observer> fmt::Debug for ObserverSlot<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverSlot")
            .field("track", &self.track)
            .field("registered", &self.is_registered())
            .finish()
    }
}

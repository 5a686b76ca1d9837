use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::observer::SinkSource;

/// Sink list for one native track.
///
/// Delivery runs under the same lock that `add_sink`/`remove_sink` take, which
/// is what makes removal a hard barrier for later deliveries.
pub struct FanoutSource<O> {
    sinks: Mutex<Vec<Arc<O>>>,
}

impl<O> FanoutSource<O> {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Invoke `f` on every registered sink, in registration order.
    pub fn deliver(&self, f: impl Fn(&O)) -> usize {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            f(sink);
        }
        sinks.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }

    pub fn sinks(&self) -> Vec<Arc<O>> {
        self.sinks.lock().clone()
    }
}

impl<O> Default for FanoutSource<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Send + Sync> SinkSource<O> for FanoutSource<O> {
    fn add_sink(&self, sink: Arc<O>) {
        let mut sinks = self.sinks.lock();
        if !sinks.iter().any(|existing| Arc::ptr_eq(existing, &sink)) {
            sinks.push(sink);
        }
    }

    fn remove_sink(&self, sink: &Arc<O>) {
        self.sinks.lock().retain(|existing| !Arc::ptr_eq(existing, sink));
    }
}

impl<O> fmt::Debug for FanoutSource<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FanoutSource")
            .field("sinks", &self.sink_count())
            .finish()
    }
}

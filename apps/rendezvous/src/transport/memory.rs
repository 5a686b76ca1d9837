use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SignalTransport, TransportError};

#[derive(Default)]
struct Mailboxes {
    queues: HashMap<String, VecDeque<String>>,
    closed: bool,
}

/// In-process rendezvous: one FIFO mailbox per peer id.
///
/// Clones share the same mailboxes, so two sessions in one process can talk
/// through a single instance.
#[derive(Clone, Default)]
pub struct MemoryRendezvous {
    inner: Arc<Mutex<Mailboxes>>,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self, peer_id: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(peer_id)
            .map_or(0, VecDeque::len)
    }

    /// Snapshot of a mailbox without consuming it.
    pub fn peek_all(&self, peer_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .queues
            .get(peer_id)
            .map(|queue| queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.queues.clear();
    }
}

#[async_trait]
impl SignalTransport for MemoryRendezvous {
    async fn post(&self, peer_id: &str, body: String) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        inner
            .queues
            .entry(peer_id.to_owned())
            .or_default()
            .push_back(body);
        Ok(())
    }

    async fn get(&self, peer_id: &str) -> Result<Option<String>, TransportError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TransportError::Closed);
        }
        Ok(inner.queues.get_mut(peer_id).and_then(VecDeque::pop_front))
    }
}

//! Single-consumer work queue that moves background-thread events onto an
//! owning thread.
//!
//! Producers on any thread hold a cloneable [`DispatchHandle`] and enqueue
//! closures. The [`Dispatcher`] itself is `!Send`: it stays on the thread that
//! created it, and only that thread can [`Dispatcher::drain`] the queue, so two
//! actions never run at the same time.

use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::trace;

/// A queued unit of work. It receives the context owned by the draining thread.
pub type Action<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

pub struct Dispatcher<C> {
    sender: Sender<Action<C>>,
    receiver: Receiver<Action<C>>,
    closed: Arc<AtomicBool>,
    _owner: PhantomData<Rc<()>>,
}

impl<C> Dispatcher<C> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            closed: Arc::new(AtomicBool::new(false)),
            _owner: PhantomData,
        }
    }

    pub fn handle(&self) -> DispatchHandle<C> {
        DispatchHandle {
            sender: self.sender.clone(),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Enqueue from the owning thread. Same semantics as [`DispatchHandle::enqueue`].
    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        push(&self.sender, &self.closed, Box::new(action))
    }

    /// Run every action that was queued when the drain started, oldest first.
    ///
    /// Actions enqueued while draining (including by the actions themselves)
    /// wait for the next call. Returns the number of actions executed.
    pub fn drain(&mut self, context: &mut C) -> usize {
        if self.is_closed() {
            return 0;
        }
        let queued = self.receiver.len();
        let mut executed = 0;
        while executed < queued {
            let Ok(action) = self.receiver.try_recv() else {
                break;
            };
            action(context);
            executed += 1;
        }
        executed
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Tear the queue down: queued work is discarded and later enqueues are dropped.
    pub fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut discarded = 0usize;
        while self.receiver.try_recv().is_ok() {
            discarded += 1;
        }
        trace!(target: "dispatch_queue", discarded, "dispatcher closed");
    }
}

impl<C> Default for Dispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Drop for Dispatcher<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Producer side of a [`Dispatcher`]; cheap to clone and safe to use from any thread.
pub struct DispatchHandle<C> {
    sender: Sender<Action<C>>,
    closed: Arc<AtomicBool>,
}

impl<C> DispatchHandle<C> {
    /// Queue `action` for the owning thread.
    ///
    /// Returns `false` when the dispatcher has been torn down; the action is
    /// dropped without running.
    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        push(&self.sender, &self.closed, Box::new(action))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<C> Clone for DispatchHandle<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

fn push<C>(sender: &Sender<Action<C>>, closed: &AtomicBool, action: Action<C>) -> bool {
    if closed.load(Ordering::Acquire) {
        trace!(target: "dispatch_queue", "dropping action after teardown");
        return false;
    }
    sender.send(action).is_ok()
}

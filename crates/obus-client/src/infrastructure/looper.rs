//! Single-consumer message channel between background tasks and the owner.
//!
//! # Why a looper? (for beginners)
//!
//! The client keeps its registry, pending calls and callbacks on one logical
//! owner.  Background tasks (the transport reader and writer) never touch that
//! state; they *post* messages through a cloneable [`Handler`] and the owner
//! drains them from its [`Looper`] in order.
//!
//! The looper keeps one sender of its own, so [`Looper::recv`] never observes
//! a closed channel while the looper is alive.

use tokio::sync::mpsc;

/// Receiving end of a message channel, owned by exactly one consumer.
#[derive(Debug)]
pub struct Looper<M> {
    tx: mpsc::UnboundedSender<M>,
    rx: mpsc::UnboundedReceiver<M>,
}

impl<M> Default for Looper<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Looper<M> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Returns a handle that posts into this looper.
    pub fn handler(&self) -> Handler<M> {
        Handler {
            tx: self.tx.clone(),
        }
    }

    /// Waits for the next message.
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }

    /// Returns the next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<M> {
        self.rx.try_recv().ok()
    }

    /// Drops every queued message and returns how many were discarded.
    pub fn drain(&mut self) -> usize {
        let mut count = 0;
        while self.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

/// Posting end of a [`Looper`].
#[derive(Debug)]
pub struct Handler<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for Handler<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> Handler<M> {
    /// Queues `msg`.  Returns `false` if the looper has been dropped.
    pub fn post(&self, msg: M) -> bool {
        self.tx.send(msg).is_ok()
    }
}

//! Subscriber handle.

use super::{Session, Shared};
use crate::acquisition::AcquisitionError;
use crate::reconstruction::ReconstructedFrame;
use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// One item of a subscription: a shared frame, or the error that ended the session.
pub type FrameResult = Result<Arc<ReconstructedFrame>, AcquisitionError>;

/// A consumer attached to a live acquisition session.
///
/// Frames arrive in acquisition order. The stream ends (`recv` returns
/// `None`) when the session completes; a session error is delivered as a
/// final `Err` item first. Dropping the subscription detaches it, and
/// dropping the last one tears the session down.
pub struct Subscription {
    id: u64,
    receiver: Receiver<FrameResult>,
    session: Arc<Session>,
    shared: Weak<Shared>,
}

impl Subscription {
    pub(super) fn new(
        id: u64,
        receiver: Receiver<FrameResult>,
        session: Arc<Session>,
        shared: Weak<Shared>,
    ) -> Self {
        Self {
            id,
            receiver,
            session,
            shared,
        }
    }

    /// Blocks until the next item, or returns `None` once the session has ended.
    pub fn recv(&self) -> Option<FrameResult> {
        self.receiver.recv().ok()
    }

    /// Like [`recv`](Self::recv), giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<FrameResult, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Returns the next item if one is already queued.
    pub fn try_recv(&self) -> Result<FrameResult, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Frames queued for this subscriber.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Identifier of the session this subscription is attached to.
    pub fn session_id(&self) -> u64 {
        self.session.id
    }

    /// Identifier of this subscriber within the publisher.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Iterator for Subscription {
    type Item = FrameResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("session", &self.session.id)
            .field("pending", &self.receiver.len())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let shared = self.shared.upgrade();
        // Lock order: publisher, then session subscribers
        let mut current = shared.as_ref().map(|shared| shared.current.lock());
        let remaining = self.session.detach(self.id);
        let live = current.as_ref().is_some_and(
            |current| matches!(&**current, Some(live) if Arc::ptr_eq(live, &self.session)),
        );

        tracing::debug!(
            session = self.session.id,
            subscriber = self.id,
            remaining,
            "Subscriber detached"
        );

        // Finished sessions no longer own the subscriber gauge
        if live {
            if let Some(metrics) = shared.as_ref().and_then(|s| s.settings.metrics.as_ref()) {
                metrics.set_subscribers(remaining);
            }
        }

        if remaining > 0 {
            return;
        }

        self.session.cancel.cancel();
        if let (true, Some(current)) = (live, current.as_mut()) {
            **current = None;
            tracing::info!(session = self.session.id, "Last subscriber left, stopping session");
        }
    }
}

//! Reply dispatching over a shared per-producer channel.
//!
//! Every request sent to a producer shares that producer's single reply
//! channel. A request waiting for its own fragments will therefore routinely
//! read fragments that belong to *other* outstanding requests. The
//! [`ReplyDispatcher`] handles this by routing every fragment it reads, its
//! own included, into the owning request's [`SequencedBuffer`], and only ever
//! handing a caller the next in-order fragment from its buffer.
//!
//! A request owns a buffer from [`ReplyDispatcher::begin`] until
//! [`ReplyDispatcher::finish_buffering`]. Fragments whose parent is not
//! outstanding (late replies to finished requests, ids never sent on this
//! handle) are dropped, so the number of buffers is bounded by the number of
//! outstanding requests.
//!
//! There is no background pump: fragments are drained from the channel only
//! while some request is actively polling.
//!
//! ## Structure
//!
//! - [`buffer`] - Per-request [`SequencedBuffer`].
//! - [`handle`] - [`ProducerHandle`], the request sender paired with its
//!   dispatcher.

pub mod buffer;
pub mod handle;


pub use buffer::SequencedBuffer;
pub use handle::ProducerHandle;

use crate::{
    common::{
        error::{Error, Result},
        types::{CorrelationId, PollPolicy},
    },
    proto::ReplyFragment,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::{
    sync::{Mutex as AsyncMutex, Notify, mpsc},
    time::timeout,
};

/// Routes fragments from one shared reply channel to per-request buffers.
pub struct ReplyDispatcher {
    replies: AsyncMutex<mpsc::Receiver<ReplyFragment>>,
    // Only outstanding requests own a buffer. Fragments for any other id
    // are dropped on arrival.
    buffers: Mutex<HashMap<CorrelationId, SequencedBuffer>>,
    // Signalled whenever a fragment is parked, so pollers whose fragment was
    // read by someone else resume without waiting out their interval.
    buffered: Notify,
    policy: PollPolicy,
}

impl ReplyDispatcher {
    pub fn new(replies: mpsc::Receiver<ReplyFragment>, policy: PollPolicy) -> Self {
        Self {
            replies: AsyncMutex::new(replies),
            buffers: Mutex::new(HashMap::new()),
            buffered: Notify::new(),
            policy,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Returns the next in-order fragment for `id`.
    ///
    /// Checks the request's buffer first; otherwise reads the shared channel
    /// one [`PollPolicy::interval`] at a time, buffering whatever arrives.
    ///
    /// # Errors
    ///
    /// - [`Error::ReplyTimeout`] after [`PollPolicy::max_attempts`] empty
    ///   intervals.
    /// - [`Error::ChannelError`] if the producer closed its reply channel.
    pub async fn next_reply(&self, id: CorrelationId) -> Result<ReplyFragment> {
        let mut attempts = 0;

        loop {
            // Register for wakeups before looking at the buffer so a fragment
            // parked in between is not missed.
            let notified = self.buffered.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(fragment) = self.try_take_next(id) {
                return Ok(fragment);
            }

            tokio::select! {
                biased;

                () = notified.as_mut() => {}
                polled = timeout(self.policy.interval, self.recv()) => match polled {
                    Ok(Some(fragment)) => self.route(fragment),
                    Ok(None) => {
                        return Err(Error::ChannelError {
                            context: "producer reply channel closed".to_string(),
                        });
                    }
                    Err(_elapsed) => {
                        attempts += 1;
                        tracing::trace!(%id, attempts, "no reply within poll interval");
                        if attempts >= self.policy.max_attempts {
                            return Err(Error::ReplyTimeout { attempts });
                        }
                    }
                },
            }
        }
    }

    /// Registers `id` as outstanding. Must be called before the request is
    /// sent, or early fragments for it are dropped.
    pub fn begin(&self, id: CorrelationId) {
        self.buffers.lock().entry(id).or_default();
    }

    /// Discards the buffer for `id`. Fragments for `id` that arrive later are
    /// dropped.
    pub fn finish_buffering(&self, id: CorrelationId) {
        self.buffers.lock().remove(&id);
    }

    /// Number of requests that currently own a buffer.
    pub fn buffered_requests(&self) -> usize {
        self.buffers.lock().len()
    }

    fn try_take_next(&self, id: CorrelationId) -> Option<ReplyFragment> {
        self.buffers
            .lock()
            .get_mut(&id)
            .and_then(SequencedBuffer::try_take_next)
    }

    async fn recv(&self) -> Option<ReplyFragment> {
        let mut replies = self.replies.lock().await;
        replies.recv().await
    }

    /// Parks `fragment` in its owner's buffer, even when the owner is the
    /// caller, so that ordering is always decided by the buffer.
    fn route(&self, fragment: ReplyFragment) {
        let Some(parent) = fragment.parent else {
            tracing::warn!(
                seq = ?fragment.seq(),
                "{}",
                Error::MalformedReply {
                    reason: "missing parent reference".to_string()
                }
            );
            return;
        };

        {
            let mut buffers = self.buffers.lock();
            let Some(buffer) = buffers.get_mut(&parent) else {
                tracing::debug!(%parent, seq = ?fragment.seq(), "dropping fragment for unknown or finished request");
                return;
            };
            buffer.accumulate(fragment);
        }

        self.buffered.notify_waiters();
    }
}

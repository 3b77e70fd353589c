use crate::proto::ReplyFragment;
use std::collections::BTreeMap;

/// Per-request buffer that restores fragment order.
///
/// Fragments may arrive on the shared reply channel in any order. They are
/// parked here by sequence number and released strictly in order, starting at
/// zero.
///
/// # Invariant
///
/// `pending` never holds an entry below `next_seq`.
#[derive(Debug, Default)]
pub struct SequencedBuffer {
    next_seq: u64,
    pending: BTreeMap<u64, ReplyFragment>,
}

impl SequencedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pops the fragment at the next expected sequence number, if it has
    /// arrived.
    pub fn try_take_next(&mut self) -> Option<ReplyFragment> {
        let fragment = self.pending.remove(&self.next_seq)?;
        self.next_seq += 1;
        Some(fragment)
    }

    /// Parks `fragment` until its turn comes.
    ///
    /// Late arrivals (below the next expected sequence number) are discarded,
    /// and a second fragment at an already-pending slot replaces the first.
    /// Fragments without a sequence number are dropped.
    pub fn accumulate(&mut self, fragment: ReplyFragment) {
        let Some(seq) = fragment.seq() else {
            tracing::warn!(
                parent = ?fragment.parent,
                "dropping reply fragment without a sequence number"
            );
            return;
        };

        if seq < self.next_seq {
            tracing::trace!(seq, next_seq = self.next_seq, "discarding superseded fragment");
            return;
        }

        self.pending.insert(seq, fragment);
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Number of fragments parked out of order.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

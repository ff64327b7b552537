//! Remote candidates that arrived before the remote description.

use std::collections::VecDeque;

use crate::engine::IceCandidate;

/// FIFO of remote candidates waiting for a remote description.
///
/// Only touched from the session actor, so no locking.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    buffered_total: u64,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.buffered_total += 1;
        self.pending.push_back(candidate);
    }

    /// Take everything buffered, in arrival order.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    /// Discard everything. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Candidates ever buffered.
    pub fn buffered_total(&self) -> u64 {
        self.buffered_total
    }
}

use super::SessionId;
use crate::protocol::IceCandidate;
use std::collections::HashMap;

/// Candidates received before a session's local endpoint exists
///
/// Not synchronized on its own; the registry keeps it under the same lock as
/// the session table.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queues: HashMap<SessionId, Vec<IceCandidate>>,
}

impl PendingCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id: &SessionId, candidate: IceCandidate) {
        self.queues.entry(id.clone()).or_default().push(candidate);
    }

    /// Take every queued candidate in arrival order and drop the entry
    pub fn drain(&mut self, id: &SessionId) -> Vec<IceCandidate> {
        self.queues.remove(id).unwrap_or_default()
    }

    /// Drop the entry; returns how many candidates were discarded
    pub fn discard(&mut self, id: &SessionId) -> usize {
        self.queues.remove(id).map_or(0, |queue| queue.len())
    }

    pub fn len(&self, id: &SessionId) -> usize {
        self.queues.get(id).map_or(0, Vec::len)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.queues.contains_key(id)
    }
}

//! Authoritative table of live sessions
//!
//! Every operation takes the lock once, checks and mutates, and returns; the
//! lock is never held across an await point. Callers that suspend between
//! two operations re-validate with their [`SessionToken`].

use super::{NegotiationState, PendingCandidates, Session, SessionId, SessionToken};
use crate::bridge::{BridgeHandle, BridgeState};
use crate::media::{MediaEndpoint, OwnedPipeline};
use crate::protocol::IceCandidate;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, trace};

/// Where a client candidate should go
pub enum CandidateRoute {
    /// Local endpoint is published; forward while holding `gate`
    Forward {
        endpoint: Arc<dyn MediaEndpoint>,
        gate: Arc<tokio::sync::Mutex<()>>,
        candidate: IceCandidate,
    },
    /// Queued until the local endpoint exists
    Queued,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub token: SessionToken,
    pub state: NegotiationState,
    pub pipeline_id: Option<String>,
    pub relay_port: Option<u16>,
    pub bridge_pid: Option<u32>,
    pub bridge_state: Option<BridgeState>,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            token: session.token,
            state: session.state,
            pipeline_id: session.pipeline.as_ref().map(|pipeline| pipeline.id().to_string()),
            relay_port: session.relay_port,
            bridge_pid: session.bridge.as_ref().and_then(BridgeHandle::pid),
            bridge_state: session.bridge.as_ref().map(BridgeHandle::state),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<SessionId, Session>,
    pending: PendingCandidates,
    next_token: u64,
}

impl RegistryInner {
    fn current_mut(&mut self, id: &SessionId, token: SessionToken) -> Result<&mut Session> {
        match self.sessions.get_mut(id) {
            Some(session) if session.token == token => Ok(session),
            _ => Err(Error::SessionState(id.to_string())),
        }
    }
}

fn transition(session: &mut Session, to: NegotiationState) -> Result<()> {
    if !session.state.can_advance_to(to) {
        return Err(Error::SessionState(format!(
            "{} cannot move from {} to {}",
            session.id, session.state, to
        )));
    }
    trace!(session_id = %session.id, from = %session.state, to = %to, "Session transition");
    session.state = to;
    Ok(())
}

/// Session table plus the pending-candidate queue, under one lock
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an `Idle` entry for a negotiation that is about to start
    ///
    /// Returns the new generation token and any session it displaced. The
    /// caller owns the displaced session and must release its pipeline.
    pub fn reserve(&self, id: SessionId) -> (SessionToken, Option<Session>) {
        let mut inner = self.inner.lock();
        inner.next_token += 1;
        let token = SessionToken(inner.next_token);
        let displaced = inner
            .sessions
            .insert(id.clone(), Session::new(id.clone(), token));
        debug!(session_id = %id, displaced = displaced.is_some(), "Session reserved");
        (token, displaced)
    }

    /// Record the pipeline created for a reserved session (`PipelineCreated`)
    ///
    /// Fails if the reservation was removed or displaced meanwhile; the
    /// caller still owns `pipeline` then and must release it.
    pub fn attach_pipeline(
        &self,
        id: &SessionId,
        token: SessionToken,
        pipeline: Arc<OwnedPipeline>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let session = inner.current_mut(id, token)?;
        transition(session, NegotiationState::PipelineCreated)?;
        session.pipeline = Some(pipeline);
        Ok(())
    }

    pub fn get(&self, id: &SessionId) -> Option<SessionInfo> {
        self.inner.lock().sessions.get(id).map(SessionInfo::from)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    /// Whether `token` still names the live entry for `id`
    pub fn is_current(&self, id: &SessionId, token: SessionToken) -> bool {
        self.inner
            .lock()
            .sessions
            .get(id)
            .is_some_and(|session| session.token == token)
    }

    /// Remove the entry for `id`, whatever its generation
    ///
    /// Queued candidates are left alone; see [`discard_pending`](Self::discard_pending).
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        let mut session = self.inner.lock().sessions.remove(id)?;
        session.state = NegotiationState::Released;
        Some(session)
    }

    /// Remove the entry only if it is still generation `token`
    pub fn remove_if_current(&self, id: &SessionId, token: SessionToken) -> Option<Session> {
        let mut inner = self.inner.lock();
        if inner.sessions.get(id)?.token != token {
            return None;
        }
        let mut session = inner.sessions.remove(id)?;
        session.state = NegotiationState::Released;
        Some(session)
    }

    /// Move a session to `to`, which must be its next state
    pub fn advance(&self, id: &SessionId, token: SessionToken, to: NegotiationState) -> Result<()> {
        let mut inner = self.inner.lock();
        transition(inner.current_mut(id, token)?, to)
    }

    /// Record both endpoints (`EndpointsCreated`)
    ///
    /// The local endpoint stays invisible to the candidate path until
    /// [`publish_local_endpoint`](Self::publish_local_endpoint).
    pub fn attach_endpoints(
        &self,
        id: &SessionId,
        token: SessionToken,
        local: Arc<dyn MediaEndpoint>,
        relay: Arc<dyn MediaEndpoint>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let session = inner.current_mut(id, token)?;
        transition(session, NegotiationState::EndpointsCreated)?;
        session.local_endpoint = Some(local);
        session.relay_endpoint = Some(relay);
        Ok(())
    }

    /// Make the local endpoint visible and take the queued candidates
    /// (`CandidatesDrained`)
    ///
    /// Returns the queue contents with the session's ICE gate already held,
    /// so live candidates routed from now on wait until the caller has
    /// forwarded the queued ones and dropped the guard.
    pub fn publish_local_endpoint(
        &self,
        id: &SessionId,
        token: SessionToken,
    ) -> Result<(Vec<IceCandidate>, OwnedMutexGuard<()>)> {
        let mut inner = self.inner.lock();
        let session = inner.current_mut(id, token)?;

        let guard = Arc::clone(&session.ice_gate)
            .try_lock_owned()
            .map_err(|_| Error::SessionState(format!("{} candidate gate busy", id)))?;
        transition(session, NegotiationState::CandidatesDrained)?;

        let queued = inner.pending.drain(id);
        debug!(session_id = %id, queued = queued.len(), "Local endpoint published");
        Ok((queued, guard))
    }

    /// Decide, atomically with publication, where a client candidate goes
    pub fn route_candidate(&self, id: &SessionId, candidate: IceCandidate) -> CandidateRoute {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get(id) {
            if let (true, Some(endpoint)) = (session.state.has_local_endpoint(), &session.local_endpoint) {
                return CandidateRoute::Forward {
                    endpoint: Arc::clone(endpoint),
                    gate: Arc::clone(&session.ice_gate),
                    candidate,
                };
            }
        }
        inner.pending.push(id, candidate);
        CandidateRoute::Queued
    }

    /// Record the relay port (`PortAllocated`)
    pub fn assign_port(&self, id: &SessionId, token: SessionToken, port: u16) -> Result<()> {
        let mut inner = self.inner.lock();
        let session = inner.current_mut(id, token)?;
        transition(session, NegotiationState::PortAllocated)?;
        session.relay_port = Some(port);
        Ok(())
    }

    /// Relay endpoint of a session that is still current
    pub fn relay_endpoint(&self, id: &SessionId, token: SessionToken) -> Result<Arc<dyn MediaEndpoint>> {
        let mut inner = self.inner.lock();
        let session = inner.current_mut(id, token)?;
        session
            .relay_endpoint
            .clone()
            .ok_or_else(|| Error::SessionState(format!("{} has no relay endpoint", id)))
    }

    /// Attach a spawned relay process (`Bridging`)
    ///
    /// Hands the process back if the session is gone, so the caller can
    /// terminate it.
    pub fn attach_bridge(
        &self,
        id: &SessionId,
        token: SessionToken,
        bridge: BridgeHandle,
    ) -> std::result::Result<(), BridgeHandle> {
        let mut inner = self.inner.lock();
        let Ok(session) = inner.current_mut(id, token) else {
            return Err(bridge);
        };
        if transition(session, NegotiationState::Bridging).is_err() {
            return Err(bridge);
        }
        session.bridge = Some(bridge);
        Ok(())
    }

    /// Drop queued candidates for `id`; returns how many were discarded
    pub fn discard_pending(&self, id: &SessionId) -> usize {
        self.inner.lock().pending.discard(id)
    }

    pub fn pending_len(&self, id: &SessionId) -> usize {
        self.inner.lock().pending.len(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().sessions.is_empty()
    }
}

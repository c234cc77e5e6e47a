//! Session identity, negotiation state and the session registry

mod candidates;
mod registry;

pub use candidates::PendingCandidates;
pub use registry::{CandidateRoute, SessionInfo, SessionRegistry};

use crate::bridge::BridgeHandle;
use crate::media::{MediaEndpoint, OwnedPipeline};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque per-connection session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation of a registry entry
///
/// Successive sessions under the same id get distinct tokens, so a
/// negotiation can tell whether the entry it registered is still the live
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken(pub(crate) u64);

/// Negotiation progress of a session
///
/// States advance strictly in declaration order; `Released` is reachable
/// from anywhere and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NegotiationState {
    Idle,
    PipelineCreated,
    EndpointsCreated,
    CandidatesDrained,
    EndpointsConnected,
    OfferProcessed,
    PortAllocated,
    RelayNegotiated,
    Bridging,
    Released,
}

impl NegotiationState {
    /// Next state on the success path
    pub fn next(self) -> Option<Self> {
        use NegotiationState::*;
        match self {
            Idle => Some(PipelineCreated),
            PipelineCreated => Some(EndpointsCreated),
            EndpointsCreated => Some(CandidatesDrained),
            CandidatesDrained => Some(EndpointsConnected),
            EndpointsConnected => Some(OfferProcessed),
            OfferProcessed => Some(PortAllocated),
            PortAllocated => Some(RelayNegotiated),
            RelayNegotiated => Some(Bridging),
            Bridging | Released => None,
        }
    }

    /// Whether `to` is a legal transition from this state
    pub fn can_advance_to(self, to: Self) -> bool {
        match to {
            NegotiationState::Released => self != NegotiationState::Released,
            _ => self.next() == Some(to),
        }
    }

    /// Whether live candidates go straight to the local endpoint
    pub fn has_local_endpoint(self) -> bool {
        self >= NegotiationState::CandidatesDrained && self != NegotiationState::Released
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A registry entry and the resources it owns
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) token: SessionToken,
    pub(crate) state: NegotiationState,
    pub(crate) pipeline: Option<Arc<OwnedPipeline>>,
    pub(crate) local_endpoint: Option<Arc<dyn MediaEndpoint>>,
    pub(crate) relay_endpoint: Option<Arc<dyn MediaEndpoint>>,
    pub(crate) relay_port: Option<u16>,
    pub(crate) bridge: Option<BridgeHandle>,
    /// Serializes candidate forwarding to the local endpoint
    pub(crate) ice_gate: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    pub(crate) fn new(id: SessionId, token: SessionToken) -> Self {
        Self {
            id,
            token,
            state: NegotiationState::Idle,
            pipeline: None,
            local_endpoint: None,
            relay_endpoint: None,
            relay_port: None,
            bridge: None,
            ice_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Pipeline, once the media server has created it
    pub fn pipeline(&self) -> Option<&Arc<OwnedPipeline>> {
        self.pipeline.as_ref()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("token", &self.token)
            .field("state", &self.state)
            .field("pipeline", &self.pipeline)
            .field("relay_port", &self.relay_port)
            .field("bridge", &self.bridge)
            .finish()
    }
}

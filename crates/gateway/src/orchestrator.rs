//! Negotiation orchestrator
//!
//! Drives one session from an SDP offer to a running relay:
//!
//! ```text
//! Idle -> PipelineCreated -> EndpointsCreated -> CandidatesDrained
//!      -> EndpointsConnected -> OfferProcessed -> PortAllocated
//!      -> RelayNegotiated -> Bridging            (Released from anywhere)
//! ```
//!
//! The registry entry is reserved before the media server is contacted, and
//! every later stage goes through the registry with the session's generation
//! token. A `stop` or a newer `start` removes the entry without waiting for
//! in-flight calls; the next registry operation then fails with
//! [`Error::SessionState`] and the negotiation unwinds.

use crate::bridge::BridgeSupervisor;
use crate::config::GatewayConfig;
use crate::media::kurento::KurentoConnector;
use crate::media::{EndpointKind, IceCandidateStream, MediaServerConnector, MediaServerHandle, OwnedPipeline};
use crate::ports::PortAllocator;
use crate::protocol::{ClientChannel, IceCandidate, ServerMessage};
use crate::sdp::RelayDescriptor;
use crate::session::{CandidateRoute, NegotiationState, Session, SessionId, SessionRegistry, SessionToken};
use crate::{Error, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Media pipeline orchestrator shared by every client connection
pub struct Orchestrator {
    media: MediaServerHandle,
    registry: Arc<SessionRegistry>,
    ports: Arc<PortAllocator>,
    bridges: BridgeSupervisor,
    relay_address: IpAddr,
}

impl Orchestrator {
    /// Orchestrator talking to the media server through `connector`
    pub fn new(config: &GatewayConfig, connector: Arc<dyn MediaServerConnector>) -> Self {
        Self {
            media: MediaServerHandle::new(connector),
            registry: Arc::new(SessionRegistry::new()),
            ports: Arc::new(PortAllocator::new(config.relay.base_port)),
            bridges: BridgeSupervisor::new(config.relay.clone()),
            relay_address: config.relay.address,
        }
    }

    /// Orchestrator for the Kurento media server named in `config`
    pub fn from_config(config: &GatewayConfig) -> Self {
        let connector = KurentoConnector::new(
            config.media_server.url.clone(),
            config.media_server.ping_interval_secs,
        );
        Self::new(config, Arc::new(connector))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn ports(&self) -> &Arc<PortAllocator> {
        &self.ports
    }

    /// Negotiate a session for `id` and return the SDP answer
    pub async fn start(&self, id: &SessionId, offer: &str, channel: ClientChannel) -> Result<String> {
        let reservation = self.reserve(id);
        self.start_reserved(id, reservation, offer, channel).await
    }

    /// Register `id` as negotiating, displacing any live session
    ///
    /// From this point a `stop` or teardown for `id` cancels the negotiation
    /// run by [`start_reserved`](Self::start_reserved).
    pub fn reserve(&self, id: &SessionId) -> Reservation {
        let (token, displaced) = self.registry.reserve(id.clone());
        Reservation { token, displaced }
    }

    /// Run the negotiation for a reservation made by [`reserve`](Self::reserve)
    ///
    /// A session displaced by the reservation is released first. Once the
    /// pipeline exists, any failure releases it before returning.
    pub async fn start_reserved(
        &self,
        id: &SessionId,
        reservation: Reservation,
        offer: &str,
        channel: ClientChannel,
    ) -> Result<String> {
        let Reservation { token, displaced } = reservation;
        if let Some(previous) = displaced {
            info!(session_id = %id, state = %previous.state(), "Releasing previous session before restart");
            release_session(&previous).await;
        }

        let pipeline = match self.create_pipeline(id, token).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                warn!(session_id = %id, "Negotiation failed: {}", e);
                self.abandon(id, token);
                return Err(e);
            }
        };

        match self.negotiate(id, token, &pipeline, offer, channel).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                warn!(session_id = %id, "Negotiation failed: {}", e);
                self.abandon(id, token);
                pipeline.release().await;
                Err(e)
            }
        }
    }

    /// Create the pipeline and attach it to the reservation
    async fn create_pipeline(&self, id: &SessionId, token: SessionToken) -> Result<Arc<OwnedPipeline>> {
        let server = self.media.acquire().await?;
        let pipeline = Arc::new(OwnedPipeline::new(server.create_pipeline().await?));
        info!(session_id = %id, pipeline_id = %pipeline.id(), "Pipeline created");

        if let Err(e) = self.registry.attach_pipeline(id, token, Arc::clone(&pipeline)) {
            pipeline.release().await;
            return Err(e);
        }
        Ok(pipeline)
    }

    /// Drop the entry for a failed negotiation, if it is still ours
    fn abandon(&self, id: &SessionId, token: SessionToken) {
        if self.registry.remove_if_current(id, token).is_some() {
            self.registry.discard_pending(id);
        }
    }

    async fn negotiate(
        &self,
        id: &SessionId,
        token: SessionToken,
        pipeline: &OwnedPipeline,
        offer: &str,
        channel: ClientChannel,
    ) -> Result<String> {
        let local = pipeline.create_endpoint(EndpointKind::WebRtc).await?;
        let relay = pipeline.create_endpoint(EndpointKind::Rtp).await?;
        self.registry
            .attach_endpoints(id, token, Arc::clone(&local), Arc::clone(&relay))?;

        let (queued, gate) = self.registry.publish_local_endpoint(id, token)?;
        if !queued.is_empty() {
            debug!(session_id = %id, count = queued.len(), "Forwarding queued candidates");
        }
        for candidate in &queued {
            if let Err(e) = local.add_ice_candidate(candidate).await {
                warn!(session_id = %id, "Failed to add queued candidate: {}", e);
            }
        }
        drop(gate);

        local.connect(relay.as_ref()).await?;
        self.registry
            .advance(id, token, NegotiationState::EndpointsConnected)?;

        let events = local.subscribe_ice_candidates().await?;
        tokio::spawn(forward_server_candidates(
            Arc::clone(&self.registry),
            id.clone(),
            token,
            events,
            channel.clone(),
        ));

        let gatherer = Arc::clone(&local);
        let gather_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = gatherer.gather_candidates().await {
                warn!(session_id = %gather_id, "ICE gathering failed: {}", e);
            }
        });

        let answer = local.process_offer(offer).await?;
        self.registry
            .advance(id, token, NegotiationState::OfferProcessed)?;

        let port = self.ports.allocate()?;
        self.registry.assign_port(id, token, port)?;
        debug!(session_id = %id, port, "Relay port allocated");

        let descriptor = RelayDescriptor::new(self.relay_address, port);
        let relay = self.registry.relay_endpoint(id, token)?;
        relay.process_offer(&descriptor.to_sdp()).await?;
        self.registry
            .advance(id, token, NegotiationState::RelayNegotiated)?;

        match self
            .bridges
            .spawn(id, &descriptor, self.relay_address, port, channel)
            .await
        {
            Ok(bridge) => {
                if let Err(orphan) = self.registry.attach_bridge(id, token, bridge) {
                    orphan.terminate();
                    return Err(Error::SessionState(id.to_string()));
                }
            }
            Err(e) => warn!(session_id = %id, "Relay not started: {}", e),
        }

        info!(session_id = %id, port, "Session negotiated");
        Ok(answer)
    }

    /// Forward a client candidate, or queue it until the endpoint exists
    ///
    /// Forwarding failures are logged only.
    pub async fn on_ice_candidate(&self, id: &SessionId, candidate: IceCandidate) {
        match self.registry.route_candidate(id, candidate) {
            CandidateRoute::Forward {
                endpoint,
                gate,
                candidate,
            } => {
                let _gate = gate.lock().await;
                if let Err(e) = endpoint.add_ice_candidate(&candidate).await {
                    warn!(session_id = %id, "Failed to add candidate: {}", e);
                }
            }
            CandidateRoute::Queued => {
                debug!(session_id = %id, "Queued candidate until endpoint is ready");
            }
        }
    }

    /// Release the session for `id`; returns whether one existed
    ///
    /// Queued candidates are dropped along with the session. The relay
    /// process, if any, keeps running.
    pub async fn stop(&self, id: &SessionId) -> bool {
        let Some(session) = self.registry.remove(id) else {
            return false;
        };
        self.registry.discard_pending(id);
        info!(session_id = %id, state = %session.state(), "Stopping session");
        release_session(&session).await;
        true
    }

    /// Release everything held for `id` after its connection went away
    pub async fn teardown(&self, id: &SessionId) {
        let discarded = self.registry.discard_pending(id);
        if discarded > 0 {
            debug!(session_id = %id, discarded, "Discarded queued candidates");
        }
        if let Some(session) = self.registry.remove(id) {
            info!(session_id = %id, state = %session.state(), "Tearing down session");
            release_session(&session).await;
        }
    }
}

/// A registry entry taken for a negotiation that has not run yet
#[derive(Debug)]
pub struct Reservation {
    token: SessionToken,
    displaced: Option<Session>,
}

async fn release_session(session: &Session) {
    if let Some(pipeline) = session.pipeline() {
        pipeline.release().await;
    }
}

/// Relay server-gathered candidates while the session stays current
async fn forward_server_candidates(
    registry: Arc<SessionRegistry>,
    id: SessionId,
    token: SessionToken,
    mut events: IceCandidateStream,
    channel: ClientChannel,
) {
    while let Some(candidate) = events.recv().await {
        if !registry.is_current(&id, token) {
            break;
        }
        if !channel.send(ServerMessage::IceCandidate { candidate }) {
            break;
        }
    }
    debug!(session_id = %id, "Candidate forwarding finished");
}

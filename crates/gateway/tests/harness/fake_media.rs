//! In-memory media server
//!
//! Records every call, fails on demand, and lets tests hold offer processing
//! open or inject server-gathered candidates.

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_gateway::media::{
    EndpointKind, IceCandidateStream, MediaEndpoint, MediaPipeline, MediaServer, MediaServerConnector,
};
use relay_gateway::{Error, IceCandidate, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// A call received by the fake server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePipeline,
    CreateEndpoint(EndpointKind),
    Connect { source: String, sink: String },
    ProcessOffer { endpoint: String, offer: String },
    GatherCandidates(String),
    AddIceCandidate { endpoint: String, candidate: String },
    Subscribe(String),
    Release(String),
}

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Failure {
    Connect,
    CreatePipeline,
    CreateWebRtcEndpoint,
    CreateRtpEndpoint,
    ConnectEndpoints,
    ProcessOffer,
    GatherCandidates,
    RelayOffer,
    AddIceCandidate,
}

#[derive(Default)]
struct FakeState {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashSet<Failure>>,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<IceCandidate>>>,
    offer_hold: Mutex<Option<Arc<Notify>>>,
    offer_reached: Notify,
    gather_stalled: AtomicBool,
}

impl FakeState {
    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, failure: Failure) -> Result<()> {
        if self.failures.lock().contains(&failure) {
            Err(Error::MediaServerRpc {
                code: 40000,
                message: format!("{:?} failed", failure),
            })
        } else {
            Ok(())
        }
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

/// Fake media server; also acts as its own connector
#[derive(Clone, Default)]
pub struct FakeMediaServer {
    state: Arc<FakeState>,
}

impl FakeMediaServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `failure` fail from now on
    pub fn fail(&self, failure: Failure) {
        self.state.failures.lock().insert(failure);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    pub fn releases(&self) -> usize {
        self.count(|call| matches!(call, Call::Release(_)))
    }

    pub fn released(&self, pipeline_id: &str) -> usize {
        self.count(|call| matches!(call, Call::Release(id) if id == pipeline_id))
    }

    /// Candidates added to any endpoint, in arrival order
    pub fn added_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::AddIceCandidate { candidate, .. } => Some(candidate),
                _ => None,
            })
            .collect()
    }

    /// Emit a server-gathered candidate on `endpoint`; false if nobody listens
    pub fn emit_candidate(&self, endpoint: &str, candidate: IceCandidate) -> bool {
        match self.state.subscribers.lock().get(endpoint) {
            Some(tx) => tx.send(candidate).is_ok(),
            None => false,
        }
    }

    /// Endpoints with an active candidate subscription
    pub fn subscribed_endpoints(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Subscribe(endpoint) => Some(endpoint),
                _ => None,
            })
            .collect()
    }

    /// Block WebRTC offer processing until the returned notify fires
    pub fn hold_offers(&self) -> Arc<Notify> {
        let hold = Arc::new(Notify::new());
        *self.state.offer_hold.lock() = Some(Arc::clone(&hold));
        hold
    }

    /// Make `gatherCandidates` never complete
    pub fn stall_gathering(&self) {
        self.state.gather_stalled.store(true, Ordering::SeqCst);
    }

    /// Wait until a matching call has been recorded, failing after five seconds
    pub async fn wait_for_call(&self, matches: impl Fn(&Call) -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.count(&matches) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for a media server call");
    }

    /// Wait until a held offer is being processed
    pub async fn offer_reached(&self) {
        self.state.offer_reached.notified().await;
    }
}

#[async_trait]
impl MediaServerConnector for FakeMediaServer {
    fn address(&self) -> String {
        "fake://media-server".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn MediaServer>> {
        if self.state.failures.lock().contains(&Failure::Connect) {
            return Err(Error::WebSocket("connection refused".to_string()));
        }
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl MediaServer for FakeMediaServer {
    fn is_connected(&self) -> bool {
        true
    }

    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>> {
        self.state.record(Call::CreatePipeline);
        self.state.check(Failure::CreatePipeline)?;
        Ok(Arc::new(FakePipeline {
            state: Arc::clone(&self.state),
            id: self.state.next_id("pipeline"),
        }))
    }
}

struct FakePipeline {
    state: Arc<FakeState>,
    id: String,
}

#[async_trait]
impl MediaPipeline for FakePipeline {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_endpoint(&self, kind: EndpointKind) -> Result<Arc<dyn MediaEndpoint>> {
        self.state.record(Call::CreateEndpoint(kind));
        self.state.check(match kind {
            EndpointKind::WebRtc => Failure::CreateWebRtcEndpoint,
            EndpointKind::Rtp => Failure::CreateRtpEndpoint,
        })?;
        Ok(Arc::new(FakeEndpoint {
            state: Arc::clone(&self.state),
            id: self.state.next_id(&format!("{}/{}", self.id, kind)),
            kind,
        }))
    }

    async fn release(&self) -> Result<()> {
        self.state.record(Call::Release(self.id.clone()));
        let prefix = format!("{}/", self.id);
        self.state
            .subscribers
            .lock()
            .retain(|endpoint, _| !endpoint.starts_with(&prefix));
        Ok(())
    }
}

struct FakeEndpoint {
    state: Arc<FakeState>,
    id: String,
    kind: EndpointKind,
}

#[async_trait]
impl MediaEndpoint for FakeEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EndpointKind {
        self.kind
    }

    async fn connect(&self, sink: &dyn MediaEndpoint) -> Result<()> {
        self.state.record(Call::Connect {
            source: self.id.clone(),
            sink: sink.id().to_string(),
        });
        self.state.check(Failure::ConnectEndpoints)
    }

    async fn process_offer(&self, offer: &str) -> Result<String> {
        self.state.record(Call::ProcessOffer {
            endpoint: self.id.clone(),
            offer: offer.to_string(),
        });

        if self.kind == EndpointKind::Rtp {
            self.state.check(Failure::RelayOffer)?;
            return Ok("v=0\r\ns=relay-answer\r\n".to_string());
        }

        let hold = self.state.offer_hold.lock().clone();
        if let Some(hold) = hold {
            self.state.offer_reached.notify_one();
            hold.notified().await;
        }
        self.state.check(Failure::ProcessOffer)?;
        Ok(format!("answer-for:{}", offer))
    }

    async fn gather_candidates(&self) -> Result<()> {
        self.state.record(Call::GatherCandidates(self.id.clone()));
        if self.state.gather_stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.state.check(Failure::GatherCandidates)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.state.record(Call::AddIceCandidate {
            endpoint: self.id.clone(),
            candidate: candidate.candidate.clone(),
        });
        self.state.check(Failure::AddIceCandidate)
    }

    async fn subscribe_ice_candidates(&self) -> Result<IceCandidateStream> {
        self.state.record(Call::Subscribe(self.id.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.subscribers.lock().insert(self.id.clone(), tx);
        Ok(rx)
    }
}

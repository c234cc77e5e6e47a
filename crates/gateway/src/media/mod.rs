//! Remote media server abstraction
//!
//! The orchestrator only sees these traits. [`kurento`] implements them over
//! the media server's JSON-RPC WebSocket; tests substitute an in-memory fake.

pub mod jsonrpc;
pub mod kurento;
mod handle;

pub use handle::{MediaServerHandle, OwnedPipeline};

use crate::protocol::IceCandidate;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Stream of candidates gathered by the media server for one endpoint
pub type IceCandidateStream = mpsc::UnboundedReceiver<IceCandidate>;

/// Kind of media element created inside a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    /// Client-facing WebRTC endpoint
    WebRtc,
    /// Network-facing plain RTP endpoint feeding the relay
    Rtp,
}

impl EndpointKind {
    /// Media server type name
    pub fn type_name(&self) -> &'static str {
        match self {
            EndpointKind::WebRtc => "WebRtcEndpoint",
            EndpointKind::Rtp => "RtpEndpoint",
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Connects to the media server; invoked lazily by [`MediaServerHandle`]
#[async_trait]
pub trait MediaServerConnector: Send + Sync {
    /// Human-readable address, used in error replies
    fn address(&self) -> String;

    /// Open a new connection
    async fn connect(&self) -> Result<Arc<dyn MediaServer>>;
}

/// A live connection to the media server
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Whether the connection can still carry requests
    fn is_connected(&self) -> bool;

    /// Create a new media pipeline
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>>;
}

/// Server-side media processing graph, created and released as a unit
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Server-assigned object id
    fn id(&self) -> &str;

    /// Create an endpoint inside this pipeline
    async fn create_endpoint(&self, kind: EndpointKind) -> Result<Arc<dyn MediaEndpoint>>;

    /// Release the pipeline and every element in it
    async fn release(&self) -> Result<()>;
}

/// Pipeline element that sends or receives a media stream
#[async_trait]
pub trait MediaEndpoint: Send + Sync {
    /// Server-assigned object id
    fn id(&self) -> &str;

    fn kind(&self) -> EndpointKind;

    /// Route this endpoint's media into `sink`
    async fn connect(&self, sink: &dyn MediaEndpoint) -> Result<()>;

    /// Process an SDP offer and return the answer
    async fn process_offer(&self, offer: &str) -> Result<String>;

    /// Start gathering local ICE candidates (WebRTC endpoints)
    async fn gather_candidates(&self) -> Result<()>;

    /// Add a remote ICE candidate (WebRTC endpoints)
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Subscribe to candidates gathered by the server for this endpoint
    async fn subscribe_ice_candidates(&self) -> Result<IceCandidateStream>;
}

//! Relay gateway test harness
//!
//! Provides:
//! - an in-memory media server ([`FakeMediaServer`]) with failure injection
//! - an orchestrator wired to it, with a relay config that never finds ffmpeg
//! - helpers for reading client messages with a timeout
//!
//! Basic usage pattern:
//!
//! 1. Create a `TestGateway`
//! 2. Drive `gateway.orchestrator` directly or through a `ClientConnection`
//! 3. Assert on `gateway.media.calls()` and the registry

#![allow(dead_code)]

pub mod fake_media;

pub use fake_media::{Call, FakeMediaServer, Failure};

use relay_gateway::protocol::ClientChannel;
use relay_gateway::signaling::ClientConnection;
use relay_gateway::{GatewayConfig, Orchestrator, ServerMessage, SessionId};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const BASE_PORT: u16 = 55000;

pub const OFFER: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n";

/// Orchestrator backed by a fake media server
pub struct TestGateway {
    pub media: FakeMediaServer,
    pub orchestrator: Arc<Orchestrator>,
    pub config: GatewayConfig,
    _sdp_dir: tempfile::TempDir,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_media(FakeMediaServer::new())
    }

    pub fn with_media(media: FakeMediaServer) -> Self {
        init_tracing();
        let sdp_dir = tempfile::tempdir().expect("tempdir");

        let mut config = GatewayConfig::default();
        config.relay.base_port = BASE_PORT;
        config.relay.ffmpeg_path = PathBuf::from("/nonexistent/relay-ffmpeg");
        config.relay.sdp_dir = sdp_dir.path().to_path_buf();

        let orchestrator = Arc::new(Orchestrator::new(&config, Arc::new(media.clone())));

        Self {
            media,
            orchestrator,
            config,
            _sdp_dir: sdp_dir,
        }
    }

    /// Client connection for `id` plus the receiver of its outgoing messages
    pub fn connect(&self, id: Option<&str>) -> (ClientConnection, UnboundedReceiver<ServerMessage>) {
        let (channel, rx) = ClientChannel::new();
        let connection = ClientConnection::new(
            Arc::clone(&self.orchestrator),
            id.map(SessionId::from),
            channel,
        );
        (connection, rx)
    }
}

/// Route gateway logs to the test output (RUST_LOG, default off)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .with_test_writer()
        .try_init();
}

pub fn start_message(offer: &str) -> String {
    serde_json::json!({ "id": "start", "sdpOffer": offer }).to_string()
}

pub fn candidate_message(candidate: &str) -> String {
    serde_json::json!({
        "id": "onIceCandidate",
        "candidate": { "candidate": candidate, "sdpMid": "0", "sdpMLineIndex": 0 }
    })
    .to_string()
}

/// Next message for the client, skipping relay logs
pub async fn next_reply(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    loop {
        match next_message(rx).await {
            ServerMessage::RelayLog { .. } => continue,
            message => return message,
        }
    }
}

/// Next message for the client, failing the test after five seconds
pub async fn next_message(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(message)) => message,
        Ok(None) => panic!("client channel closed"),
        Err(_) => panic!("timed out waiting for a client message"),
    }
}

/// Relay log lines received so far
pub fn drain_relay_logs(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<String> {
    let mut logs = Vec::new();
    while let Ok(message) = rx.try_recv() {
        if let ServerMessage::RelayLog { message } = message {
            logs.push(message);
        }
    }
    logs
}

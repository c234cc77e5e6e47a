//! WebRTC-to-RTMP relay gateway
//!
//! Browsers negotiate a WebRTC session with a remote media server through
//! this gateway; the media server forwards the video as plain RTP to a local
//! transcoder process, which republishes it over RTMP.
//!
//! # Features
//!
//! - **Signaling**: JSON messages over WebSocket (`start`, `stop`, `onIceCandidate`)
//! - **Negotiation state machine**: pipeline, endpoints, offer/answer, relay leg
//! - **Early candidates**: queued until the WebRTC endpoint exists, then drained in order
//! - **Relay supervision**: one transcoder process per session, logs forwarded to the client
//! - **Kurento client**: JSON-RPC 2.0 over WebSocket
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Browser                                                 │
//! │  ↓ (WebSocket, JSON)                                     │
//! │  signaling::router                                       │
//! │  └─ ClientConnection (one per socket)                    │
//! │     ↓                                                     │
//! │  Orchestrator                                            │
//! │  ├─ SessionRegistry (sessions + pending candidates)      │
//! │  ├─ PortAllocator (relay ports)                          │
//! │  ├─ MediaServerHandle → KurentoClient (JSON-RPC/WS)      │
//! │  └─ BridgeSupervisor → ffmpeg (RTP in, RTMP out)         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relay_gateway::{signaling, GatewayConfig, Orchestrator};
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::load(Some("gateway.toml"))?;
//! config.validate()?;
//!
//! let orchestrator = Arc::new(Orchestrator::from_config(&config));
//! let router = signaling::router(&config.server, orchestrator);
//! let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
//! signaling::serve(listener, router, async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod media;
pub mod orchestrator;
pub mod ports;
pub mod protocol;
pub mod sdp;
pub mod session;
pub mod signaling;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;
pub use protocol::{ClientChannel, ClientMessage, IceCandidate, ServerMessage};
pub use session::{NegotiationState, SessionId};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

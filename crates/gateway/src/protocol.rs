//! Client-facing signaling protocol
//!
//! Messages are JSON objects discriminated by their `id` field. Incoming
//! frames are decoded exactly once, in [`ClientMessage::decode`]; unknown
//! discriminators are rejected there and nowhere else.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// ICE candidate descriptor exchanged with the browser and the media server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line (`candidate:...`)
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the m-line this candidate belongs to
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    /// Candidate without mid/m-line information
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

/// Messages sent by the browser
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Begin negotiation with the browser's SDP offer
    #[serde(rename_all = "camelCase")]
    Start { sdp_offer: String },

    /// Tear the session down
    Stop,

    /// Locally gathered ICE candidate
    OnIceCandidate { candidate: IceCandidate },
}

const CLIENT_MESSAGE_IDS: [&str; 3] = ["start", "stop", "onIceCandidate"];

impl ClientMessage {
    /// Decode a text frame into a client message
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientProtocol`] for invalid JSON, a missing or
    /// unknown `id`, or a known `id` with missing/ill-typed fields.
    pub fn decode(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| Error::ClientProtocol(format!("Invalid message {}: {}", text, e)))?;

        let id = value.get("id").and_then(|id| id.as_str());
        match id {
            Some(id) if CLIENT_MESSAGE_IDS.contains(&id) => {
                let id = id.to_string();
                serde_json::from_value(value).map_err(|e| {
                    Error::ClientProtocol(format!("Invalid {} message: {}", id, e))
                })
            }
            _ => Err(Error::ClientProtocol(format!("Invalid message {}", text))),
        }
    }

    /// Discriminator of this message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Start { .. } => "start",
            ClientMessage::Stop => "stop",
            ClientMessage::OnIceCandidate { .. } => "onIceCandidate",
        }
    }
}

/// Messages sent to the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ServerMessage {
    /// SDP answer for a successful `start`
    #[serde(rename_all = "camelCase")]
    StartResponse { sdp_answer: String },

    /// Any failure
    Error { message: String },

    /// Candidate gathered by the media server
    IceCandidate { candidate: IceCandidate },

    /// Diagnostic line from the relay process
    RelayLog { message: String },
}

impl ServerMessage {
    /// Error reply for a failed operation
    pub fn error(err: &Error) -> Self {
        ServerMessage::Error {
            message: err.to_string(),
        }
    }

    /// Relay log line
    pub fn relay_log(message: impl Into<String>) -> Self {
        ServerMessage::RelayLog {
            message: message.into(),
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outgoing half of a client connection
///
/// Cloned into every task that may talk to the browser: negotiations, ICE
/// event forwarders and relay process monitors. Sends never block; once the
/// connection is gone they are dropped.
#[derive(Debug, Clone)]
pub struct ClientChannel {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientChannel {
    /// Create a channel and the receiver that drains it into the socket
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a message for the client; returns false if the client is gone
    pub fn send(&self, message: ServerMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping message for closed client channel: {:?}", e.0);
                false
            }
        }
    }
}

//! Per-connection message dispatch

use crate::orchestrator::Orchestrator;
use crate::protocol::{ClientChannel, ClientMessage, ServerMessage};
use crate::session::SessionId;
use crate::Error;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One client connection's view of the gateway
///
/// Transport-agnostic: the WebSocket handler feeds it text frames and calls
/// [`close`](ClientConnection::close) when the socket goes away.
pub struct ClientConnection {
    orchestrator: Arc<Orchestrator>,
    identity: Option<SessionId>,
    bound: Option<SessionId>,
    channel: ClientChannel,
}

impl ClientConnection {
    /// `identity` is `None` when the session id could not be determined
    pub fn new(orchestrator: Arc<Orchestrator>, identity: Option<SessionId>, channel: ClientChannel) -> Self {
        Self {
            orchestrator,
            identity,
            bound: None,
            channel,
        }
    }

    /// Session id bound to this connection, binding it on first use
    fn session_id(&mut self) -> Option<SessionId> {
        if self.bound.is_none() {
            self.bound = self.identity.clone();
            if let Some(id) = &self.bound {
                debug!(session_id = %id, "Session id bound to connection");
            }
        }
        self.bound.clone()
    }

    /// Handle one text frame
    ///
    /// `start` runs in its own task, returned so callers can await it;
    /// `stop` and `onIceCandidate` complete before this returns.
    pub async fn handle_text(&mut self, text: &str) -> Option<JoinHandle<()>> {
        let message = match ClientMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Rejected client message: {}", e);
                self.channel.send(ServerMessage::error(&e));
                return None;
            }
        };

        let session_id = self.session_id();
        debug!(session_id = ?session_id, kind = message.kind(), "Client message");

        match message {
            ClientMessage::Start { sdp_offer } => {
                let Some(id) = session_id else {
                    let err = Error::ClientProtocol("Cannot use undefined sessionId".to_string());
                    self.channel.send(ServerMessage::error(&err));
                    return None;
                };
                Some(self.spawn_start(id, sdp_offer))
            }
            ClientMessage::Stop => {
                if let Some(id) = session_id {
                    self.orchestrator.stop(&id).await;
                }
                None
            }
            ClientMessage::OnIceCandidate { candidate } => {
                match session_id {
                    Some(id) => self.orchestrator.on_ice_candidate(&id, candidate).await,
                    None => {
                        let err = Error::ClientProtocol("Cannot use undefined sessionId".to_string());
                        self.channel.send(ServerMessage::error(&err));
                    }
                }
                None
            }
        }
    }

    fn spawn_start(&self, id: SessionId, offer: String) -> JoinHandle<()> {
        let orchestrator = Arc::clone(&self.orchestrator);
        let channel = self.channel.clone();
        // Reserved before the task runs, so a `stop` or close handled
        // next always finds the session.
        let reservation = orchestrator.reserve(&id);

        tokio::spawn(async move {
            match orchestrator.start_reserved(&id, reservation, &offer, channel.clone()).await {
                Ok(sdp_answer) => {
                    channel.send(ServerMessage::StartResponse { sdp_answer });
                }
                Err(e) => {
                    channel.send(ServerMessage::error(&e));
                }
            }
        })
    }

    /// Tear down the bound session; idempotent
    pub async fn close(&mut self) {
        if let Some(id) = &self.bound {
            info!(session_id = %id, "Connection closed");
            self.orchestrator.teardown(id).await;
        }
    }
}

//! HTTP listener: WebSocket signaling endpoint and health probe

use super::connection::ClientConnection;
use super::identity::{self, ConnectionIdentity};
use crate::config::ServerConfig;
use crate::orchestrator::Orchestrator;
use crate::protocol::ClientChannel;
use crate::session::SessionId;
use crate::Result;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    session_cookie: Arc<str>,
}

/// Build the gateway router
pub fn router(config: &ServerConfig, orchestrator: Arc<Orchestrator>) -> Router {
    let state = AppState {
        orchestrator,
        session_cookie: Arc::from(config.session_cookie.as_str()),
    };

    Router::new()
        .route(&config.ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Relay gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Relay gateway stopped");
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": state.orchestrator.registry().len(),
    }))
}

async fn ws_handler(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    let identity = identity::resolve(&headers, &state.session_cookie);
    let set_cookie = match &identity {
        ConnectionIdentity::Issued(id) => {
            HeaderValue::from_str(&identity::set_cookie_value(&state.session_cookie, id)).ok()
        }
        ConnectionIdentity::Existing(_) => None,
        ConnectionIdentity::Undetermined => {
            warn!("Session cookie present but unusable");
            None
        }
    };

    let session_id = identity.session_id().cloned();
    let mut response = ws
        .on_upgrade(move |socket| handle_socket(socket, state, session_id))
        .into_response();
    if let Some(value) = set_cookie {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: Option<SessionId>) {
    let (mut sender, mut receiver) = socket.split();
    let (channel, mut rx) = ClientChannel::new();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match message.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode client message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    debug!(session_id = ?session_id, "Client connected");
    let mut connection = ClientConnection::new(state.orchestrator, session_id, channel);

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                connection.handle_text(&text).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(data)) => {
                debug!("Ignoring {} byte binary frame", data.len());
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Client WebSocket error: {}", e);
                break;
            }
        }
    }

    connection.close().await;
    writer.abort();
}

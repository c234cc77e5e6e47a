//! Kurento media server client
//!
//! Speaks the Kurento JSON-RPC 2.0 protocol over a single WebSocket shared by
//! every session. Requests are matched to replies by id; `onEvent`
//! notifications are routed to per-endpoint candidate streams.
//!
//! ```text
//! create    {type, constructorParams, properties} -> {value: objectId, sessionId}
//! invoke    {object, operation, operationParams}  -> {value}
//! subscribe {type, object}                        -> {value: subscriptionId}
//! release   {object}
//! onEvent   {value: {type, object, data}}         (server -> client)
//! ```

use super::jsonrpc::{Incoming, JsonRpcRequest};
use super::{
    EndpointKind, IceCandidateStream, MediaEndpoint, MediaPipeline, MediaServer,
    MediaServerConnector,
};
use crate::protocol::IceCandidate;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Event raised by WebRTC endpoints for each locally gathered candidate
pub const ICE_CANDIDATE_EVENT: &str = "IceCandidateFound";

/// Opens [`KurentoClient`] connections for the [`MediaServerHandle`](super::MediaServerHandle)
pub struct KurentoConnector {
    url: String,
    ping_interval: Option<Duration>,
}

impl KurentoConnector {
    /// # Arguments
    ///
    /// * `url` - media server WebSocket URL (ws:// or wss://)
    /// * `ping_interval_secs` - keepalive interval; 0 disables pings
    pub fn new(url: impl Into<String>, ping_interval_secs: u64) -> Self {
        Self {
            url: url.into(),
            ping_interval: (ping_interval_secs > 0).then(|| Duration::from_secs(ping_interval_secs)),
        }
    }
}

#[async_trait]
impl MediaServerConnector for KurentoConnector {
    fn address(&self) -> String {
        self.url.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn MediaServer>> {
        let client: Arc<dyn MediaServer> = KurentoClient::connect(&self.url, self.ping_interval).await?;
        Ok(client)
    }
}

/// State shared by the client, its pipelines/endpoints and the socket tasks
struct ClientInner {
    /// Outgoing frame sender
    tx: mpsc::UnboundedSender<Message>,

    next_id: AtomicU64,

    connected: AtomicBool,

    /// Media server session, issued with the first reply
    session_id: Mutex<Option<String>>,

    /// Requests awaiting a reply, by request id
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,

    /// Candidate streams, by endpoint object id
    subscribers: Mutex<HashMap<String, mpsc::UnboundedSender<IceCandidate>>>,
}

impl ClientInner {
    async fn request(&self, method: &str, mut params: Value) -> Result<Value> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::WebSocket("media server connection closed".to_string()));
        }

        if let (Some(session_id), Some(map)) = (self.session_id.lock().clone(), params.as_object_mut()) {
            map.insert("sessionId".to_string(), Value::String(session_id));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(method, params, id);
        let json = request.to_json()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(id, reply_tx);

        // The receiver task drains `pending` after clearing `connected`;
        // re-check so a request registered after that drain cannot hang.
        if !self.connected.load(Ordering::SeqCst) {
            self.pending.lock().remove(&id);
            return Err(Error::WebSocket("media server connection closed".to_string()));
        }

        debug!(id, method, "Sending media server request");
        if self.tx.send(Message::Text(json)).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::WebSocket("media server connection closed".to_string()));
        }

        reply_rx.await.map_err(|_| {
            Error::WebSocket(format!("media server connection closed before reply to {}", method))
        })?
    }

    async fn invoke(&self, object: &str, operation: &str, operation_params: Value) -> Result<Value> {
        self.request(
            "invoke",
            json!({
                "object": object,
                "operation": operation,
                "operationParams": operation_params,
            }),
        )
        .await
    }

    async fn create(&self, kind: &str, constructor_params: Value) -> Result<String> {
        let result = self
            .request(
                "create",
                json!({
                    "type": kind,
                    "constructorParams": constructor_params,
                    "properties": {},
                }),
            )
            .await?;
        value_string(&result, "create")
    }

    fn handle_frame(&self, text: &str) {
        let incoming = match Incoming::parse(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!("Ignoring media server frame: {}", e);
                return;
            }
        };

        match incoming {
            Incoming::Response { id, result } => {
                if let Some(session_id) = result.get("sessionId").and_then(Value::as_str) {
                    let mut current = self.session_id.lock();
                    if current.as_deref() != Some(session_id) {
                        debug!(session_id, "Media server session established");
                        *current = Some(session_id.to_string());
                    }
                }
                match self.pending.lock().remove(&id) {
                    Some(reply) => {
                        let _ = reply.send(Ok(result));
                    }
                    None => debug!(id, "Reply for unknown request"),
                }
            }
            Incoming::Error { id: Some(id), error } => {
                if let Some(reply) = self.pending.lock().remove(&id) {
                    let _ = reply.send(Err(error.into()));
                }
            }
            Incoming::Error { id: None, error } => {
                warn!(code = error.code, "Media server error without request id: {}", error.message);
            }
            Incoming::Notification { method, params } if method == "onEvent" => {
                self.dispatch_event(&params);
            }
            Incoming::Notification { method, .. } => {
                debug!(method = %method, "Ignoring media server notification");
            }
        }
    }

    fn dispatch_event(&self, params: &Value) {
        let value = &params["value"];
        if value["type"].as_str() != Some(ICE_CANDIDATE_EVENT) {
            debug!("Ignoring media server event {}", value["type"]);
            return;
        }

        let Some(object) = value["object"].as_str() else {
            warn!("Candidate event without source object");
            return;
        };

        let candidate: IceCandidate = match serde_json::from_value(value["data"]["candidate"].clone()) {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(object, "Malformed candidate event: {}", e);
                return;
            }
        };

        let mut subscribers = self.subscribers.lock();
        if let Some(tx) = subscribers.get(object) {
            if tx.send(candidate).is_err() {
                subscribers.remove(object);
            }
        }
    }

    fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);

        let pending: Vec<_> = self.pending.lock().drain().collect();
        for (_, reply) in pending {
            let _ = reply.send(Err(Error::WebSocket("media server connection closed".to_string())));
        }
        self.subscribers.lock().clear();
    }
}

fn value_string(result: &Value, operation: &str) -> Result<String> {
    result["value"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::MediaServer(format!("{} reply carried no value: {}", operation, result)))
}

/// Connection to a Kurento media server
pub struct KurentoClient {
    inner: Arc<ClientInner>,
}

impl KurentoClient {
    /// Connect to the media server
    ///
    /// Establishes the WebSocket and starts background tasks for sending,
    /// receiving and (optionally) keepalive pings.
    pub async fn connect(url: &str, ping_interval: Option<Duration>) -> Result<Arc<Self>> {
        info!("Connecting to media server: {}", url);

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ClientInner {
            tx,
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            session_id: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
        });

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, Arc::clone(&inner)));
        if let Some(interval) = ping_interval {
            tokio::spawn(Self::ping_task(Arc::downgrade(&inner), interval));
        }

        Ok(Arc::new(Self { inner }))
    }

    /// Media server session id, once the server has issued one
    pub fn session_id(&self) -> Option<String> {
        self.inner.session_id.lock().clone()
    }

    /// Sender task: sends frames from channel to WebSocket
    async fn sender_task(mut write: SplitSink<WsStream, Message>, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("Failed to send media server frame: {}", e);
                break;
            }
        }

        debug!("Media server sender task terminated");
    }

    /// Receiver task: routes replies and events until the socket closes
    async fn receiver_task(mut read: SplitStream<WsStream>, inner: Arc<ClientInner>) {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => inner.handle_frame(&text),
                Ok(Message::Close(_)) => {
                    info!("Media server closed the connection");
                    break;
                }
                Err(e) => {
                    error!("Media server WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        inner.shutdown();
        debug!("Media server receiver task terminated");
    }

    async fn ping_task(inner: Weak<ClientInner>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(inner) = inner.upgrade() else { break };
            if !inner.connected.load(Ordering::SeqCst) {
                break;
            }
            let params = json!({ "interval": interval.as_millis() as u64 });
            if let Err(e) = inner.request("ping", params).await {
                warn!("Media server ping failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl MediaServer for KurentoClient {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>> {
        let id = self.inner.create("MediaPipeline", json!({})).await?;
        debug!(pipeline_id = %id, "Created media pipeline");
        Ok(Arc::new(KurentoPipeline {
            inner: Arc::clone(&self.inner),
            id,
            endpoints: Mutex::new(Vec::new()),
        }))
    }
}

struct KurentoPipeline {
    inner: Arc<ClientInner>,
    id: String,
    /// Endpoint ids, so their event streams end with the pipeline
    endpoints: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaPipeline for KurentoPipeline {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_endpoint(&self, kind: EndpointKind) -> Result<Arc<dyn MediaEndpoint>> {
        let id = self
            .inner
            .create(kind.type_name(), json!({ "mediaPipeline": self.id }))
            .await?;
        debug!(pipeline_id = %self.id, endpoint_id = %id, %kind, "Created endpoint");
        self.endpoints.lock().push(id.clone());
        Ok(Arc::new(KurentoEndpoint {
            inner: Arc::clone(&self.inner),
            id,
            kind,
        }))
    }

    async fn release(&self) -> Result<()> {
        {
            let endpoints = self.endpoints.lock();
            let mut subscribers = self.inner.subscribers.lock();
            for endpoint in endpoints.iter() {
                subscribers.remove(endpoint);
            }
        }
        self.inner.request("release", json!({ "object": self.id })).await?;
        Ok(())
    }
}

struct KurentoEndpoint {
    inner: Arc<ClientInner>,
    id: String,
    kind: EndpointKind,
}

#[async_trait]
impl MediaEndpoint for KurentoEndpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> EndpointKind {
        self.kind
    }

    async fn connect(&self, sink: &dyn MediaEndpoint) -> Result<()> {
        self.inner
            .invoke(&self.id, "connect", json!({ "sink": sink.id() }))
            .await?;
        Ok(())
    }

    async fn process_offer(&self, offer: &str) -> Result<String> {
        let result = self
            .inner
            .invoke(&self.id, "processOffer", json!({ "offer": offer }))
            .await?;
        value_string(&result, "processOffer")
    }

    async fn gather_candidates(&self) -> Result<()> {
        self.inner.invoke(&self.id, "gatherCandidates", json!({})).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let candidate = json!({
            "__module__": "kurento",
            "__type__": "IceCandidate",
            "candidate": candidate.candidate,
            "sdpMid": candidate.sdp_mid.clone().unwrap_or_default(),
            "sdpMLineIndex": candidate.sdp_m_line_index.unwrap_or(0),
        });
        self.inner
            .invoke(&self.id, "addIceCandidate", json!({ "candidate": candidate }))
            .await?;
        Ok(())
    }

    async fn subscribe_ice_candidates(&self) -> Result<IceCandidateStream> {
        // Register before subscribing: events may arrive ahead of the reply.
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().insert(self.id.clone(), tx);

        let subscribed = self
            .inner
            .request(
                "subscribe",
                json!({ "type": ICE_CANDIDATE_EVENT, "object": self.id }),
            )
            .await;

        if let Err(e) = subscribed {
            self.inner.subscribers.lock().remove(&self.id);
            return Err(e);
        }
        Ok(rx)
    }
}

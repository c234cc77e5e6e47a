//! Cached media server connection and release-once pipeline ownership

use super::{EndpointKind, MediaEndpoint, MediaPipeline, MediaServer, MediaServerConnector};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Process-wide handle to the media server
///
/// The connection is opened on first use and shared by every session. A
/// failed attempt is not cached, and a connection that has dropped is
/// replaced on the next acquisition. The cache lock is never held while
/// connecting, so a hung attempt stalls only the session that made it.
pub struct MediaServerHandle {
    connector: Arc<dyn MediaServerConnector>,
    cached: Mutex<Option<Arc<dyn MediaServer>>>,
}

impl MediaServerHandle {
    pub fn new(connector: Arc<dyn MediaServerConnector>) -> Self {
        Self {
            connector,
            cached: Mutex::new(None),
        }
    }

    fn cached_live(&self) -> Option<Arc<dyn MediaServer>> {
        let mut cached = self.cached.lock();
        match cached.as_ref() {
            Some(server) if server.is_connected() => Some(Arc::clone(server)),
            Some(_) => {
                warn!("Media server connection lost, reconnecting");
                *cached = None;
                None
            }
            None => None,
        }
    }

    /// Return the shared connection, connecting if necessary
    ///
    /// Callers racing on an empty cache each connect; the first live
    /// connection stored wins and the others are dropped.
    pub async fn acquire(&self) -> Result<Arc<dyn MediaServer>> {
        if let Some(server) = self.cached_live() {
            return Ok(server);
        }

        let address = self.connector.address();
        let server = self.connector.connect().await.map_err(|e| {
            error!(address = %address, "Could not find media server: {}", e);
            Error::MediaServer(format!(
                "Could not find media server at address {}. Exiting with error {}",
                address, e
            ))
        })?;

        let mut cached = self.cached.lock();
        if let Some(existing) = cached.as_ref() {
            if existing.is_connected() {
                debug!(address = %address, "Using connection opened concurrently");
                return Ok(Arc::clone(existing));
            }
        }
        info!(address = %address, "Connected to media server");
        *cached = Some(Arc::clone(&server));
        Ok(server)
    }
}

/// A pipeline owned by exactly one session
///
/// [`release`](OwnedPipeline::release) may be called from several teardown
/// paths; only the first call reaches the media server.
pub struct OwnedPipeline {
    inner: Arc<dyn MediaPipeline>,
    released: AtomicBool,
}

impl OwnedPipeline {
    pub fn new(inner: Arc<dyn MediaPipeline>) -> Self {
        Self {
            inner,
            released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Create an endpoint inside the owned pipeline
    pub async fn create_endpoint(&self, kind: EndpointKind) -> Result<Arc<dyn MediaEndpoint>> {
        if self.is_released() {
            return Err(Error::SessionState(format!(
                "pipeline {} already released",
                self.id()
            )));
        }
        self.inner.create_endpoint(kind).await
    }

    /// Release the pipeline on the media server
    ///
    /// Failures are logged and swallowed; the pipeline counts as released
    /// either way.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(pipeline_id = %self.id(), "Releasing pipeline");
        if let Err(e) = self.inner.release().await {
            let err = Error::ResourceCleanup(format!("pipeline {}: {}", self.id(), e));
            warn!("{}", err);
        }
    }
}

impl std::fmt::Debug for OwnedPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedPipeline")
            .field("id", &self.id())
            .field("released", &self.is_released())
            .finish()
    }
}

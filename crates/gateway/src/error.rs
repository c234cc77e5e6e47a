//! Error types for the relay gateway

/// Result type alias using the gateway Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or relaying a session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-order client message, unknown discriminator,
    /// or a connection whose session id could not be determined
    #[error("{0}")]
    ClientProtocol(String),

    /// Operation referenced a session that is not (or no longer) registered
    #[error("Session not found: {0}")]
    SessionState(String),

    /// Failure reported by the remote media server or its connection
    #[error("{0}")]
    MediaServer(String),

    /// Remote media server replied with a JSON-RPC error object
    #[error("Media server error {code}: {message}")]
    MediaServerRpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message reported by the server
        message: String,
    },

    /// Releasing a pipeline (or other remote resource) failed
    #[error("Resource cleanup failed: {0}")]
    ResourceCleanup(String),

    /// Relay process could not be spawned or supervised
    #[error("Relay process error: {0}")]
    ProcessSupervision(String),

    /// Relay port space exhausted
    #[error("Relay port space exhausted (next port would be {0})")]
    PortsExhausted(u32),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Errors raised by the remote media server or its transport
    pub fn is_media_server_error(&self) -> bool {
        matches!(
            self,
            Error::MediaServer(_) | Error::MediaServerRpc { .. } | Error::WebSocket(_)
        )
    }

    /// Errors caused by the client rather than the gateway
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::ClientProtocol(_))
    }

    /// Errors meaning the session vanished underneath the caller
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Error::SessionState(_))
    }
}

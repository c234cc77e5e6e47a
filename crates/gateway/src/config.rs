//! Configuration for the relay gateway
//!
//! Configuration can be loaded from a TOML file and/or environment variables.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Main configuration for the relay gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Client-facing server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote media server configuration
    #[serde(default)]
    pub media_server: MediaServerConfig,

    /// RTP relay and bridge process configuration
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Client-facing server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path of the WebSocket signaling endpoint
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Name of the cookie carrying the session id
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

fn default_ws_path() -> String {
    "/magicmirror".to_string()
}

fn default_session_cookie() -> String {
    "relay.sid".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            session_cookie: default_session_cookie(),
        }
    }
}

/// Remote media server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaServerConfig {
    /// JSON-RPC WebSocket URL of the media server
    #[serde(default = "default_media_server_url")]
    pub url: String,

    /// Keepalive ping interval in seconds (0 disables pings)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
}

fn default_media_server_url() -> String {
    "ws://localhost:8888/kurento".to_string()
}

fn default_ping_interval() -> u64 {
    240
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            url: default_media_server_url(),
            ping_interval_secs: default_ping_interval(),
        }
    }
}

/// RTP relay leg and bridge process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the media server sends relay RTP to
    #[serde(default = "default_relay_address")]
    pub address: IpAddr,

    /// First port handed out by the port allocator
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// RTMP destination the bridge process publishes to
    #[serde(default = "default_rtmp_url")]
    pub rtmp_url: String,

    /// Transcoder binary (looked up on PATH when not absolute)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Input protocols the transcoder may open
    #[serde(default = "default_protocol_whitelist")]
    pub protocol_whitelist: String,

    /// Directory where relay SDP descriptors are written
    #[serde(default = "default_sdp_dir")]
    pub sdp_dir: PathBuf,
}

fn default_relay_address() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_base_port() -> u16 {
    55000
}

fn default_rtmp_url() -> String {
    "rtmp://127.0.0.1/live/stream".to_string()
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_protocol_whitelist() -> String {
    "file,udp,rtp".to_string()
}

fn default_sdp_dir() -> PathBuf {
    std::env::temp_dir()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            address: default_relay_address(),
            base_port: default_base_port(),
            rtmp_url: default_rtmp_url(),
            ffmpeg_path: default_ffmpeg_path(),
            protocol_whitelist: default_protocol_whitelist(),
            sdp_dir: default_sdp_dir(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&content).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let mut config = GatewayConfig::default();

        // Server
        if let Ok(host) = std::env::var("RELAY_GATEWAY_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("RELAY_GATEWAY_PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }
        if let Ok(path) = std::env::var("RELAY_GATEWAY_WS_PATH") {
            config.server.ws_path = path;
        }

        // Media server
        if let Ok(url) = std::env::var("RELAY_GATEWAY_MEDIA_SERVER_URL") {
            config.media_server.url = url;
        }

        // Relay
        if let Ok(addr) = std::env::var("RELAY_GATEWAY_RELAY_ADDRESS") {
            if let Ok(a) = addr.parse() {
                config.relay.address = a;
            }
        }
        if let Ok(port) = std::env::var("RELAY_GATEWAY_RELAY_BASE_PORT") {
            if let Ok(p) = port.parse() {
                config.relay.base_port = p;
            }
        }
        if let Ok(url) = std::env::var("RELAY_GATEWAY_RTMP_URL") {
            config.relay.rtmp_url = url;
        }
        if let Ok(path) = std::env::var("RELAY_GATEWAY_FFMPEG_PATH") {
            config.relay.ffmpeg_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("RELAY_GATEWAY_SDP_DIR") {
            config.relay.sdp_dir = PathBuf::from(dir);
        }

        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        if let Some(p) = path {
            if p.as_ref().exists() {
                return Self::from_file(p);
            }
        }
        Ok(Self::from_env())
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the media server URL is not a ws:// or wss:// URL
    /// - the WebSocket path does not start with `/`
    /// - the RTMP destination is not an rtmp:// or rtmps:// URL
    /// - the relay base port is 0
    pub fn validate(&self) -> Result<()> {
        let url = &self.media_server.url;
        if !url.starts_with("ws://") && !url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "media server url must be ws:// or wss://, got {}",
                url
            )));
        }

        if !self.server.ws_path.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "ws_path must start with '/', got {}",
                self.server.ws_path
            )));
        }

        let rtmp = &self.relay.rtmp_url;
        if !rtmp.starts_with("rtmp://") && !rtmp.starts_with("rtmps://") {
            return Err(Error::InvalidConfig(format!(
                "rtmp_url must be rtmp:// or rtmps://, got {}",
                rtmp
            )));
        }

        if self.relay.base_port == 0 {
            return Err(Error::InvalidConfig(
                "relay base_port must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Socket address string the server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

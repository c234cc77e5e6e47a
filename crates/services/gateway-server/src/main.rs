//! Relay gateway binary entry point
//!
//! Serves the WebSocket signaling endpoint and relays negotiated sessions to
//! an RTMP destination through ffmpeg.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8443, media server at ws://localhost:8888/kurento)
//! cargo run -p relay-gateway-server
//!
//! # From a config file, overriding the RTMP destination
//! cargo run -p relay-gateway-server -- \
//!   --config ./gateway.toml \
//!   --rtmp-url rtmp://live.example.com/app/key
//!
//! # With logging
//! RUST_LOG=relay_gateway=debug cargo run -p relay-gateway-server
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use relay_gateway::{signaling, GatewayConfig, Orchestrator};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// WebRTC-to-RTMP relay gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; environment variables are used when absent
    #[arg(short, long, env = "RELAY_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, env = "RELAY_GATEWAY_HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "RELAY_GATEWAY_PORT")]
    port: Option<u16>,

    /// Path of the WebSocket signaling endpoint
    #[arg(long, env = "RELAY_GATEWAY_WS_PATH")]
    ws_path: Option<String>,

    /// Media server JSON-RPC WebSocket URL
    #[arg(long, env = "RELAY_GATEWAY_MEDIA_SERVER_URL")]
    media_server_url: Option<String>,

    /// Address the media server sends relay RTP to
    #[arg(long, env = "RELAY_GATEWAY_RELAY_ADDRESS")]
    relay_address: Option<IpAddr>,

    /// First relay port
    #[arg(long, env = "RELAY_GATEWAY_RELAY_BASE_PORT")]
    relay_base_port: Option<u16>,

    /// RTMP destination
    #[arg(long, env = "RELAY_GATEWAY_RTMP_URL")]
    rtmp_url: Option<String>,

    /// Transcoder binary
    #[arg(long, env = "RELAY_GATEWAY_FFMPEG_PATH")]
    ffmpeg_path: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ws_path) = self.ws_path {
            config.server.ws_path = ws_path;
        }
        if let Some(url) = self.media_server_url {
            config.media_server.url = url;
        }
        if let Some(address) = self.relay_address {
            config.relay.address = address;
        }
        if let Some(base_port) = self.relay_base_port {
            config.relay.base_port = base_port;
        }
        if let Some(rtmp_url) = self.rtmp_url {
            config.relay.rtmp_url = rtmp_url;
        }
        if let Some(ffmpeg_path) = self.ffmpeg_path {
            config.relay.ffmpeg_path = ffmpeg_path;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let mut config = GatewayConfig::load(args.config.as_ref()).context("failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        version = relay_gateway::version(),
        bind_address = %config.bind_addr(),
        ws_path = %config.server.ws_path,
        media_server = %config.media_server.url,
        rtmp_url = %config.relay.rtmp_url,
        "Relay gateway starting"
    );

    // Single event loop
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: GatewayConfig) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(&config));
    let router = signaling::router(&config.server, orchestrator);

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    signaling::serve(listener, router, shutdown_signal())
        .await
        .context("server shutdown with error")?;

    info!("Relay gateway shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

//! Relay process supervision
//!
//! One transcoder process per session reads the relay RTP stream described by
//! an SDP file and republishes it over RTMP. The supervisor writes the
//! descriptor, spawns the process, and forwards its stderr and exit status
//! to the client as `relayLog` messages.

use crate::config::RelayConfig;
use crate::protocol::{ClientChannel, ServerMessage};
use crate::sdp::RelayDescriptor;
use crate::session::SessionId;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::fmt;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Lifecycle of a relay process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Starting,
    Running,
    /// Exit code, or `None` when killed by a signal
    Exited(Option<i32>),
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Starting => f.write_str("starting"),
            BridgeState::Running => f.write_str("running"),
            BridgeState::Exited(Some(code)) => write!(f, "exited({})", code),
            BridgeState::Exited(None) => f.write_str("exited(signal)"),
        }
    }
}

/// Reference to a supervised relay process
///
/// Dropping the handle leaves the process running; only
/// [`terminate`](BridgeHandle::terminate) stops it.
#[derive(Debug)]
pub struct BridgeHandle {
    pid: Option<u32>,
    sdp_path: PathBuf,
    state: Arc<RwLock<BridgeState>>,
    kill_tx: oneshot::Sender<()>,
}

impl BridgeHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    /// Path of the SDP descriptor the process reads
    pub fn sdp_path(&self) -> &PathBuf {
        &self.sdp_path
    }

    /// Kill the process
    pub fn terminate(self) {
        info!(pid = ?self.pid, "Terminating relay process");
        // Monitor already gone means the process already exited.
        let _ = self.kill_tx.send(());
    }
}

/// Spawns and monitors relay processes
#[derive(Debug, Clone)]
pub struct BridgeSupervisor {
    config: RelayConfig,
}

impl BridgeSupervisor {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }

    /// Where the descriptor for `address:port` is written
    pub fn sdp_path(&self, address: IpAddr, port: u16) -> PathBuf {
        self.config.sdp_dir.join(format!("{}_{}.sdp", address, port))
    }

    /// Transcoder arguments for a descriptor file
    pub fn command_args(&self, sdp_path: &std::path::Path) -> Vec<String> {
        vec![
            "-protocol_whitelist".to_string(),
            self.config.protocol_whitelist.clone(),
            "-i".to_string(),
            sdp_path.display().to_string(),
            "-vcodec".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "flv".to_string(),
            self.config.rtmp_url.clone(),
        ]
    }

    /// Write the descriptor and launch the relay process
    ///
    /// Failures are reported to the client as `relayLog` and returned as
    /// [`Error::ProcessSupervision`]; they never affect the negotiation.
    pub async fn spawn(
        &self,
        session_id: &SessionId,
        descriptor: &RelayDescriptor,
        address: IpAddr,
        port: u16,
        channel: ClientChannel,
    ) -> Result<BridgeHandle> {
        let sdp_path = self.sdp_path(address, port);

        if let Err(e) = tokio::fs::write(&sdp_path, descriptor.to_sdp()).await {
            let message = format!("Could not write relay descriptor {}: {}", sdp_path.display(), e);
            channel.send(ServerMessage::relay_log(message.clone()));
            return Err(Error::ProcessSupervision(message));
        }

        let state = Arc::new(RwLock::new(BridgeState::Starting));

        let child = Command::new(&self.config.ffmpeg_path)
            .args(self.command_args(&sdp_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                let message = if e.kind() == ErrorKind::NotFound {
                    format!(
                        "{} is not installed; cannot relay to {}",
                        self.config.ffmpeg_path.display(),
                        self.config.rtmp_url
                    )
                } else {
                    e.to_string()
                };
                warn!(session_id = %session_id, "Relay process spawn failed: {}", message);
                channel.send(ServerMessage::relay_log(message.clone()));
                *state.write() = BridgeState::Exited(None);
                return Err(Error::ProcessSupervision(message));
            }
        };

        let pid = child.id();
        *state.write() = BridgeState::Running;
        info!(
            session_id = %session_id,
            pid = ?pid,
            port,
            rtmp_url = %self.config.rtmp_url,
            "Relay process started"
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        let stderr = child.stderr.take();
        tokio::spawn(monitor(
            session_id.clone(),
            child,
            stderr,
            Arc::clone(&state),
            channel,
            kill_rx,
        ));

        Ok(BridgeHandle {
            pid,
            sdp_path,
            state,
            kill_tx,
        })
    }
}

/// Forward stderr, wait for exit (or a kill request), report the outcome
async fn monitor(
    session_id: SessionId,
    mut child: Child,
    stderr: Option<ChildStderr>,
    state: Arc<RwLock<BridgeState>>,
    channel: ClientChannel,
    kill_rx: oneshot::Receiver<()>,
) {
    let stderr_task = stderr.map(|stderr| tokio::spawn(forward_stderr(stderr, channel.clone())));

    // A dropped kill sender disables the second branch without killing.
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!(session_id = %session_id, "Failed to kill relay process: {}", e);
            }
            child.wait().await
        }
    };

    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    let message = match status {
        Ok(status) => {
            let code = status.code();
            *state.write() = BridgeState::Exited(code);
            match code {
                Some(0) => "Relay process finished".to_string(),
                Some(code) => format!("Relay process exited with code {}", code),
                None => "Relay process terminated by signal".to_string(),
            }
        }
        Err(e) => {
            *state.write() = BridgeState::Exited(None);
            format!("Relay process wait failed: {}", e)
        }
    };

    info!(session_id = %session_id, "{}", message);
    channel.send(ServerMessage::relay_log(message));
}

async fn forward_stderr(stderr: ChildStderr, channel: ClientChannel) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("relay: {}", line);
                channel.send(ServerMessage::relay_log(line));
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Relay stderr closed: {}", e);
                break;
            }
        }
    }
}

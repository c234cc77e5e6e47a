//! Relay leg SDP descriptor
//!
//! The media server's RTP endpoint is given a hand-written offer describing
//! where the bridge process listens. The same text is written to disk for the
//! transcoder to read, so both sides agree on address, port and payload.

use std::fmt;
use std::net::IpAddr;

/// RTP payload type used for the relayed H.264 stream
pub const RELAY_PAYLOAD_TYPE: u8 = 96;

/// RTP clock rate of H.264 video
pub const H264_CLOCK_RATE: u32 = 90_000;

/// Video-only RTP descriptor for the relay leg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayDescriptor {
    address: IpAddr,
    port: u16,
}

impl RelayDescriptor {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self { address, port }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Render the SDP offer text
    pub fn to_sdp(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RelayDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = match self.address {
            IpAddr::V4(_) => "IP4",
            IpAddr::V6(_) => "IP6",
        };
        writeln!(f, "v=0")?;
        writeln!(f, "o=- 0 0 IN {} {}", family, self.address)?;
        writeln!(f, "s=KMS")?;
        writeln!(f, "c=IN {} {}", family, self.address)?;
        writeln!(f, "t=0 0")?;
        writeln!(f, "m=video {} RTP/AVP {}", self.port, RELAY_PAYLOAD_TYPE)?;
        writeln!(
            f,
            "a=rtpmap:{} H264/{}",
            RELAY_PAYLOAD_TYPE, H264_CLOCK_RATE
        )?;
        writeln!(f, "a=fmtp:{} packetization-mode=1", RELAY_PAYLOAD_TYPE)
    }
}

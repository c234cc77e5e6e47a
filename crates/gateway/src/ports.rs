//! Relay port allocation
//!
//! Every session that reaches the port-allocation stage receives
//! `base_port + n`, where `n` counts previous allocations. Ports are never
//! handed back: a long-running gateway walks up the port range until it is
//! exhausted, at which point allocation fails instead of wrapping around
//! onto ports that may still be in use.

use crate::{Error, Result};
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic relay port counter
#[derive(Debug)]
pub struct PortAllocator {
    base_port: u16,
    issued: AtomicU32,
}

impl PortAllocator {
    /// Create an allocator whose first port is `base_port`
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            issued: AtomicU32::new(0),
        }
    }

    /// Allocate the next relay port
    ///
    /// # Errors
    ///
    /// Returns [`Error::PortsExhausted`] once the next port would exceed 65535.
    pub fn allocate(&self) -> Result<u16> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        let port = u32::from(self.base_port) + n;
        u16::try_from(port).map_err(|_| Error::PortsExhausted(port))
    }

    /// First port handed out by this allocator
    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Number of allocation attempts so far
    pub fn issued(&self) -> u32 {
        self.issued.load(Ordering::SeqCst)
    }
}

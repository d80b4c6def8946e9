//! Free-port discovery and explicit-port validation

use crate::{HoverflyError, Result};
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

/// A resolved port and whether the caller asked for it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortSpec {
    pub port: u16,
    pub explicit: bool,
}

pub struct PortAllocator;

impl PortAllocator {
    /// Ask the OS for an ephemeral port, then release it.
    pub fn find_free_port() -> Result<u16> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
            .map_err(|e| HoverflyError::Setup(format!("Failed to find a free port: {}", e)))?;
        let port = listener.local_addr()?.port();
        Ok(port)
    }

    /// Fail with `PortInUse` if `port` cannot be bound right now.
    pub fn ensure_free(port: u16) -> Result<()> {
        match TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))) {
            Ok(_) => Ok(()),
            Err(_) => Err(HoverflyError::PortInUse { port }),
        }
    }

    /// Use the requested port, or pick an ephemeral one.
    pub fn resolve(requested: Option<u16>) -> Result<PortSpec> {
        match requested {
            Some(0) => Err(HoverflyError::Configuration(
                "Port must be a positive integer".to_string(),
            )),
            Some(port) => Ok(PortSpec { port, explicit: true }),
            None => Ok(PortSpec {
                port: Self::find_free_port()?,
                explicit: false,
            }),
        }
    }
}

//! transport - addressed, fire-and-forget datagram delivery between simulated LTE entities

mod error;
mod io_service;

pub use error::TransportError;
pub use io_service::{IoService, MessageHandler};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// The loopback host used to address every simulated entity.
pub fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// An endpoint address on the loopback host.
pub fn local_endpoint(port: u16) -> SocketAddr {
    SocketAddr::new(localhost(), port)
}

//! Transport collaborators used by the send dispatcher.

pub mod connection;
pub mod udp;

use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::Result;
use crate::types::TransportType;

pub use connection::{ConnectionId, ConnectionInfo, ConnectionState, ConnectionTable};
pub use udp::UdpTransport;

/// Puts encoded messages on the wire.
///
/// Calls are made while a transmitter holds its own lock, so implementations
/// must not block and must not call back into the transmitter.
pub trait MessageTransport: Send + Sync {
    /// Sends one datagram from `local` to `dest`.
    fn send_datagram(&self, local: SocketAddr, dest: SocketAddr, payload: Bytes) -> Result<()>;

    /// Opens the connection registered in the table as `id`.
    fn connect(
        &self,
        id: ConnectionId,
        transport: TransportType,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<()>;

    /// Queues `payload` on an open connection.
    fn send_on_connection(&self, id: ConnectionId, payload: Bytes) -> Result<()>;
}

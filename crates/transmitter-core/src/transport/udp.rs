use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::{ConnectionId, MessageTransport};
use crate::error::{Error, Result};
use crate::types::TransportType;

/// Datagram-only [`MessageTransport`] over a bound tokio socket.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    closed: AtomicBool,
}

impl UdpTransport {
    /// Creates a new UDP transport bound to the specified address
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("SIP UDP transport bound to {}", socket.local_addr()?);
        Ok(UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl MessageTransport for UdpTransport {
    fn send_datagram(&self, _local: SocketAddr, dest: SocketAddr, payload: Bytes) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Network("UDP transport is closed".to_string()));
        }
        debug!("Sending {} byte message to {}", payload.len(), dest);
        match self.inner.socket.try_send_to(&payload, dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(Error::OutOfResources("UDP send buffer full".to_string()))
            }
            Err(e) => Err(Error::Network(format!("failed to send to {}: {}", dest, e))),
        }
    }

    fn connect(
        &self,
        _id: ConnectionId,
        transport: TransportType,
        _local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<()> {
        Err(Error::Connection(format!(
            "UDP transport cannot open {} connection to {}",
            transport, remote
        )))
    }

    fn send_on_connection(&self, id: ConnectionId, _payload: Bytes) -> Result<()> {
        Err(Error::Connection(format!("UDP transport has no connection {}", id)))
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(addr) = self.inner.socket.local_addr() {
            write!(f, "UdpTransport({})", addr)
        } else {
            write!(f, "UdpTransport(<e>)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_datagram() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr().unwrap();
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let local = transport.local_addr().unwrap();

        transport
            .send_datagram(local, dest, Bytes::from_static(b"OPTIONS sip:x SIP/2.0\r\n\r\n"))
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, local);
        assert!(buf[..n].starts_with(b"OPTIONS"));
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_sends() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        transport.close();
        let dest: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = transport
            .send_datagram(dest, dest, Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_connect_is_unsupported() {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr: SocketAddr = "127.0.0.1:5060".parse().unwrap();
        let err = transport
            .connect(ConnectionId::new(), TransportType::Tcp, addr, addr)
            .unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}

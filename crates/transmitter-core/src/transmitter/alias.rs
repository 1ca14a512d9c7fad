//! Connection reuse by alias (RFC 5923).
//!
//! A server that accepted a connection may register the peer's host name as
//! an alias of it. Requests to that host then go over the existing
//! connection instead of being resolved.

use std::net::SocketAddr;

use tracing::{debug, warn};

use super::state::ResolutionState;
use super::TransmitterInner;
use crate::transport::ConnectionId;
use crate::types::{DestAddress, TransportType};

/// Transports probed for an alias, in order. UDP never has aliases.
pub(crate) fn alias_transports(transport_param: TransportType, secure: bool) -> Vec<TransportType> {
    if transport_param.is_defined() {
        if transport_param.is_connection_oriented() {
            vec![transport_param]
        } else {
            Vec::new()
        }
    } else if secure {
        vec![TransportType::Tls]
    } else {
        TransportType::CONNECTION_ORIENTED.to_vec()
    }
}

impl TransmitterInner {
    fn find_alias_connection(&self) -> Option<(ConnectionId, SocketAddr, TransportType)> {
        let config = &self.ctx.config;
        if !config.server_connection_reuse || !config.tcp_enabled {
            return None;
        }
        let host = self.res.host.as_str();
        for transport in alias_transports(self.res.transport_param, self.res.secure) {
            for ipv6 in [false, true] {
                let Some(local) = config.local_address(transport, ipv6) else {
                    continue;
                };
                if let Some((id, remote)) = self.ctx.connections.find_by_alias(transport, local, host) {
                    return Some((id, remote, transport));
                }
            }
        }
        None
    }

    /// Sends over a connection known by the next-hop host name, if there is one.
    ///
    /// The destination keeps the connection's peer IP with port 0: the
    /// connection, not the address, decides where the message goes.
    pub(crate) fn try_connection_alias(&mut self) -> bool {
        let Some((id, remote, transport)) = self.find_alias_connection() else {
            return false;
        };
        if let Err(e) = self.use_connection(id, false) {
            warn!(id = %self.id, connection = %id, error = %e, "alias connection unusable");
            return false;
        }
        debug!(id = %self.id, connection = %id, host = %self.res.host, %transport, "reusing connection by alias");
        self.res.dest_transport = transport;
        self.res.dest = Some(DestAddress::new(SocketAddr::new(remote.ip(), 0), transport));
        self.res.send_by_alias = true;
        self.res.state = ResolutionState::Resolved;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_order() {
        assert_eq!(
            alias_transports(TransportType::Undefined, false),
            vec![TransportType::Tcp, TransportType::Tls, TransportType::Sctp]
        );
        assert_eq!(alias_transports(TransportType::Undefined, true), vec![TransportType::Tls]);
        assert_eq!(alias_transports(TransportType::Sctp, true), vec![TransportType::Sctp]);
        assert!(alias_transports(TransportType::Udp, false).is_empty());
    }
}

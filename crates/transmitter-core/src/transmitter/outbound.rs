//! Outbound proxy override.

use std::net::IpAddr;

use tracing::debug;

use super::context::NextHop;
use super::state::NextHopSource;
use super::TransmitterInner;
use crate::config::OutboundProxyConfig;
use crate::dns::ResolverScheme;
use crate::types::{CompressionType, TransportType};

/// Outbound proxy set on one transmitter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundAddress {
    pub ip: Option<IpAddr>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: TransportType,
    pub compression: CompressionType,
    /// Prefer `host` over `ip`.
    pub use_host_name: bool,
}

/// Picks the outbound proxy for a request, if any.
///
/// The transmitter's own IP wins, then its host name, then the manager
/// proxy (whose host wins over its IP). `secure` comes from the next hop the
/// proxy replaces.
pub(crate) fn outbound_next_hop(
    transmitter: &OutboundAddress,
    manager: Option<&OutboundProxyConfig>,
    secure: bool,
) -> Option<NextHop> {
    let hop = |host: String, port, transport, compression| NextHop {
        host,
        port,
        transport,
        secure,
        compression,
        scheme: ResolverScheme::Sip,
        source: NextHopSource::OutboundProxy,
    };

    if !transmitter.use_host_name {
        if let Some(ip) = transmitter.ip {
            return Some(hop(
                ip.to_string(),
                transmitter.port,
                transmitter.transport,
                transmitter.compression,
            ));
        }
    }
    if transmitter.use_host_name {
        if let Some(host) = transmitter.host.as_deref().filter(|h| !h.is_empty()) {
            return Some(hop(
                host.to_string(),
                transmitter.port,
                transmitter.transport,
                transmitter.compression,
            ));
        }
    }

    let proxy = manager?;
    let host = proxy
        .host
        .clone()
        .filter(|h| !h.is_empty())
        .or_else(|| proxy.ip.map(|ip| ip.to_string()))?;
    Some(hop(
        host,
        proxy.port.filter(|p| *p != 0),
        proxy.transport,
        proxy.compression,
    ))
}

impl TransmitterInner {
    /// Applies the outbound proxy as next hop. Returns `false` when none is configured.
    pub(crate) fn try_outbound_address(&mut self, secure: bool) -> bool {
        let Some(hop) = outbound_next_hop(&self.outbound, self.ctx.config.outbound_proxy.as_ref(), secure)
        else {
            return false;
        };
        debug!(
            id = %self.id,
            host = %hop.host,
            port = ?hop.port,
            transport = %hop.transport,
            secure,
            "using outbound proxy"
        );
        self.res.apply_next_hop(hop);
        true
    }
}

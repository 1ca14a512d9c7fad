//! Per-send resolution context.

use crate::dns::{DnsResultList, ResolverScheme};
use crate::message::Address;
use crate::types::{default_port, CompressionType, DestAddress, TransportType};

use super::state::{NextHopSource, ResolutionState};

/// Addressing data extracted from a message or from outbound configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NextHop {
    pub host: String,
    pub port: Option<u16>,
    /// Transport named by the address itself (`transport=` or Via transport).
    pub transport: TransportType,
    pub secure: bool,
    pub compression: CompressionType,
    pub scheme: ResolverScheme,
    pub source: NextHopSource,
}

/// Mutable state of one destination resolution.
///
/// Lives as long as the message it resolves; reset when resolution starts
/// over, except for a destination the application set by hand.
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    pub(crate) state: ResolutionState,
    /// Address chosen as next hop, cloned from the message.
    pub(crate) next_hop: Option<Address>,
    pub(crate) source: NextHopSource,
    /// Host currently being resolved. Overwritten by DNS answers.
    pub(crate) host: String,
    /// Host extracted from the message, kept for fallbacks after SRV.
    pub(crate) target_host: String,
    pub(crate) port: Option<u16>,
    pub(crate) transport_param: TransportType,
    pub(crate) scheme: ResolverScheme,
    pub(crate) secure: bool,
    pub(crate) compression: CompressionType,
    /// Transport decided by protocol discovery.
    pub(crate) dest_transport: TransportType,
    pub(crate) dest: Option<DestAddress>,
    pub(crate) manual_dest: bool,
    pub(crate) send_by_alias: bool,
    pub(crate) dns_list: DnsResultList,
    /// Generation of the outstanding DNS query. Stale completions are ignored.
    pub(crate) query_id: u64,
    /// Destinations the application rejected during the current send.
    pub(crate) rejected_rounds: u32,
}

impl ResolutionContext {
    /// Clears extracted and resolved data unless the destination was set manually.
    /// The DNS list survives so left-over records can still be tried.
    pub(crate) fn reset(&mut self) {
        if self.manual_dest {
            return;
        }
        self.next_hop = None;
        self.source = NextHopSource::Undefined;
        self.host.clear();
        self.target_host.clear();
        self.port = None;
        self.transport_param = TransportType::Undefined;
        self.scheme = ResolverScheme::Undefined;
        self.secure = false;
        self.compression = CompressionType::None;
        self.dest_transport = TransportType::Undefined;
        self.dest = None;
        self.send_by_alias = false;
    }

    /// Applies an extracted next hop and moves to `UriFound`.
    pub(crate) fn apply_next_hop(&mut self, hop: NextHop) {
        self.host = hop.host.clone();
        self.target_host = hop.host;
        self.port = hop.port;
        self.transport_param = hop.transport;
        self.secure = hop.secure;
        self.compression = hop.compression;
        self.scheme = hop.scheme;
        self.source = hop.source;
        self.state = ResolutionState::UriFound;
    }

    /// Explicit port, or the default for the secure flag and transport.
    pub(crate) fn chosen_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None => {
                let transport = if self.transport_param.is_defined() {
                    self.transport_param
                } else {
                    self.dest_transport
                };
                default_port(self.secure, transport)
            }
        }
    }

    pub(crate) fn next_query_id(&mut self) -> u64 {
        self.query_id = self.query_id.wrapping_add(1);
        self.query_id
    }
}

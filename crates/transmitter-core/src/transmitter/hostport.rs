//! Host and port resolution (RFC 3263 Section 4.2).

use std::net::SocketAddr;

use tracing::debug;

use super::state::ResolutionState;
use super::{Step, TransmitterInner};
use crate::dns::srv::srv_name;
use crate::dns::{ResolveMode, ResolveRequest};
use crate::types::{parse_ip_literal, DestAddress, TransportType};

impl TransmitterInner {
    /// Resolves host and port once the transport is known.
    ///
    /// IP literals resolve at once. With enhanced DNS, an explicit transport
    /// and no port, SRV is queried first. Everything else is an A/AAAA lookup.
    pub(crate) fn host_port_discovery(&mut self) -> Step {
        let port = self.res.chosen_port();
        if let Some(ip) = parse_ip_literal(&self.res.host) {
            let dest = DestAddress::new(SocketAddr::new(ip, port), self.res.dest_transport);
            debug!(id = %self.id, %dest, "destination is an IP literal");
            self.res.dest = Some(dest);
            self.res.state = ResolutionState::Resolved;
            return Step::Continue;
        }

        let transport_known = self.res.transport_param.is_defined() || self.res.secure;
        if self.ctx.config.enhanced_dns && self.res.port.is_none() && transport_known {
            let request = ResolveRequest::new(ResolveMode::FindHostPortByTransport, self.res.host.clone())
                .with_scheme(self.res.scheme)
                .with_secure(self.res.secure)
                .with_transport(self.res.dest_transport);
            return self.query(request, ResolutionState::ResolvingHostPort);
        }

        let host = self.res.host.clone();
        self.resolve_ip_by_host(host, port)
    }

    /// A/AAAA lookup of `host`; answers carry `port`.
    pub(crate) fn resolve_ip_by_host(&mut self, host: String, port: u16) -> Step {
        let request = ResolveRequest::new(ResolveMode::FindIpByHost, host)
            .with_secure(self.res.secure)
            .with_port(Some(port))
            .with_transport(self.res.dest_transport);
        self.query(request, ResolutionState::ResolvingIp)
    }

    /// SRV lookup of an owner name produced by NAPTR.
    pub(crate) fn resolve_host_port_by_srv(&mut self, name: String, transport: TransportType) -> Step {
        let request = ResolveRequest::new(ResolveMode::FindHostPortBySrvString, name)
            .with_scheme(self.res.scheme)
            .with_secure(self.res.secure)
            .with_transport(transport);
        self.query(request, ResolutionState::ResolvingHostPort)
    }

    /// SRV for the extracted host failed: look the host itself up.
    pub(crate) fn fall_back_to_host(&mut self) -> Step {
        let host = self.res.target_host.clone();
        let port = self.res.chosen_port();
        debug!(
            id = %self.id,
            %host,
            port,
            srv = %srv_name(self.res.scheme, &host, self.res.dest_transport, self.res.secure),
            "no SRV answer, resolving host"
        );
        self.res.host = host.clone();
        self.resolve_ip_by_host(host, port)
    }
}

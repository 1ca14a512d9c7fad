//! Transport selection (RFC 3263 Section 4.1).

use tracing::debug;

use super::state::ResolutionState;
use super::{Step, TransmitterInner};
use crate::dns::srv::three_way_order;
use crate::dns::{ResolveMode, ResolveRequest, ResolverScheme};
use crate::error::{Error, Result};
use crate::types::{parse_ip_literal, TransportType};

/// Transport named by the address itself. `sips` forces TLS and conflicts with UDP.
pub(crate) fn explicit_transport(param: TransportType, secure: bool) -> Result<Option<TransportType>> {
    if !param.is_defined() {
        return Ok(secure.then_some(TransportType::Tls));
    }
    if secure {
        if param == TransportType::Udp {
            return Err(Error::Configuration(
                "a secure target cannot be reached over UDP".to_string(),
            ));
        }
        return Ok(Some(TransportType::Tls));
    }
    Ok(Some(param))
}

/// Transport implied by an IP literal or an explicit port.
pub(crate) fn implicit_transport(host: &str, port: Option<u16>, secure: bool) -> Option<TransportType> {
    if parse_ip_literal(host).is_some() || port.is_some() {
        Some(transport_by_secure(secure))
    } else {
        None
    }
}

fn transport_by_secure(secure: bool) -> TransportType {
    if secure {
        TransportType::Tls
    } else {
        TransportType::Udp
    }
}

impl TransmitterInner {
    /// Decides the transport of a freshly extracted next hop.
    ///
    /// Explicit and implicit rules answer synchronously. Otherwise NAPTR is
    /// queried when enhanced DNS is on, or the transport is inferred from
    /// the secure flag.
    pub(crate) fn initial_transport_find(&mut self) -> Result<Step> {
        if let Some(transport) = explicit_transport(self.res.transport_param, self.res.secure)? {
            debug!(id = %self.id, %transport, "explicit transport");
            return Ok(self.transport_found(transport));
        }
        if let Some(transport) = implicit_transport(&self.res.host, self.res.port, self.res.secure) {
            debug!(id = %self.id, %transport, "implicit transport");
            return Ok(self.transport_found(transport));
        }
        if self.ctx.config.enhanced_dns {
            let request = ResolveRequest::new(ResolveMode::FindTransportByNaptr, self.res.host.clone())
                .with_scheme(ResolverScheme::Undefined)
                .with_secure(self.res.secure);
            return Ok(self.query(request, ResolutionState::ResolvingTransportNaptr));
        }
        Ok(self.decide_transport_by_message())
    }

    /// NAPTR gave nothing: query SRV for every transport with a local address.
    pub(crate) fn find_transport_by_srv(&mut self) -> Result<Step> {
        let config = &self.ctx.config;
        let candidates = three_way_order(self.res.secure, |t| config.has_local_address(t));
        if candidates.is_empty() {
            debug!(id = %self.id, "no local address for any SRV transport");
            self.res.state = ResolutionState::ResolvingTransport3WaySrv;
            return Ok(Step::NotFound);
        }
        let request = ResolveRequest::new(ResolveMode::FindTransportBy3WaySrv, self.res.target_host.clone())
            .with_scheme(self.res.scheme)
            .with_secure(self.res.secure)
            .with_candidates(candidates);
        Ok(self.query(request, ResolutionState::ResolvingTransport3WaySrv))
    }

    /// UDP, or TLS for secure targets.
    pub(crate) fn decide_transport_by_message(&mut self) -> Step {
        let transport = transport_by_secure(self.res.secure);
        debug!(id = %self.id, %transport, secure = self.res.secure, "transport inferred from secure flag");
        self.transport_found(transport)
    }

    fn transport_found(&mut self, transport: TransportType) -> Step {
        self.res.dest_transport = transport;
        self.res.state = ResolutionState::TransportFound;
        Step::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_transport_rules() {
        assert_eq!(explicit_transport(TransportType::Tcp, false).unwrap(), Some(TransportType::Tcp));
        assert_eq!(explicit_transport(TransportType::Tcp, true).unwrap(), Some(TransportType::Tls));
        assert_eq!(explicit_transport(TransportType::Undefined, true).unwrap(), Some(TransportType::Tls));
        assert_eq!(explicit_transport(TransportType::Undefined, false).unwrap(), None);
        assert!(matches!(
            explicit_transport(TransportType::Udp, true),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_implicit_transport_rules() {
        assert_eq!(implicit_transport("192.0.2.1", None, false), Some(TransportType::Udp));
        assert_eq!(implicit_transport("[2001:db8::1]", None, true), Some(TransportType::Tls));
        assert_eq!(implicit_transport("example.com", Some(5080), false), Some(TransportType::Udp));
        assert_eq!(implicit_transport("example.com", None, false), None);
    }
}

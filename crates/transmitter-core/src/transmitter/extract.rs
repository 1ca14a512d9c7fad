//! Next-hop extraction.
//!
//! Requests go to the outbound proxy, the first Route or the Request-URI;
//! responses go back along the top Via (RFC 3261 Section 18.2.2, RFC 3581).
//! tel URIs are turned into SIP URIs through ENUM (RFC 6116) or the
//! application.

use tracing::{debug, warn};

use super::context::NextHop;
use super::state::{NextHopSource, ResolutionState};
use super::{Step, TransmitterInner};
use crate::dns::enum_query::{self, NaptrRegexp};
use crate::dns::{ResolveMode, ResolveRequest, ResolverScheme};
use crate::error::{Error, Result};
use crate::message::{Address, SipMessage, SipResponse, SipUri, TelUri};
use crate::types::TransportType;

/// Next hop for a response: the top Via.
///
/// Connection-oriented transports prefer `received`, then `maddr`; UDP
/// prefers `maddr`, then `received`. A valued `rport` replaces the sent-by port.
pub(crate) fn response_next_hop(response: &SipResponse) -> Result<NextHop> {
    let via = response.vias.first().ok_or(Error::MissingVia)?;
    if !via.transport.is_defined() {
        return Err(Error::MalformedUri(format!("Via transport of '{}' is not supported", via)));
    }

    let sent_by = Some(via.host.clone());
    let host = if via.transport.is_connection_oriented() {
        via.received.clone().or_else(|| via.maddr.clone()).or(sent_by)
    } else {
        via.maddr.clone().or_else(|| via.received.clone()).or(sent_by)
    }
    .filter(|h| !h.is_empty())
    .ok_or_else(|| Error::MissingHost("Via".to_string()))?;

    let port = match via.rport {
        Some(Some(rport)) => Some(rport),
        _ => via.port,
    };

    Ok(NextHop {
        host,
        port,
        transport: via.transport,
        secure: false,
        compression: via.comp,
        scheme: ResolverScheme::Undefined,
        source: NextHopSource::Via,
    })
}

/// Next hop for a SIP, SIPS, im or pres URI.
///
/// A Route hop that is not secure inherits the secure flag of the Request-URI.
pub(crate) fn sip_uri_next_hop(uri: &SipUri, source: NextHopSource, request_uri_secure: bool) -> Result<NextHop> {
    let mut secure = uri.is_secure();
    if source != NextHopSource::RequestUri && !secure {
        secure = request_uri_secure;
    }
    let host = uri
        .maddr
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(&uri.host);
    if host.is_empty() {
        return Err(Error::MissingHost(uri.to_string()));
    }
    Ok(NextHop {
        host: host.to_string(),
        port: uri.port,
        transport: uri.transport,
        secure,
        compression: uri.comp,
        scheme: uri.scheme.into(),
        source,
    })
}

/// `true` when `candidate` names the same number as `original`.
fn same_number(candidate: &TelUri, original: &TelUri) -> bool {
    candidate.digits() == original.digits()
}

impl TransmitterInner {
    /// Extracts the next hop of the current message.
    ///
    /// Moves to `UriFound`, or to `WaitingForUri` while an ENUM query runs.
    pub(crate) fn identify_next_hop(&mut self) -> Result<Step> {
        let (request_uri, first_route) = match &self.message {
            Some(SipMessage::Response(response)) => {
                let hop = response_next_hop(response)?;
                debug!(id = %self.id, host = %hop.host, port = ?hop.port, transport = %hop.transport, "response next hop");
                self.res.apply_next_hop(hop);
                return Ok(Step::Continue);
            }
            Some(SipMessage::Request(request)) => (
                request.request_uri.clone(),
                request.first_route().map(|r| r.address.clone()),
            ),
            None => return Err(Error::IllegalAction("no message to resolve".to_string())),
        };
        let request_uri_secure = request_uri.is_secure();

        if self.force_outbound {
            self.res.next_hop = Some(request_uri.clone());
            if self.try_outbound_address(request_uri_secure) {
                return Ok(Step::Continue);
            }
        }

        let (address, source) = match first_route {
            Some(route) if self.send_to_first_route => (route, NextHopSource::FirstRoute),
            route => {
                if route.is_none() && !self.ignore_outbound_proxy {
                    self.res.next_hop = Some(request_uri.clone());
                    if self.try_outbound_address(request_uri_secure) {
                        return Ok(Step::Continue);
                    }
                }
                (request_uri, NextHopSource::RequestUri)
            }
        };

        self.res.next_hop = Some(address.clone());
        self.res.source = source;
        match address {
            Address::Sip(uri) => self.use_sip_uri(&uri, source, request_uri_secure),
            Address::Tel(tel) if self.ctx.config.resolve_tel_urls && !tel.enumdi => self.start_enum_query(&tel),
            other => self.convert_other_url(&other, source, request_uri_secure),
        }
    }

    fn use_sip_uri(&mut self, uri: &SipUri, source: NextHopSource, request_uri_secure: bool) -> Result<Step> {
        let hop = sip_uri_next_hop(uri, source, request_uri_secure)?;
        debug!(
            id = %self.id,
            host = %hop.host,
            port = ?hop.port,
            transport = %hop.transport,
            secure = hop.secure,
            ?source,
            "request next hop"
        );
        self.res.apply_next_hop(hop);
        Ok(Step::Continue)
    }

    /// Asks the resolver for the ENUM NAPTR records of `tel`.
    fn start_enum_query(&mut self, tel: &TelUri) -> Result<Step> {
        let aus = enum_query::application_unique_string(tel);
        let domain = enum_query::enum_domain(tel, &self.ctx.config.enum_domain);
        debug!(id = %self.id, %aus, %domain, "resolving tel URI through ENUM");
        self.res.host = aus;
        let request = ResolveRequest::new(ResolveMode::FindUriByNaptr, domain);
        Ok(self.query(request, ResolutionState::WaitingForUri))
    }

    /// Hands an address the engine cannot route to the application.
    fn convert_other_url(&mut self, address: &Address, source: NextHopSource, request_uri_secure: bool) -> Result<Step> {
        match self.hooks.other_url_found(self.id, address) {
            Some(uri) => {
                debug!(id = %self.id, from = %address, to = %uri, "address converted by application");
                let step = self.use_sip_uri(&uri, source, request_uri_secure)?;
                self.res.next_hop = Some(Address::Sip(uri));
                Ok(step)
            }
            None => Err(Error::UnsupportedAddress(address.to_string())),
        }
    }

    /// Consumes ENUM answers once the query completed.
    ///
    /// The first regexp producing a SIP URI wins. Without one the tel URI
    /// is marked `enumdi` and offered to the application.
    pub(crate) fn handle_enum_result(&mut self) -> Result<Step> {
        let Some(Address::Tel(mut tel)) = self.res.next_hop.clone() else {
            return Err(Error::UnsupportedAddress("ENUM answer without a tel URI".to_string()));
        };
        let source = self.res.source;
        let request_uri_secure = self.request_uri_secure();
        let aus = enum_query::application_unique_string(&tel);

        while let Some(field) = self.res.dns_list.pop_enum_regexp() {
            let converted = match self.evaluate_naptr_regexp(&field, &aus) {
                Ok(Some(converted)) => converted,
                Ok(None) => continue,
                Err(e) => {
                    warn!(id = %self.id, regexp = %field, error = %e, "unusable ENUM regexp");
                    continue;
                }
            };
            match converted.parse::<Address>() {
                Ok(Address::Sip(uri)) => {
                    debug!(id = %self.id, tel = %tel, uri = %uri, "tel URI converted through ENUM");
                    let step = self.use_sip_uri(&uri, source, request_uri_secure)?;
                    self.res.next_hop = Some(Address::Sip(uri));
                    return Ok(step);
                }
                Ok(Address::Tel(result)) if result.enumdi || same_number(&result, &tel) => {
                    tel.enumdi = true;
                }
                _ => debug!(id = %self.id, result = %converted, "ENUM result is not a SIP URI"),
            }
        }

        tel.enumdi = true;
        self.mark_enumdi(&tel);
        let address = Address::Tel(tel);
        self.res.next_hop = Some(address.clone());
        self.convert_other_url(&address, source, request_uri_secure)
    }

    /// Applies one `!ere!replacement!flags` field to the AUS.
    fn evaluate_naptr_regexp(&self, field: &str, aus: &str) -> Result<Option<String>> {
        let regexp = NaptrRegexp::parse(field)?;
        match self.hooks.apply_regexp(&regexp.ere, aus, regexp.flags)? {
            Some(matches) => Ok(Some(enum_query::substitute(aus, &regexp.replacement, &matches)?)),
            None => Ok(None),
        }
    }

    /// Records `enumdi` on the Request-URI so later sends skip ENUM.
    fn mark_enumdi(&mut self, tel: &TelUri) {
        if self.res.source != NextHopSource::RequestUri {
            return;
        }
        if let Some(SipMessage::Request(request)) = self.message.as_mut() {
            if let Address::Tel(uri) = &mut request.request_uri {
                if same_number(uri, tel) {
                    uri.enumdi = true;
                }
            }
        }
    }

    fn request_uri_secure(&self) -> bool {
        match &self.message {
            Some(SipMessage::Request(request)) => request.request_uri.is_secure(),
            _ => false,
        }
    }
}

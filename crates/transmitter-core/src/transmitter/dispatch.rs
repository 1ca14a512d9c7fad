//! Hands resolved messages to the transport layer.

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::events::TransmitterEvent;
use super::state::{NextHopSource, TransmitterState};
use super::{SentMessage, TransmitterInner};
use crate::error::{Error, Result};
use crate::message::{Address, RouteKind, SipMessage, SipRequest, UriScheme};
use crate::transport::{ConnectionId, ConnectionState};
use crate::types::{DestAddress, TransportType};

/// Connection, network and resource errors keep their reason; anything
/// else is a network error.
fn classify_send_error(err: Error) -> Error {
    match err {
        Error::OutOfResources(_) | Error::Network(_) | Error::Connection(_) => err,
        other => Error::Network(other.to_string()),
    }
}

/// Host part for a Via sent-by. IPv6 is bracketed.
fn sent_by_host(local: SocketAddr) -> String {
    match local {
        SocketAddr::V4(v4) => v4.ip().to_string(),
        SocketAddr::V6(v6) => format!("[{}]", v6.ip()),
    }
}

/// Rewrites the top Via with the transport and local address in use.
fn fix_top_via(request: &mut SipRequest, transport: TransportType, local: SocketAddr) {
    let Some(via) = request.vias.first_mut() else {
        return;
    };
    via.transport = if transport.is_defined() {
        transport
    } else {
        TransportType::Udp
    };
    via.host = sent_by_host(local);
    via.port = Some(local.port());
}

/// `im:` and `pres:` next hops are sent as `sip:`.
fn fix_presence_scheme(request: &mut SipRequest, source: NextHopSource) {
    let address = match source {
        NextHopSource::RequestUri => Some(&mut request.request_uri),
        NextHopSource::FirstRoute => request
            .routes
            .iter_mut()
            .find(|r| r.kind == RouteKind::Route)
            .map(|r| &mut r.address),
        _ => None,
    };
    if let Some(Address::Sip(uri)) = address {
        if matches!(uri.scheme, UriScheme::Im | UriScheme::Pres) {
            uri.scheme = UriScheme::Sip;
        }
    }
}

impl TransmitterInner {
    /// Sends to the resolved destination. Failures end the attempt.
    pub(crate) fn send(&mut self, reached_from_app: bool) -> Result<()> {
        match self.process_and_transmit() {
            Ok(()) => Ok(()),
            Err(e) => self.move_to_failure(e, None, reached_from_app),
        }
    }

    fn process_and_transmit(&mut self) -> Result<()> {
        let dest = self
            .res
            .dest
            .ok_or_else(|| Error::ResolutionFailed("no destination to send to".to_string()))?;
        let local = self.ctx.config.local_address_for(dest.transport, &dest.addr);
        self.local_addr = local;
        self.prepare_message(dest, local);

        self.change_state(TransmitterState::ReadyForSending, None);
        if self.state == TransmitterState::Terminated {
            return Ok(());
        }

        let payload = match &self.message {
            Some(message) => message.encode(),
            None => return Err(Error::IllegalAction("no message to send".to_string())),
        };
        if !self.keep_message {
            self.message = None;
        }

        let connection = self.transmit(dest, local, payload.clone()).map_err(classify_send_error)?;
        debug!(id = %self.id, %dest, local = ?local, bytes = payload.len(), "message sent");
        self.last_sent = Some(SentMessage {
            payload,
            dest,
            local,
            connection,
        });
        self.change_state(TransmitterState::MsgSent, None);
        Ok(())
    }

    fn prepare_message(&mut self, dest: DestAddress, local: Option<SocketAddr>) {
        let fix_via = self.fix_via;
        let source = self.res.source;
        let Some(SipMessage::Request(request)) = self.message.as_mut() else {
            return;
        };
        if fix_via {
            if let Some(local) = local {
                fix_top_via(request, dest.transport, local);
            }
        }
        fix_presence_scheme(request, source);
    }

    fn transmit(
        &mut self,
        dest: DestAddress,
        local: Option<SocketAddr>,
        payload: Bytes,
    ) -> Result<Option<ConnectionId>> {
        if dest.transport.is_connection_oriented() {
            let id = self.connection_for(dest, local)?;
            self.ctx.transport.send_on_connection(id, payload)?;
            return Ok(Some(id));
        }
        let local = local.ok_or_else(|| Error::Network(format!("no local address to reach {}", dest)))?;
        self.ctx.transport.send_datagram(local, dest.addr, payload)?;
        Ok(None)
    }

    /// Connection to send on: the attached one, a persistent match, or a new one.
    fn connection_for(&mut self, dest: DestAddress, local: Option<SocketAddr>) -> Result<ConnectionId> {
        if let Some(id) = self.connection {
            let attached = self.ctx.connections.get(id);
            if attached.is_some_and(|c| c.is_usable() && c.transport == dest.transport) {
                return Ok(id);
            }
            debug!(id = %self.id, connection = %id, "attached connection cannot reach destination");
            self.detach_connection();
        }
        if self.res.send_by_alias {
            return Err(Error::Connection(format!(
                "alias connection to '{}' is gone",
                self.res.host
            )));
        }

        let local = local.ok_or_else(|| Error::Network(format!("no local address to reach {}", dest)))?;
        if self.persistent {
            if let Some(id) = self.ctx.connections.find_by_destination(dest.transport, local, dest.addr) {
                self.use_connection(id, false)?;
                return Ok(id);
            }
        }

        let id = self.ctx.connections.insert(dest.transport, local, dest.addr);
        if let Err(e) = self.ctx.transport.connect(id, dest.transport, local, dest.addr) {
            self.ctx.connections.remove(id);
            return Err(e);
        }
        self.ctx.connections.set_state(id, ConnectionState::Connected)?;
        self.use_connection(id, true)?;
        Ok(id)
    }

    /// Attaches to `id` and reports it as the connection in use.
    pub(crate) fn use_connection(&mut self, id: ConnectionId, created: bool) -> Result<()> {
        self.attach_connection(id)?;
        debug!(id = %self.id, connection = %id, created, "connection in use");
        self.events.emit(TransmitterEvent::NewConnectionInUse {
            transmitter: self.id,
            connection: id,
            created,
        });
        Ok(())
    }

    /// Sends the last encoded message again, without state changes.
    pub(crate) fn retransmit(&mut self) -> Result<()> {
        if self.state == TransmitterState::Terminated {
            return Err(Error::Terminated);
        }
        let Some(sent) = self.last_sent.clone() else {
            trace!(id = %self.id, "nothing to retransmit");
            return Ok(());
        };
        trace!(id = %self.id, dest = %sent.dest, "retransmitting");
        let result = match (sent.connection, sent.local) {
            (Some(id), _) => self.ctx.transport.send_on_connection(id, sent.payload),
            (None, Some(local)) => self.ctx.transport.send_datagram(local, sent.dest.addr, sent.payload),
            (None, None) => Err(Error::Network(format!("no local address to reach {}", sent.dest))),
        };
        result.map_err(|e| {
            warn!(id = %self.id, error = %e, "retransmission failed");
            classify_send_error(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Method, SipUri, ViaHeader};

    #[test]
    fn test_fix_top_via() {
        let mut request = SipRequest::new(Method::Invite, SipUri::sip("example.com"))
            .with_via(ViaHeader::new(TransportType::Udp, "placeholder.invalid", None).with_branch("z9hG4bK1"));
        fix_top_via(&mut request, TransportType::Tcp, "192.0.2.10:5070".parse().unwrap());
        let via = &request.vias[0];
        assert_eq!(via.transport, TransportType::Tcp);
        assert_eq!(via.host, "192.0.2.10");
        assert_eq!(via.port, Some(5070));
        assert_eq!(via.branch.as_deref(), Some("z9hG4bK1"));

        fix_top_via(&mut request, TransportType::Undefined, "[2001:db8::5]:5060".parse().unwrap());
        assert_eq!(request.vias[0].transport, TransportType::Udp);
        assert_eq!(request.vias[0].host, "[2001:db8::5]");
    }

    #[test]
    fn test_presence_scheme_becomes_sip() {
        let pres = SipUri::new(UriScheme::Pres, "example.com").with_user("alice");
        let mut request = SipRequest::new(Method::Other("SUBSCRIBE".into()), pres);
        fix_presence_scheme(&mut request, NextHopSource::RequestUri);
        assert_eq!(request.request_uri.as_sip().unwrap().scheme, UriScheme::Sip);

        let im = SipUri::new(UriScheme::Im, "proxy.example.com");
        let mut request = SipRequest::new(Method::Other("MESSAGE".into()), SipUri::sip("example.com"))
            .with_record_route(SipUri::new(UriScheme::Im, "rr.example.com"))
            .with_route(im);
        fix_presence_scheme(&mut request, NextHopSource::FirstRoute);
        assert_eq!(request.routes[0].address.as_sip().unwrap().scheme, UriScheme::Im);
        assert_eq!(request.routes[1].address.as_sip().unwrap().scheme, UriScheme::Sip);
    }

    #[test]
    fn test_send_error_classification() {
        assert!(matches!(
            classify_send_error(Error::Connection("reset".into())),
            Error::Connection(_)
        ));
        assert!(matches!(
            classify_send_error(Error::Io(std::io::Error::other("unreachable"))),
            Error::Network(_)
        ));
        assert!(matches!(
            classify_send_error(Error::OutOfResources("queue".into())),
            Error::OutOfResources(_)
        ));
    }
}

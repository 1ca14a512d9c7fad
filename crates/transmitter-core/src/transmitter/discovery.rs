//! The resolution state machine.
//!
//! `discover` runs the machine until the message is handed to the
//! dispatcher, a DNS query is outstanding, or the attempt fails. DNS
//! completions re-enter it at the state it stopped in.

use std::net::SocketAddr;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::hooks::{AddressQuery, AddressResolution, DestinationDecision};
use super::state::{ResolutionState, SendFailureReason, TransmitterState};
use super::{SecurityAssociation, Step, TransmitterInner};
use crate::dns::{DnsCompletion, DnsOutcome, DnsRecord, ResolveRequest, ResolveStatus};
use crate::error::{Error, Result};
use crate::message::SipMessage;
use crate::types::{parse_ip_literal, DestAddress, TransportType};

/// Re-resolution rounds one send may ask for before it fails.
pub(crate) const MAX_REJECTED_ROUNDS: u32 = 8;

/// Completion target of a pending query.
fn on_dns_outcome(transmitter: Weak<Mutex<TransmitterInner>>, query_id: u64, outcome: DnsOutcome) {
    let Some(inner) = transmitter.upgrade() else {
        trace!(query_id, "DNS answer for a released transmitter");
        return;
    };
    inner.lock().dns_completed(query_id, outcome);
}

impl TransmitterInner {
    /// Drives resolution as far as it goes without waiting.
    ///
    /// `reached_from_app` is `false` when called from a DNS completion or
    /// a resumed hold; failures are then always reported as events.
    pub(crate) fn discover(&mut self, reached_from_app: bool) -> Result<()> {
        if let Some(association) = self.security {
            return self.send_over_security_association(association, reached_from_app);
        }

        if self.res.state == ResolutionState::Undefined {
            self.change_state(TransmitterState::ResolvingAddr, None);
            if self.state == TransmitterState::Terminated {
                return Ok(());
            }
        }

        if self.drain_dns_list() == Step::Pending {
            return Ok(());
        }

        loop {
            if self.state == TransmitterState::Terminated {
                return Ok(());
            }
            let before = self.res.state;
            let step = self.resolution_step(reached_from_app);
            if self.res.state != before {
                debug!(id = %self.id, from = ?before, to = ?self.res.state, "resolution state change");
            }
            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Pending) | Ok(Step::Done) => return Ok(()),
                Ok(Step::NotFound) => {
                    if self.drain_dns_list() == Step::Pending {
                        return Ok(());
                    }
                }
                Err(e) => return self.move_to_failure(e, None, reached_from_app),
            }
        }
    }

    fn resolution_step(&mut self, reached_from_app: bool) -> Result<Step> {
        match self.res.state {
            ResolutionState::Undefined => self.handle_undefined(),
            ResolutionState::Started | ResolutionState::ResolvingIp => {
                self.res.state = ResolutionState::Unresolved;
                Ok(Step::Continue)
            }
            ResolutionState::WaitingForUri => self.handle_enum_result(),
            ResolutionState::UriFound => self.handle_uri_found(),
            ResolutionState::ResolvingTransportNaptr => self.find_transport_by_srv(),
            ResolutionState::ResolvingTransport3WaySrv => Ok(self.decide_transport_by_message()),
            ResolutionState::TransportFound => Ok(self.host_port_discovery()),
            ResolutionState::ResolvingHostPort => Ok(self.fall_back_to_host()),
            ResolutionState::Resolved => self.state_resolved(reached_from_app),
            ResolutionState::Unresolved => {
                let host = self.res.target_host.clone();
                self.move_to_failure(
                    Error::ResolutionFailed(format!("no destination found for '{}'", host)),
                    Some(SendFailureReason::NetworkError),
                    reached_from_app,
                )?;
                Ok(Step::Done)
            }
        }
    }

    /// Issues a DNS query and waits for it in `waiting`.
    ///
    /// Inline answers are appended to the DNS list and reported as
    /// `NotFound`, so the caller drains the list before moving on.
    pub(crate) fn query(&mut self, request: ResolveRequest, waiting: ResolutionState) -> Step {
        let query_id = self.res.next_query_id();
        let weak = self.self_ref.clone();
        let completion = DnsCompletion::new(move |outcome| on_dns_outcome(weak, query_id, outcome));
        debug!(
            id = %self.id,
            mode = ?request.mode,
            query = %request.query,
            transport = %request.transport,
            query_id,
            "DNS query"
        );
        self.res.state = waiting;
        match self.ctx.resolver.resolve(request, completion) {
            ResolveStatus::Answered(records) => {
                trace!(id = %self.id, count = records.len(), "DNS answered inline");
                self.res.dns_list.extend(records);
                Step::NotFound
            }
            ResolveStatus::NotFound => {
                trace!(id = %self.id, "DNS found nothing");
                Step::NotFound
            }
            ResolveStatus::Pending => Step::Pending,
        }
    }

    /// Resumes resolution with the outcome of query `query_id`.
    pub(crate) fn dns_completed(&mut self, query_id: u64, outcome: DnsOutcome) {
        if self.state == TransmitterState::Terminated {
            warn!(id = %self.id, query_id, "DNS answer after termination ignored");
            return;
        }
        if query_id != self.res.query_id || !self.res.state.is_waiting_for_dns() {
            warn!(
                id = %self.id,
                query_id,
                current = self.res.query_id,
                state = ?self.res.state,
                "stale DNS answer ignored"
            );
            return;
        }
        if let DnsOutcome::Answered(records) = outcome {
            self.res.dns_list.extend(records);
        }
        // The query is answered; another completion for it must not resume us.
        self.res.next_query_id();
        if let Err(e) = self.discover(false) {
            warn!(id = %self.id, error = %e, "resolution failed after DNS answer");
        }
    }

    /// Consumes list records until one resolves, one starts a query, or none applies.
    fn drain_dns_list(&mut self) -> Step {
        let mut step = Step::NotFound;
        while self.res.state != ResolutionState::Resolved {
            match self.take_dns_record() {
                None => break,
                Some(Step::Pending) => return Step::Pending,
                Some(next) => step = next,
            }
        }
        step
    }

    /// Uses the first applicable record: IP, then host, then SRV.
    fn take_dns_record(&mut self) -> Option<Step> {
        use ResolutionState::*;
        let state = self.res.state;

        if self.res.secure {
            let dropped = self.res.dns_list.retain_transport(TransportType::Tls);
            if dropped > 0 {
                debug!(id = %self.id, dropped, "non-TLS records dropped for a secure target");
            }
        }

        if state != Resolved {
            if let Some(DnsRecord::Ip { addr, port, transport }) = self.res.dns_list.pop_ip() {
                let dest = DestAddress::new(SocketAddr::new(addr, port), transport);
                debug!(id = %self.id, %dest, "destination taken from DNS list");
                self.res.dest = Some(dest);
                self.res.dest_transport = transport;
                self.res.state = Resolved;
                return Some(Step::Continue);
            }
        }

        if matches!(
            state,
            Undefined
                | Started
                | WaitingForUri
                | UriFound
                | ResolvingTransportNaptr
                | ResolvingTransport3WaySrv
                | ResolvingHostPort
                | ResolvingIp
        ) {
            if let Some(DnsRecord::Host { host, port, transport }) = self.res.dns_list.pop_host() {
                debug!(id = %self.id, %host, ?port, %transport, "host taken from DNS list");
                self.res.dest_transport = transport;
                self.res.host = host.clone();
                let port = port.unwrap_or_else(|| self.res.chosen_port());
                return Some(self.resolve_ip_by_host(host, port));
            }
        }

        if matches!(
            state,
            Undefined | WaitingForUri | UriFound | ResolvingTransportNaptr | ResolvingHostPort
        ) {
            if let Some(DnsRecord::Srv { name, transport }) = self.res.dns_list.pop_srv() {
                debug!(id = %self.id, %name, %transport, "SRV name taken from DNS list");
                self.res.dest_transport = transport;
                return Some(self.resolve_host_port_by_srv(name, transport));
            }
        }
        None
    }

    /// Starts a fresh round: extract the next hop and offer it to the application.
    fn handle_undefined(&mut self) -> Result<Step> {
        self.res.reset();
        if self.res.manual_dest && self.res.dest.is_some() {
            self.res.state = ResolutionState::Resolved;
            return Ok(Step::Continue);
        }

        self.res.state = ResolutionState::Started;
        let step = self.identify_next_hop()?;
        if step == Step::Pending || self.res.state != ResolutionState::UriFound {
            return Ok(step);
        }

        let query = AddressQuery {
            transmitter: self.id,
            host: &self.res.host,
            port: self.res.chosen_port(),
            transport: self.res.transport_param,
            secure: self.res.secure,
        };
        match self.hooks.resolve_address(&query) {
            AddressResolution::Continue => {}
            AddressResolution::Resolved { host, port, transport } => {
                if host.is_empty() {
                    return Err(Error::ResolutionFailed(
                        "application resolved the next hop to an empty host".to_string(),
                    ));
                }
                debug!(id = %self.id, %host, ?port, %transport, "next hop resolved by application");
                self.res.host = host.clone();
                self.res.target_host = host;
                if port.is_some() {
                    self.res.port = port;
                }
                if transport.is_defined() {
                    self.res.transport_param = transport;
                }
            }
            AddressResolution::Abort => {
                return Err(Error::ResolutionFailed("aborted by application".to_string()));
            }
        }
        Ok(step)
    }

    fn handle_uri_found(&mut self) -> Result<Step> {
        if matches!(self.message, Some(SipMessage::Response(_))) {
            self.res.dest_transport = self.res.transport_param;
            self.res.state = ResolutionState::TransportFound;
            return Ok(Step::Continue);
        }
        if parse_ip_literal(&self.res.host).is_none() && self.try_connection_alias() {
            return Ok(Step::Continue);
        }
        self.initial_transport_find()
    }

    /// Reports the final destination and sends, unless the application objects.
    fn state_resolved(&mut self, reached_from_app: bool) -> Result<Step> {
        if self.state == TransmitterState::OnHold {
            self.send(reached_from_app)?;
            return Ok(Step::Done);
        }
        let original = self
            .res
            .dest
            .ok_or_else(|| Error::ResolutionFailed("resolved without a destination".to_string()))?;

        self.change_state(TransmitterState::FinalDestResolved, None);
        if self.state == TransmitterState::Terminated {
            return Ok(Step::Done);
        }

        let mut dest = original;
        let decision = match &self.message {
            Some(message) => self.hooks.final_dest_resolved(self.id, message, &mut dest),
            None => return Err(Error::IllegalAction("no message to send".to_string())),
        };
        if dest != original {
            debug!(id = %self.id, from = %original, to = %dest, "destination rewritten by application");
            self.res.dest = Some(dest);
            self.res.dest_transport = dest.transport;
        }

        match decision {
            DestinationDecision::Proceed => {}
            DestinationDecision::Hold if self.msg_type.is_request() => {
                self.change_state(TransmitterState::OnHold, None);
                return Ok(Step::Done);
            }
            DestinationDecision::Hold => {
                warn!(id = %self.id, "hold requested for a response, sending anyway");
            }
            DestinationDecision::Terminate => {
                self.terminate();
                return Ok(Step::Done);
            }
            DestinationDecision::Reresolve => {
                self.res.rejected_rounds += 1;
                if self.res.rejected_rounds > MAX_REJECTED_ROUNDS {
                    return Err(Error::ResolutionFailed(format!(
                        "application rejected {} destinations",
                        self.res.rejected_rounds
                    )));
                }
                debug!(id = %self.id, %dest, rounds = self.res.rejected_rounds, "destination rejected by application");
                self.res.dest = None;
                self.res.manual_dest = false;
                self.res.state = ResolutionState::Undefined;
                self.change_state(TransmitterState::ResolvingAddr, None);
                return Ok(Step::NotFound);
            }
            DestinationDecision::Fail => {
                self.move_to_failure(
                    Error::Other("send cancelled by application".to_string()),
                    Some(SendFailureReason::UserCommand),
                    false,
                )?;
                return Ok(Step::Done);
            }
        }

        self.send(reached_from_app)?;
        Ok(Step::Done)
    }

    fn send_over_security_association(
        &mut self,
        association: SecurityAssociation,
        reached_from_app: bool,
    ) -> Result<()> {
        debug!(id = %self.id, dest = %association.dest, "sending over security association");
        self.res.dest = Some(association.dest);
        self.res.dest_transport = association.dest.transport;
        self.res.state = ResolutionState::Resolved;
        if let Some(connection) = association.connection {
            if let Err(e) = self.attach_connection(connection) {
                return self.move_to_failure(e, None, reached_from_app);
            }
        }
        self.change_state(TransmitterState::FinalDestResolved, None);
        if self.state == TransmitterState::Terminated {
            return Ok(());
        }
        self.send(reached_from_app)
    }
}

//! # Transmitter
//!
//! A transmitter takes one SIP message at a time, works out where it has to
//! go and puts it on the wire. Destination resolution follows RFC 3263:
//!
//! 1. The next hop is extracted from the message (Route, Request-URI or
//!    outbound proxy for requests, the top Via for responses).
//! 2. The transport is decided: explicitly (`transport=`, `sips`),
//!    implicitly (IP literal or explicit port) or through NAPTR and SRV.
//! 3. Host and port are resolved to an IP address, through SRV when the
//!    transport was explicit and no port was given, or a plain A/AAAA lookup.
//!
//! Every DNS step may answer inline or suspend. A suspended transmitter is
//! resumed by the resolver's completion, which re-enters the state machine
//! at the state it stopped in. Answers that are not used right away stay in
//! the transmitter's [`DnsResultList`] and are consumed before any new query.
//!
//! ## Concurrency
//!
//! All transmitter state lives behind one mutex. Public methods, DNS
//! completions and hooks run with that mutex held, so a transmitter is only
//! ever driven by one thread at a time. Hooks and transports must not call
//! back into the transmitter that invoked them.

mod alias;
mod context;
mod discovery;
mod dispatch;
mod events;
mod extract;
mod hooks;
mod hostport;
mod outbound;
mod protocol;
mod state;

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::dns::{DnsRecord, DnsResultList};
use crate::error::{Error, Result};
use crate::manager::ManagerContext;
use crate::message::SipMessage;
use crate::transport::ConnectionId;
use crate::types::{CompressionType, DestAddress, TransportType};

pub use context::{NextHop, ResolutionContext};
pub use events::{event_channel, EventReceiver, EventSender, TransmitterEvent};
pub use hooks::{AddressQuery, AddressResolution, DefaultHooks, DestinationDecision, ResolutionHooks};
pub use outbound::OutboundAddress;
pub use state::{
    NextHopSource, OutboundMsgType, ResolutionState, SendFailureReason, TransmitterId,
    TransmitterState,
};

use events::EventSink;

/// Pre-established security association. When set, the transmitter sends
/// to its destination without any resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityAssociation {
    pub dest: DestAddress,
    pub connection: Option<ConnectionId>,
}

/// Last encoded message and where it went, kept for retransmissions.
#[derive(Debug, Clone)]
pub(crate) struct SentMessage {
    pub(crate) payload: Bytes,
    pub(crate) dest: DestAddress,
    pub(crate) local: Option<SocketAddr>,
    pub(crate) connection: Option<ConnectionId>,
}

/// Outcome of one step of the resolution state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Run the next state.
    Continue,
    /// A DNS query is outstanding; return and wait for its completion.
    Pending,
    /// Nothing usable was found inline; consult the DNS list, then continue.
    NotFound,
    /// The message was handed off or the attempt ended.
    Done,
}

pub(crate) struct TransmitterInner {
    pub(crate) id: TransmitterId,
    pub(crate) ctx: Arc<ManagerContext>,
    pub(crate) hooks: Arc<dyn ResolutionHooks>,
    pub(crate) events: EventSink,
    pub(crate) self_ref: Weak<Mutex<TransmitterInner>>,
    pub(crate) state: TransmitterState,
    pub(crate) msg_type: OutboundMsgType,
    pub(crate) message: Option<SipMessage>,
    pub(crate) res: ResolutionContext,
    pub(crate) outbound: OutboundAddress,
    pub(crate) force_outbound: bool,
    pub(crate) send_to_first_route: bool,
    pub(crate) ignore_outbound_proxy: bool,
    pub(crate) security: Option<SecurityAssociation>,
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) persistent: bool,
    pub(crate) fix_via: bool,
    pub(crate) keep_message: bool,
    pub(crate) local_addr: Option<SocketAddr>,
    pub(crate) last_sent: Option<SentMessage>,
}

impl TransmitterInner {
    fn new(
        id: TransmitterId,
        ctx: Arc<ManagerContext>,
        hooks: Arc<dyn ResolutionHooks>,
        events: Option<EventSender>,
        self_ref: Weak<Mutex<TransmitterInner>>,
    ) -> Self {
        let config = &ctx.config;
        TransmitterInner {
            id,
            force_outbound: config.force_outbound,
            send_to_first_route: config.send_to_first_route,
            ignore_outbound_proxy: config.ignore_outbound_proxy,
            keep_message: config.keep_message,
            ctx: ctx.clone(),
            hooks,
            events: EventSink::new(events),
            self_ref,
            state: TransmitterState::Idle,
            msg_type: OutboundMsgType::Request,
            message: None,
            res: ResolutionContext::default(),
            outbound: OutboundAddress::default(),
            security: None,
            connection: None,
            persistent: false,
            fix_via: false,
            local_addr: None,
            last_sent: None,
        }
    }

    /// Moves to `new_state` and reports it.
    ///
    /// A `MsgSent` notification while resolving, on hold or already sent is
    /// reported without changing the state. Entering `MsgSendFailure` twice
    /// is ignored.
    pub(crate) fn change_state(&mut self, new_state: TransmitterState, reason: Option<SendFailureReason>) {
        if self.state == TransmitterState::Terminated {
            return;
        }
        if new_state == TransmitterState::MsgSendFailure && self.state == TransmitterState::MsgSendFailure {
            return;
        }
        let previous = self.state;
        let keep_state = new_state == TransmitterState::MsgSent
            && matches!(
                previous,
                TransmitterState::ResolvingAddr | TransmitterState::OnHold | TransmitterState::MsgSent
            );
        if keep_state {
            debug!(id = %self.id, state = %previous, "message sent, state unchanged");
        } else {
            debug!(id = %self.id, from = %previous, to = %new_state, ?reason, "transmitter state change");
            self.state = new_state;
        }
        self.events.emit(TransmitterEvent::StateChanged {
            transmitter: self.id,
            previous,
            state: new_state,
            reason,
            msg_type: self.msg_type,
            dest: self.res.dest,
        });

        if new_state == TransmitterState::MsgSendFailure && !self.keep_message {
            self.message = None;
        }
        // Nobody listens: the transmitter is done once the outcome is known.
        if matches!(new_state, TransmitterState::MsgSent | TransmitterState::MsgSendFailure)
            && !self.events.has_listener()
        {
            self.terminate();
        }
    }

    /// Ends a failed attempt.
    ///
    /// Failures reached from a DNS completion, and network or connection
    /// failures, move the transmitter to `MsgSendFailure` and report it once.
    /// Anything else is returned to the caller.
    pub(crate) fn move_to_failure(
        &mut self,
        err: Error,
        reason: Option<SendFailureReason>,
        reached_from_app: bool,
    ) -> Result<()> {
        if self.state == TransmitterState::Terminated {
            return Ok(());
        }
        let reason = reason.unwrap_or_else(|| err.send_failure_reason());
        if self.state == TransmitterState::MsgSendFailure {
            return Ok(());
        }
        let transport_failure = matches!(
            reason,
            SendFailureReason::NetworkError | SendFailureReason::ConnectionError
        );
        if !reached_from_app || transport_failure {
            error!(id = %self.id, error = %err, %reason, "message send failure");
            self.change_state(TransmitterState::MsgSendFailure, Some(reason));
            return Ok(());
        }
        Err(err)
    }

    pub(crate) fn terminate(&mut self) {
        if self.state == TransmitterState::Terminated {
            return;
        }
        // Invalidate any outstanding completion.
        self.res.next_query_id();
        self.res.dns_list.clear();
        self.detach_connection();
        self.change_state(TransmitterState::Terminated, None);
        self.message = None;
    }

    /// Attaches to `id` as the connection in use, releasing the previous one.
    pub(crate) fn attach_connection(&mut self, id: ConnectionId) -> Result<()> {
        if self.connection == Some(id) {
            return Ok(());
        }
        self.ctx.connections.attach_owner(id, self.id)?;
        self.detach_connection();
        self.connection = Some(id);
        Ok(())
    }

    pub(crate) fn detach_connection(&mut self) {
        if let Some(id) = self.connection.take() {
            self.ctx.connections.detach_owner(id, self.id);
        }
    }

    fn require_message(&self) -> Result<()> {
        if self.message.is_none() {
            return Err(Error::IllegalAction(format!(
                "transmitter {} has no message to send",
                self.id
            )));
        }
        Ok(())
    }
}

impl Drop for TransmitterInner {
    fn drop(&mut self) {
        self.detach_connection();
    }
}

/// Handle to a transmitter. Clones share the same transmitter.
#[derive(Clone)]
pub struct Transmitter {
    id: TransmitterId,
    inner: Arc<Mutex<TransmitterInner>>,
}

impl Transmitter {
    pub(crate) fn new(
        ctx: Arc<ManagerContext>,
        hooks: Arc<dyn ResolutionHooks>,
        events: Option<EventSender>,
    ) -> Self {
        let id = TransmitterId::new();
        let inner = Arc::new_cyclic(|weak| {
            Mutex::new(TransmitterInner::new(id, ctx, hooks, events, weak.clone()))
        });
        Transmitter { id, inner }
    }

    pub fn id(&self) -> TransmitterId {
        self.id
    }

    pub fn state(&self) -> TransmitterState {
        self.inner.lock().state
    }

    pub fn resolution_state(&self) -> ResolutionState {
        self.inner.lock().res.state
    }

    /// Resolved destination, if any.
    pub fn dest_address(&self) -> Option<DestAddress> {
        self.inner.lock().res.dest
    }

    /// Compression to apply to the outbound message.
    pub fn compression(&self) -> CompressionType {
        self.inner.lock().res.compression
    }

    /// Part of the message the next hop was taken from.
    pub fn next_hop_source(&self) -> NextHopSource {
        self.inner.lock().res.source
    }

    /// Local address the last message was sent from.
    pub fn local_address(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.inner.lock().connection
    }

    /// Copy of the DNS answers not consumed yet.
    pub fn dns_list(&self) -> DnsResultList {
        self.inner.lock().res.dns_list.clone()
    }

    /// Replaces the DNS list, e.g. with records resolved by the application.
    pub fn set_dns_list(&self, list: DnsResultList) {
        self.inner.lock().res.dns_list = list;
    }

    pub fn push_dns_record(&self, record: DnsRecord) {
        self.inner.lock().res.dns_list.push(record);
    }

    /// Empties the DNS list and restarts resolution on the next send.
    pub fn dns_list_reset(&self) {
        let mut inner = self.inner.lock();
        debug!(id = %self.id, "resetting DNS list");
        inner.res.dns_list.clear();
        inner.res.state = ResolutionState::Undefined;
    }

    /// Copy of the message being sent, if it is still kept.
    pub fn message(&self) -> Option<SipMessage> {
        self.inner.lock().message.clone()
    }

    /// Resolves the destination of `message` and sends it.
    ///
    /// Legal in `Idle` and `MsgSendFailure`. Returns once the message is
    /// sent, the attempt failed, or a DNS query is outstanding. An error
    /// returned here leaves the transmitter `Idle`.
    pub fn send_message(&self, message: impl Into<SipMessage>, msg_type: OutboundMsgType) -> Result<()> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, TransmitterState::Idle | TransmitterState::MsgSendFailure) {
            return Err(Error::IllegalAction(format!(
                "cannot send a message in state {}",
                inner.state
            )));
        }
        if !inner.res.manual_dest {
            inner.res.state = ResolutionState::Undefined;
        }
        inner.start_sending(message.into(), msg_type)
    }

    /// Sends the kept message again after a send failure, trying left-over
    /// DNS records before resolving from scratch.
    pub fn resend(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransmitterState::MsgSendFailure {
            return Err(Error::IllegalAction(format!("cannot resend in state {}", inner.state)));
        }
        inner.require_message()?;
        if !inner.res.manual_dest {
            inner.res.state = ResolutionState::Undefined;
        }
        inner.res.rejected_rounds = 0;
        let result = inner.discover(true);
        if result.is_err() {
            inner.reset_after_error();
        }
        result
    }

    /// Sends `message` to the destination already resolved by this transmitter.
    pub fn send_to_pre_discovered(
        &self,
        message: impl Into<SipMessage>,
        msg_type: OutboundMsgType,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            TransmitterState::ResolvingAddr
                | TransmitterState::FinalDestResolved
                | TransmitterState::Terminated
        ) {
            return Err(Error::IllegalAction(format!(
                "cannot send a message in state {}",
                inner.state
            )));
        }
        if inner.res.state != ResolutionState::Resolved || inner.res.dest.is_none() {
            return Err(Error::IllegalAction(
                "destination has not been resolved".to_string(),
            ));
        }
        inner.message = Some(message.into());
        inner.msg_type = msg_type;
        inner.discover(true)
    }

    /// Sends the last encoded message again to the same destination.
    pub fn retransmit(&self) -> Result<()> {
        self.inner.lock().retransmit()
    }

    /// Continues a message held by [`DestinationDecision::Hold`].
    pub fn resume_sending(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransmitterState::OnHold {
            return Err(Error::IllegalAction(format!("cannot resume in state {}", inner.state)));
        }
        inner.require_message()?;
        inner.discover(false)
    }

    /// Reports that `connection` failed or could not deliver the message.
    ///
    /// Ignored unless `connection` is the one this transmitter uses.
    pub fn connection_error(&self, connection: ConnectionId) {
        let mut inner = self.inner.lock();
        if inner.state == TransmitterState::Terminated {
            return;
        }
        if inner.connection != Some(connection) {
            warn!(id = %self.id, %connection, current = ?inner.connection, "error on a connection not in use");
            return;
        }
        debug!(id = %self.id, %connection, "connection error");
        let err = Error::Connection(format!("connection {} failed", connection));
        if let Err(e) = inner.move_to_failure(err, Some(SendFailureReason::ConnectionError), false) {
            warn!(id = %self.id, error = %e, "connection error not reported");
        }
    }

    /// Terminates the transmitter. Outstanding DNS completions become no-ops.
    pub fn terminate(&self) {
        self.inner.lock().terminate();
    }

    /// Sets the destination by hand, bypassing resolution. `None` rejects
    /// the current destination so resolution continues with the DNS list.
    pub fn set_dest_address(&self, dest: Option<DestAddress>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == TransmitterState::Terminated {
            return Err(Error::Terminated);
        }
        match dest {
            Some(dest) => {
                if dest.port() == 0 || dest.ip().is_unspecified() {
                    return Err(Error::Configuration(format!("invalid destination {}", dest)));
                }
                debug!(id = %self.id, %dest, "destination set manually");
                inner.res.dest = Some(dest);
                inner.res.dest_transport = dest.transport;
                inner.res.manual_dest = true;
                inner.res.state = ResolutionState::Resolved;
            }
            None => {
                debug!(id = %self.id, "destination rejected, resolution will continue");
                inner.res.dest = None;
                inner.res.dest_transport = TransportType::Undefined;
                inner.res.manual_dest = false;
                inner.res.state = ResolutionState::Undefined;
            }
        }
        Ok(())
    }

    /// Uses `ip` as outbound proxy for this transmitter.
    pub fn set_outbound_address(&self, ip: IpAddr, port: Option<u16>) {
        let mut inner = self.inner.lock();
        inner.outbound.ip = Some(ip);
        inner.outbound.port = port;
        inner.outbound.use_host_name = false;
    }

    /// Uses `host` as outbound proxy for this transmitter.
    pub fn set_outbound_host(&self, host: impl Into<String>, port: Option<u16>) {
        let mut inner = self.inner.lock();
        inner.outbound.host = Some(host.into());
        inner.outbound.port = port;
        inner.outbound.use_host_name = true;
    }

    pub fn set_outbound_transport(&self, transport: TransportType) {
        self.inner.lock().outbound.transport = transport;
    }

    pub fn set_outbound_compression(&self, compression: CompressionType) {
        self.inner.lock().outbound.compression = compression;
    }

    pub fn outbound_address(&self) -> OutboundAddress {
        self.inner.lock().outbound.clone()
    }

    pub fn set_force_outbound(&self, enabled: bool) {
        self.inner.lock().force_outbound = enabled;
    }

    pub fn set_send_to_first_route(&self, enabled: bool) {
        self.inner.lock().send_to_first_route = enabled;
    }

    pub fn set_ignore_outbound_proxy(&self, enabled: bool) {
        self.inner.lock().ignore_outbound_proxy = enabled;
    }

    pub fn set_security_association(&self, association: Option<SecurityAssociation>) {
        self.inner.lock().security = association;
    }

    /// Sends over `connection` instead of looking one up.
    pub fn set_connection(&self, connection: Option<ConnectionId>) -> Result<()> {
        let mut inner = self.inner.lock();
        match connection {
            Some(id) => inner.attach_connection(id),
            None => {
                inner.detach_connection();
                Ok(())
            }
        }
    }

    /// Reuse open connections to the same destination.
    pub fn set_persistent(&self, persistent: bool) {
        self.inner.lock().persistent = persistent;
    }

    /// Rewrite the top Via of requests with the local address and transport in use.
    pub fn set_fix_via(&self, fix_via: bool) {
        self.inner.lock().fix_via = fix_via;
    }

    /// Keep the message after it was sent or failed.
    pub fn set_keep_message(&self, keep: bool) {
        self.inner.lock().keep_message = keep;
    }

    /// Sends on behalf of a transaction. Unlike [`send_message`](Self::send_message)
    /// this is legal after a previous message was sent, and keeps a resolved
    /// destination.
    pub(crate) fn dispatch(&self, message: SipMessage, msg_type: OutboundMsgType) -> Result<()> {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            TransmitterState::ResolvingAddr
                | TransmitterState::FinalDestResolved
                | TransmitterState::Terminated
        ) {
            return Err(Error::IllegalAction(format!(
                "cannot send a message in state {}",
                inner.state
            )));
        }
        if inner.state == TransmitterState::MsgSendFailure && !inner.res.manual_dest {
            inner.res.state = ResolutionState::Undefined;
        }
        inner.start_sending(message, msg_type)
    }

    /// Releases the connection without terminating.
    pub(crate) fn release_connection(&self) {
        self.inner.lock().detach_connection();
    }
}

impl TransmitterInner {
    fn start_sending(&mut self, message: SipMessage, msg_type: OutboundMsgType) -> Result<()> {
        trace!(id = %self.id, method = %message.method(), ?msg_type, "sending message");
        self.message = Some(message);
        self.msg_type = msg_type;
        self.res.rejected_rounds = 0;
        let result = self.discover(true);
        if result.is_err() {
            self.reset_after_error();
        }
        result
    }

    fn reset_after_error(&mut self) {
        if !self.keep_message {
            self.message = None;
        }
        if !matches!(
            self.state,
            TransmitterState::Terminated | TransmitterState::MsgSendFailure | TransmitterState::Idle
        ) {
            self.res.state = ResolutionState::Undefined;
            self.change_state(TransmitterState::Idle, None);
        }
    }
}

impl std::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transmitter")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("resolution", &inner.res.state)
            .field("dest", &inner.res.dest)
            .finish()
    }
}

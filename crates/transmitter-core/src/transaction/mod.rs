//! # Transaction transport
//!
//! Glue between a SIP transaction and the transmitter that sends its
//! messages. The transaction feeds every [`TransmitterEvent`] to
//! [`TransactionTransport::handle_event`] and acts on the returned
//! [`TransactionAction`]:
//!
//! - the final destination fixes the transport, which decides whether
//!   retransmissions are needed;
//! - a new connection replaces the one the transaction holds;
//! - a sent message arms the retransmission timer on unreliable transports;
//! - a send failure either terminates the transaction or, for client
//!   requests with enhanced failure handling, asks the owner to recover.

pub mod timer;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manager::ResolverManager;
use crate::message::{Method, SipMessage};
use crate::transmitter::{
    event_channel, EventReceiver, OutboundMsgType, SendFailureReason, Transmitter, TransmitterEvent,
    TransmitterId, TransmitterState,
};
use crate::transport::{ConnectionId, ConnectionTable};
use crate::types::TransportType;

pub use timer::{RetransmitSchedule, TimerSettings};

/// Side of the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRole {
    Client,
    Server,
}

/// What the transaction has to do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionAction {
    /// Nothing to do.
    None,
    /// Retransmissions were armed; the first fires after `first_interval`.
    RetransmissionArmed { first_interval: std::time::Duration },
    /// The request could not be sent; timers are released and the owner
    /// may try another destination with [`Transmitter::resend`].
    SendFailureRecovery { reason: SendFailureReason },
    /// The transaction is over.
    Terminate { reason: Option<SendFailureReason> },
}

/// Transport state of one transaction.
pub struct TransactionTransport {
    transmitter: Transmitter,
    connections: Arc<ConnectionTable>,
    /// Owner id the transaction uses in the connection table.
    owner: TransmitterId,
    role: TransactionRole,
    method: Method,
    enhanced_send_failure: bool,
    settings: TimerSettings,
    dest_transport: TransportType,
    connection: Option<ConnectionId>,
    /// Connection a server transaction received its request on.
    backup_connection: Option<ConnectionId>,
    retransmissions: Option<JoinHandle<()>>,
    terminated: bool,
}

impl TransactionTransport {
    /// Creates the transport of a new transaction and the receiver its
    /// transmitter reports to.
    pub fn new(
        manager: &ResolverManager,
        role: TransactionRole,
        method: Method,
        settings: TimerSettings,
    ) -> (Self, EventReceiver) {
        let (events_tx, events_rx) = event_channel();
        let transmitter = manager.create_transmitter(Some(events_tx));
        let transport = TransactionTransport {
            connections: manager.connections(),
            owner: TransmitterId::new(),
            enhanced_send_failure: manager.config().enhanced_send_failure,
            transmitter,
            role,
            method,
            settings,
            dest_transport: TransportType::Undefined,
            connection: None,
            backup_connection: None,
            retransmissions: None,
            terminated: false,
        };
        (transport, events_rx)
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn role(&self) -> TransactionRole {
        self.role
    }

    /// Transport of the last resolved destination.
    pub fn dest_transport(&self) -> TransportType {
        self.dest_transport
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn backup_connection(&self) -> Option<ConnectionId> {
        self.backup_connection
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn has_retransmissions(&self) -> bool {
        self.retransmissions.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Sends a message of this transaction.
    pub fn send(&mut self, message: impl Into<SipMessage>, msg_type: OutboundMsgType) -> Result<()> {
        if self.terminated {
            return Err(Error::Terminated);
        }
        self.stop_retransmissions();
        self.transmitter.dispatch(message.into(), msg_type)
    }

    /// Holds `id` as the connection a server transaction answers on when
    /// the primary one is gone.
    pub fn set_backup_connection(&mut self, id: ConnectionId) -> Result<()> {
        if self.backup_connection == Some(id) {
            return Ok(());
        }
        self.connections.attach_owner(id, self.owner)?;
        if let Some(old) = self.backup_connection.replace(id) {
            self.connections.detach_owner(old, self.owner);
        }
        Ok(())
    }

    /// Applies a transmitter event. Events of other transmitters are ignored.
    pub fn handle_event(&mut self, event: &TransmitterEvent) -> TransactionAction {
        if event.transmitter() != self.transmitter.id() || self.terminated {
            return TransactionAction::None;
        }
        match event {
            TransmitterEvent::NewConnectionInUse { connection, created, .. } => {
                self.replace_connection(*connection, *created);
                TransactionAction::None
            }
            TransmitterEvent::StateChanged {
                state,
                reason,
                msg_type,
                dest,
                ..
            } => match state {
                TransmitterState::FinalDestResolved => {
                    if let Some(dest) = dest {
                        self.dest_transport = dest.transport;
                    }
                    TransactionAction::None
                }
                TransmitterState::MsgSent => self.message_sent(*msg_type),
                TransmitterState::MsgSendFailure => {
                    self.message_send_failure(*msg_type, reason.unwrap_or(SendFailureReason::Undefined))
                }
                TransmitterState::Terminated => {
                    self.release();
                    TransactionAction::Terminate { reason: *reason }
                }
                _ => TransactionAction::None,
            },
        }
    }

    fn replace_connection(&mut self, id: ConnectionId, created: bool) {
        if self.connection == Some(id) {
            return;
        }
        if let Err(e) = self.connections.attach_owner(id, self.owner) {
            warn!(transaction_owner = %self.owner, connection = %id, error = %e, "cannot hold new connection");
            return;
        }
        if let Some(old) = self.connection.replace(id) {
            self.connections.detach_owner(old, self.owner);
        }
        debug!(transaction_owner = %self.owner, connection = %id, created, "transaction connection replaced");
    }

    fn message_sent(&mut self, msg_type: OutboundMsgType) -> TransactionAction {
        let retransmitted = matches!(msg_type, OutboundMsgType::Request | OutboundMsgType::FinalResponse);
        if !retransmitted || self.dest_transport.is_connection_oriented() {
            return TransactionAction::None;
        }
        let schedule = if msg_type == OutboundMsgType::Request && self.method == Method::Invite {
            RetransmitSchedule::uncapped(&self.settings)
        } else {
            RetransmitSchedule::capped(&self.settings)
        };
        let first_interval = schedule.first_interval();
        self.stop_retransmissions();
        self.retransmissions = timer::spawn_retransmissions(self.transmitter.clone(), schedule);
        debug!(id = %self.transmitter.id(), ?first_interval, ?msg_type, "retransmission timer armed");
        TransactionAction::RetransmissionArmed { first_interval }
    }

    fn message_send_failure(&mut self, msg_type: OutboundMsgType, reason: SendFailureReason) -> TransactionAction {
        let recoverable = self.role == TransactionRole::Client
            && self.method != Method::Cancel
            && self.enhanced_send_failure
            && matches!(reason, SendFailureReason::NetworkError | SendFailureReason::ConnectionError);

        if recoverable && msg_type == OutboundMsgType::Request {
            info!(id = %self.transmitter.id(), %reason, "send failure, recovery possible");
            self.stop_retransmissions();
            return TransactionAction::SendFailureRecovery { reason };
        }
        warn!(id = %self.transmitter.id(), %reason, ?msg_type, "send failure, terminating transaction");
        self.terminate_with(Some(reason))
    }

    /// Terminates the transaction and its transmitter.
    pub fn terminate(&mut self) -> TransactionAction {
        self.terminate_with(None)
    }

    fn terminate_with(&mut self, reason: Option<SendFailureReason>) -> TransactionAction {
        self.release();
        self.transmitter.terminate();
        TransactionAction::Terminate { reason }
    }

    fn release(&mut self) {
        self.terminated = true;
        self.stop_retransmissions();
        self.detach_all_connections();
    }

    /// Releases the active and backup connections held by the transaction
    /// and its transmitter.
    pub fn detach_all_connections(&mut self) {
        for id in [self.connection.take(), self.backup_connection.take()].into_iter().flatten() {
            self.connections.detach_owner(id, self.owner);
        }
        self.transmitter.release_connection();
    }

    fn stop_retransmissions(&mut self) {
        if let Some(handle) = self.retransmissions.take() {
            handle.abort();
        }
    }
}

impl Drop for TransactionTransport {
    fn drop(&mut self) {
        self.stop_retransmissions();
        for id in [self.connection.take(), self.backup_connection.take()].into_iter().flatten() {
            self.connections.detach_owner(id, self.owner);
        }
    }
}

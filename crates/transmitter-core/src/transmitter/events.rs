//! Notifications emitted by a transmitter.

use tokio::sync::mpsc;
use tracing::trace;

use super::state::{OutboundMsgType, SendFailureReason, TransmitterId, TransmitterState};
use crate::transport::ConnectionId;
use crate::types::DestAddress;

/// Event reported to the owner of a transmitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitterEvent {
    /// The transmitter changed state.
    ///
    /// `dest` carries the destination in effect when the change happened;
    /// `reason` is set for `MsgSendFailure` and for terminations caused by one.
    StateChanged {
        transmitter: TransmitterId,
        previous: TransmitterState,
        state: TransmitterState,
        reason: Option<SendFailureReason>,
        msg_type: OutboundMsgType,
        dest: Option<DestAddress>,
    },

    /// A connection became the one the transmitter sends on.
    NewConnectionInUse {
        transmitter: TransmitterId,
        connection: ConnectionId,
        /// `false` when an existing connection was found in the table.
        created: bool,
    },
}

impl TransmitterEvent {
    pub fn transmitter(&self) -> TransmitterId {
        match self {
            TransmitterEvent::StateChanged { transmitter, .. }
            | TransmitterEvent::NewConnectionInUse { transmitter, .. } => *transmitter,
        }
    }

    /// New state for state changes, `None` otherwise.
    pub fn state(&self) -> Option<TransmitterState> {
        match self {
            TransmitterEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        }
    }
}

/// Sending half of the transmitter event channel.
pub type EventSender = mpsc::UnboundedSender<TransmitterEvent>;

/// Receiving half of the transmitter event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransmitterEvent>;

/// Creates a transmitter event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Delivers events if anyone listens.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    sender: Option<EventSender>,
}

impl EventSink {
    pub(crate) fn new(sender: Option<EventSender>) -> Self {
        Self { sender }
    }

    pub(crate) fn has_listener(&self) -> bool {
        self.sender.as_ref().is_some_and(|s| !s.is_closed())
    }

    pub(crate) fn emit(&self, event: TransmitterEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.send(event).is_err() {
            trace!("transmitter event receiver dropped");
        }
    }
}

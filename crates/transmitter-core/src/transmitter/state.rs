//! Transmitter and resolution state types.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransmitterId(Uuid);

impl TransmitterId {
    pub fn new() -> Self {
        TransmitterId(Uuid::new_v4())
    }
}

impl Default for TransmitterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransmitterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trx-{}", self.0)
    }
}

/// Externally visible state of a transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransmitterState {
    #[default]
    Idle,
    ResolvingAddr,
    FinalDestResolved,
    ReadyForSending,
    OnHold,
    MsgSendFailure,
    MsgSent,
    Terminated,
}

impl fmt::Display for TransmitterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransmitterState::Idle => "Idle",
            TransmitterState::ResolvingAddr => "Resolving Addr",
            TransmitterState::FinalDestResolved => "Final Dest Resolved",
            TransmitterState::ReadyForSending => "Ready For Sending",
            TransmitterState::OnHold => "On Hold",
            TransmitterState::MsgSendFailure => "Msg Send Failure",
            TransmitterState::MsgSent => "Msg Sent",
            TransmitterState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Progress of destination resolution for the current message.
///
/// ```text
/// Undefined -> Started -> [WaitingForUri] -> UriFound
///   -> [ResolvingTransport3WaySrv | ResolvingTransportNaptr] -> TransportFound
///   -> [ResolvingHostPort | ResolvingIp] -> Resolved | Unresolved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResolutionState {
    #[default]
    Undefined,
    Started,
    WaitingForUri,
    UriFound,
    ResolvingTransport3WaySrv,
    ResolvingTransportNaptr,
    TransportFound,
    ResolvingHostPort,
    ResolvingIp,
    Resolved,
    Unresolved,
}

impl ResolutionState {
    /// States in which a DNS answer may be outstanding.
    pub fn is_waiting_for_dns(&self) -> bool {
        matches!(
            self,
            ResolutionState::WaitingForUri
                | ResolutionState::ResolvingTransport3WaySrv
                | ResolutionState::ResolvingTransportNaptr
                | ResolutionState::ResolvingHostPort
                | ResolutionState::ResolvingIp
        )
    }
}

/// Why a message could not be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendFailureReason {
    NetworkError,
    ConnectionError,
    OutOfResources,
    UserCommand,
    Undefined,
}

impl fmt::Display for SendFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendFailureReason::NetworkError => "Network Error",
            SendFailureReason::ConnectionError => "Connection Error",
            SendFailureReason::OutOfResources => "Out Of Resources",
            SendFailureReason::UserCommand => "User Command",
            SendFailureReason::Undefined => "Undefined",
        };
        f.write_str(name)
    }
}

/// Kind of message handed to [`Transmitter::send_message`](super::Transmitter::send_message).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboundMsgType {
    Request,
    Ack,
    ProvisionalResponse,
    FinalResponse,
}

impl OutboundMsgType {
    pub fn is_request(&self) -> bool {
        matches!(self, OutboundMsgType::Request | OutboundMsgType::Ack)
    }
}

/// Which part of the message supplied the next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NextHopSource {
    #[default]
    Undefined,
    RequestUri,
    FirstRoute,
    OutboundProxy,
    Via,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = TransmitterId::new();
        let b = TransmitterId::new();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("trx-"));
    }

    #[test]
    fn test_waiting_states() {
        assert!(ResolutionState::ResolvingIp.is_waiting_for_dns());
        assert!(ResolutionState::WaitingForUri.is_waiting_for_dns());
        assert!(!ResolutionState::Resolved.is_waiting_for_dns());
        assert!(!ResolutionState::TransportFound.is_waiting_for_dns());
    }

    #[test]
    fn test_msg_type_kinds() {
        assert!(OutboundMsgType::Ack.is_request());
        assert!(!OutboundMsgType::FinalResponse.is_request());
    }
}

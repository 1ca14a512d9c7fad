//! SIP destination resolution and message transmission for the rvoip stack
//!
//! A [`Transmitter`] turns the addressing data of a SIP message (Route,
//! Request-URI, Via, outbound proxy configuration) into a transport
//! destination following RFC 3263, then sends the message. DNS lookups go
//! through the [`DnsResolver`](dns::DnsResolver) trait and may complete
//! inline or later; a suspended transmitter resumes where it stopped.
//!
//! Transmitters are created by a [`ResolverManager`], which owns the shared
//! configuration, resolver, transport and connection table.

pub mod config;
pub mod dns;
pub mod error;
pub mod logging;
pub mod manager;
pub mod message;
pub mod transaction;
pub mod transmitter;
pub mod transport;
pub mod types;

pub use error::{Error, Result};
pub use manager::{ResolverManager, ResolverManagerBuilder};
pub use transmitter::{Transmitter, TransmitterEvent, TransmitterState};

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{
        config::{LocalAddress, OutboundProxyConfig, TransmitterConfig},
        dns::{DnsRecord, DnsResolver, DnsResultList, HickoryDnsResolver},
        manager::ResolverManager,
        message::{Address, Method, SipMessage, SipRequest, SipResponse, SipUri, TelUri, ViaHeader},
        transaction::{TransactionAction, TransactionRole, TransactionTransport},
        transmitter::{
            event_channel, DestinationDecision, OutboundMsgType, ResolutionHooks, ResolutionState,
            SendFailureReason, Transmitter, TransmitterEvent, TransmitterState,
        },
        transport::{ConnectionTable, MessageTransport, UdpTransport},
        types::{DestAddress, TransportType},
        Error, Result,
    };
}

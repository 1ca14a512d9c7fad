//! Application hooks consulted during destination resolution.
//!
//! Every method has a default, so an application only overrides what it
//! needs. Hooks run while the transmitter is locked: they must not call back
//! into the same transmitter.

use crate::dns::enum_query::{self, RegexpFlags, RegexpMatch};
use crate::error::Result;
use crate::message::{Address, SipMessage, SipUri};
use crate::types::{DestAddress, TransportType};

use super::state::TransmitterId;

/// Next hop about to be resolved, offered to [`ResolutionHooks::resolve_address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressQuery<'a> {
    pub transmitter: TransmitterId,
    pub host: &'a str,
    /// Extracted port, or the default for the scheme.
    pub port: u16,
    pub transport: TransportType,
    pub secure: bool,
}

/// Answer of [`ResolutionHooks::resolve_address`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AddressResolution {
    /// Let the engine resolve the address.
    #[default]
    Continue,
    /// The application resolved the host itself.
    Resolved {
        host: String,
        port: Option<u16>,
        transport: TransportType,
    },
    /// Stop resolving; the send fails.
    Abort,
}

/// What to do once the final destination is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DestinationDecision {
    /// Send to the (possibly rewritten) destination.
    #[default]
    Proceed,
    /// Keep the message until `resume_sending` is called. Requests only.
    Hold,
    /// Terminate the transmitter without sending.
    Terminate,
    /// Reject the destination and resolve again, starting with the
    /// records left in the DNS list.
    Reresolve,
    /// Fail the send with a user-command reason.
    Fail,
}

/// Application callbacks used by the resolution engine.
pub trait ResolutionHooks: Send + Sync {
    /// Last chance to resolve the next hop before any DNS query is issued.
    fn resolve_address(&self, _query: &AddressQuery<'_>) -> AddressResolution {
        AddressResolution::Continue
    }

    /// Converts a tel or unknown URI into a SIP URI. `None` leaves it unresolved.
    fn other_url_found(&self, _transmitter: TransmitterId, _address: &Address) -> Option<SipUri> {
        None
    }

    /// Evaluates an ENUM NAPTR regular expression against `input`.
    fn apply_regexp(&self, ere: &str, input: &str, flags: RegexpFlags) -> Result<Option<RegexpMatch>> {
        enum_query::apply_regexp(ere, input, flags)
    }

    /// Called when the destination is final and the message is about to be sent.
    /// `dest` may be rewritten.
    fn final_dest_resolved(
        &self,
        _transmitter: TransmitterId,
        _message: &SipMessage,
        _dest: &mut DestAddress,
    ) -> DestinationDecision {
        DestinationDecision::Proceed
    }
}

/// Hooks that keep every default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ResolutionHooks for DefaultHooks {}

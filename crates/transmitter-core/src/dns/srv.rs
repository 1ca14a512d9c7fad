//! SRV owner names (RFC 3263 Section 4.1).

use super::ResolverScheme;
use crate::types::TransportType;

/// `_proto.` label for `transport`. TLS runs over TCP.
fn proto_label(transport: TransportType) -> &'static str {
    match transport {
        TransportType::Udp => "_udp.",
        TransportType::Tcp | TransportType::Tls => "_tcp.",
        TransportType::Sctp => "_sctp.",
        TransportType::Undefined => "",
    }
}

/// `_service.` label. SIP becomes `_sips.` when secure or over TLS.
fn service_label(scheme: ResolverScheme, secure: bool, transport: TransportType) -> &'static str {
    match scheme {
        ResolverScheme::Sip | ResolverScheme::Sips => {
            if secure || scheme == ResolverScheme::Sips || transport == TransportType::Tls {
                "_sips."
            } else {
                "_sip."
            }
        }
        ResolverScheme::Im => "_im.",
        ResolverScheme::Pres => "_pres.",
        ResolverScheme::Undefined => "",
    }
}

/// Builds the SRV owner name for `host`, e.g. `_sips._tcp.example.com`.
pub fn srv_name(scheme: ResolverScheme, host: &str, transport: TransportType, secure: bool) -> String {
    format!(
        "{}{}{}",
        service_label(scheme, secure, transport),
        proto_label(transport),
        host
    )
}

/// Transport order for 3-way SRV discovery.
///
/// Non-secure targets try UDP, TCP, SCTP then TLS; secure targets only TLS.
/// Transports without a local address are skipped.
pub fn three_way_order(secure: bool, has_local: impl Fn(TransportType) -> bool) -> Vec<TransportType> {
    let order: &[TransportType] = if secure {
        &[TransportType::Tls]
    } else {
        &[
            TransportType::Udp,
            TransportType::Tcp,
            TransportType::Sctp,
            TransportType::Tls,
        ]
    };
    order.iter().copied().filter(|t| has_local(*t)).collect()
}

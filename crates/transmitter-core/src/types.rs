//! Transport-level value types shared by every resolution component.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default port for `sip:` targets over UDP, TCP and SCTP (RFC 3261 Section 19.1.2).
pub const DEFAULT_SIP_PORT: u16 = 5060;

/// Default port for `sips:` targets and TLS.
pub const DEFAULT_SIPS_PORT: u16 = 5061;

/// Transport protocol of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    Udp,
    Tcp,
    Tls,
    Sctp,
    /// Not decided yet.
    #[default]
    Undefined,
}

impl TransportType {
    /// Connection-oriented transports probed by alias lookup, in probe order.
    pub const CONNECTION_ORIENTED: [TransportType; 3] =
        [TransportType::Tcp, TransportType::Tls, TransportType::Sctp];

    /// Returns `true` for transports that run over a connection.
    pub fn is_connection_oriented(&self) -> bool {
        matches!(self, TransportType::Tcp | TransportType::Tls | TransportType::Sctp)
    }

    pub fn is_defined(&self) -> bool {
        *self != TransportType::Undefined
    }

    /// Token used in Via headers and `transport=` parameters.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Udp => "UDP",
            TransportType::Tcp => "TCP",
            TransportType::Tls => "TLS",
            TransportType::Sctp => "SCTP",
            TransportType::Undefined => "UNDEFINED",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportType::Udp),
            "tcp" => Ok(TransportType::Tcp),
            "tls" => Ok(TransportType::Tls),
            "sctp" => Ok(TransportType::Sctp),
            other => Err(Error::MalformedUri(format!("unknown transport '{}'", other))),
        }
    }
}

/// Outbound message compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    #[default]
    None,
    SigComp,
}

impl CompressionType {
    /// Interprets a `comp=` parameter value.
    pub fn from_param(value: &str) -> Self {
        if value.eq_ignore_ascii_case("sigcomp") {
            CompressionType::SigComp
        } else {
            CompressionType::None
        }
    }
}

/// Fully resolved transport destination: where and how a message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestAddress {
    pub addr: SocketAddr,
    pub transport: TransportType,
}

impl DestAddress {
    pub fn new(addr: SocketAddr, transport: TransportType) -> Self {
        Self { addr, transport }
    }

    pub fn ip(&self) -> IpAddr {
        self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for DestAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.transport)
    }
}

/// Parses a host string as an IPv4 or IPv6 literal. IPv6 may be bracketed.
pub fn parse_ip_literal(host: &str) -> Option<IpAddr> {
    let trimmed = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    trimmed.parse::<IpAddr>().ok()
}

/// Port to use when none is given: 5061 for secure or TLS targets, 5060 otherwise.
pub fn default_port(secure: bool, transport: TransportType) -> u16 {
    if secure || transport == TransportType::Tls {
        DEFAULT_SIPS_PORT
    } else {
        DEFAULT_SIP_PORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_parse_is_case_insensitive() {
        assert_eq!("TCP".parse::<TransportType>().unwrap(), TransportType::Tcp);
        assert_eq!("sctp".parse::<TransportType>().unwrap(), TransportType::Sctp);
        assert!("ws".parse::<TransportType>().is_err());
    }

    #[test]
    fn test_ip_literals() {
        assert_eq!(parse_ip_literal("192.0.2.1"), Some("192.0.2.1".parse().unwrap()));
        assert_eq!(parse_ip_literal("[2001:db8::1]"), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(parse_ip_literal("2001:db8::1"), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(parse_ip_literal("example.com"), None);
        assert_eq!(parse_ip_literal("192.0.2"), None);
    }

    #[test]
    fn test_default_port() {
        assert_eq!(default_port(false, TransportType::Udp), 5060);
        assert_eq!(default_port(false, TransportType::Tls), 5061);
        assert_eq!(default_port(true, TransportType::Undefined), 5061);
    }

    #[test]
    fn test_comp_param() {
        assert_eq!(CompressionType::from_param("SigComp"), CompressionType::SigComp);
        assert_eq!(CompressionType::from_param("other"), CompressionType::None);
    }
}

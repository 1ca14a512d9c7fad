use std::fmt;
use std::str::FromStr;

use nom::{
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char, space0},
    combinator::{all_consuming, opt},
    multi::many0,
    sequence::{delimited, tuple},
};

use super::uri::{host, param, port, ParseResult, UriParam};
use crate::error::{Error, Result};
use crate::types::{CompressionType, TransportType};

/// A single Via header value.
///
/// `rport` distinguishes "absent" (`None`), "present without a value"
/// (`Some(None)`) and "filled in by the server" (`Some(Some(port))`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViaHeader {
    pub transport: TransportType,
    pub host: String,
    pub port: Option<u16>,
    pub branch: Option<String>,
    pub received: Option<String>,
    pub maddr: Option<String>,
    pub rport: Option<Option<u16>>,
    pub comp: CompressionType,
    pub other_params: Vec<UriParam>,
}

impl ViaHeader {
    pub fn new(transport: TransportType, host: impl Into<String>, port: Option<u16>) -> Self {
        ViaHeader {
            transport,
            host: host.into(),
            port,
            branch: None,
            received: None,
            maddr: None,
            rport: None,
            comp: CompressionType::None,
            other_params: Vec::new(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }

    pub fn with_maddr(mut self, maddr: impl Into<String>) -> Self {
        self.maddr = Some(maddr.into());
        self
    }

    pub fn with_rport(mut self, rport: Option<u16>) -> Self {
        self.rport = Some(rport);
        self
    }

    pub fn with_comp(mut self, comp: CompressionType) -> Self {
        self.comp = comp;
        self
    }
}

impl fmt::Display for ViaHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={}", received)?;
        }
        if let Some(maddr) = &self.maddr {
            write!(f, ";maddr={}", maddr)?;
        }
        match self.rport {
            Some(Some(p)) => write!(f, ";rport={}", p)?,
            Some(None) => f.write_str(";rport")?,
            None => {}
        }
        if self.comp == CompressionType::SigComp {
            f.write_str(";comp=sigcomp")?;
        }
        for (name, value) in &self.other_params {
            match value {
                Some(v) => write!(f, ";{}={}", name, v)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

fn sent_protocol(input: &str) -> ParseResult<&str> {
    delimited(
        tuple((tag_no_case("SIP"), char('/'), tag_no_case("2.0"), char('/'))),
        take_while1(|c: char| c.is_ascii_alphanumeric()),
        space0,
    )(input)
}

#[allow(clippy::type_complexity)]
fn via_value(input: &str) -> ParseResult<(&str, &str, Option<u16>, Vec<UriParam>)> {
    tuple((sent_protocol, host, opt(port), many0(param)))(input)
}

impl FromStr for ViaHeader {
    type Err = Error;

    /// Parses a Via value such as `SIP/2.0/UDP host:5060;branch=z9hG4bK1;rport`.
    /// Transports outside UDP/TCP/TLS/SCTP parse as `Undefined`.
    fn from_str(s: &str) -> Result<Self> {
        let (_, (transport, host, port, params)) =
            all_consuming(via_value)(s.trim()).map_err(|_| Error::MalformedUri(s.to_string()))?;
        let transport = transport.parse().unwrap_or(TransportType::Undefined);
        let mut via = ViaHeader::new(transport, host, port);
        for (name, value) in params {
            match (name.to_ascii_lowercase().as_str(), value) {
                ("branch", Some(v)) => via.branch = Some(v),
                ("received", Some(v)) => via.received = Some(v),
                ("maddr", Some(v)) => via.maddr = Some(v),
                ("rport", v) => {
                    via.rport = Some(v.and_then(|p| p.parse::<u16>().ok()));
                }
                ("comp", Some(v)) => via.comp = CompressionType::from_param(&v),
                (_, value) => via.other_params.push((name, value)),
            }
        }
        Ok(via)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_via_with_received_and_rport() {
        let via: ViaHeader = "SIP/2.0/TCP client.example.com:5062;branch=z9hG4bK776;received=203.0.113.9;rport=5070"
            .parse()
            .unwrap();
        assert_eq!(via.transport, TransportType::Tcp);
        assert_eq!(via.host, "client.example.com");
        assert_eq!(via.port, Some(5062));
        assert_eq!(via.received.as_deref(), Some("203.0.113.9"));
        assert_eq!(via.rport, Some(Some(5070)));
    }

    #[test]
    fn test_rport_without_value() {
        let via: ViaHeader = "SIP/2.0/UDP 192.0.2.4;rport;branch=z9hG4bK1".parse().unwrap();
        assert_eq!(via.rport, Some(None));
        assert_eq!(via.port, None);
    }

    #[test]
    fn test_unknown_transport_is_undefined() {
        let via: ViaHeader = "SIP/2.0/WS edge.example.com".parse().unwrap();
        assert_eq!(via.transport, TransportType::Undefined);
    }

    #[test]
    fn test_display() {
        let via = ViaHeader::new(TransportType::Udp, "192.0.2.4", Some(5060))
            .with_branch("z9hG4bKabc")
            .with_rport(None);
        assert_eq!(via.to_string(), "SIP/2.0/UDP 192.0.2.4:5060;branch=z9hG4bKabc;rport");
    }
}

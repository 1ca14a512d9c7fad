//! Transmitter Configuration
//!
//! Manager-wide settings that steer destination resolution. A
//! [`ResolverManager`](crate::manager::ResolverManager) owns one
//! [`TransmitterConfig`]; every transmitter it creates copies the per-send
//! flags (`send_to_first_route`, `ignore_outbound_proxy`, `force_outbound`)
//! at construction and may override them afterwards.
//!
//! ## Examples
//!
//! ```rust
//! use rvoip_transmitter_core::config::{TransmitterConfig, OutboundProxyConfig};
//! use rvoip_transmitter_core::types::TransportType;
//!
//! let config = TransmitterConfig::default()
//!     .with_send_to_first_route(true)
//!     .with_outbound_proxy(
//!         OutboundProxyConfig::host("proxy.example.net")
//!             .with_port(5080)
//!             .with_transport(TransportType::Tcp),
//!     );
//!
//! assert!(config.validate().is_ok());
//! let json = config.to_json_string().unwrap();
//! let parsed = TransmitterConfig::from_json_str(&json).unwrap();
//! assert_eq!(parsed.outbound_proxy.unwrap().port, Some(5080));
//! ```

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{CompressionType, TransportType};

/// Suffix appended to reversed E.164 digits when building ENUM queries.
pub const DEFAULT_ENUM_DOMAIN: &str = "e164.arpa";

/// A local address the stack listens on for a given transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAddress {
    pub transport: TransportType,
    pub addr: SocketAddr,
}

impl LocalAddress {
    pub fn new(transport: TransportType, addr: SocketAddr) -> Self {
        Self { transport, addr }
    }
}

/// Administratively configured outbound proxy.
///
/// When both `ip` and `host` are set at manager level the host wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundProxyConfig {
    pub ip: Option<IpAddr>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub transport: TransportType,
    pub compression: CompressionType,
}

impl OutboundProxyConfig {
    /// Outbound proxy addressed by IP.
    pub fn ip(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Default::default()
        }
    }

    /// Outbound proxy addressed by host name.
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.ip.is_some() || self.host.as_deref().is_some_and(|h| !h.is_empty())
    }
}

/// Configuration for destination resolution and sending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmitterConfig {
    /// Use NAPTR/SRV driven transport discovery. When off, the transport
    /// of a symbolic host is inferred from the secure flag.
    pub enhanced_dns: bool,

    /// Convert tel URIs through ENUM before falling back to the application.
    pub resolve_tel_urls: bool,

    /// ENUM domain suffix.
    pub enum_domain: String,

    /// Reuse server connections found by alias (RFC 5923 style).
    pub server_connection_reuse: bool,

    /// Whether TCP (and therefore any connection-oriented transport) is available.
    pub tcp_enabled: bool,

    /// Route requests to the first Route header instead of the Request-URI.
    pub send_to_first_route: bool,

    /// Never consult the outbound proxy.
    pub ignore_outbound_proxy: bool,

    /// Try the outbound proxy before looking at Route headers.
    pub force_outbound: bool,

    /// Manager-level outbound proxy.
    pub outbound_proxy: Option<OutboundProxyConfig>,

    /// Local addresses available for sending.
    pub local_addresses: Vec<LocalAddress>,

    /// Hand network failures on client requests to the transaction's
    /// send-failure recovery instead of terminating it.
    pub enhanced_send_failure: bool,

    /// Keep the message after a send failure so it can be re-sent.
    pub keep_message: bool,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        let any: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 5060));
        Self {
            enhanced_dns: true,
            resolve_tel_urls: true,
            enum_domain: DEFAULT_ENUM_DOMAIN.to_string(),
            server_connection_reuse: false,
            tcp_enabled: true,
            send_to_first_route: false,
            ignore_outbound_proxy: false,
            force_outbound: false,
            outbound_proxy: None,
            local_addresses: vec![
                LocalAddress::new(TransportType::Udp, any),
                LocalAddress::new(TransportType::Tcp, any),
            ],
            enhanced_send_failure: true,
            keep_message: false,
        }
    }
}

impl TransmitterConfig {
    pub fn with_enhanced_dns(mut self, enabled: bool) -> Self {
        self.enhanced_dns = enabled;
        self
    }

    pub fn with_resolve_tel_urls(mut self, enabled: bool) -> Self {
        self.resolve_tel_urls = enabled;
        self
    }

    pub fn with_enum_domain(mut self, domain: impl Into<String>) -> Self {
        self.enum_domain = domain.into();
        self
    }

    pub fn with_server_connection_reuse(mut self, enabled: bool) -> Self {
        self.server_connection_reuse = enabled;
        self
    }

    pub fn with_tcp_enabled(mut self, enabled: bool) -> Self {
        self.tcp_enabled = enabled;
        self
    }

    pub fn with_send_to_first_route(mut self, enabled: bool) -> Self {
        self.send_to_first_route = enabled;
        self
    }

    pub fn with_ignore_outbound_proxy(mut self, enabled: bool) -> Self {
        self.ignore_outbound_proxy = enabled;
        self
    }

    pub fn with_force_outbound(mut self, enabled: bool) -> Self {
        self.force_outbound = enabled;
        self
    }

    pub fn with_outbound_proxy(mut self, proxy: OutboundProxyConfig) -> Self {
        self.outbound_proxy = Some(proxy);
        self
    }

    /// Replaces the local address list.
    pub fn with_local_addresses(mut self, addresses: Vec<LocalAddress>) -> Self {
        self.local_addresses = addresses;
        self
    }

    pub fn with_local_address(mut self, transport: TransportType, addr: SocketAddr) -> Self {
        self.local_addresses.push(LocalAddress::new(transport, addr));
        self
    }

    pub fn with_enhanced_send_failure(mut self, enabled: bool) -> Self {
        self.enhanced_send_failure = enabled;
        self
    }

    pub fn with_keep_message(mut self, enabled: bool) -> Self {
        self.keep_message = enabled;
        self
    }

    /// Returns `true` if at least one local address exists for `transport`.
    pub fn has_local_address(&self, transport: TransportType) -> bool {
        self.local_addresses.iter().any(|a| a.transport == transport)
    }

    /// First local address for `transport` in the requested IP family.
    pub fn local_address(&self, transport: TransportType, ipv6: bool) -> Option<SocketAddr> {
        self.local_addresses
            .iter()
            .find(|a| a.transport == transport && a.addr.is_ipv6() == ipv6)
            .map(|a| a.addr)
    }

    /// Local address to send from: same family as `dest` if possible, any otherwise.
    pub fn local_address_for(&self, transport: TransportType, dest: &SocketAddr) -> Option<SocketAddr> {
        let lookup = if transport == TransportType::Undefined {
            TransportType::Udp
        } else {
            transport
        };
        self.local_address(lookup, dest.is_ipv6())
            .or_else(|| self.local_address(lookup, !dest.is_ipv6()))
    }

    /// Checks the configuration for contradictions.
    pub fn validate(&self) -> Result<()> {
        if self.resolve_tel_urls && self.enum_domain.trim().is_empty() {
            return Err(Error::Configuration(
                "enum_domain must not be empty when tel resolution is enabled".to_string(),
            ));
        }
        if let Some(proxy) = &self.outbound_proxy {
            if !proxy.is_configured() {
                return Err(Error::Configuration(
                    "outbound proxy needs an ip or a host".to_string(),
                ));
            }
            if proxy.port == Some(0) {
                return Err(Error::Configuration("outbound proxy port must not be 0".to_string()));
            }
        }
        if self.local_addresses.iter().any(|a| !a.transport.is_defined()) {
            return Err(Error::Configuration(
                "local addresses need a defined transport".to_string(),
            ));
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: TransmitterConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

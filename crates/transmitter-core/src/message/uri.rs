//! SIP, SIPS, IM, PRES and tel URIs.
//!
//! Only the parts that routing looks at are modelled. Everything else is
//! carried through untouched in `other_params` so the URI still prints back.

use std::fmt;
use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, recognize, rest},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::types::{parse_ip_literal, CompressionType, TransportType};

// Type alias for parser result
pub type ParseResult<'a, O> = IResult<&'a str, O>;

/// A `name` or `name=value` URI parameter.
pub type UriParam = (String, Option<String>);

/// URI schemes resolved through the SIP locating procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriScheme {
    Sip,
    Sips,
    Im,
    Pres,
}

impl UriScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriScheme::Sip => "sip",
            UriScheme::Sips => "sips",
            UriScheme::Im => "im",
            UriScheme::Pres => "pres",
        }
    }
}

impl fmt::Display for UriScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A SIP-family URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub scheme: UriScheme,
    pub user: Option<String>,
    /// Host part; IPv6 references keep their brackets. May be empty when
    /// the URI was built or parsed without one.
    pub host: String,
    pub port: Option<u16>,
    pub transport: TransportType,
    pub maddr: Option<String>,
    pub comp: CompressionType,
    pub lr: bool,
    pub other_params: Vec<UriParam>,
    pub headers: Option<String>,
}

impl SipUri {
    pub fn new(scheme: UriScheme, host: impl Into<String>) -> Self {
        SipUri {
            scheme,
            user: None,
            host: host.into(),
            port: None,
            transport: TransportType::Undefined,
            maddr: None,
            comp: CompressionType::None,
            lr: false,
            other_params: Vec::new(),
            headers: None,
        }
    }

    /// Shorthand for a `sip:` URI.
    pub fn sip(host: impl Into<String>) -> Self {
        Self::new(UriScheme::Sip, host)
    }

    /// Shorthand for a `sips:` URI.
    pub fn sips(host: impl Into<String>) -> Self {
        Self::new(UriScheme::Sips, host)
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_maddr(mut self, maddr: impl Into<String>) -> Self {
        self.maddr = Some(maddr.into());
        self
    }

    pub fn with_comp(mut self, comp: CompressionType) -> Self {
        self.comp = comp;
        self
    }

    pub fn with_lr(mut self) -> Self {
        self.lr = true;
        self
    }

    /// `true` for `sips:` URIs.
    pub fn is_secure(&self) -> bool {
        self.scheme == UriScheme::Sips
    }

    /// `true` when the host is an IPv4 or IPv6 literal.
    pub fn host_is_ip(&self) -> bool {
        parse_ip_literal(&self.host).is_some()
    }

    fn from_parts(
        scheme: UriScheme,
        user: Option<&str>,
        host: &str,
        port: Option<u16>,
        params: Vec<UriParam>,
        headers: Option<&str>,
    ) -> Result<Self> {
        let mut uri = SipUri::new(scheme, host);
        uri.user = user.map(str::to_string);
        uri.port = port;
        uri.headers = headers.map(str::to_string);
        for (name, value) in params {
            match (name.to_ascii_lowercase().as_str(), value) {
                ("transport", Some(v)) => uri.transport = v.parse()?,
                ("maddr", Some(v)) => uri.maddr = Some(v),
                ("comp", Some(v)) => uri.comp = CompressionType::from_param(&v),
                ("lr", _) => uri.lr = true,
                (_, value) => uri.other_params.push((name, value)),
            }
        }
        Ok(uri)
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if self.transport.is_defined() {
            write!(f, ";transport={}", self.transport.as_str().to_ascii_lowercase())?;
        }
        if let Some(maddr) = &self.maddr {
            write!(f, ";maddr={}", maddr)?;
        }
        if self.comp == CompressionType::SigComp {
            f.write_str(";comp=sigcomp")?;
        }
        if self.lr {
            f.write_str(";lr")?;
        }
        write_params(f, &self.other_params)?;
        if let Some(headers) = &self.headers {
            write!(f, "?{}", headers)?;
        }
        Ok(())
    }
}

impl FromStr for SipUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (_, (scheme, user, host, port, params, headers)) = all_consuming(sip_uri)(s.trim())
            .map_err(|_| Error::MalformedUri(s.to_string()))?;
        SipUri::from_parts(scheme, user, host, port, params, headers)
    }
}

/// A telephone-number URI (RFC 3966).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelUri {
    /// Number as written, visual separators included.
    pub number: String,
    /// Set once ENUM has been consulted for this number (RFC 4759).
    pub enumdi: bool,
    pub phone_context: Option<String>,
    pub other_params: Vec<UriParam>,
}

impl TelUri {
    pub fn new(number: impl Into<String>) -> Self {
        TelUri {
            number: number.into(),
            enumdi: false,
            phone_context: None,
            other_params: Vec::new(),
        }
    }

    /// Digits of the number with every visual separator removed.
    pub fn digits(&self) -> String {
        self.number.chars().filter(|c| c.is_ascii_digit()).collect()
    }

    pub fn is_global(&self) -> bool {
        self.number.starts_with('+')
    }
}

impl fmt::Display for TelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tel:{}", self.number)?;
        if self.enumdi {
            f.write_str(";enumdi")?;
        }
        if let Some(ctx) = &self.phone_context {
            write!(f, ";phone-context={}", ctx)?;
        }
        write_params(f, &self.other_params)
    }
}

impl FromStr for TelUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (_, (number, params)) =
            all_consuming(tel_uri)(s.trim()).map_err(|_| Error::MalformedUri(s.to_string()))?;
        let mut tel = TelUri::new(number);
        for (name, value) in params {
            match (name.to_ascii_lowercase().as_str(), value) {
                ("enumdi", _) => tel.enumdi = true,
                ("phone-context", Some(v)) => tel.phone_context = Some(v),
                (_, value) => tel.other_params.push((name, value)),
            }
        }
        Ok(tel)
    }
}

/// Address carried by a Request-URI or Route header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Sip(SipUri),
    Tel(TelUri),
    /// Any other absolute URI, kept verbatim.
    Other(String),
}

impl Address {
    pub fn as_sip(&self) -> Option<&SipUri> {
        match self {
            Address::Sip(uri) => Some(uri),
            _ => None,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.as_sip().is_some_and(SipUri::is_secure)
    }
}

impl From<SipUri> for Address {
    fn from(uri: SipUri) -> Self {
        Address::Sip(uri)
    }
}

impl From<TelUri> for Address {
    fn from(uri: TelUri) -> Self {
        Address::Tel(uri)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Sip(uri) => uri.fmt(f),
            Address::Tel(uri) => uri.fmt(f),
            Address::Other(uri) => f.write_str(uri),
        }
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Accepts a bare URI or a `name-addr` such as `"Bob" <sip:bob@host>`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let uri = match (s.find('<'), s.rfind('>')) {
            (Some(start), Some(end)) if start < end => &s[start + 1..end],
            _ => s,
        };
        if has_scheme(uri, "tel:") {
            Ok(Address::Tel(uri.parse()?))
        } else if ["sip:", "sips:", "im:", "pres:"].iter().any(|p| has_scheme(uri, p)) {
            Ok(Address::Sip(uri.parse()?))
        } else if uri.contains(':') {
            Ok(Address::Other(uri.to_string()))
        } else {
            Err(Error::MalformedUri(s.to_string()))
        }
    }
}

fn has_scheme(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len()).is_some_and(|p| p.eq_ignore_ascii_case(prefix))
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[UriParam]) -> fmt::Result {
    for (name, value) in params {
        match value {
            Some(v) => write!(f, ";{}={}", name, v)?,
            None => write!(f, ";{}", name)?,
        }
    }
    Ok(())
}

fn is_user_char(c: char) -> bool {
    !matches!(c, '@' | ';' | '?' | '<' | '>') && !c.is_whitespace()
}

fn is_host_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_')
}

fn is_param_char(c: char) -> bool {
    !matches!(c, ';' | '=' | '?' | '<' | '>' | ',') && !c.is_whitespace()
}

fn is_phone_char(c: char) -> bool {
    c.is_ascii_hexdigit() || matches!(c, '+' | '-' | '.' | '(' | ')' | '*' | '#')
}

fn scheme(input: &str) -> ParseResult<UriScheme> {
    alt((
        map(tag_no_case("sips:"), |_| UriScheme::Sips),
        map(tag_no_case("sip:"), |_| UriScheme::Sip),
        map(tag_no_case("pres:"), |_| UriScheme::Pres),
        map(tag_no_case("im:"), |_| UriScheme::Im),
    ))(input)
}

fn userinfo(input: &str) -> ParseResult<&str> {
    terminated(take_while1(is_user_char), char('@'))(input)
}

fn ipv6_reference(input: &str) -> ParseResult<&str> {
    recognize(delimited(
        char('['),
        take_while1(|c: char| c.is_ascii_hexdigit() || c == ':' || c == '.'),
        char(']'),
    ))(input)
}

pub(crate) fn host(input: &str) -> ParseResult<&str> {
    alt((ipv6_reference, take_while(is_host_char)))(input)
}

pub(crate) fn port(input: &str) -> ParseResult<u16> {
    preceded(char(':'), map_res(digit1, |d: &str| d.parse::<u16>()))(input)
}

/// `;name[=value]`
pub(crate) fn param(input: &str) -> ParseResult<UriParam> {
    preceded(
        char(';'),
        pair(
            map(take_while1(is_param_char), |n: &str| n.to_string()),
            opt(preceded(char('='), map(take_while(is_param_char), |v: &str| v.to_string()))),
        ),
    )(input)
}

#[allow(clippy::type_complexity)]
fn sip_uri(
    input: &str,
) -> ParseResult<(UriScheme, Option<&str>, &str, Option<u16>, Vec<UriParam>, Option<&str>)> {
    tuple((
        scheme,
        opt(userinfo),
        host,
        opt(port),
        many0(param),
        opt(preceded(char('?'), rest)),
    ))(input)
}

fn tel_uri(input: &str) -> ParseResult<(&str, Vec<UriParam>)> {
    preceded(tag_no_case("tel:"), pair(take_while1(is_phone_char), many0(param)))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_sip_uri() {
        let uri: SipUri = "sip:alice@example.com:5070;transport=TCP;maddr=10.0.0.1;comp=sigcomp;lr;ob"
            .parse()
            .unwrap();
        assert_eq!(uri.scheme, UriScheme::Sip);
        assert_eq!(uri.user.as_deref(), Some("alice"));
        assert_eq!(uri.host, "example.com");
        assert_eq!(uri.port, Some(5070));
        assert_eq!(uri.transport, TransportType::Tcp);
        assert_eq!(uri.maddr.as_deref(), Some("10.0.0.1"));
        assert_eq!(uri.comp, CompressionType::SigComp);
        assert!(uri.lr);
        assert_eq!(uri.other_params, vec![("ob".to_string(), None)]);
    }

    #[test]
    fn test_parse_sips_ipv6() {
        let uri: SipUri = "sips:[2001:db8::5]:5061".parse().unwrap();
        assert!(uri.is_secure());
        assert_eq!(uri.host, "[2001:db8::5]");
        assert!(uri.host_is_ip());
        assert_eq!(uri.port, Some(5061));
    }

    #[test]
    fn test_host_without_user_is_not_userinfo() {
        let uri: SipUri = "sip:proxy.example.net:5080".parse().unwrap();
        assert_eq!(uri.user, None);
        assert_eq!(uri.host, "proxy.example.net");
        assert_eq!(uri.port, Some(5080));
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        assert!(matches!(
            "sip:host;transport=carrier-pigeon".parse::<SipUri>(),
            Err(Error::MalformedUri(_))
        ));
    }

    #[test]
    fn test_display_keeps_params() {
        let text = "sip:bob@example.com;transport=tls;lr;ob";
        let uri: SipUri = text.parse().unwrap();
        assert_eq!(uri.to_string(), text);
    }

    #[test]
    fn test_tel_uri() {
        let tel: TelUri = "tel:+1-212-555-0101;enumdi".parse().unwrap();
        assert!(tel.enumdi);
        assert!(tel.is_global());
        assert_eq!(tel.digits(), "12125550101");
        assert_eq!(tel.to_string(), "tel:+1-212-555-0101;enumdi");
    }

    #[test]
    fn test_address_kinds() {
        assert!(matches!("<sip:proxy.example.net;lr>".parse::<Address>().unwrap(), Address::Sip(u) if u.lr));
        assert!(matches!("\"Bob\" <tel:+4930123>".parse::<Address>().unwrap(), Address::Tel(_)));
        assert!(matches!(
            "mailto:bob@example.com".parse::<Address>().unwrap(),
            Address::Other(s) if s == "mailto:bob@example.com"
        ));
        assert!("example.com".parse::<Address>().is_err());
    }
}

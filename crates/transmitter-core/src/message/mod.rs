//! Minimal SIP message model.
//!
//! The resolution engine reads messages through a handful of accessors:
//! the Request-URI, the Route set, the top Via and the method. This module
//! provides just those plus a wire encoder so the dispatcher has bytes to
//! send and to keep for retransmission.

pub mod uri;
pub mod via;

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};

pub use uri::{Address, SipUri, TelUri, UriScheme};
pub use via::ViaHeader;

use crate::error::{Error, Result};

/// SIP request methods.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Other(m) => m,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(Error::Other(format!("invalid method '{}'", s)));
        }
        Ok(match s.to_ascii_uppercase().as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            _ => Method::Other(s.to_string()),
        })
    }
}

/// Which routing header a hop came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    Route,
    RecordRoute,
}

/// A Route or Record-Route entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHop {
    pub kind: RouteKind,
    pub address: Address,
}

impl RouteHop {
    pub fn route(address: impl Into<Address>) -> Self {
        RouteHop {
            kind: RouteKind::Route,
            address: address.into(),
        }
    }

    pub fn record_route(address: impl Into<Address>) -> Self {
        RouteHop {
            kind: RouteKind::RecordRoute,
            address: address.into(),
        }
    }
}

/// An outgoing SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipRequest {
    pub method: Method,
    pub request_uri: Address,
    pub vias: Vec<ViaHeader>,
    /// Route and Record-Route entries in header order.
    pub routes: Vec<RouteHop>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl SipRequest {
    pub fn new(method: Method, request_uri: impl Into<Address>) -> Self {
        SipRequest {
            method,
            request_uri: request_uri.into(),
            vias: Vec::new(),
            routes: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_via(mut self, via: ViaHeader) -> Self {
        self.vias.push(via);
        self
    }

    pub fn with_route(mut self, address: impl Into<Address>) -> Self {
        self.routes.push(RouteHop::route(address));
        self
    }

    pub fn with_record_route(mut self, address: impl Into<Address>) -> Self {
        self.routes.push(RouteHop::record_route(address));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First `Route` header; Record-Route entries are skipped.
    pub fn first_route(&self) -> Option<&RouteHop> {
        self.routes.iter().find(|r| r.kind == RouteKind::Route)
    }
}

/// An outgoing SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipResponse {
    pub status: u16,
    pub reason: String,
    /// Method of the request this response answers.
    pub cseq_method: Method,
    pub vias: Vec<ViaHeader>,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl SipResponse {
    pub fn new(status: u16, reason: impl Into<String>, cseq_method: Method) -> Self {
        SipResponse {
            status,
            reason: reason.into(),
            cseq_method,
            vias: Vec::new(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_via(mut self, via: ViaHeader) -> Self {
        self.vias.push(via);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.status)
    }
}

/// A message handed to a transmitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn is_request(&self) -> bool {
        matches!(self, SipMessage::Request(_))
    }

    /// Request method, or the CSeq method of a response.
    pub fn method(&self) -> &Method {
        match self {
            SipMessage::Request(r) => &r.method,
            SipMessage::Response(r) => &r.cseq_method,
        }
    }

    pub fn top_via(&self) -> Option<&ViaHeader> {
        match self {
            SipMessage::Request(r) => r.vias.first(),
            SipMessage::Response(r) => r.vias.first(),
        }
    }

    /// Serializes the message for the wire.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(512);
        let (vias, headers, body) = match self {
            SipMessage::Request(r) => {
                put_line(&mut buf, &format!("{} {} SIP/2.0", r.method, r.request_uri));
                (&r.vias, &r.headers, &r.body)
            }
            SipMessage::Response(r) => {
                put_line(&mut buf, &format!("SIP/2.0 {} {}", r.status, r.reason));
                (&r.vias, &r.headers, &r.body)
            }
        };
        for via in vias {
            put_line(&mut buf, &format!("Via: {}", via));
        }
        if let SipMessage::Request(r) = self {
            for hop in &r.routes {
                let name = match hop.kind {
                    RouteKind::Route => "Route",
                    RouteKind::RecordRoute => "Record-Route",
                };
                put_line(&mut buf, &format!("{}: <{}>", name, hop.address));
            }
        }
        for (name, value) in headers {
            put_line(&mut buf, &format!("{}: {}", name, value));
        }
        put_line(&mut buf, &format!("Content-Length: {}", body.len()));
        buf.put_slice(b"\r\n");
        buf.put_slice(body);
        buf.freeze()
    }
}

impl From<SipRequest> for SipMessage {
    fn from(r: SipRequest) -> Self {
        SipMessage::Request(r)
    }
}

impl From<SipResponse> for SipMessage {
    fn from(r: SipResponse) -> Self {
        SipMessage::Response(r)
    }
}

fn put_line(buf: &mut BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_slice(b"\r\n");
}

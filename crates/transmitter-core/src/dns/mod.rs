//! DNS collaborator interface.
//!
//! The resolution engine never performs lookups itself. It hands a
//! [`ResolveRequest`] to a [`DnsResolver`] and gets one of three answers back:
//!
//! ```text
//!   resolve(request, completion)
//!        │
//!        ├── Answered(records) ── records appended to the DnsResultList,
//!        │                        engine continues in the same call
//!        ├── NotFound ─────────── engine falls back to the next strategy
//!        └── Pending ──────────── engine suspends; the resolver later calls
//!                                 completion.complete(outcome) exactly once
//! ```
//!
//! A resolver must never invoke the completion from inside `resolve`; answers
//! that are available immediately (cache hits) are returned as `Answered`.

pub mod enum_query;
pub mod hickory;
pub mod srv;

use std::collections::VecDeque;
use std::fmt;
use std::net::IpAddr;

use crate::message::UriScheme;
use crate::types::TransportType;

pub use hickory::HickoryDnsResolver;

/// One DNS answer waiting to be consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsRecord {
    /// A/AAAA answer, ready to send to.
    Ip {
        addr: IpAddr,
        port: u16,
        transport: TransportType,
    },
    /// SRV target that still needs an A/AAAA lookup.
    Host {
        host: String,
        port: Option<u16>,
        transport: TransportType,
    },
    /// SRV owner name produced by NAPTR, e.g. `_sip._tcp.example.com`.
    Srv { name: String, transport: TransportType },
    /// ENUM NAPTR `regexp` field (`!ere!replacement!flags`).
    EnumRegexp(String),
}

/// Ordered worklist of DNS answers not yet consumed.
///
/// Every record is removed when it is used, so draining the list twice never
/// yields the same record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsResultList {
    records: VecDeque<DnsRecord>,
}

impl DnsResultList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: DnsRecord) {
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &DnsRecord> {
        self.records.iter()
    }

    fn take_first(&mut self, pred: impl Fn(&DnsRecord) -> bool) -> Option<DnsRecord> {
        let idx = self.records.iter().position(pred)?;
        self.records.remove(idx)
    }

    /// Removes and returns the first IP record.
    pub fn pop_ip(&mut self) -> Option<DnsRecord> {
        self.take_first(|r| matches!(r, DnsRecord::Ip { .. }))
    }

    /// Removes and returns the first host record.
    pub fn pop_host(&mut self) -> Option<DnsRecord> {
        self.take_first(|r| matches!(r, DnsRecord::Host { .. }))
    }

    /// Removes and returns the first SRV record.
    pub fn pop_srv(&mut self) -> Option<DnsRecord> {
        self.take_first(|r| matches!(r, DnsRecord::Srv { .. }))
    }

    /// Drops every record bound to a transport other than `transport`.
    /// Returns how many were dropped.
    pub fn retain_transport(&mut self, transport: TransportType) -> usize {
        let before = self.records.len();
        self.records.retain(|r| match r {
            DnsRecord::Ip { transport: t, .. }
            | DnsRecord::Host { transport: t, .. }
            | DnsRecord::Srv { transport: t, .. } => !t.is_defined() || *t == transport,
            DnsRecord::EnumRegexp(_) => true,
        });
        before - self.records.len()
    }

    /// Removes and returns the first ENUM regexp.
    pub fn pop_enum_regexp(&mut self) -> Option<String> {
        match self.take_first(|r| matches!(r, DnsRecord::EnumRegexp(_))) {
            Some(DnsRecord::EnumRegexp(re)) => Some(re),
            _ => None,
        }
    }
}

impl Extend<DnsRecord> for DnsResultList {
    fn extend<I: IntoIterator<Item = DnsRecord>>(&mut self, iter: I) {
        self.records.extend(iter);
    }
}

/// Lookup strategies a resolver must support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveMode {
    /// A/AAAA for `query`, answering [`DnsRecord::Ip`] with the request port.
    FindIpByHost,
    /// SRV for the full owner name in `query`, answering [`DnsRecord::Host`].
    FindHostPortBySrvString,
    /// NAPTR for the domain in `query`, answering [`DnsRecord::Srv`].
    FindTransportByNaptr,
    /// SRV for each transport in `candidates` until one answers, producing
    /// [`DnsRecord::Host`].
    FindTransportBy3WaySrv,
    /// ENUM NAPTR for `query`, answering [`DnsRecord::EnumRegexp`].
    FindUriByNaptr,
    /// SRV for `query` over the request transport, answering [`DnsRecord::Host`].
    FindHostPortByTransport,
}

/// Service family used to build SRV names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResolverScheme {
    Sip,
    Sips,
    Im,
    Pres,
    #[default]
    Undefined,
}

impl From<UriScheme> for ResolverScheme {
    fn from(scheme: UriScheme) -> Self {
        match scheme {
            UriScheme::Sip => ResolverScheme::Sip,
            UriScheme::Sips => ResolverScheme::Sips,
            UriScheme::Im => ResolverScheme::Im,
            UriScheme::Pres => ResolverScheme::Pres,
        }
    }
}

/// A single lookup handed to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub mode: ResolveMode,
    pub query: String,
    pub scheme: ResolverScheme,
    pub secure: bool,
    pub port: Option<u16>,
    pub transport: TransportType,
    /// Transports to try, in order, for [`ResolveMode::FindTransportBy3WaySrv`].
    pub candidates: Vec<TransportType>,
}

impl ResolveRequest {
    pub fn new(mode: ResolveMode, query: impl Into<String>) -> Self {
        ResolveRequest {
            mode,
            query: query.into(),
            scheme: ResolverScheme::Undefined,
            secure: false,
            port: None,
            transport: TransportType::Undefined,
            candidates: Vec::new(),
        }
    }

    pub fn with_scheme(mut self, scheme: ResolverScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn with_transport(mut self, transport: TransportType) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<TransportType>) -> Self {
        self.candidates = candidates;
        self
    }
}

/// Immediate answer of [`DnsResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStatus {
    Answered(Vec<DnsRecord>),
    NotFound,
    Pending,
}

/// Deferred answer delivered through a [`DnsCompletion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsOutcome {
    Answered(Vec<DnsRecord>),
    NotFound,
}

/// One-shot continuation for a pending lookup.
pub struct DnsCompletion(Box<dyn FnOnce(DnsOutcome) + Send + 'static>);

impl DnsCompletion {
    pub fn new(f: impl FnOnce(DnsOutcome) + Send + 'static) -> Self {
        DnsCompletion(Box::new(f))
    }

    /// Delivers the outcome. Consumes the completion.
    pub fn complete(self, outcome: DnsOutcome) {
        (self.0)(outcome)
    }
}

impl fmt::Debug for DnsCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DnsCompletion")
    }
}

/// Asynchronous DNS resolver used by transmitters.
pub trait DnsResolver: Send + Sync {
    /// Starts a lookup. When `Pending` is returned the resolver owns
    /// `completion` and must call it exactly once from another task;
    /// otherwise `completion` is dropped unused.
    fn resolve(&self, request: ResolveRequest, completion: DnsCompletion) -> ResolveStatus;
}

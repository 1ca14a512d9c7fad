//! Shared test utilities: a scripted DNS resolver, a recording transport
//! and message builders.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use rvoip_transmitter_core::config::TransmitterConfig;
use rvoip_transmitter_core::dns::{
    DnsCompletion, DnsOutcome, DnsRecord, DnsResolver, ResolveMode, ResolveRequest, ResolveStatus,
};
use rvoip_transmitter_core::manager::ResolverManager;
use rvoip_transmitter_core::message::{Method, SipRequest, SipResponse, SipUri, ViaHeader};
use rvoip_transmitter_core::transmitter::{
    EventReceiver, TransmitterEvent, TransmitterState,
};
use rvoip_transmitter_core::transport::{ConnectionId, MessageTransport};
use rvoip_transmitter_core::types::TransportType;
use rvoip_transmitter_core::{Error, Result};

/// Scripted answer for one (mode, query) pair.
#[derive(Debug, Clone)]
pub enum Reply {
    Answer(Vec<DnsRecord>),
    /// A/AAAA answer carrying the port and transport of the request.
    Address(IpAddr),
    NotFound,
    Pending,
}

#[derive(Default)]
struct MockResolverState {
    replies: HashMap<(ResolveMode, String), Reply>,
    requests: Vec<ResolveRequest>,
    pending: VecDeque<(ResolveRequest, DnsCompletion)>,
}

/// Resolver answering from a script. Unscripted queries find nothing.
#[derive(Default)]
pub struct MockResolver {
    state: Mutex<MockResolverState>,
}

impl MockResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, mode: ResolveMode, query: &str, reply: Reply) {
        self.state.lock().replies.insert((mode, query.to_string()), reply);
    }

    pub fn requests(&self) -> Vec<ResolveRequest> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn modes(&self) -> Vec<ResolveMode> {
        self.state.lock().requests.iter().map(|r| r.mode).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Removes the oldest held completion without running it.
    pub fn take_pending(&self) -> Option<(ResolveRequest, DnsCompletion)> {
        self.state.lock().pending.pop_front()
    }

    /// Completes the oldest pending query. The resolver lock is released first.
    pub fn complete_next(&self, outcome: DnsOutcome) -> bool {
        let next = self.state.lock().pending.pop_front();
        match next {
            Some((_, completion)) => {
                completion.complete(outcome);
                true
            }
            None => false,
        }
    }
}

impl DnsResolver for MockResolver {
    fn resolve(&self, request: ResolveRequest, completion: DnsCompletion) -> ResolveStatus {
        let mut state = self.state.lock();
        state.requests.push(request.clone());
        let reply = state
            .replies
            .get(&(request.mode, request.query.clone()))
            .cloned()
            .unwrap_or(Reply::NotFound);
        match reply {
            Reply::Answer(records) => ResolveStatus::Answered(records),
            Reply::Address(addr) => ResolveStatus::Answered(vec![DnsRecord::Ip {
                addr,
                port: request.port.unwrap_or(5060),
                transport: request.transport,
            }]),
            Reply::NotFound => ResolveStatus::NotFound,
            Reply::Pending => {
                state.pending.push_back((request, completion));
                ResolveStatus::Pending
            }
        }
    }
}

/// One message handed to the transport.
#[derive(Debug, Clone)]
pub struct Sent {
    pub local: Option<SocketAddr>,
    pub dest: Option<SocketAddr>,
    pub connection: Option<ConnectionId>,
    pub payload: Bytes,
}

impl Sent {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Transport that records instead of sending.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    connects: Mutex<Vec<(ConnectionId, TransportType, SocketAddr)>>,
    fail_sends: AtomicBool,
    fail_connects: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn connects(&self) -> Vec<(ConnectionId, TransportType, SocketAddr)> {
        self.connects.lock().clone()
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }
}

impl MessageTransport for RecordingTransport {
    fn send_datagram(&self, local: SocketAddr, dest: SocketAddr, payload: Bytes) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("host unreachable")));
        }
        self.sent.lock().push(Sent {
            local: Some(local),
            dest: Some(dest),
            connection: None,
            payload,
        });
        Ok(())
    }

    fn connect(&self, id: ConnectionId, transport: TransportType, _local: SocketAddr, remote: SocketAddr) -> Result<()> {
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection refused".to_string()));
        }
        self.connects.lock().push((id, transport, remote));
        Ok(())
    }

    fn send_on_connection(&self, id: ConnectionId, payload: Bytes) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Connection("connection reset".to_string()));
        }
        self.sent.lock().push(Sent {
            local: None,
            dest: None,
            connection: Some(id),
            payload,
        });
        Ok(())
    }
}

pub fn local_v4() -> SocketAddr {
    "10.0.0.1:5060".parse().unwrap()
}

pub fn local_v6() -> SocketAddr {
    "[2001:db8::100]:5060".parse().unwrap()
}

/// Local addresses for every transport in both families.
pub fn test_config() -> TransmitterConfig {
    let mut config = TransmitterConfig::default().with_local_addresses(Vec::new());
    for transport in [TransportType::Udp, TransportType::Tcp, TransportType::Tls, TransportType::Sctp] {
        config = config
            .with_local_address(transport, local_v4())
            .with_local_address(transport, local_v6());
    }
    config
}

pub struct Harness {
    pub manager: ResolverManager,
    pub resolver: Arc<MockResolver>,
    pub transport: Arc<RecordingTransport>,
}

pub fn harness(config: TransmitterConfig) -> Harness {
    let resolver = MockResolver::new();
    let transport = RecordingTransport::new();
    let manager = ResolverManager::builder()
        .with_config(config)
        .with_resolver(resolver.clone())
        .with_transport(transport.clone())
        .build()
        .unwrap();
    Harness {
        manager,
        resolver,
        transport,
    }
}

pub fn request(method: Method, uri: &str) -> SipRequest {
    let uri: SipUri = uri.parse().unwrap();
    SipRequest::new(method, uri).with_via(
        ViaHeader::new(TransportType::Udp, "10.0.0.1", Some(5060)).with_branch("z9hG4bK776asdhds"),
    )
}

pub fn invite(uri: &str) -> SipRequest {
    request(Method::Invite, uri)
}

pub fn response_via(via: &str) -> SipResponse {
    SipResponse::new(200, "OK", Method::Invite).with_via(via.parse().unwrap())
}

pub fn ip_record(addr: &str, port: u16, transport: TransportType) -> DnsRecord {
    DnsRecord::Ip {
        addr: addr.parse().unwrap(),
        port,
        transport,
    }
}

pub fn drain_events(rx: &mut EventReceiver) -> Vec<TransmitterEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn states(events: &[TransmitterEvent]) -> Vec<TransmitterState> {
    events.iter().filter_map(TransmitterEvent::state).collect()
}

pub fn failures(events: &[TransmitterEvent]) -> usize {
    states(events)
        .into_iter()
        .filter(|s| *s == TransmitterState::MsgSendFailure)
        .count()
}

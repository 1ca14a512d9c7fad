//! [`DnsResolver`] backed by hickory-dns.

use std::cmp::Reverse;
use std::sync::Arc;

use hickory_resolver::proto::rr::rdata::{NAPTR, SRV};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioResolver;
use tracing::{debug, warn};

use super::srv::srv_name;
use super::{DnsCompletion, DnsOutcome, DnsRecord, DnsResolver, ResolveMode, ResolveRequest, ResolveStatus};
use crate::error::{Error, Result};
use crate::types::{default_port, TransportType};

/// Resolver running every lookup on a spawned tokio task.
///
/// `resolve` always answers [`ResolveStatus::Pending`], or
/// [`ResolveStatus::NotFound`] when called outside a tokio runtime.
#[derive(Clone)]
pub struct HickoryDnsResolver {
    resolver: Arc<TokioResolver>,
}

impl HickoryDnsResolver {
    /// Builds a resolver from the system configuration.
    pub fn from_system_conf() -> Result<Self> {
        let resolver = hickory_resolver::Resolver::builder_tokio()
            .map_err(|e| Error::Configuration(format!("failed to read system DNS configuration: {}", e)))?
            .build();
        Ok(Self::from_resolver(resolver))
    }

    pub fn from_resolver(resolver: TokioResolver) -> Self {
        HickoryDnsResolver {
            resolver: Arc::new(resolver),
        }
    }

    async fn lookup(resolver: &TokioResolver, request: &ResolveRequest) -> Vec<DnsRecord> {
        match request.mode {
            ResolveMode::FindIpByHost => {
                let port = request
                    .port
                    .unwrap_or_else(|| default_port(request.secure, request.transport));
                match resolver.lookup_ip(request.query.as_str()).await {
                    Ok(ips) => ips
                        .iter()
                        .map(|addr| DnsRecord::Ip {
                            addr,
                            port,
                            transport: request.transport,
                        })
                        .collect(),
                    Err(e) => {
                        debug!(query = %request.query, error = %e, "A/AAAA lookup failed");
                        Vec::new()
                    }
                }
            }
            ResolveMode::FindHostPortBySrvString => {
                srv_hosts(resolver, &request.query, request.transport).await
            }
            ResolveMode::FindHostPortByTransport => {
                let name = srv_name(request.scheme, &request.query, request.transport, request.secure);
                srv_hosts(resolver, &name, request.transport).await
            }
            ResolveMode::FindTransportBy3WaySrv => {
                for transport in &request.candidates {
                    let name = srv_name(request.scheme, &request.query, *transport, request.secure);
                    let hosts = srv_hosts(resolver, &name, *transport).await;
                    if !hosts.is_empty() {
                        return hosts;
                    }
                }
                Vec::new()
            }
            ResolveMode::FindTransportByNaptr => {
                let mut records = naptr_records(resolver, &request.query).await;
                records.retain(|r| r.flags().eq_ignore_ascii_case(b"s"));
                records
                    .into_iter()
                    .filter_map(|r| {
                        let transport = transport_from_naptr_service(r.services())?;
                        if request.secure && transport != TransportType::Tls {
                            return None;
                        }
                        Some(DnsRecord::Srv {
                            name: name_to_host(&r.replacement().to_utf8()),
                            transport,
                        })
                    })
                    .collect()
            }
            ResolveMode::FindUriByNaptr => naptr_records(resolver, &request.query)
                .await
                .into_iter()
                .filter(|r| {
                    String::from_utf8_lossy(r.services())
                        .to_ascii_uppercase()
                        .contains("E2U+SIP")
                })
                .map(|r| DnsRecord::EnumRegexp(String::from_utf8_lossy(r.regexp()).into_owned()))
                .collect(),
        }
    }
}

impl DnsResolver for HickoryDnsResolver {
    fn resolve(&self, request: ResolveRequest, completion: DnsCompletion) -> ResolveStatus {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(query = %request.query, "no tokio runtime available for DNS lookup");
                return ResolveStatus::NotFound;
            }
        };
        let resolver = self.resolver.clone();
        handle.spawn(async move {
            let records = Self::lookup(&resolver, &request).await;
            debug!(mode = ?request.mode, query = %request.query, answers = records.len(), "DNS lookup finished");
            let outcome = if records.is_empty() {
                DnsOutcome::NotFound
            } else {
                DnsOutcome::Answered(records)
            };
            completion.complete(outcome);
        });
        ResolveStatus::Pending
    }
}

/// Maps a NAPTR service field to a transport (RFC 3263 Section 4.1).
pub(crate) fn transport_from_naptr_service(service: &[u8]) -> Option<TransportType> {
    match String::from_utf8_lossy(service).to_ascii_uppercase().as_str() {
        "SIP+D2U" => Some(TransportType::Udp),
        "SIP+D2T" => Some(TransportType::Tcp),
        "SIPS+D2T" => Some(TransportType::Tls),
        "SIP+D2S" => Some(TransportType::Sctp),
        _ => None,
    }
}

fn name_to_host(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

async fn naptr_records(resolver: &TokioResolver, name: &str) -> Vec<NAPTR> {
    let lookup = match resolver.lookup(name, RecordType::NAPTR).await {
        Ok(lookup) => lookup,
        Err(e) => {
            debug!(query = %name, error = %e, "NAPTR lookup failed");
            return Vec::new();
        }
    };
    let mut records: Vec<NAPTR> = lookup
        .record_iter()
        .filter_map(|record| match record.data() {
            RData::NAPTR(naptr) => Some(naptr.clone()),
            _ => None,
        })
        .collect();
    records.sort_by_key(|r| (r.order(), r.preference()));
    records
}

async fn srv_hosts(resolver: &TokioResolver, name: &str, transport: TransportType) -> Vec<DnsRecord> {
    let lookup = match resolver.lookup(name, RecordType::SRV).await {
        Ok(lookup) => lookup,
        Err(e) => {
            debug!(query = %name, error = %e, "SRV lookup failed");
            return Vec::new();
        }
    };
    let mut records: Vec<SRV> = lookup
        .record_iter()
        .filter_map(|record| match record.data() {
            RData::SRV(srv) => Some(srv.clone()),
            _ => None,
        })
        .collect();
    records.sort_by_key(|r| (r.priority(), Reverse(r.weight())));
    records
        .into_iter()
        .map(|r| DnsRecord::Host {
            host: name_to_host(&r.target().to_utf8()),
            port: Some(r.port()),
            transport,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naptr_service_mapping() {
        assert_eq!(transport_from_naptr_service(b"SIP+D2U"), Some(TransportType::Udp));
        assert_eq!(transport_from_naptr_service(b"sips+d2t"), Some(TransportType::Tls));
        assert_eq!(transport_from_naptr_service(b"SIP+D2S"), Some(TransportType::Sctp));
        assert_eq!(transport_from_naptr_service(b"E2U+sip"), None);
    }
}

mod common;

use std::net::IpAddr;

use common::*;
use rvoip_transmitter_core::dns::{DnsOutcome, DnsRecord, ResolveMode};
use rvoip_transmitter_core::transmitter::{event_channel, OutboundMsgType, ResolutionState, TransmitterState};
use rvoip_transmitter_core::types::{DestAddress, TransportType};

fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

#[tokio::test]
async fn test_pending_naptr_srv_chain_resumes_to_send() {
    let h = harness(test_config());
    h.resolver.reply(ResolveMode::FindTransportByNaptr, "example.com", Reply::Pending);
    h.resolver.reply(ResolveMode::FindHostPortBySrvString, "_sip._tcp.example.com", Reply::Pending);
    h.resolver.reply(ResolveMode::FindIpByHost, "sip1.example.com", Reply::Pending);
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));

    trx.send_message(invite("sip:bob@example.com"), OutboundMsgType::Request)
        .unwrap();
    assert_eq!(trx.state(), TransmitterState::ResolvingAddr);
    assert_eq!(trx.resolution_state(), ResolutionState::ResolvingTransportNaptr);

    let resolver = h.resolver.clone();
    let completed = tokio::spawn(async move {
        resolver.complete_next(DnsOutcome::Answered(vec![DnsRecord::Srv {
            name: "_sip._tcp.example.com".to_string(),
            transport: TransportType::Tcp,
        }]))
    })
    .await
    .unwrap();
    assert!(completed);
    assert_eq!(trx.resolution_state(), ResolutionState::ResolvingHostPort);

    h.resolver.complete_next(DnsOutcome::Answered(vec![DnsRecord::Host {
        host: "sip1.example.com".to_string(),
        port: Some(5070),
        transport: TransportType::Tcp,
    }]));
    assert_eq!(trx.resolution_state(), ResolutionState::ResolvingIp);
    let a_query = h.resolver.requests().pop().unwrap();
    assert_eq!(a_query.mode, ResolveMode::FindIpByHost);
    assert_eq!(a_query.port, Some(5070));
    assert_eq!(a_query.transport, TransportType::Tcp);

    h.resolver.complete_next(DnsOutcome::Answered(vec![ip_record(
        "192.0.2.60",
        5070,
        TransportType::Tcp,
    )]));

    assert_eq!(trx.state(), TransmitterState::MsgSent);
    assert_eq!(
        trx.dest_address(),
        Some(DestAddress::new("192.0.2.60:5070".parse().unwrap(), TransportType::Tcp))
    );
    let connects = h.transport.connects();
    assert_eq!(connects.len(), 1);
    assert_eq!(connects[0].2, "192.0.2.60:5070".parse().unwrap());
    assert_eq!(h.transport.sent()[0].connection, Some(connects[0].0));
    assert_eq!(
        states(&drain_events(&mut rx)),
        vec![
            TransmitterState::ResolvingAddr,
            TransmitterState::FinalDestResolved,
            TransmitterState::ReadyForSending,
            TransmitterState::MsgSent,
        ]
    );
}

#[test]
fn test_answer_after_terminate_is_ignored() {
    let h = harness(test_config());
    h.resolver.reply(ResolveMode::FindIpByHost, "example.com", Reply::Pending);
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));

    trx.send_message(invite("sip:bob@example.com:5060"), OutboundMsgType::Request)
        .unwrap();
    assert_eq!(trx.resolution_state(), ResolutionState::ResolvingIp);
    assert_eq!(h.resolver.pending_count(), 1);

    trx.terminate();
    assert_eq!(
        states(&drain_events(&mut rx)).last(),
        Some(&TransmitterState::Terminated)
    );

    assert!(h.resolver.complete_next(DnsOutcome::Answered(vec![ip_record(
        "192.0.2.61",
        5060,
        TransportType::Udp,
    )])));
    assert_eq!(trx.state(), TransmitterState::Terminated);
    assert!(drain_events(&mut rx).is_empty());
    assert!(h.transport.sent().is_empty());
    assert!(trx.dns_list().is_empty());
}

#[test]
fn test_answer_after_transmitter_dropped_is_ignored() {
    let h = harness(test_config());
    h.resolver.reply(ResolveMode::FindIpByHost, "example.com", Reply::Pending);
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.send_message(invite("sip:bob@example.com:5060"), OutboundMsgType::Request)
        .unwrap();
    drain_events(&mut rx);
    drop(trx);

    assert!(h.resolver.complete_next(DnsOutcome::Answered(vec![ip_record(
        "192.0.2.62",
        5060,
        TransportType::Udp,
    )])));
    assert!(h.transport.sent().is_empty());
    assert!(drain_events(&mut rx).is_empty());
}

#[test]
fn test_pending_not_found_moves_to_failure() {
    let h = harness(test_config());
    h.resolver.reply(ResolveMode::FindIpByHost, "example.com", Reply::Pending);
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.send_message(invite("sip:bob@example.com:5060"), OutboundMsgType::Request)
        .unwrap();

    h.resolver.complete_next(DnsOutcome::NotFound);

    assert_eq!(trx.resolution_state(), ResolutionState::Unresolved);
    assert_eq!(trx.state(), TransmitterState::MsgSendFailure);
    assert_eq!(failures(&drain_events(&mut rx)), 1);
}

#[test]
fn test_second_srv_target_tried_before_fallback() {
    let h = harness(test_config());
    h.resolver.reply(
        ResolveMode::FindTransportByNaptr,
        "example.com",
        Reply::Answer(vec![DnsRecord::Srv {
            name: "_sip._udp.example.com".to_string(),
            transport: TransportType::Udp,
        }]),
    );
    h.resolver.reply(
        ResolveMode::FindHostPortBySrvString,
        "_sip._udp.example.com",
        Reply::Answer(vec![
            DnsRecord::Host {
                host: "dead.example.com".to_string(),
                port: Some(5060),
                transport: TransportType::Udp,
            },
            DnsRecord::Host {
                host: "alive.example.com".to_string(),
                port: Some(5062),
                transport: TransportType::Udp,
            },
        ]),
    );
    h.resolver.reply(ResolveMode::FindIpByHost, "alive.example.com", Reply::Address(ip("192.0.2.63")));
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));

    trx.send_message(invite("sip:bob@example.com"), OutboundMsgType::Request)
        .unwrap();

    assert_eq!(
        h.resolver.modes(),
        vec![
            ResolveMode::FindTransportByNaptr,
            ResolveMode::FindHostPortBySrvString,
            ResolveMode::FindIpByHost,
            ResolveMode::FindIpByHost,
        ]
    );
    assert_eq!(h.transport.sent()[0].dest, Some("192.0.2.63:5062".parse().unwrap()));
}

#[test]
fn test_resend_uses_left_over_records() {
    let h = harness(test_config());
    h.resolver.reply(
        ResolveMode::FindIpByHost,
        "example.com",
        Reply::Answer(vec![
            ip_record("192.0.2.81", 5060, TransportType::Udp),
            ip_record("192.0.2.82", 5060, TransportType::Udp),
        ]),
    );
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.set_keep_message(true);
    h.transport.fail_sends(true);

    trx.send_message(invite("sip:bob@example.com:5060"), OutboundMsgType::Request)
        .unwrap();
    assert_eq!(trx.state(), TransmitterState::MsgSendFailure);
    assert!(trx.message().is_some());

    h.transport.fail_sends(false);
    trx.resend().unwrap();

    assert_eq!(trx.state(), TransmitterState::MsgSent);
    assert_eq!(h.resolver.modes(), vec![ResolveMode::FindIpByHost]);
    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(h.transport.sent()[0].dest, Some("192.0.2.82:5060".parse().unwrap()));
}

#[test]
fn test_resend_is_illegal_before_failure() {
    let h = harness(test_config());
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    assert!(trx.resend().is_err());
}

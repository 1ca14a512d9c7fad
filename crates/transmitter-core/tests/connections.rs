mod common;

use common::*;
use rvoip_transmitter_core::dns::ResolveMode;
use rvoip_transmitter_core::message::Method;
use rvoip_transmitter_core::transmitter::{
    event_channel, OutboundMsgType, SecurityAssociation, SendFailureReason, TransmitterEvent, TransmitterState,
};
use rvoip_transmitter_core::transport::{ConnectionId, ConnectionState};
use rvoip_transmitter_core::types::{DestAddress, TransportType};
use rvoip_transmitter_core::Error;

fn connections_in_use(events: &[TransmitterEvent]) -> Vec<(bool, ConnectionId)> {
    events
        .iter()
        .filter_map(|e| match e {
            TransmitterEvent::NewConnectionInUse { connection, created, .. } => Some((*created, *connection)),
            _ => None,
        })
        .collect()
}

#[test]
fn test_request_reuses_connection_by_alias() {
    let h = harness(test_config().with_server_connection_reuse(true));
    let table = h.manager.connections();
    let id = table.insert(TransportType::Tcp, local_v4(), "192.0.2.90:5060".parse().unwrap());
    table.set_state(id, ConnectionState::Connected).unwrap();
    table.add_alias(id, "alias.example.com").unwrap();
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));

    trx.send_message(invite("sip:bob@alias.example.com"), OutboundMsgType::Request)
        .unwrap();

    assert_eq!(h.resolver.request_count(), 0);
    assert!(h.transport.connects().is_empty());
    assert_eq!(h.transport.sent()[0].connection, Some(id));
    assert_eq!(
        trx.dest_address(),
        Some(DestAddress::new("192.0.2.90:0".parse().unwrap(), TransportType::Tcp))
    );
    assert_eq!(connections_in_use(&drain_events(&mut rx)), vec![(false, id)]);
    assert!(table.owners(id).contains(&trx.id()));
}

#[test]
fn test_alias_ignored_without_server_connection_reuse() {
    let h = harness(test_config());
    let table = h.manager.connections();
    let id = table.insert(TransportType::Tcp, local_v4(), "192.0.2.90:5060".parse().unwrap());
    table.set_state(id, ConnectionState::Connected).unwrap();
    table.add_alias(id, "alias.example.com").unwrap();
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));

    trx.send_message(invite("sip:bob@alias.example.com"), OutboundMsgType::Request)
        .unwrap();

    assert!(h.resolver.request_count() > 0);
    assert!(table.owners(id).is_empty());
}

#[test]
fn test_persistent_transmitter_reuses_open_connection() {
    let h = harness(test_config());
    let table = h.manager.connections();
    let id = table.insert(TransportType::Tcp, local_v4(), "192.0.2.95:5060".parse().unwrap());
    table.set_state(id, ConnectionState::Connected).unwrap();
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.set_persistent(true);

    trx.send_message(invite("sip:bob@192.0.2.95;transport=tcp"), OutboundMsgType::Request)
        .unwrap();

    assert!(h.transport.connects().is_empty());
    assert_eq!(h.transport.sent()[0].connection, Some(id));
    assert_eq!(trx.connection(), Some(id));
    assert_eq!(connections_in_use(&drain_events(&mut rx)), vec![(false, id)]);
}

#[test]
fn test_new_connection_is_opened_and_reported() {
    let h = harness(test_config());
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));

    trx.send_message(invite("sip:bob@192.0.2.96;transport=tcp"), OutboundMsgType::Request)
        .unwrap();

    let connects = h.transport.connects();
    assert_eq!(connects.len(), 1);
    let id = connects[0].0;
    assert_eq!(connections_in_use(&drain_events(&mut rx)), vec![(true, id)]);
    assert_eq!(h.manager.connections().get(id).unwrap().state, ConnectionState::Connected);
    assert_eq!(trx.connection(), Some(id));
}

#[test]
fn test_connect_failure_is_a_connection_failure() {
    let h = harness(test_config());
    h.transport.fail_connects(true);
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));

    trx.send_message(invite("sip:bob@192.0.2.97;transport=tcp"), OutboundMsgType::Request)
        .unwrap();

    assert_eq!(trx.state(), TransmitterState::MsgSendFailure);
    assert_eq!(h.manager.connections().len(), 0);
    let events = drain_events(&mut rx);
    let reason = events.iter().find_map(|e| match e {
        TransmitterEvent::StateChanged {
            state: TransmitterState::MsgSendFailure,
            reason,
            ..
        } => *reason,
        _ => None,
    });
    assert_eq!(reason, Some(SendFailureReason::ConnectionError));
}

#[test]
fn test_connection_error_after_send_fails_the_transmitter() {
    let h = harness(test_config());
    let (tx, mut rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.send_message(invite("sip:bob@192.0.2.97;transport=tcp"), OutboundMsgType::Request)
        .unwrap();
    let id = trx.connection().unwrap();
    drain_events(&mut rx);

    trx.connection_error(ConnectionId::new());
    assert_eq!(trx.state(), TransmitterState::MsgSent);
    assert!(drain_events(&mut rx).is_empty());

    trx.connection_error(id);
    assert_eq!(trx.state(), TransmitterState::MsgSendFailure);
    let events = drain_events(&mut rx);
    assert!(matches!(
        events.as_slice(),
        [TransmitterEvent::StateChanged {
            state: TransmitterState::MsgSendFailure,
            reason: Some(SendFailureReason::ConnectionError),
            ..
        }]
    ));

    trx.connection_error(id);
    assert!(drain_events(&mut rx).is_empty());
}

#[test]
fn test_security_association_bypasses_resolution() {
    let h = harness(test_config());
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    let dest = DestAddress::new("192.0.2.98:5062".parse().unwrap(), TransportType::Udp);
    trx.set_security_association(Some(SecurityAssociation { dest, connection: None }));

    trx.send_message(invite("sip:bob@example.com"), OutboundMsgType::Request)
        .unwrap();

    assert_eq!(h.resolver.request_count(), 0);
    assert_eq!(trx.dest_address(), Some(dest));
    assert_eq!(h.transport.sent()[0].dest, Some(dest.addr));
}

#[test]
fn test_manual_destination_is_kept() {
    let h = harness(test_config());
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    let dest = DestAddress::new("192.0.2.99:5070".parse().unwrap(), TransportType::Udp);
    trx.set_dest_address(Some(dest)).unwrap();

    trx.send_message(invite("sip:bob@example.com"), OutboundMsgType::Request)
        .unwrap();

    assert_eq!(h.resolver.request_count(), 0);
    assert_eq!(h.transport.sent()[0].dest, Some(dest.addr));
    assert!(matches!(
        trx.set_dest_address(Some(DestAddress::new("192.0.2.99:0".parse().unwrap(), TransportType::Udp))),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn test_retransmit_resends_same_bytes() {
    let h = harness(test_config());
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.send_message(invite("sip:bob@192.0.2.110"), OutboundMsgType::Request)
        .unwrap();

    trx.retransmit().unwrap();

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].payload, sent[1].payload);
    assert_eq!(sent[1].dest, Some("192.0.2.110:5060".parse().unwrap()));
    assert_eq!(trx.state(), TransmitterState::MsgSent);

    trx.terminate();
    assert!(matches!(trx.retransmit(), Err(Error::Terminated)));
}

#[test]
fn test_via_fixed_with_local_address() {
    let h = harness(test_config());
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.set_fix_via(true);

    trx.send_message(invite("sip:bob@192.0.2.111;transport=tcp"), OutboundMsgType::Request)
        .unwrap();

    let text = h.transport.sent()[0].text();
    assert!(text.contains("Via: SIP/2.0/TCP 10.0.0.1:5060;branch=z9hG4bK776asdhds"));
}

#[test]
fn test_transmitter_without_listener_terminates_after_send() {
    let h = harness(test_config());
    let trx = h.manager.create_transmitter(None);

    trx.send_message(invite("sip:bob@192.0.2.112"), OutboundMsgType::Request)
        .unwrap();

    assert_eq!(h.transport.sent().len(), 1);
    assert_eq!(trx.state(), TransmitterState::Terminated);
}

#[test]
fn test_send_to_pre_discovered_skips_resolution() {
    let h = harness(test_config());
    h.resolver
        .reply(ResolveMode::FindIpByHost, "example.com", Reply::Address("192.0.2.113".parse().unwrap()));
    let (tx, _rx) = event_channel();
    let trx = h.manager.create_transmitter(Some(tx));
    trx.send_message(invite("sip:bob@example.com:5060"), OutboundMsgType::Request)
        .unwrap();
    let queries = h.resolver.request_count();

    trx.send_to_pre_discovered(
        request(Method::Ack, "sip:bob@example.com:5060"),
        OutboundMsgType::Ack,
    )
    .unwrap();

    assert_eq!(h.resolver.request_count(), queries);
    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent[1].text().starts_with("ACK "));
    assert_eq!(sent[1].dest, Some("192.0.2.113:5060".parse().unwrap()));
}

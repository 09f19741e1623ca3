//! Request/response exchange between a root engine and non-root engines.

use canopy_core::clock::ManualClock;
use canopy_core::wire::{MeshOption, OptionKey, ProtocolId, ADDRESSES_PER_OPTION};
use canopy_services::DispatchOutcome;

use crate::*;

const ROOT: u8 = 0xaa;
const UPSTREAM: u8 = 0xfe;

fn root_with(subnodes: Vec<Address>, clock: &ManualClock) -> DiscoveryEngine<MockTransport> {
    let info = NodeInfo {
        upstream: Some(addr(UPSTREAM)),
        subnodes,
    };
    let mut root = engine(MockTransport::root(addr(ROOT), info), clock);
    root.run_cycle().unwrap();
    root
}

/// Run one request/response round trip and return the response the root sent.
fn round_trip(
    node: &mut DiscoveryEngine<MockTransport>,
    root: &mut DiscoveryEngine<MockTransport>,
) -> MeshPacket {
    node.run_cycle().unwrap();
    let request = node.transport_mut().drain().pop().unwrap();

    assert_eq!(deliver(root, &request).unwrap(), DispatchOutcome::Handled(ProtocolId::NONE));
    let response = root.transport_mut().drain().pop().unwrap();

    assert_eq!(deliver(node, &response).unwrap(), DispatchOutcome::Handled(ProtocolId::NONE));
    response
}

#[test]
fn test_node_adopts_root_membership() {
    let clock = ManualClock::new();
    let mut root = root_with(vec![addr(0x10), addr(0x11), addr(0x12)], &clock);
    let mut node = engine(MockTransport::node(addr(0x10)), &clock);

    let response = round_trip(&mut node, &mut root);
    assert_eq!(response.dst, addr(0x10));
    assert_eq!(response.src, addr(ROOT));

    // The responder's address is the root from the node's point of view.
    assert_eq!(node.root().unwrap().address, addr(ROOT));
    assert_eq!(members(&node), members(&root));
}

#[test]
fn test_large_membership_splits_across_options() {
    let clock = ManualClock::new();
    let subnodes: Vec<Address> = (0..100u8)
        .map(|i| Address::new([0x24, 0x0a, 0xc4, 0x01, 0x00, i]))
        .collect();
    let mut root = root_with(subnodes.clone(), &clock);
    let mut node = engine(MockTransport::node(subnodes[0]), &clock);

    let response = round_trip(&mut node, &mut root);
    let sizes: Vec<usize> = response
        .options(OptionKey::TOPO_RESP)
        .map(|o| o.value().len())
        .collect();
    assert_eq!(
        sizes,
        vec![ADDRESSES_PER_OPTION * 6, ADDRESSES_PER_OPTION * 6, (100 - 2 * ADDRESSES_PER_OPTION) * 6]
    );
    assert_eq!(members(&node), subnodes);
}

#[test]
fn test_repeated_round_trips_track_departures() {
    let clock = ManualClock::new();
    let mut root = root_with(vec![addr(0x10), addr(0x11)], &clock);
    let mut node = engine(MockTransport::node(addr(0x10)), &clock);
    round_trip(&mut node, &mut root);

    // The root forgets 0x11 after its threshold; the node, which last heard
    // 0x11 listed one interval before that, forgets it a threshold later.
    root.transport_mut().info.subnodes = vec![addr(0x10)];
    for _ in 0..3 {
        clock.advance(INTERVAL);
        root.run_cycle().unwrap();
        round_trip(&mut node, &mut root);
    }
    assert_eq!(members(&root), vec![addr(0x10)]);
    assert_eq!(members(&node), vec![addr(0x10), addr(0x11)]);

    for _ in 0..2 {
        clock.advance(INTERVAL);
        root.run_cycle().unwrap();
        round_trip(&mut node, &mut root);
    }
    assert_eq!(members(&root), vec![addr(0x10)]);
    assert_eq!(members(&node), vec![addr(0x10)]);
}

#[test]
fn test_non_root_does_not_answer_requests() {
    let clock = ManualClock::new();
    let mut asker = engine(MockTransport::node(addr(0x10)), &clock);
    let mut peer = engine(MockTransport::node(addr(0x11)), &clock);

    asker.run_cycle().unwrap();
    let request = asker.transport_mut().drain().pop().unwrap();
    assert_eq!(deliver(&mut peer, &request).unwrap(), DispatchOutcome::Handled(ProtocolId::NONE));
    assert!(peer.transport().sent.is_empty());
}

#[test]
fn test_root_ignores_echoed_responses() {
    let clock = ManualClock::new();
    let mut root = root_with(vec![addr(0x10)], &clock);
    let before = root.view();

    let mut echo = MeshPacket::new(addr(ROOT), addr(0x33), ProtocolId::NONE);
    echo.add_option(MeshOption::with_addresses(OptionKey::TOPO_RESP, &[addr(0x44)]).unwrap());
    assert_eq!(deliver(&mut root, &echo).unwrap(), DispatchOutcome::Handled(ProtocolId::NONE));
    assert_eq!(root.view(), before);
}

#[test]
fn test_malformed_topology_messages_change_nothing() {
    let clock = ManualClock::new();
    let mut node = engine(MockTransport::node(addr(0x10)), &clock);

    // No topology option at all.
    let bare = MeshPacket::new(addr(0x10), addr(ROOT), ProtocolId::NONE);
    assert_eq!(deliver(&mut node, &bare).unwrap(), DispatchOutcome::HandlerFailed(ProtocolId::NONE));

    // A response value that is not a whole number of addresses.
    let mut ragged = MeshPacket::new(addr(0x10), addr(ROOT), ProtocolId::NONE);
    ragged.add_option(MeshOption::new(OptionKey::TOPO_RESP, vec![1u8; 7]).unwrap());
    assert_eq!(deliver(&mut node, &ragged).unwrap(), DispatchOutcome::HandlerFailed(ProtocolId::NONE));

    assert!(node.root().is_none());
    assert!(node.snapshot().is_empty());
}

#[test]
fn test_unknown_protocol_is_dropped() {
    let clock = ManualClock::new();
    let mut node = engine(MockTransport::node(addr(0x10)), &clock);

    let mut packet = MeshPacket::new(addr(0x10), addr(ROOT), ProtocolId::JSON).with_data(b"{}".to_vec());
    packet.add_option(MeshOption::with_addresses(OptionKey::TOPO_RESP, &[addr(1)]).unwrap());
    assert_eq!(deliver(&mut node, &packet).unwrap(), DispatchOutcome::Unsupported(ProtocolId::JSON));
    assert!(node.root().is_none());
}

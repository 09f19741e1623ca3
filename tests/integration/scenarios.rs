//! End-to-end discovery scenarios on a single engine.

use std::time::Duration;

use canopy_core::clock::{ManualClock, Timestamp};
use canopy_core::wire::{MeshOption, OptionKey, ProtocolId, FLAG_FLOW_REQ};
use canopy_services::{CycleOutcome, DispatchOutcome};

use crate::*;

fn response(root: Address, to: Address, lists: &[&[Address]]) -> MeshPacket {
    let mut packet = MeshPacket::new(to, root, ProtocolId::NONE);
    for list in lists {
        packet.add_option(MeshOption::with_addresses(OptionKey::TOPO_RESP, list).unwrap());
    }
    packet
}

/// Non-root with an empty registry asks, then learns from the root's answer.
#[test]
fn test_non_root_learns_topology_from_response() {
    let clock = ManualClock::new();
    let me = addr(0x10);
    let mut node = engine(MockTransport::node(me), &clock);

    assert_eq!(node.run_cycle().unwrap(), CycleOutcome::RequestSent);
    let sent = node.transport_mut().drain();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dst, Address::BROADCAST);
    assert_eq!(sent[0].src, me);
    assert_ne!(sent[0].flags & FLAG_FLOW_REQ, 0);
    assert!(node.root().is_none());

    clock.advance(Duration::from_millis(40));
    let outcome = deliver(&mut node, &response(addr(0xaa), me, &[&[addr(1), addr(2)]])).unwrap();
    assert_eq!(outcome, DispatchOutcome::Handled(ProtocolId::NONE));

    assert_eq!(node.root().unwrap().address, addr(0xaa));
    assert_eq!(members(&node), vec![addr(1), addr(2)]);
    assert!(node
        .snapshot()
        .iter()
        .all(|e| e.last_seen == Timestamp::from_millis(40)));
}

/// A member the root stops reporting is evicted once it passes the threshold.
#[test]
fn test_unreported_member_ages_out() {
    let clock = ManualClock::new();
    let me = addr(0x10);
    let mut node = engine(MockTransport::node(me), &clock);
    let root = addr(0xaa);

    deliver(&mut node, &response(root, me, &[&[addr(1), addr(2)]])).unwrap();
    clock.advance(Duration::from_secs(20));
    deliver(&mut node, &response(root, me, &[&[addr(1)]])).unwrap();
    assert_eq!(members(&node), vec![addr(1), addr(2)]);

    clock.advance(Duration::from_secs(11));
    deliver(&mut node, &response(root, me, &[&[addr(1)]])).unwrap();
    assert_eq!(members(&node), vec![addr(1)]);
    assert_eq!(node.root().unwrap().address, root);
}

/// The root folds its own view of the mesh in each cycle.
#[test]
fn test_root_cycles_keep_missing_member_until_stale() {
    let clock = ManualClock::new();
    let upstream = addr(0xfe);
    let info = NodeInfo {
        upstream: Some(upstream),
        subnodes: vec![addr(1), addr(2), addr(3)],
    };
    let mut root = engine(MockTransport::root(addr(0xaa), info), &clock);

    assert_eq!(
        root.run_cycle().unwrap(),
        CycleOutcome::Refreshed { added: 3, evicted: 0 }
    );
    assert_eq!(root.root().unwrap().address, upstream);
    assert_eq!(members(&root), vec![addr(1), addr(2), addr(3)]);

    root.transport_mut().info.subnodes = vec![addr(1), addr(3)];
    clock.advance(INTERVAL);
    assert_eq!(
        root.run_cycle().unwrap(),
        CycleOutcome::Refreshed { added: 0, evicted: 0 }
    );
    assert_eq!(members(&root), vec![addr(1), addr(2), addr(3)]);

    clock.advance(INTERVAL);
    assert_eq!(
        root.run_cycle().unwrap(),
        CycleOutcome::Refreshed { added: 0, evicted: 0 }
    );

    clock.advance(INTERVAL);
    assert_eq!(
        root.run_cycle().unwrap(),
        CycleOutcome::Refreshed { added: 0, evicted: 1 }
    );
    assert_eq!(members(&root), vec![addr(1), addr(3)]);
    assert!(root.transport().sent.is_empty());
}

#[test]
fn test_cycles_wait_for_the_mesh_link() {
    let clock = ManualClock::new();
    let mut transport = MockTransport::node(addr(0x10));
    transport.phase = ConnectivityPhase::WifiConnecting;
    let mut node = engine(transport, &clock);

    assert_eq!(node.run_cycle().unwrap(), CycleOutcome::Skipped);
    assert!(node.transport().sent.is_empty());

    node.transport_mut().phase = ConnectivityPhase::LeafAvailable;
    assert_eq!(node.run_cycle().unwrap(), CycleOutcome::RequestSent);
}

#[test]
fn test_stopped_engine_forgets_everything() {
    let clock = ManualClock::new();
    let me = addr(0x10);
    let mut node = engine(MockTransport::node(me), &clock);
    deliver(&mut node, &response(addr(0xaa), me, &[&[addr(1)]])).unwrap();

    node.stop();
    assert!(node.root().is_none());
    assert!(node.snapshot().is_empty());
    assert_eq!(
        deliver(&mut node, &response(addr(0xaa), me, &[&[addr(1)]])).unwrap(),
        DispatchOutcome::HandlerFailed(ProtocolId::NONE)
    );

    node.start(INTERVAL).unwrap();
    assert!(node.root().is_none());
}

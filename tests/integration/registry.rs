//! Registry properties, exercised through the public registry API.

use std::sync::Arc;
use std::time::Duration;

use canopy_core::clock::{Clock, ManualClock, Timestamp};
use canopy_services::{Registry, TopologyError};

use crate::*;

fn registry() -> (Registry, ManualClock) {
    let clock = ManualClock::new();
    (Registry::new(Arc::new(clock.clone())), clock)
}

fn addrs(r: &Registry) -> Vec<Address> {
    r.snapshot().iter().map(|e| e.address).collect()
}

#[test]
fn test_addresses_stay_unique_across_mutations() {
    let (mut r, clock) = registry();
    r.set_root(addr(1)).unwrap();
    r.add(&[addr(2), addr(3), addr(2)]).unwrap();
    clock.advance(Duration::from_secs(1));
    r.add(&[addr(3), addr(1), addr(4)]).unwrap();
    r.set_root(addr(1)).unwrap();
    r.add(&[addr(4), addr(5)]).unwrap();

    let mut all = addrs(&r);
    all.push(r.root().unwrap().address);
    let mut deduped = all.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(all.len(), deduped.len());
    assert_eq!(addrs(&r), vec![addr(2), addr(3), addr(4), addr(5)]);
}

#[test]
fn test_root_switch_invalidates_membership() {
    let (mut r, _) = registry();
    r.set_root(addr(1)).unwrap();
    r.add(&[addr(2), addr(3)]).unwrap();

    assert!(r.set_root(addr(9)).unwrap());
    assert_eq!(r.root().unwrap().address, addr(9));
    assert!(r.snapshot().is_empty());
}

#[test]
fn test_repeated_add_is_idempotent() {
    let (mut r, clock) = registry();
    r.set_root(addr(1)).unwrap();
    assert_eq!(r.add(&[addr(2), addr(2), addr(2)]).unwrap(), 1);

    clock.advance(Duration::from_secs(3));
    let before = r.view();
    assert_eq!(r.add(&[addr(2)]).unwrap(), 0);
    assert_eq!(r.view(), before);
}

#[test]
fn test_add_without_root_fails() {
    let (mut r, _) = registry();
    assert!(matches!(r.add(&[addr(2)]), Err(TopologyError::NoRoot)));
    assert!(r.snapshot().is_empty());
}

#[test]
fn test_eviction_removes_exactly_the_stale_members() {
    let (mut r, clock) = registry();
    r.set_root(addr(1)).unwrap();
    r.add(&[addr(2)]).unwrap();
    clock.advance(Duration::from_secs(10));
    r.add(&[addr(3)]).unwrap();
    clock.advance(Duration::from_secs(10));
    r.add(&[addr(4)]).unwrap();
    clock.advance(Duration::from_secs(10));
    r.add(&[addr(5)]).unwrap();

    // ages: 2 → 30s, 3 → 20s, 4 → 10s, 5 → 0s
    assert_eq!(r.evict_stale(Duration::from_secs(15), clock.now()), 2);
    assert_eq!(addrs(&r), vec![addr(4), addr(5)]);
    assert_eq!(r.snapshot()[0].last_seen, Timestamp::from_millis(20_000));
    assert_eq!(r.snapshot()[1].last_seen, Timestamp::from_millis(30_000));
}

#[test]
fn test_age_equal_to_threshold_survives() {
    let (mut r, clock) = registry();
    r.set_root(addr(1)).unwrap();
    r.add(&[addr(2)]).unwrap();
    clock.advance(THRESHOLD);
    assert_eq!(r.evict_stale(THRESHOLD, clock.now()), 0);
    assert_eq!(addrs(&r), vec![addr(2)]);
}

#[test]
fn test_root_is_immune_to_eviction() {
    let (mut r, clock) = registry();
    r.set_root(addr(1)).unwrap();
    clock.advance(Duration::from_secs(3600));
    r.evict_stale(Duration::from_secs(1), clock.now());
    assert_eq!(r.root().unwrap().address, addr(1));
}

#[test]
fn test_removing_root_empties_registry() {
    let (mut r, _) = registry();
    r.set_root(addr(1)).unwrap();
    r.add(&[addr(2), addr(3)]).unwrap();

    r.remove(&[addr(1)]);
    assert!(r.root().is_none());
    assert!(r.snapshot().is_empty());
}

#[test]
fn test_view_serializes_for_readers() {
    let (mut r, clock) = registry();
    clock.advance(Duration::from_millis(250));
    r.set_root(addr(1)).unwrap();
    r.add(&[addr(2)]).unwrap();

    let json = serde_json::to_value(r.view()).unwrap();
    assert_eq!(json["root"]["address"], "24:0a:c4:00:00:01");
    assert_eq!(json["members"][0]["address"], "24:0a:c4:00:00:02");
}

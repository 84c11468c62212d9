// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::session::{SessionId, SessionTable};

fn id(n: u8) -> SessionId {
    SessionId::v4([10, 0, 0, n], 1000 + n as u16, [10, 0, 0, 200], 80, 0, 0)
}

#[test]
fn lookup_creates_once_and_finds_after() {
    let mut table = SessionTable::new(1000);

    let (_, created) = table.lookup_or_create(id(1), 0, 100);
    assert!(created);
    let (_, created_again) = table.lookup_or_create(id(1), 0, 101);
    assert!(!created_again);
    assert_eq!(table.len(), 1);
}

#[test]
fn last_seen_advances_on_lookup() {
    let mut table = SessionTable::new(1000);
    table.lookup_or_create(id(1), 0, 100);
    let (session, _) = table.lookup_or_create(id(1), 0, 150);
    assert_eq!(session.last_sec, 150);
}

#[test]
fn idle_sessions_expire_after_their_timeout() {
    let mut table = SessionTable::new(1000);
    table.lookup_or_create(id(1), 0, 100);

    // First tick arms the wheel; no expiry yet.
    let expired = table.expire(100, |_| 60);
    assert!(expired.is_empty());

    // Just before the timeout: still alive.
    let expired = table.expire(159, |_| 60);
    assert!(expired.is_empty());
    assert_eq!(table.len(), 1);

    // Past the timeout: gone.
    let expired = table.expire(161, |_| 60);
    assert_eq!(expired.len(), 1);
    assert!(table.is_empty());
}

#[test]
fn activity_defers_expiry() {
    let mut table = SessionTable::new(1000);
    table.lookup_or_create(id(1), 0, 100);
    table.expire(100, |_| 60);

    // Refresh halfway through the idle window.
    table.lookup_or_create(id(1), 0, 150);

    let expired = table.expire(165, |_| 60);
    assert!(expired.is_empty(), "refreshed session must survive");

    let expired = table.expire(211, |_| 60);
    assert_eq!(expired.len(), 1);
}

#[test]
fn outstanding_references_defer_release() {
    let mut table = SessionTable::new(1000);
    {
        let (session, _) = table.lookup_or_create(id(1), 0, 100);
        session.outstanding = 1;
    }
    table.expire(100, |_| 10);

    let expired = table.expire(200, |_| 10);
    assert!(expired.is_empty(), "busy session must not expire");

    if let Some(session) = table.get_mut(&id(1)) {
        session.outstanding = 0;
    }
    let expired = table.expire(300, |_| 10);
    assert_eq!(expired.len(), 1);
}

#[test]
fn drain_all_empties_the_table() {
    let mut table = SessionTable::new(1000);
    for n in 0..50 {
        table.lookup_or_create(id(n), 0, 100);
    }
    assert_eq!(table.len(), 50);

    let drained = table.drain_all();
    assert_eq!(drained.len(), 50);
    assert!(table.is_empty());

    // The wheel is clear too: advancing it finds nothing.
    let expired = table.expire(500, |_| 1);
    assert!(expired.is_empty());
}

#[test]
fn many_flows_hash_to_stable_sessions() {
    let mut table = SessionTable::new(100);
    for n in 0..100 {
        table.lookup_or_create(id(n), 0, 100);
    }
    for n in 0..100 {
        let (_, created) = table.lookup_or_create(id(n), 0, 101);
        assert!(!created, "flow {n} must already exist");
    }
    assert_eq!(table.len(), 100);
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::session::SessionId;

#[test]
fn v4_canonicalization_is_direction_independent() {
    let a = SessionId::v4([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443, 0, 0);
    let b = SessionId::v4([10, 0, 0, 2], 443, [10, 0, 0, 1], 40000, 0, 0);
    assert_eq!(a, b);
    assert_eq!(a.hash(), b.hash());
}

#[test]
fn v4_distinct_tuples_differ() {
    let a = SessionId::v4([10, 0, 0, 1], 40000, [10, 0, 0, 2], 443, 0, 0);
    let b = SessionId::v4([10, 0, 0, 1], 40001, [10, 0, 0, 2], 443, 0, 0);
    let c = SessionId::v4([10, 0, 0, 1], 40000, [10, 0, 0, 3], 443, 0, 0);
    assert_ne!(a, b);
    assert_ne!(a, c);
}

#[test]
fn vlan_and_vni_partition_flows() {
    let plain = SessionId::v4([10, 0, 0, 1], 1000, [10, 0, 0, 2], 2000, 0, 0);
    let tagged = SessionId::v4([10, 0, 0, 1], 1000, [10, 0, 0, 2], 2000, 42, 0);
    let tunneled = SessionId::v4([10, 0, 0, 1], 1000, [10, 0, 0, 2], 2000, 0, 7777);
    assert_ne!(plain, tagged);
    assert_ne!(plain, tunneled);
    assert_ne!(tagged, tunneled);
}

#[test]
fn v6_canonicalization_is_direction_independent() {
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src[15] = 1;
    dst[15] = 2;
    let a = SessionId::v6(src, 5000, dst, 53, 0, 0);
    let b = SessionId::v6(dst, 53, src, 5000, 0, 0);
    assert_eq!(a, b);
}

#[test]
fn equal_addresses_sort_on_ports() {
    let addr = [192, 168, 1, 1];
    let a = SessionId::v4(addr, 1, addr, 2, 0, 0);
    let b = SessionId::v4(addr, 2, addr, 1, 0, 0);
    assert_eq!(a, b);
}

#[test]
fn opaque_keys_carry_their_family_tag() {
    let mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    let a = SessionId::opaque(8, 3, &mac);
    let b = SessionId::opaque(8, 3, &mac);
    let c = SessionId::opaque(3, 3, &mac);
    assert_eq!(a, b);
    assert_ne!(a, c);
}

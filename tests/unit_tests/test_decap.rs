// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::packet::{PacketRc, Tunnel};

use crate::unit_tests::{TestEngine, eth_frame, ip4_packet, tcp_segment, udp_datagram};

fn vxlan_header(vni: u32) -> Vec<u8> {
    let mut hdr = vec![0x08, 0, 0, 0, 0, 0, 0, 0];
    hdr[4] = (vni >> 16) as u8;
    hdr[5] = (vni >> 8) as u8;
    hdr[6] = vni as u8;
    hdr
}

#[test]
fn vxlan_peels_to_the_inner_flow() {
    // Outer IPv4/UDP:4789 wrapping VXLAN(VNI=42) around an inner TCP SYN.
    let inner_tcp = tcp_segment(40000, 80, 0x02, b"");
    let inner_ip = ip4_packet(6, [192, 168, 0, 1], [192, 168, 0, 2], &inner_tcp);
    let inner_eth = eth_frame(0x0800, &inner_ip);

    let mut vxlan = vxlan_header(42);
    vxlan.extend_from_slice(&inner_eth);

    let outer_udp = udp_datagram(51000, 4789, &vxlan);
    let outer_ip = ip4_packet(17, [10, 0, 0, 1], [10, 0, 0, 2], &outer_udp);
    let frame = eth_frame(0x0800, &outer_ip);

    let mut engine = TestEngine::new();
    let (rc, packet) = engine.feed(frame, 1000);

    assert_eq!(rc, PacketRc::DoProcess);
    assert_eq!(packet.vni, 42);
    assert!(packet.tunnel.contains(Tunnel::VXLAN));

    // The inner TCP flow, not the outer UDP flow, became the session.
    let session = engine.single_session();
    assert_eq!(session.port1, 40000);
    assert_eq!(session.port2, 80);
    assert!(session.has_protocol("tcp"));
}

#[test]
fn vxlan_reserved_bits_fall_back_to_udp() {
    let mut vxlan = vxlan_header(42);
    vxlan[0] |= 0x40; // reserved bit set
    vxlan.extend_from_slice(&eth_frame(
        0x0800,
        &ip4_packet(6, [1, 1, 1, 1], [2, 2, 2, 2], &tcp_segment(1, 2, 0x02, b"")),
    ));

    let frame = eth_frame(
        0x0800,
        &ip4_packet(
            17,
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            &udp_datagram(51000, 4789, &vxlan),
        ),
    );

    let mut engine = TestEngine::new();
    let (rc, packet) = engine.feed(frame, 1000);

    // Rejected as VXLAN, tracked as plain UDP on the outer tuple.
    assert_eq!(rc, PacketRc::DoProcess);
    assert!(!packet.tunnel.contains(Tunnel::VXLAN));
    let session = engine.single_session();
    assert_eq!(session.port2, 4789);
    assert!(session.has_protocol("udp"));
}

#[test]
fn ah_header_advances_to_the_next_protocol() {
    // AH with payload length 4 -> header (4 + 2) * 4 = 24 bytes, wrapping TCP.
    let tcp = tcp_segment(1234, 80, 0x02, b"");
    let mut ah = vec![0u8; 24];
    ah[0] = 6; // next header: TCP
    ah[1] = 4;
    ah.extend_from_slice(&tcp);

    let frame = eth_frame(
        0x0800,
        &ip4_packet(51, [10, 0, 0, 1], [10, 0, 0, 2], &ah),
    );

    let mut engine = TestEngine::new();
    let (rc, _) = engine.feed(frame, 1000);
    assert_eq!(rc, PacketRc::DoProcess);
    let session = engine.single_session();
    assert!(session.has_protocol("tcp"));
    assert_eq!(session.port2, 80);
}

#[test]
fn ah_underrun_is_corrupt() {
    // Header claims more bytes than the packet carries.
    let mut ah = vec![0u8; 8];
    ah[0] = 6;
    ah[1] = 200;

    let frame = eth_frame(
        0x0800,
        &ip4_packet(51, [10, 0, 0, 1], [10, 0, 0, 2], &ah),
    );

    let mut engine = TestEngine::new();
    let (rc, _) = engine.feed(frame, 1000);
    assert_eq!(rc, PacketRc::Corrupt);
    assert!(engine.sessions.is_empty());
}

#[test]
fn vlan_tag_is_recorded_and_peeled() {
    let tcp = tcp_segment(1234, 80, 0x02, b"");
    let ip = ip4_packet(6, [10, 0, 0, 1], [10, 0, 0, 2], &tcp);

    let mut tagged = vec![
        0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb,
    ];
    tagged.extend_from_slice(&0x8100u16.to_be_bytes());
    tagged.extend_from_slice(&77u16.to_be_bytes()); // VLAN 77
    tagged.extend_from_slice(&0x0800u16.to_be_bytes());
    tagged.extend_from_slice(&ip);

    let mut engine = TestEngine::new();
    let (rc, packet) = engine.feed(tagged, 1000);
    assert_eq!(rc, PacketRc::DoProcess);
    assert_eq!(packet.vlan, 77);
}

#[test]
fn esp_sessions_stop_saving() {
    let frame = eth_frame(
        0x0800,
        &ip4_packet(50, [10, 0, 0, 1], [10, 0, 0, 2], &[0u8; 16]),
    );

    let mut engine = TestEngine::new();
    let (rc, _) = engine.feed(frame, 1000);
    assert_eq!(rc, PacketRc::DoProcess);
    let session = engine.single_session();
    assert!(session.has_protocol("esp"));
    assert!(session.stop_saving);
}

#[test]
fn zero_payload_after_decapsulation_creates_no_parser_state() {
    // TCP segment with no payload: session exists but no first bytes, no
    // classification.
    let frame = eth_frame(
        0x0800,
        &ip4_packet(
            6,
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            &tcp_segment(1234, 80, 0x02, b""),
        ),
    );

    let mut engine = TestEngine::new();
    engine.feed(frame, 1000);
    let session = engine.single_session();
    assert_eq!(session.first_bytes_len, [0, 0]);
    assert!(session.parsers.is_empty());
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::fields::FieldValue;

use crate::unit_tests::{TestEngine, udp_frame};

const CLIENT_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

/// Minimal BOOTP/DHCP message: fixed header, magic cookie, message-type
/// option, end option, padded past the 256-byte floor.
fn dhcp_message(op: u8, xid: u32, msg_type: u8) -> Vec<u8> {
    let mut msg = vec![0u8; 240];
    msg[0] = op;
    msg[1] = 1; // htype ethernet
    msg[2] = 6; // hlen
    msg[4..8].copy_from_slice(&xid.to_be_bytes());
    msg[28..34].copy_from_slice(&CLIENT_MAC);
    msg[236..240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);

    msg.extend_from_slice(&[53, 1, msg_type]); // message type
    msg.extend_from_slice(&[12, 4, b'W', b'K', b'S', b'1']); // host name
    msg.push(255);
    while msg.len() < 300 {
        msg.push(0);
    }
    msg
}

fn strings_at(engine: &mut TestEngine, pos: u16) -> Vec<String> {
    let session = engine.single_session();
    match session.fields.get(pos) {
        Some(FieldValue::StrArray(values)) => values.clone(),
        _ => Vec::new(),
    }
}

#[test]
fn discover_and_offer_share_one_mac_keyed_session() {
    let discover = dhcp_message(1, 0x1111_2222, 1);
    let offer = dhcp_message(2, 0x3333_4444, 2);

    let mut engine = TestEngine::new();
    // DISCOVER: client broadcast 68 -> 67.
    engine.feed(
        udp_frame([0, 0, 0, 0], [255, 255, 255, 255], 68, 67, &discover),
        1000,
    );
    // OFFER: server 67 -> 68, a different transaction id, same client MAC.
    engine.feed(
        udp_frame([192, 168, 0, 1], [255, 255, 255, 255], 67, 68, &offer),
        1001,
    );

    assert_eq!(engine.sessions.len(), 1, "MAC keying collapses the exchange");

    let kind = engine.reg.dhcp.kind;
    let id = engine.reg.dhcp.id;
    let mac = engine.reg.dhcp.mac;
    let oui = engine.reg.dhcp.oui;
    let host = engine.reg.dhcp.host;

    {
        let session = engine.single_session();
        assert!(session.has_protocol("dhcp"));
        assert!(session.has_protocol("udp"));
    }

    let kinds = strings_at(&mut engine, kind);
    assert!(kinds.contains(&"DISCOVER".to_string()));
    assert!(kinds.contains(&"OFFER".to_string()));
    assert_eq!(kinds.len(), 2);

    let ids = strings_at(&mut engine, id);
    assert_eq!(ids.len(), 2, "both transaction ids recorded");
    assert!(ids.contains(&"11112222".to_string()));
    assert!(ids.contains(&"33334444".to_string()));

    assert_eq!(
        strings_at(&mut engine, mac),
        vec!["00:11:22:33:44:55".to_string()]
    );
    assert_eq!(strings_at(&mut engine, oui), vec!["00:11:22".to_string()]);
    assert_eq!(strings_at(&mut engine, host), vec!["wks1".to_string()]);
}

#[test]
fn bad_magic_cookie_is_not_dhcp() {
    let mut msg = dhcp_message(1, 1, 1);
    msg[236] = 0;

    let mut engine = TestEngine::new();
    engine.feed(
        udp_frame([0, 0, 0, 0], [255, 255, 255, 255], 68, 67, &msg),
        1000,
    );

    // Falls back to plain UDP tracking.
    let session = engine.single_session();
    assert!(session.has_protocol("udp"));
    assert!(!session.has_protocol("dhcp"));
}

#[test]
fn requested_ip_option_is_recorded() {
    let mut msg = vec![0u8; 240];
    msg[0] = 1;
    msg[1] = 1;
    msg[2] = 6;
    msg[4..8].copy_from_slice(&0xdeadbeefu32.to_be_bytes());
    msg[28..34].copy_from_slice(&CLIENT_MAC);
    msg[236..240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);
    msg.extend_from_slice(&[53, 1, 3]); // REQUEST
    msg.extend_from_slice(&[50, 4, 192, 168, 0, 50]);
    msg.push(255);
    while msg.len() < 300 {
        msg.push(0);
    }

    let mut engine = TestEngine::new();
    engine.feed(
        udp_frame([0, 0, 0, 0], [255, 255, 255, 255], 68, 67, &msg),
        1000,
    );

    let request_ip = engine.reg.dhcp.request_ip;
    let session = engine.single_session();
    match session.fields.get(request_ip) {
        Some(FieldValue::IpArray(ips)) => {
            assert_eq!(ips.len(), 1);
            assert_eq!(
                flowcap::fields::store::ip_to_string(&ips[0]),
                "192.168.0.50"
            );
        },
        other => panic!("requested ip missing: {other:?}"),
    }
}

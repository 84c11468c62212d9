// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::fields::FieldValue;

use crate::unit_tests::{TestEngine, tcp_frame};

/// Little-endian DCE/RPC header.
fn dcerpc_header(ptype: u8, frag_len: u16) -> Vec<u8> {
    let mut hdr = vec![0u8; 16];
    hdr[0] = 5; // version
    hdr[1] = 0;
    hdr[2] = ptype;
    hdr[3] = 0x03; // first + last frag
    hdr[4] = 0x10; // little-endian data representation
    hdr[8..10].copy_from_slice(&frag_len.to_le_bytes());
    hdr
}

fn uuid_le(text: &str) -> Vec<u8> {
    let hex: String = text.chars().filter(|c| *c != '-').collect();
    let raw = hex::decode(hex).expect("valid uuid");
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&[raw[3], raw[2], raw[1], raw[0]]); // data1 LE
    out.extend_from_slice(&[raw[5], raw[4]]); // data2 LE
    out.extend_from_slice(&[raw[7], raw[6]]); // data3 LE
    out.extend_from_slice(&raw[8..16]);
    out
}

/// BIND with one context item carrying the given interface UUID.
fn bind_pdu(uuid: &str, version: u16) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&4280u16.to_le_bytes()); // max xmit
    body.extend_from_slice(&4280u16.to_le_bytes()); // max recv
    body.extend_from_slice(&0u32.to_le_bytes()); // assoc group
    body.push(1); // num ctx items
    body.extend_from_slice(&[0, 0, 0]); // reserved

    body.extend_from_slice(&0u16.to_le_bytes()); // context id
    body.push(1); // num transfer syntaxes
    body.push(0); // reserved
    body.extend_from_slice(&uuid_le(uuid));
    body.extend_from_slice(&version.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes()); // minor version
    body.extend_from_slice(&[0u8; 20]); // transfer syntax

    let mut pdu = dcerpc_header(11, (16 + body.len()) as u16);
    pdu.extend_from_slice(&body);
    pdu
}

fn strings_at(engine: &mut TestEngine, pos: u16) -> Vec<String> {
    let session = engine.single_session();
    match session.fields.get(pos) {
        Some(FieldValue::StrArray(values)) => values.clone(),
        _ => Vec::new(),
    }
}

#[test]
fn bind_resolves_the_interface_through_the_sub_registry() {
    let pdu = bind_pdu("e3514235-4b06-11d1-ab04-00c04fc2dcd2", 4);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 49152, 135, &pdu),
        1000,
    );

    let uuid = engine.reg.dcerpc.uuid;
    let interface = engine.reg.dcerpc.interface;
    let msg_type = engine.reg.dcerpc.msg_type;

    {
        let session = engine.single_session();
        assert!(session.has_protocol("dcerpc"));
        assert!(session.has_protocol("drsuapi"), "sub-parser tag applied");
    }

    assert_eq!(
        strings_at(&mut engine, uuid),
        vec!["e3514235-4b06-11d1-ab04-00c04fc2dcd2".to_string()]
    );
    assert_eq!(
        strings_at(&mut engine, interface),
        vec!["drsuapi".to_string()]
    );
    assert_eq!(strings_at(&mut engine, msg_type), vec!["bind".to_string()]);
}

#[test]
fn request_records_the_opnum() {
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_le_bytes()); // alloc hint
    body.extend_from_slice(&0u16.to_le_bytes()); // context id
    body.extend_from_slice(&9u16.to_le_bytes()); // opnum

    let mut pdu = dcerpc_header(0, (16 + body.len()) as u16);
    pdu.extend_from_slice(&body);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 49152, 135, &pdu),
        1000,
    );

    let opnum = engine.reg.dcerpc.opnum;
    let session = engine.single_session();
    match session.fields.get(opnum) {
        Some(FieldValue::IntArray(values)) => assert_eq!(values, &vec![9]),
        other => panic!("opnum missing: {other:?}"),
    }
}

#[test]
fn fragment_length_outside_bounds_drops_the_stream() {
    // frag length below the 16-byte floor.
    let mut pdu = dcerpc_header(0, 8);
    pdu.extend_from_slice(&[0u8; 32]);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 49152, 135, &pdu),
        1000,
    );

    // The classifier fired, but the parser dropped everything buffered and
    // extracted nothing.
    let msg_type = engine.reg.dcerpc.msg_type;
    {
        let session = engine.single_session();
        assert!(session.has_protocol("dcerpc"));
    }
    assert!(strings_at(&mut engine, msg_type).is_empty());
}

#[test]
fn two_pdus_in_one_segment_both_parse() {
    let mut payload = bind_pdu("12345778-1234-abcd-ef00-0123456789ac", 1);
    let mut request = Vec::new();
    request.extend_from_slice(&0u32.to_le_bytes());
    request.extend_from_slice(&0u16.to_le_bytes());
    request.extend_from_slice(&3u16.to_le_bytes());
    let mut request_pdu = dcerpc_header(0, (16 + request.len()) as u16);
    request_pdu.extend_from_slice(&request);
    payload.extend_from_slice(&request_pdu);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 49152, 135, &payload),
        1000,
    );

    let interface = engine.reg.dcerpc.interface;
    let opnum = engine.reg.dcerpc.opnum;

    assert_eq!(strings_at(&mut engine, interface), vec!["samr".to_string()]);
    let session = engine.single_session();
    match session.fields.get(opnum) {
        Some(FieldValue::IntArray(values)) => assert_eq!(values, &vec![3]),
        other => panic!("opnum missing: {other:?}"),
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::{
    fields::FieldValue,
    parsers::dns::dns_name,
};

use crate::unit_tests::{TestEngine, udp_frame};

fn qname(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.') {
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

/// Standard query header + one question.
fn dns_query(id: u16, name: &str, qtype: u16, qclass: u16) -> Vec<u8> {
    let mut msg = Vec::new();
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&[0x01, 0x00]); // RD, opcode QUERY, qr=0
    msg.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&qname(name));
    msg.extend_from_slice(&qtype.to_be_bytes());
    msg.extend_from_slice(&qclass.to_be_bytes());
    msg
}

fn dns_objects(engine: &mut TestEngine) -> Vec<serde_json::Value> {
    let pos = engine.reg.dns.object_pos;
    let session = engine.single_session();
    match session.fields.get(pos) {
        Some(FieldValue::Objects(objs)) => objs.iter().map(|o| o.json()).collect(),
        _ => Vec::new(),
    }
}

#[test]
fn udp_query_extracts_the_question() {
    let msg = dns_query(0x1234, "www.example.com", 1, 1);
    let frame = udp_frame([10, 0, 0, 9], [8, 8, 8, 8], 50000, 53, &msg);

    let mut engine = TestEngine::new();
    engine.feed(frame, 1000);

    {
        let session = engine.single_session();
        assert!(session.has_protocol("dns"));
    }

    let docs = dns_objects(&mut engine);
    assert_eq!(docs.len(), 1);
    let doc = &docs[0];
    assert_eq!(doc["queryHost"], "www.example.com");
    assert_eq!(doc["opcode"], "QUERY");
    assert_eq!(doc["qt"], "A");
    assert_eq!(doc["qc"], "IN");
    // No response yet: status and IPs must be absent.
    assert!(doc.get("status").is_none());
    assert!(doc.get("ip").is_none());
}

#[test]
fn response_merges_into_the_query_object() {
    let query = dns_query(0x4242, "www.example.com", 1, 1);
    let mut response = query.clone();
    response[2] |= 0x80; // qr = 1
    response[7] = 1; // ancount = 1
    // Answer: pointer to the qname at offset 12, type A, class IN, ttl 60,
    // rdlength 4, 93.184.216.34.
    response.extend_from_slice(&[0xc0, 0x0c]);
    response.extend_from_slice(&1u16.to_be_bytes());
    response.extend_from_slice(&1u16.to_be_bytes());
    response.extend_from_slice(&60u32.to_be_bytes());
    response.extend_from_slice(&4u16.to_be_bytes());
    response.extend_from_slice(&[93, 184, 216, 34]);

    let mut engine = TestEngine::new();
    engine.feed(
        udp_frame([10, 0, 0, 9], [8, 8, 8, 8], 50000, 53, &query),
        1000,
    );
    engine.feed(
        udp_frame([8, 8, 8, 8], [10, 0, 0, 9], 53, 50000, &response),
        1001,
    );

    let docs = dns_objects(&mut engine);
    assert_eq!(docs.len(), 1, "query and response share one object");
    let doc = &docs[0];
    assert_eq!(doc["status"], "NOERROR");
    assert_eq!(doc["ipCnt"], 1);
    assert_eq!(doc["ip"][0], "93.184.216.34");
}

#[test]
fn different_transaction_ids_stay_separate_objects() {
    let mut engine = TestEngine::new();
    engine.feed(
        udp_frame(
            [10, 0, 0, 9],
            [8, 8, 8, 8],
            50000,
            53,
            &dns_query(1, "a.example.com", 1, 1),
        ),
        1000,
    );
    engine.feed(
        udp_frame(
            [10, 0, 0, 9],
            [8, 8, 8, 8],
            50000,
            53,
            &dns_query(2, "a.example.com", 1, 1),
        ),
        1001,
    );

    let docs = dns_objects(&mut engine);
    assert_eq!(docs.len(), 2);
}

#[test]
fn qdcount_not_one_is_tagged_and_skipped() {
    let mut msg = dns_query(7, "x.example.com", 1, 1);
    msg[5] = 2; // qdcount = 2

    let mut engine = TestEngine::new();
    engine.feed(udp_frame([10, 0, 0, 9], [8, 8, 8, 8], 50000, 53, &msg), 1000);

    {
        let session = engine.single_session();
        assert!(session.tags.iter().any(|t| t == "dns:qdcount-not-1"));
    }
    assert!(dns_objects(&mut engine).is_empty());
}

#[test]
fn name_decompression_rejects_pointer_loops() {
    // Offset 12: a pointer chain that refers back to itself.
    let mut msg = vec![0u8; 20];
    msg[12] = 0xc0;
    msg[13] = 14;
    msg[14] = 0xc0;
    msg[15] = 12;

    let mut pos = 12usize;
    assert!(dns_name(&msg, &mut pos).is_none());
}

#[test]
fn name_decoding_escapes_and_is_idempotent() {
    // One label with a control byte and a high byte.
    let mut msg = Vec::new();
    msg.push(4u8);
    msg.extend_from_slice(&[b'a', 0x07, 0xc1, b'z']);
    msg.push(0);

    let mut pos = 0usize;
    let decoded = dns_name(&msg, &mut pos).expect("decodes");
    assert!(decoded.starts_with('a'));
    assert!(decoded.contains('^'));
    assert!(decoded.contains("M-"));

    // Re-encoding the escaped output and decoding again is a fixed point.
    let mut reencoded = Vec::new();
    reencoded.push(decoded.len() as u8);
    reencoded.extend_from_slice(decoded.as_bytes());
    reencoded.push(0);
    let mut pos = 0usize;
    let twice = dns_name(&reencoded, &mut pos).expect("decodes again");
    assert_eq!(decoded, twice);
}

#[test]
fn mdns_uses_its_own_protocol_tag() {
    let msg = dns_query(0, "printer.local", 12, 1);
    let frame = udp_frame([10, 0, 0, 9], [224, 0, 0, 251], 5353, 5353, &msg);

    let mut engine = TestEngine::new();
    engine.feed(frame, 1000);
    let session = engine.single_session();
    assert!(session.has_protocol("mdns"));
}

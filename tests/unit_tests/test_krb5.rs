// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::fields::FieldValue;

use crate::unit_tests::{TestEngine, tcp_frame};

/// DER TLV with a one-byte 0x81 length form, which is what the byte-pattern
/// classifiers key on.
fn tlv_long(tag: u8, content: &[u8]) -> Vec<u8> {
    assert!(content.len() < 256);
    let mut out = vec![tag, 0x81, content.len() as u8];
    out.extend_from_slice(content);
    out
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    assert!(content.len() < 128);
    let mut out = vec![tag, content.len() as u8];
    out.extend_from_slice(content);
    out
}

fn general_string(s: &str) -> Vec<u8> {
    tlv(0x1b, s.as_bytes())
}

fn integer(v: u8) -> Vec<u8> {
    tlv(0x02, &[v])
}

fn ctx(n: u8, content: &[u8]) -> Vec<u8> {
    tlv(0xa0 | n, content)
}

fn sequence(content: &[u8]) -> Vec<u8> {
    tlv(0x30, content)
}

fn principal_name(name_type: u8, components: &[&str]) -> Vec<u8> {
    let mut strings = Vec::new();
    for c in components {
        strings.extend_from_slice(&general_string(c));
    }
    let mut inner = Vec::new();
    inner.extend_from_slice(&ctx(0, &integer(name_type)));
    inner.extend_from_slice(&ctx(1, &sequence(&strings)));
    sequence(&inner)
}

/// AS-REQ with cname alice, realm EXAMPLE.COM, sname krbtgt/EXAMPLE.COM,
/// etypes {18, 17, 23}.
fn as_req() -> Vec<u8> {
    let mut etypes = Vec::new();
    for e in [18u8, 17, 23] {
        etypes.extend_from_slice(&integer(e));
    }

    let mut body = Vec::new();
    body.extend_from_slice(&ctx(0, &tlv(0x03, &[0, 0, 0, 0, 0]))); // kdc-options
    body.extend_from_slice(&ctx(1, &principal_name(1, &["alice"])));
    body.extend_from_slice(&ctx(2, &general_string("EXAMPLE.COM")));
    body.extend_from_slice(&ctx(3, &principal_name(2, &["krbtgt", "EXAMPLE.COM"])));
    body.extend_from_slice(&ctx(8, &sequence(&etypes)));

    let mut req = Vec::new();
    req.extend_from_slice(&ctx(1, &integer(5))); // pvno
    req.extend_from_slice(&ctx(2, &integer(10))); // msg-type AS-REQ
    req.extend_from_slice(&ctx(4, &sequence(&body)));

    // 0x81 length forms put the pvno INTEGER at the classifier offset.
    let seq = {
        let mut out = vec![0x30, 0x81, req.len() as u8];
        out.extend_from_slice(&req);
        out
    };
    tlv_long(0x6a, &seq)
}

fn strings_at(engine: &mut TestEngine, pos: u16) -> Vec<String> {
    let session = engine.single_session();
    match session.fields.get(pos) {
        Some(FieldValue::StrArray(values)) => values.clone(),
        _ => Vec::new(),
    }
}

#[test]
fn tcp_as_req_extracts_principals_and_etypes() {
    let message = as_req();
    let mut payload = Vec::new();
    payload.extend_from_slice(&(message.len() as u32).to_be_bytes());
    payload.extend_from_slice(&message);

    // The classifier requires the first two length bytes to be zero, so
    // this rejects messages of 64 KiB and up; a preserved limitation.
    assert_eq!(payload[0], 0);
    assert_eq!(payload[1], 0);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 5], [10, 0, 0, 6], 49000, 88, &payload),
        1000,
    );

    {
        let session = engine.single_session();
        assert!(session.has_protocol("krb5"));
    }

    let cname = engine.reg.krb5.cname;
    let realm = engine.reg.krb5.realm;
    let sname = engine.reg.krb5.sname;
    let etype = engine.reg.krb5.etype;

    assert_eq!(strings_at(&mut engine, cname), vec!["alice".to_string()]);
    assert_eq!(
        strings_at(&mut engine, realm),
        vec!["EXAMPLE.COM".to_string()]
    );
    assert_eq!(
        strings_at(&mut engine, sname),
        vec!["krbtgt/EXAMPLE.COM".to_string()]
    );
    assert_eq!(
        strings_at(&mut engine, etype),
        vec![
            "aes256-cts-hmac-sha1-96".to_string(),
            "aes128-cts-hmac-sha1-96".to_string(),
            "rc4-hmac".to_string(),
        ]
    );
}

#[test]
fn oversized_length_prefix_is_not_classified() {
    // First two bytes nonzero: the heuristic refuses the stream.
    let message = as_req();
    let mut payload = vec![0x01, 0x00, 0x00, 0x00];
    payload.extend_from_slice(&message);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 5], [10, 0, 0, 6], 49000, 88, &payload),
        1000,
    );

    let session = engine.single_session();
    assert!(!session.has_protocol("krb5"));
    assert!(session.parsers.is_empty());
}

#[test]
fn krb_error_maps_the_error_code() {
    // KRB-ERROR with error-code 6 (client principal unknown).
    let mut err = Vec::new();
    err.extend_from_slice(&ctx(0, &integer(5)));
    err.extend_from_slice(&ctx(1, &integer(30)));
    err.extend_from_slice(&ctx(6, &integer(6)));
    err.extend_from_slice(&ctx(9, &general_string("EXAMPLE.COM")));

    let seq = {
        let mut out = vec![0x30, 0x81, err.len() as u8];
        out.extend_from_slice(&err);
        out
    };
    let message = tlv_long(0x7e, &seq);

    let mut payload = Vec::new();
    payload.extend_from_slice(&(message.len() as u32).to_be_bytes());
    payload.extend_from_slice(&message);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 6], [10, 0, 0, 5], 88, 49000, &payload),
        1000,
    );

    let error = engine.reg.krb5.error;
    assert_eq!(
        strings_at(&mut engine, error),
        vec!["KDC_ERR_C_PRINCIPAL_UNKNOWN".to_string()]
    );
}

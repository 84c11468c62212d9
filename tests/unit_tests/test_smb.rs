// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::fields::FieldValue;

use crate::unit_tests::{TestEngine, tcp_frame};

fn ucs2le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// NetBIOS length prefix around one SMB message.
fn netbios(message: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8];
    out.extend_from_slice(&(message.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(message);
    out
}

fn smb2_header(command: u16, flags: u32) -> Vec<u8> {
    let mut hdr = vec![0u8; 64];
    hdr[0] = 0xfe;
    hdr[1..4].copy_from_slice(b"SMB");
    hdr[4] = 64; // structure size
    hdr[12..14].copy_from_slice(&command.to_le_bytes());
    hdr[16..20].copy_from_slice(&flags.to_le_bytes());
    hdr
}

#[test]
fn smb2_tree_connect_extracts_the_share() {
    let path = ucs2le("\\\\server\\share$");
    let mut body = Vec::new();
    body.extend_from_slice(&9u16.to_le_bytes()); // structure size
    body.extend_from_slice(&0u16.to_le_bytes()); // reserved
    body.extend_from_slice(&72u16.to_le_bytes()); // path offset (64 + 8)
    body.extend_from_slice(&(path.len() as u16).to_le_bytes());
    body.extend_from_slice(&path);
    body.push(0); // keep pathlen < remaining

    let mut message = smb2_header(0x03, 0);
    message.extend_from_slice(&body);
    let payload = netbios(&message);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 50000, 445, &payload),
        1000,
    );

    let share_pos = engine.reg.smb.share;
    let session = engine.single_session();
    assert!(session.has_protocol("smb"));
    match session.fields.get(share_pos) {
        Some(FieldValue::StrArray(shares)) => {
            assert_eq!(shares, &vec!["\\\\server\\share$".to_string()]);
        },
        other => panic!("share field missing: {other:?}"),
    }
}

#[test]
fn smb2_create_extracts_the_filename() {
    let name = ucs2le("users\\alice\\secrets.xlsx");
    let mut body = Vec::new();
    body.extend_from_slice(&[0u8; 44]); // fixed part of the create request
    body.extend_from_slice(&112u16.to_le_bytes()); // name offset (64 + 48)
    body.extend_from_slice(&(name.len() as u16).to_le_bytes());
    body.extend_from_slice(&name);
    body.push(0);

    let mut message = smb2_header(0x05, 0);
    message.extend_from_slice(&body);
    let payload = netbios(&message);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 50000, 445, &payload),
        1000,
    );

    let fn_pos = engine.reg.smb.filename;
    let session = engine.single_session();
    match session.fields.get(fn_pos) {
        Some(FieldValue::StrArray(names)) => {
            assert_eq!(names, &vec!["users\\alice\\secrets.xlsx".to_string()]);
        },
        other => panic!("filename field missing: {other:?}"),
    }
}

#[test]
fn smb2_negotiate_response_records_the_dialect() {
    let mut body = Vec::new();
    body.extend_from_slice(&65u16.to_le_bytes()); // structure size
    body.extend_from_slice(&1u16.to_le_bytes()); // security mode
    body.extend_from_slice(&0x0311u16.to_le_bytes()); // SMB 3.1.1
    body.extend_from_slice(&[0u8; 32]);

    // Server-to-redir flag marks the response direction.
    let mut message = smb2_header(0x00, 1);
    message.extend_from_slice(&body);
    let payload = netbios(&message);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 2], [10, 0, 0, 1], 445, 50000, &payload),
        1000,
    );

    let dialect_pos = engine.reg.smb.dialect;
    let session = engine.single_session();
    match session.fields.get(dialect_pos) {
        Some(FieldValue::StrArray(dialects)) => {
            assert_eq!(dialects, &vec!["SMB 3.1.1".to_string()]);
        },
        other => panic!("dialect field missing: {other:?}"),
    }
}

#[test]
fn message_split_across_segments_reassembles() {
    let path = ucs2le("\\\\fs\\projects");
    let mut body = Vec::new();
    body.extend_from_slice(&9u16.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&72u16.to_le_bytes());
    body.extend_from_slice(&(path.len() as u16).to_le_bytes());
    body.extend_from_slice(&path);
    body.push(0);

    let mut message = smb2_header(0x03, 0);
    message.extend_from_slice(&body);
    let payload = netbios(&message);

    // Split in the middle of the SMB2 header.
    let (first, second) = payload.split_at(40);

    let mut engine = TestEngine::new();
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 50000, 445, first),
        1000,
    );
    engine.feed(
        tcp_frame([10, 0, 0, 1], [10, 0, 0, 2], 50000, 445, second),
        1001,
    );

    let share_pos = engine.reg.smb.share;
    let session = engine.single_session();
    match session.fields.get(share_pos) {
        Some(FieldValue::StrArray(shares)) => {
            assert_eq!(shares, &vec!["\\\\fs\\projects".to_string()]);
        },
        other => panic!("share field missing after reassembly: {other:?}"),
    }
}

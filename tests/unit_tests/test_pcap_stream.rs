// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use flowcap::reader::pcap::PcapStream;

fn file_header(magic: u32, swapped: bool) -> Vec<u8> {
    let word = |v: u32| {
        if swapped {
            v.swap_bytes().to_le_bytes()
        } else {
            v.to_le_bytes()
        }
    };
    let mut out = Vec::new();
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&word(0x0002_0004)); // version 2.4 packed
    out.extend_from_slice(&word(0));
    out.extend_from_slice(&word(0));
    out.extend_from_slice(&word(65535)); // snaplen
    out.extend_from_slice(&word(1)); // linktype EN10MB
    out
}

fn record(ts_sec: u32, ts_frac: u32, payload: &[u8], swapped: bool) -> Vec<u8> {
    let word = |v: u32| {
        if swapped {
            v.swap_bytes().to_le_bytes()
        } else {
            v.to_le_bytes()
        }
    };
    let mut out = Vec::new();
    out.extend_from_slice(&word(ts_sec));
    out.extend_from_slice(&word(ts_frac));
    out.extend_from_slice(&word(payload.len() as u32));
    out.extend_from_slice(&word(payload.len() as u32));
    out.extend_from_slice(payload);
    out
}

#[test]
fn native_order_parses() {
    let mut data = file_header(0xa1b2_c3d4, false);
    data.extend_from_slice(&record(100, 5, b"abcdef", false));

    let mut stream = PcapStream::new();
    let mut records = Vec::new();
    stream.feed(&data, &mut records).expect("feed");

    assert!(stream.header_seen());
    assert_eq!(stream.link_type, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ts_sec, 100);
    assert_eq!(records[0].ts_usec, 5);
    assert_eq!(records[0].data, b"abcdef");
}

#[test]
fn swapped_order_parses() {
    let mut data = file_header(0xd4c3_b2a1, true);
    data.extend_from_slice(&record(200, 7, b"xyz", true));

    let mut stream = PcapStream::new();
    let mut records = Vec::new();
    stream.feed(&data, &mut records).expect("feed");

    assert_eq!(stream.snaplen, 65535);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ts_sec, 200);
    assert_eq!(records[0].data, b"xyz");
}

#[test]
fn nanosecond_variant_scales_to_micros() {
    let mut data = file_header(0xa1b2_3c4d, false);
    data.extend_from_slice(&record(300, 1_500_000, b"q", false));

    let mut stream = PcapStream::new();
    let mut records = Vec::new();
    stream.feed(&data, &mut records).expect("feed");

    assert_eq!(records[0].ts_usec, 1_500);
}

#[test]
fn byte_at_a_time_feeding_resynchronizes() {
    let mut data = file_header(0xa1b2_c3d4, false);
    for n in 0..10u8 {
        data.extend_from_slice(&record(n as u32, 0, &[n; 13], false));
    }

    let mut stream = PcapStream::new();
    let mut records = Vec::new();
    for byte in data {
        stream.feed(&[byte], &mut records).expect("feed");
    }
    assert_eq!(records.len(), 10);
    for (n, r) in records.iter().enumerate() {
        assert_eq!(r.data, vec![n as u8; 13]);
    }
}

#[test]
fn garbage_magic_is_rejected() {
    let mut stream = PcapStream::new();
    let mut records = Vec::new();
    let err = stream.feed(&[0u8; 64], &mut records);
    assert!(err.is_err());
}

#[test]
fn insane_caplen_is_rejected() {
    let mut data = file_header(0xa1b2_c3d4, false);
    data.extend_from_slice(&record(1, 0, b"", false));
    // Corrupt the caplen of a second record.
    let mut bad = record(2, 0, b"", false);
    bad[8..12].copy_from_slice(&0x7fff_ff00u32.to_le_bytes());
    data.extend_from_slice(&bad);

    let mut stream = PcapStream::new();
    let mut records = Vec::new();
    let result = stream.feed(&data, &mut records);
    assert!(result.is_err());
    assert_eq!(records.len(), 1, "the good record before the corruption parsed");
}

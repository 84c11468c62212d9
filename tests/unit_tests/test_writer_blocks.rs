// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeSet, io::Read};

use flowcap::{
    cfg::enums::CompressionMode,
    writer::{
        block::{BlockWriter, WITHIN_BLOCK_BITS},
        pcap::{PcapFileHeader, PcapRecordHeader, RECORD_HEADER_LEN},
    },
};
use zerocopy::IntoBytes;

const BLOCK_SIZE: u32 = 65536;
const PACKET_LEN: usize = 1500;

fn record_header(seq: u32) -> PcapRecordHeader {
    PcapRecordHeader {
        ts_sec: 1_700_000_000 + seq,
        ts_usec: seq % 1_000_000,
        caplen: PACKET_LEN as u32,
        len: PACKET_LEN as u32,
    }
}

fn packet_body(seq: u32) -> Vec<u8> {
    // Semi-compressible payload with a recognizable stamp.
    let mut body = vec![(seq % 251) as u8; PACKET_LEN];
    body[..4].copy_from_slice(&seq.to_be_bytes());
    body
}

/// Writes `count` synthesized packets, returning the packed positions and
/// the complete output stream.
fn write_stream(
    mode: CompressionMode,
    count: u32,
) -> (Vec<u64>, Vec<u8>) {
    let mut writer = BlockWriter::new(mode, 0, BLOCK_SIZE).expect("writer");

    let file_header = PcapFileHeader::new(16384, 1);
    writer.append(file_header.as_bytes(), false, 0).expect("header");
    writer.new_block().expect("header block");

    let mut positions = Vec::new();
    for seq in 0..count {
        let header = record_header(seq);
        let pos = writer
            .append(header.as_bytes(), true, PACKET_LEN)
            .expect("record header");
        writer.append(&packet_body(seq), false, 0).expect("record body");
        positions.push(pos);
    }
    writer.finish().expect("finish");
    let data = writer.take_rest().expect("stream bytes");
    (positions, data)
}

/// Raw-inflates the deflate data starting at `offset` until at least `need`
/// bytes are decoded; a full-flush boundary means no earlier state is
/// required.
fn inflate_from(data: &[u8], offset: usize, need: usize) -> Vec<u8> {
    let mut decomp = flate2::Decompress::new(false);
    let mut out = Vec::with_capacity(need + 4096);
    let mut input = &data[offset..];
    while out.len() < need && !input.is_empty() {
        out.reserve(8192);
        let before_in = decomp.total_in();
        let status = decomp
            .decompress_vec(input, &mut out, flate2::FlushDecompress::None)
            .expect("inflate");
        let consumed = (decomp.total_in() - before_in) as usize;
        input = &input[consumed..];
        if matches!(status, flate2::Status::StreamEnd) {
            break;
        }
    }
    out
}

#[test]
fn gzip_blocks_are_aligned_and_independently_decodable() {
    let (positions, data) = write_stream(CompressionMode::Gzip, 10_000);

    let block_starts: BTreeSet<u64> =
        positions.iter().map(|p| p >> WITHIN_BLOCK_BITS).collect();

    // At least total_compressed / block_size distinct blocks must appear.
    let min_blocks = data.len() as u64 / BLOCK_SIZE as u64;
    assert!(
        block_starts.len() as u64 >= min_blocks.max(2),
        "expected >= {} blocks, saw {}",
        min_blocks,
        block_starts.len()
    );

    // Every packet's within-block offset fits the 20-bit budget.
    for pos in &positions {
        assert!(pos & ((1 << WITHIN_BLOCK_BITS) - 1) < (1 << WITHIN_BLOCK_BITS));
    }

    // Sample packets across the file: decode their block cold and check
    // the record header lands exactly at the stored offset.
    for &seq in &[0u32, 1, 777, 5000, 9999] {
        let pos = positions[seq as usize];
        let block_start = (pos >> WITHIN_BLOCK_BITS) as usize;
        let offset = (pos & ((1 << WITHIN_BLOCK_BITS) - 1)) as usize;

        let decoded = inflate_from(&data, block_start, offset + RECORD_HEADER_LEN + 4);
        assert!(
            decoded.len() >= offset + RECORD_HEADER_LEN,
            "packet {seq}: block too short"
        );
        let header = &decoded[offset..offset + RECORD_HEADER_LEN];
        let expected = record_header(seq);
        assert_eq!(header, expected.as_bytes(), "packet {seq} header mismatch");
    }
}

#[test]
fn gzip_block_decode_is_independent_of_earlier_blocks() {
    let (positions, data) = write_stream(CompressionMode::Gzip, 4_000);

    // Pick a packet from a late block and decode with and without the
    // preceding blocks; the bytes must agree.
    let pos = positions[3_500];
    let block_start = (pos >> WITHIN_BLOCK_BITS) as usize;
    let offset = (pos & ((1 << WITHIN_BLOCK_BITS) - 1)) as usize;
    assert!(block_start > 10, "late packet should not sit in block zero");

    let cold = inflate_from(&data, block_start, offset + RECORD_HEADER_LEN);
    let cold_slice = &cold[offset..offset + RECORD_HEADER_LEN];

    // Decoding from the start of deflate data (after the 10-byte gzip
    // header) reaches the same bytes the long way around: the record sits
    // at a computable absolute offset in the uncompressed stream.
    let absolute = 24 + 3_500 * (RECORD_HEADER_LEN + PACKET_LEN);
    let warm_all = inflate_from(&data, 10, absolute + RECORD_HEADER_LEN);
    assert_eq!(
        &warm_all[absolute..absolute + RECORD_HEADER_LEN],
        cold_slice,
        "cold decode diverged from full decode"
    );
}

#[test]
fn zstd_blocks_are_standalone_frames() {
    let (positions, data) = write_stream(CompressionMode::Zstd, 2_000);

    for &seq in &[0u32, 999, 1999] {
        let pos = positions[seq as usize];
        let block_start = (pos >> WITHIN_BLOCK_BITS) as usize;
        let offset = (pos & ((1 << WITHIN_BLOCK_BITS) - 1)) as usize;

        let mut decoder =
            zstd::stream::read::Decoder::new(&data[block_start..]).expect("decoder");
        let mut decoded = vec![0u8; offset + RECORD_HEADER_LEN];
        decoder.read_exact(&mut decoded).expect("decode block");

        let header = &decoded[offset..offset + RECORD_HEADER_LEN];
        let expected = record_header(seq);
        assert_eq!(header, expected.as_bytes(), "packet {seq} header mismatch");
    }
}

#[test]
fn uncompressed_positions_are_absolute_offsets() {
    let (positions, data) = write_stream(CompressionMode::None, 100);

    for (seq, &pos) in positions.iter().enumerate() {
        let start = pos as usize;
        let header = &data[start..start + RECORD_HEADER_LEN];
        let expected = record_header(seq as u32);
        assert_eq!(header, expected.as_bytes());
    }
}

#[test]
fn uncompressed_stream_round_trips_through_the_reader() {
    let (_, data) = write_stream(CompressionMode::None, 256);

    let mut stream = flowcap::reader::pcap::PcapStream::new();
    let mut records = Vec::new();
    // Feed in awkward chunk sizes to exercise resynchronization.
    for chunk in data.chunks(977) {
        stream.feed(chunk, &mut records).expect("feed");
    }

    assert_eq!(records.len(), 256);
    for (seq, record) in records.iter().enumerate() {
        assert_eq!(record.data, packet_body(seq as u32));
        assert_eq!(record.wire_len, PACKET_LEN as u32);
        assert_eq!(record.ts_sec, 1_700_000_000 + seq as u64);
    }
}

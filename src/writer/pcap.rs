// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Classic pcap savefile framing, byte-for-byte what libpcap writes.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
pub const PCAP_MAGIC_SWAPPED: u32 = 0xd4c3_b2a1;
pub const PCAP_MAGIC_NSEC: u32 = 0xa1b2_3c4d;
pub const PCAP_MAGIC_NSEC_SWAPPED: u32 = 0x4d3c_b2a1;

pub const FILE_HEADER_LEN: usize = 24;
pub const RECORD_HEADER_LEN: usize = 16;

/// 24-byte savefile header.
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PcapFileHeader {
    pub magic: u32,
    pub version_major: u16,
    pub version_minor: u16,
    pub thiszone: i32,
    pub sigfigs: u32,
    pub snaplen: u32,
    pub linktype: u32,
}

impl PcapFileHeader {
    pub fn new(snaplen: u32, linktype: u32) -> Self {
        PcapFileHeader {
            magic: PCAP_MAGIC,
            version_major: 2,
            version_minor: 4,
            thiszone: 0,
            sigfigs: 0,
            snaplen,
            linktype,
        }
    }
}

/// 16-byte per-record header.
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct PcapRecordHeader {
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub caplen: u32,
    pub len: u32,
}

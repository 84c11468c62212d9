// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bitflags::bitflags;

bitflags! {
    /// Encapsulations traversed on the way to the innermost frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Tunnel: u16 {
        const GRE       = 0x0001;
        const PPPOE     = 0x0002;
        const MPLS      = 0x0004;
        const PPP       = 0x0008;
        const GTP       = 0x0010;
        const VXLAN     = 0x0020;
        const VXLAN_GPE = 0x0040;
        const GENEVE    = 0x0080;
        const NSH       = 0x0100;
        const L2TP      = 0x0200;
    }
}

/// Disposition of a frame after the enqueue/decapsulation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketRc {
    /// Hash and mProtocol assigned; route to a packet worker.
    DoProcess,
    /// Header underrun or invariant violation; drop and count.
    Corrupt,
    /// Nothing recognized the frame; drop and count.
    Unknown,
    /// Consumed without session processing.
    DontProcess,
}

/// One captured frame plus everything decoded about it on the way in.
///
/// Owned by the reader until dispatched, then by exactly one packet worker,
/// then handed to the writer.
#[derive(Debug, Default)]
pub struct Packet {
    /// Raw bytes as captured, starting at the link layer.
    pub buf: Vec<u8>,

    pub ts_sec: u64,
    pub ts_usec: u32,
    /// Length on the wire; `buf.len()` may be shorter when truncated by the
    /// snap length.
    pub wire_len: u32,
    pub link_type: u16,

    /// Offset of the innermost IP header.
    pub ip_offset: u16,
    /// Offset of the transport header (or protocol payload for enqueue
    /// callbacks that re-point it).
    pub payload_offset: u16,
    pub payload_len: u16,

    pub vlan: u16,
    pub vni: u32,
    pub tunnel: Tunnel,
    pub v6: bool,
    pub direction: u8,
    pub reader_idx: u8,

    /// Index into the mProtocol registry, assigned at enqueue time.
    pub mprotocol: u8,
    /// Flow hash over the canonical session id; pins the flow to a worker.
    pub hash: u32,

    /// Set by the writer once the packet lands in an output file.
    pub writer_file_num: u32,
    pub writer_file_pos: u64,
}

impl Packet {
    pub fn new(buf: Vec<u8>, ts_sec: u64, ts_usec: u32, wire_len: u32) -> Self {
        Packet {
            buf,
            ts_sec,
            ts_usec,
            wire_len,
            ..Default::default()
        }
    }

    /// Captured length.
    #[inline]
    pub fn caplen(&self) -> usize {
        self.buf.len()
    }

    /// Transport payload slice, bounds-clamped.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        let start = (self.payload_offset as usize).min(self.buf.len());
        let end = (start + self.payload_len as usize).min(self.buf.len());
        &self.buf[start..end]
    }

    /// Resets decode state so a pooled buffer can be reused.
    pub fn reset(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        *self = Packet {
            buf,
            ..Default::default()
        };
        self.buf.clear();
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Incremental classic-savefile parser. Accepts chunks of any size, both
//! byte orders, and both microsecond and nanosecond timestamp variants.

use anyhow::{Result, bail};

use crate::writer::pcap::{
    FILE_HEADER_LEN, PCAP_MAGIC, PCAP_MAGIC_NSEC, PCAP_MAGIC_NSEC_SWAPPED,
    PCAP_MAGIC_SWAPPED, RECORD_HEADER_LEN,
};

/// One record recovered from the stream.
#[derive(Debug)]
pub struct RawRecord {
    pub data: Vec<u8>,
    pub ts_sec: u64,
    pub ts_usec: u32,
    pub wire_len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Records,
}

/// Streaming savefile reader; feed it chunks, collect records.
#[derive(Debug)]
pub struct PcapStream {
    state: State,
    swapped: bool,
    nanos: bool,
    pub snaplen: u32,
    pub link_type: u16,
    leftover: Vec<u8>,
}

impl Default for PcapStream {
    fn default() -> Self {
        Self::new()
    }
}

impl PcapStream {
    pub fn new() -> Self {
        PcapStream {
            state: State::Header,
            swapped: false,
            nanos: false,
            snaplen: 0,
            link_type: 0,
            leftover: Vec::new(),
        }
    }

    #[inline]
    fn u32_at(&self, off: usize) -> u32 {
        let b = &self.leftover[off..off + 4];
        let v = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        if self.swapped { v.swap_bytes() } else { v }
    }

    /// Consumes a chunk, appending every complete record to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<RawRecord>) -> Result<()> {
        self.leftover.extend_from_slice(chunk);

        if self.state == State::Header {
            if self.leftover.len() < FILE_HEADER_LEN {
                return Ok(());
            }
            let magic = u32::from_le_bytes([
                self.leftover[0],
                self.leftover[1],
                self.leftover[2],
                self.leftover[3],
            ]);
            // The file is little-endian on disk when the magic reads back
            // directly; otherwise every field needs a swap.
            (self.swapped, self.nanos) = match magic {
                PCAP_MAGIC => (false, false),
                PCAP_MAGIC_NSEC => (false, true),
                PCAP_MAGIC_SWAPPED => (true, false),
                PCAP_MAGIC_NSEC_SWAPPED => (true, true),
                other => bail!("not a pcap savefile (magic {other:#010x})"),
            };
            self.snaplen = self.u32_at(16);
            self.link_type = (self.u32_at(20) & 0xffff) as u16;
            self.leftover.drain(..FILE_HEADER_LEN);
            self.state = State::Records;
        }

        while self.leftover.len() >= RECORD_HEADER_LEN {
            let ts_sec = self.u32_at(0) as u64;
            let ts_frac = self.u32_at(4);
            let caplen = self.u32_at(8) as usize;
            let wire_len = self.u32_at(12);

            if caplen > 0x7fff_0000 {
                bail!("corrupt record header (caplen {caplen:#x})");
            }
            if self.leftover.len() < RECORD_HEADER_LEN + caplen {
                return Ok(());
            }

            let data = self.leftover[RECORD_HEADER_LEN..RECORD_HEADER_LEN + caplen]
                .to_vec();
            self.leftover.drain(..RECORD_HEADER_LEN + caplen);

            out.push(RawRecord {
                data,
                ts_sec,
                ts_usec: if self.nanos { ts_frac / 1000 } else { ts_frac },
                wire_len,
            });
        }
        Ok(())
    }

    /// True once the header has parsed.
    pub fn header_seen(&self) -> bool {
        self.state == State::Records
    }
}

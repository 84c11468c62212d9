// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::net::Ipv6Addr;

use serde_json::{Map, Value, json};

use crate::{
    fields::{FieldSchema, FieldStore},
    parsers::ParserState,
    session::id::SessionId,
};

/// How many payload bytes are remembered per direction for classification.
pub const FIRST_BYTES: usize = 8;

/// One tracked bidirectional flow, owned by a single packet worker.
pub struct Session {
    pub id: SessionId,

    /// Canonical endpoints; `addr1`/`port1` is whichever side sent the
    /// packet that created the session.
    pub addr1: Ipv6Addr,
    pub addr2: Ipv6Addr,
    pub port1: u16,
    pub port2: u16,
    pub vlan: u16,
    pub vni: u32,

    pub first_sec: u64,
    pub last_sec: u64,

    /// Per-direction counters: packets, captured bytes, payload bytes.
    pub packets: [u32; 2],
    pub bytes: [u64; 2],
    pub databytes: [u64; 2],

    pub first_bytes: [[u8; FIRST_BYTES]; 2],
    pub first_bytes_len: [u8; 2],

    pub mprotocol: u8,

    /// Attached parsers; entries become `None` once unregistered.
    pub parsers: Vec<Option<ParserState>>,
    /// Named protocols detected on this flow.
    pub protocols: Vec<&'static str>,
    pub tags: Vec<String>,

    pub fields: FieldStore,

    /// File positions handed back by the writer, `(file_num, packed_pos)`.
    pub packet_positions: Vec<(u32, u64)>,

    /// Skip the writer for further packets of this flow.
    pub stop_saving: bool,
    /// Skip metadata emission entirely.
    pub stop_spi: bool,

    /// References held by in-flight work; a session only frees once this is
    /// back to zero.
    pub outstanding: u32,

    /// ICMP type/code snapshot from the first payload.
    pub icmp_info: [u8; 2],
}

impl Session {
    pub fn new(id: SessionId, mprotocol: u8, ts_sec: u64) -> Self {
        Session {
            id,
            addr1: Ipv6Addr::UNSPECIFIED,
            addr2: Ipv6Addr::UNSPECIFIED,
            port1: 0,
            port2: 0,
            vlan: 0,
            vni: 0,
            first_sec: ts_sec,
            last_sec: ts_sec,
            packets: [0; 2],
            bytes: [0; 2],
            databytes: [0; 2],
            first_bytes: [[0; FIRST_BYTES]; 2],
            first_bytes_len: [0; 2],
            mprotocol,
            parsers: Vec::new(),
            protocols: Vec::new(),
            tags: Vec::new(),
            fields: FieldStore::new(),
            packet_positions: Vec::new(),
            stop_saving: false,
            stop_spi: false,
            outstanding: 0,
            icmp_info: [0; 2],
        }
    }

    /// Tags the session with a named protocol; duplicates are ignored.
    pub fn add_protocol(&mut self, name: &'static str) {
        if !self.protocols.contains(&name) {
            self.protocols.push(name);
        }
    }

    pub fn has_protocol(&self, name: &str) -> bool {
        self.protocols.iter().any(|p| *p == name)
    }

    pub fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_string());
        }
    }

    /// Attaches a parser; it will see all further payload in both
    /// directions until it unregisters.
    pub fn register_parser(&mut self, state: ParserState) {
        self.parsers.push(Some(state));
    }

    /// Saves up to eight first-payload bytes for the direction; true when
    /// this packet was the first with payload.
    pub fn record_first_bytes(&mut self, which: usize, data: &[u8]) -> bool {
        if self.first_bytes_len[which] != 0 || data.is_empty() {
            return false;
        }
        let n = data.len().min(FIRST_BYTES);
        self.first_bytes[which][..n].copy_from_slice(&data[..n]);
        self.first_bytes_len[which] = n as u8;
        true
    }

    /// Builds the session metadata document.
    pub fn to_json(&self, schema: &FieldSchema, node: &str) -> Value {
        let mut doc = Map::new();
        doc.insert("firstPacket".into(), json!(self.first_sec * 1000));
        doc.insert("lastPacket".into(), json!(self.last_sec * 1000));
        doc.insert("node".into(), json!(node));
        doc.insert(
            "source".into(),
            json!({
                "ip": crate::fields::store::ip_to_string(&self.addr1),
                "port": self.port1,
                "packets": self.packets[0],
                "bytes": self.bytes[0],
            }),
        );
        doc.insert(
            "destination".into(),
            json!({
                "ip": crate::fields::store::ip_to_string(&self.addr2),
                "port": self.port2,
                "packets": self.packets[1],
                "bytes": self.bytes[1],
            }),
        );
        doc.insert("totDataBytes".into(), json!(self.databytes[0] + self.databytes[1]));
        if self.vlan != 0 {
            doc.insert("vlan".into(), json!(self.vlan));
        }
        if self.vni != 0 {
            doc.insert("vni".into(), json!(self.vni));
        }
        doc.insert("protocols".into(), json!(self.protocols));
        if !self.tags.is_empty() {
            doc.insert("tags".into(), json!(self.tags));
        }
        if !self.packet_positions.is_empty() {
            let pos: Vec<u64> = self.packet_positions.iter().map(|(_, p)| *p).collect();
            doc.insert("packetPos".into(), json!(pos));
            doc.insert(
                "fileId".into(),
                json!(self.packet_positions.first().map(|(f, _)| *f)),
            );
        }
        self.fields.emit(schema, &mut doc);
        Value::Object(doc)
    }
}

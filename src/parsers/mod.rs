//! Protocol-parser registry: classifiers, per-session parsers, mProtocol
//! dispatch, named extension functions, and sub-parser lookup.
//!
//! All registrations happen during [`init`]; the resulting [`Registry`] is
//! immutable and shared read-only by every thread afterwards.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod asn1;
pub mod buffer;
pub mod cursor;
pub mod dcerpc;
pub mod dhcp;
pub mod dns;
pub mod icmp;
pub mod isakmp;
pub mod krb5;
pub mod smb;
pub mod transport;

use std::collections::HashMap;

use enum_dispatch::enum_dispatch;

use crate::{
    cfg::{config::Config, enums::PortKind},
    packet::{Packet, PacketRc},
    parsers::{
        dcerpc::DceRpcParser,
        dns::{DnsTcpParser, DnsUdpParser},
        isakmp::IsakmpParser,
        krb5::{Krb5TcpParser, Krb5UdpParser},
        smb::SmbParser,
    },
    session::{Session, SessionId},
};

/// What a parser returns for each chunk of payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserResult {
    Continue,
    /// Remove this parser from the session and drop its state.
    Unregister,
}

/// Per-session streaming parser. `which` is the payload direction.
#[enum_dispatch]
pub trait SessionParser {
    fn parse(
        &mut self,
        session: &mut Session,
        registry: &Registry,
        data: &[u8],
        which: usize,
    ) -> ParserResult;
}

/// All dissector state machines a session can carry.
#[enum_dispatch(SessionParser)]
pub enum ParserState {
    DnsUdp(DnsUdpParser),
    DnsTcp(DnsTcpParser),
    Smb(SmbParser),
    DceRpc(DceRpcParser),
    Krb5Udp(Krb5UdpParser),
    Krb5Tcp(Krb5TcpParser),
    Isakmp(IsakmpParser),
}

/// Transport family a pattern classifier binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}

/// Timeout class assigned at mProtocol registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Tcp,
    Udp,
    Icmp,
    Esp,
    Other,
}

pub type EnqueueCb = fn(&mut Packet, usize, usize, &Registry) -> PacketRc;
pub type ClassifyCb = fn(&mut Session, &[u8], usize, u32, &Registry);
pub type NamedCb = fn(&mut Session, &[u8], &Registry);
pub type CreateSessionIdCb = fn(&Packet) -> SessionId;
pub type PreProcessCb = fn(&mut Session, &mut Packet, bool, &Registry);
pub type ProcessCb = fn(&mut Session, &Packet, &Registry) -> bool;

/// Top-level transport registration: session-id construction, per-packet
/// pre-processing, and payload processing for one protocol family.
pub struct MProtocol {
    pub name: &'static str,
    pub kind: SessionKind,
    pub create_session_id: CreateSessionIdCb,
    pub pre_process: Option<PreProcessCb>,
    pub process: Option<ProcessCb>,
    /// Idle seconds before the session expires.
    pub timeout: u32,
}

/// Byte-pattern classifier: fires when `pattern` matches the first payload
/// at `offset` in either direction.
pub struct PatternClassifier {
    pub name: &'static str,
    pub offset: u16,
    pub pattern: &'static [u8],
    /// Opaque value handed to the callback (e.g. the DNS flavour).
    pub arg: u32,
    pub cb: ClassifyCb,
}

pub struct PortClassifier {
    pub name: &'static str,
    pub arg: u32,
    pub cb: ClassifyCb,
}

/// Well-known mProtocol ids, resolved during [`init`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TransportIds {
    pub tcp: u8,
    pub udp: u8,
    pub icmp: u8,
    pub icmpv6: u8,
    pub esp: u8,
    pub dhcp: u8,
    pub dhcpv6: u8,
}

struct PatternIndex {
    /// Offset-0 classifiers indexed by their first pattern byte.
    by_first: Vec<Vec<PatternClassifier>>,
    /// Classifiers at a nonzero offset, scanned linearly.
    any: Vec<PatternClassifier>,
}

impl PatternIndex {
    fn new() -> Self {
        PatternIndex {
            by_first: (0..256).map(|_| Vec::new()).collect(),
            any: Vec::new(),
        }
    }

    fn add(&mut self, c: PatternClassifier) {
        if c.offset == 0 && !c.pattern.is_empty() {
            self.by_first[c.pattern[0] as usize].push(c);
        } else {
            self.any.push(c);
        }
    }

    fn matching<'a>(
        &'a self,
        data: &[u8],
        out: &mut Vec<&'a PatternClassifier>,
    ) {
        if data.is_empty() {
            return;
        }
        for c in &self.by_first[data[0] as usize] {
            if data.len() >= c.pattern.len() && data[..c.pattern.len()] == *c.pattern {
                out.push(c);
            }
        }
        for c in &self.any {
            let off = c.offset as usize;
            if data.len() >= off + c.pattern.len()
                && data[off..off + c.pattern.len()] == *c.pattern
            {
                out.push(c);
            }
        }
    }
}

/// Process-wide parser registry. Built once at startup, immutable after.
pub struct Registry {
    /// Field definitions; owned here so dissectors can reach both at parse
    /// time through one reference.
    pub schema: crate::fields::FieldSchema,

    pub mprotocols: Vec<MProtocol>,
    pub mp: TransportIds,

    pub ethertype_cbs: HashMap<u16, EnqueueCb>,
    pub ipproto_cbs: [Option<EnqueueCb>; 256],
    pub udpport_cbs: HashMap<u16, EnqueueCb>,

    tcp_patterns: PatternIndex,
    udp_patterns: PatternIndex,
    port_classifiers: HashMap<(u16, PortKind), Vec<PortClassifier>>,

    named_ids: HashMap<&'static str, u8>,
    named_cbs: Vec<Vec<NamedCb>>,
    named_active: u64,

    sub_parsers: HashMap<(&'static str, String), &'static str>,

    // Resolved dissector field ids.
    pub icmp: icmp::IcmpFields,
    pub dns: dns::DnsFields,
    pub smb: smb::SmbFields,
    pub dcerpc: dcerpc::DceRpcFields,
    pub krb5: krb5::Krb5Fields,
    pub isakmp: isakmp::IsakmpFields,
    pub dhcp: dhcp::DhcpFields,

    pub dns_output_answers: bool,
}

impl Registry {
    fn empty() -> Self {
        Registry {
            schema: crate::fields::FieldSchema::new(),
            mprotocols: Vec::new(),
            mp: TransportIds::default(),
            ethertype_cbs: HashMap::new(),
            ipproto_cbs: [None; 256],
            udpport_cbs: HashMap::new(),
            tcp_patterns: PatternIndex::new(),
            udp_patterns: PatternIndex::new(),
            port_classifiers: HashMap::new(),
            named_ids: HashMap::new(),
            named_cbs: Vec::new(),
            named_active: 0,
            sub_parsers: HashMap::new(),
            icmp: Default::default(),
            dns: Default::default(),
            smb: Default::default(),
            dcerpc: Default::default(),
            krb5: Default::default(),
            isakmp: Default::default(),
            dhcp: Default::default(),
            dns_output_answers: false,
        }
    }

    // ── registration (init phase only) ────────────────────────────────────

    pub fn register_mprotocol(&mut self, mp: MProtocol) -> u8 {
        self.mprotocols.push(mp);
        (self.mprotocols.len() - 1) as u8
    }

    pub fn set_ethertype_cb(&mut self, ethertype: u16, cb: EnqueueCb) {
        self.ethertype_cbs.insert(ethertype, cb);
    }

    pub fn set_ip_cb(&mut self, proto: u8, cb: EnqueueCb) {
        self.ipproto_cbs[proto as usize] = Some(cb);
    }

    pub fn set_udpport_cb(&mut self, port: u16, cb: EnqueueCb) {
        self.udpport_cbs.insert(port, cb);
    }

    pub fn register_classifier(
        &mut self,
        transport: Transport,
        name: &'static str,
        offset: u16,
        pattern: &'static [u8],
        arg: u32,
        cb: ClassifyCb,
    ) {
        let c = PatternClassifier {
            name,
            offset,
            pattern,
            arg,
            cb,
        };
        match transport {
            Transport::Tcp => self.tcp_patterns.add(c),
            Transport::Udp => self.udp_patterns.add(c),
        }
    }

    pub fn register_port_classifier(
        &mut self,
        name: &'static str,
        port: u16,
        kind: PortKind,
        arg: u32,
        cb: ClassifyCb,
    ) {
        self.port_classifiers
            .entry((port, kind))
            .or_default()
            .push(PortClassifier { name, arg, cb });
    }

    /// Allocates (or returns) the id behind a named extension point.
    pub fn get_named_func(&mut self, name: &'static str) -> u8 {
        if let Some(id) = self.named_ids.get(name) {
            return *id;
        }
        let id = self.named_cbs.len() as u8;
        debug_assert!(id < 64, "named function table is full");
        self.named_ids.insert(name, id);
        self.named_cbs.push(Vec::new());
        id
    }

    pub fn register_named_cb(&mut self, name: &'static str, cb: NamedCb) {
        let id = self.get_named_func(name);
        self.named_cbs[id as usize].push(cb);
        self.named_active |= 1 << id;
    }

    pub fn register_sub(&mut self, family: &'static str, key: &str, name: &'static str) {
        self.sub_parsers.insert((family, key.to_string()), name);
    }

    // ── steady state ──────────────────────────────────────────────────────

    #[inline]
    pub fn mprotocol(&self, id: u8) -> &MProtocol {
        &self.mprotocols[id as usize]
    }

    pub fn mprotocol_timeout(&self, id: u8) -> u32 {
        self.mprotocols
            .get(id as usize)
            .map(|m| m.timeout)
            .unwrap_or(60)
    }

    pub fn lookup_sub(&self, family: &'static str, key: &str) -> Option<&'static str> {
        self.sub_parsers.get(&(family, key.to_string())).copied()
    }

    /// Invokes every callback behind a named function id; O(1) when nothing
    /// is registered.
    pub fn call_named(&self, id: u8, session: &mut Session, data: &[u8]) {
        if self.named_active & (1 << id) == 0 {
            return;
        }
        for cb in &self.named_cbs[id as usize] {
            cb(session, data, self);
        }
    }

    /// Runs pattern classifiers, then port classifiers, for the first
    /// payload seen in a direction.
    pub fn classify(
        &self,
        session: &mut Session,
        data: &[u8],
        which: usize,
        transport: Transport,
    ) {
        let index = match transport {
            Transport::Tcp => &self.tcp_patterns,
            Transport::Udp => &self.udp_patterns,
        };
        let mut hits = Vec::new();
        index.matching(data, &mut hits);
        for c in hits {
            (c.cb)(session, data, which, c.arg, self);
        }

        let port_kind = match transport {
            Transport::Tcp => PortKind::Tcp,
            Transport::Udp => PortKind::Udp,
        };
        for port in [session.port1, session.port2] {
            if let Some(list) = self.port_classifiers.get(&(port, port_kind)) {
                for c in list {
                    (c.cb)(session, data, which, c.arg, self);
                }
            }
        }
        if transport == Transport::Tcp {
            if let Some(list) = self
                .port_classifiers
                .get(&(session.port2, PortKind::TcpDst))
            {
                for c in list {
                    (c.cb)(session, data, which, c.arg, self);
                }
            }
        }
    }

    /// Feeds payload to every attached parser, honouring unregister
    /// requests. The parser list is detached during the walk so parsers can
    /// mutate the session freely.
    pub fn run_parsers(&self, session: &mut Session, data: &[u8], which: usize) {
        if session.parsers.is_empty() {
            return;
        }
        let mut parsers = std::mem::take(&mut session.parsers);
        for slot in parsers.iter_mut() {
            let Some(parser) = slot.as_mut() else { continue };
            if parser.parse(session, self, data, which) == ParserResult::Unregister {
                *slot = None;
            }
        }
        // Parsers registered during the walk were appended to the (empty)
        // session list; keep them after the originals.
        let added = std::mem::take(&mut session.parsers);
        parsers.extend(added);
        session.parsers = parsers;
    }
}

/// Builds the full registry: transports, tunnels, dissectors, fields.
pub fn init(cfg: &Config) -> Registry {
    let mut reg = Registry::empty();
    let mut schema = crate::fields::FieldSchema::new();
    reg.dns_output_answers = cfg.dns_output_answers;

    transport::init(&mut reg, &mut schema, cfg);
    crate::decap::init(&mut reg, cfg);
    icmp::init(&mut reg, &mut schema, cfg);
    dns::init(&mut reg, &mut schema);
    smb::init(&mut reg, &mut schema);
    dcerpc::init(&mut reg, &mut schema);
    krb5::init(&mut reg, &mut schema);
    isakmp::init(&mut reg, &mut schema);
    dhcp::init(&mut reg, &mut schema, cfg);

    reg.schema = schema;
    reg
}

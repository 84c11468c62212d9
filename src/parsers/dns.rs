// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! DNS, LLMNR, and MDNS dissection.
//!
//! Queries and responses sharing `(hostname, opcode, packet id, qtype,
//! qclass)` merge into one object per session, so a response folds its
//! answers into the query that produced it. Name decompression is capped at
//! five pointer hops to defeat crafted loops, and decoded labels escape
//! non-printable bytes before they reach any field.

use std::net::Ipv6Addr;

use serde_json::{Map, Value, json};

use crate::{
    cfg::enums::PortKind,
    fields::{Container, FieldFlags, FieldKind, FieldObject, FieldSchema},
    parsers::{
        ParserResult, Registry, SessionParser, buffer::ParserBuf,
    },
    session::Session,
};

const MAX_NAME: usize = 8000;
const MAX_POINTER_HOPS: usize = 5;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

const RCODES: [&str; 24] = [
    "NOERROR", "FORMERR", "SERVFAIL", "NXDOMAIN", "NOTIMPL", "REFUSED", "YXDOMAIN",
    "YXRRSET", "NXRRSET", "NOTAUTH", "NOTZONE", "DSOTYPENI", "12", "13", "14", "15",
    "BADSIG_VERS", "BADKEY", "BADTIME", "BADMODE", "BADNAME", "BADALG", "BADTRUNC",
    "BADCOOKIE",
];

const OPCODES: [&str; 16] = [
    "QUERY", "IQUERY", "STATUS", "3", "NOTIFY", "UPDATE", "DSO Message", "7", "8",
    "9", "10", "11", "12", "13", "14", "15",
];

pub const RR_A: u16 = 1;
pub const RR_NS: u16 = 2;
pub const RR_CNAME: u16 = 5;
pub const RR_MX: u16 = 15;
pub const RR_TXT: u16 = 16;
pub const RR_AAAA: u16 = 28;
pub const RR_HTTPS: u16 = 65;
pub const RR_CAA: u16 = 257;

const CLASS_IN: u16 = 1;

pub fn qclass_name(class: u16) -> Option<&'static str> {
    match class {
        1 => Some("IN"),
        2 => Some("CS"),
        3 => Some("CH"),
        4 => Some("HS"),
        255 => Some("ANY"),
        _ => None,
    }
}

pub fn qtype_name(qtype: u16) -> Option<&'static str> {
    Some(match qtype {
        1 => "A",
        2 => "NS",
        3 => "MD",
        4 => "MF",
        5 => "CNAME",
        6 => "SOA",
        7 => "MB",
        8 => "MG",
        9 => "MR",
        10 => "NULL",
        11 => "WKS",
        12 => "PTR",
        13 => "HINFO",
        14 => "MINFO",
        15 => "MX",
        16 => "TXT",
        17 => "RP",
        18 => "AFSDB",
        19 => "X25",
        20 => "ISDN",
        21 => "RT",
        22 => "NSAP",
        23 => "NSAPPTR",
        24 => "SIG",
        25 => "KEY",
        26 => "PX",
        27 => "GPOS",
        28 => "AAAA",
        29 => "LOC",
        30 => "NXT",
        31 => "EID",
        32 => "NIMLOC",
        33 => "SRV",
        34 => "ATMA",
        35 => "NAPTR",
        36 => "KX",
        37 => "CERT",
        38 => "A6",
        39 => "DNAME",
        40 => "SINK",
        41 => "OPT",
        42 => "APL",
        43 => "DS",
        44 => "SSHFP",
        46 => "RRSIG",
        47 => "NSEC",
        48 => "DNSKEY",
        49 => "DHCID",
        50 => "NSEC3",
        51 => "NSEC3PARAM",
        52 => "TLSA",
        55 => "HIP",
        65 => "HTTPS",
        99 => "SPF",
        249 => "TKEY",
        250 => "TSIG",
        252 => "AXFR",
        253 => "MAILB",
        254 => "MAILA",
        255 => "ANY",
        257 => "CAA",
        _ => return None,
    })
}

// ── name decompression ───────────────────────────────────────────────────

fn escape_into(out: &mut String, byte: u8) {
    let mut c = byte;
    if !c.is_ascii() {
        out.push_str("M-");
        c &= 0x7f;
    }
    if !(0x20..0x7f).contains(&c) {
        out.push('^');
        c ^= 0x40;
    }
    out.push(c as char);
}

/// Decodes the (possibly compressed) name at `*pos` within `full`,
/// advancing `*pos` past its in-stream representation. Pointer chains
/// longer than five hops reject the whole name.
pub fn dns_name(full: &[u8], pos: &mut usize) -> Option<String> {
    let mut out = String::new();
    let mut cur = *pos;
    let mut hops = 0usize;
    let mut jumped = false;

    loop {
        let b = *full.get(cur)?;
        if b == 0 {
            if !jumped {
                *pos = cur + 1;
            }
            break;
        }
        if b & 0xc0 != 0 {
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return None;
            }
            let lo = *full.get(cur + 1)?;
            let target = (((b as usize) << 8) | lo as usize) & 0x3fff;
            if !jumped {
                *pos = cur + 2;
                jumped = true;
            }
            cur = target;
            continue;
        }

        let len = b as usize;
        let label = full.get(cur + 1..cur + 1 + len)?;
        if !out.is_empty() {
            out.push('.');
        }
        for &c in label {
            escape_into(&mut out, c);
            if out.len() > MAX_NAME {
                return None;
            }
        }
        cur += 1 + len;
    }

    Some(out)
}

// ── object model ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum DnsRData {
    A([u8; 4]),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ns(String),
    Mx { preference: u16, exchange: String },
    Txt(String),
    Https(SvcbData),
    Caa { flags: u8, tag: String, value: String },
}

#[derive(Debug, Clone, Default)]
pub struct SvcbData {
    pub priority: u16,
    pub dname: String,
    pub alpn: Vec<String>,
    pub port: Option<u16>,
    pub ipv4_hints: Vec<[u8; 4]>,
    pub ipv6_hints: Vec<Ipv6Addr>,
}

#[derive(Debug, Clone)]
pub struct DnsAnswer {
    pub name: String,
    pub type_id: u16,
    pub class_name: &'static str,
    pub type_name: &'static str,
    pub ttl: u32,
    pub packet_uid: u16,
    pub flags: Vec<&'static str>,
    pub rdata: DnsRData,
}

/// One query (and the answers that came back for it) within a session.
pub struct DnsObject {
    pub hostname: String,
    pub opcode_id: u8,
    pub opcode: &'static str,
    pub qtype_id: u16,
    pub qtype: &'static str,
    pub qclass_id: u16,
    pub qclass: &'static str,
    pub packet_uid: u16,

    /// -1 until a response is seen.
    pub rcode_id: i16,

    pub hosts: Vec<String>,
    pub ns_hosts: Vec<String>,
    pub mx_hosts: Vec<String>,
    pub puny_hosts: Vec<String>,
    pub ips: Vec<Ipv6Addr>,
    pub ns_ips: Vec<Ipv6Addr>,
    pub mx_ips: Vec<Ipv6Addr>,

    pub answers: Vec<DnsAnswer>,
    output_answers: bool,
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.iter().any(|v| v == &value) {
        list.push(value);
    }
}

fn push_unique_ip(list: &mut Vec<Ipv6Addr>, value: Ipv6Addr) {
    if !list.contains(&value) {
        list.push(value);
    }
}

impl DnsObject {
    fn new(output_answers: bool) -> Self {
        DnsObject {
            hostname: String::new(),
            opcode_id: 0,
            opcode: OPCODES[0],
            qtype_id: 0,
            qtype: "",
            qclass_id: 0,
            qclass: "",
            packet_uid: 0,
            rcode_id: -1,
            hosts: Vec::new(),
            ns_hosts: Vec::new(),
            mx_hosts: Vec::new(),
            puny_hosts: Vec::new(),
            ips: Vec::new(),
            ns_ips: Vec::new(),
            mx_ips: Vec::new(),
            answers: Vec::new(),
            output_answers,
        }
    }
}

fn ip4_string(b: &[u8; 4]) -> String {
    format!("{}.{}.{}.{}", b[0], b[1], b[2], b[3])
}

fn ip6_string(ip: &Ipv6Addr) -> String {
    crate::fields::store::ip_to_string(ip)
}

impl FieldObject for DnsObject {
    fn dedup_hash(&self) -> u32 {
        let mut h = FNV_OFFSET;
        for &b in self.hostname.as_bytes() {
            h ^= b as u32;
            h = h.wrapping_mul(FNV_PRIME);
        }
        h ^ (((self.opcode_id as u32) << 24) | ((self.packet_uid as u32) << 8))
            ^ (((self.qtype_id as u32) << 16) | self.qclass_id as u32)
    }

    fn dedup_eq(&self, other: &dyn FieldObject) -> bool {
        let Some(other) = other.as_any().downcast_ref::<DnsObject>() else {
            return false;
        };
        self.packet_uid == other.packet_uid
            && self.opcode_id == other.opcode_id
            && self.hostname == other.hostname
            && self.qtype_id == other.qtype_id
            && self.qclass_id == other.qclass_id
    }

    fn json(&self) -> Value {
        let mut doc = Map::new();
        doc.insert("opcode".into(), json!(self.opcode));
        doc.insert("queryHost".into(), json!(self.hostname));
        if !self.qclass.is_empty() {
            doc.insert("qc".into(), json!(self.qclass));
        }
        if !self.qtype.is_empty() {
            doc.insert("qt".into(), json!(self.qtype));
        }
        if !self.hosts.is_empty() {
            doc.insert("hostCnt".into(), json!(self.hosts.len()));
            doc.insert("host".into(), json!(self.hosts));
        }
        if !self.ns_hosts.is_empty() {
            doc.insert("nameserverHostCnt".into(), json!(self.ns_hosts.len()));
            doc.insert("nameserverHost".into(), json!(self.ns_hosts));
        }
        if !self.mx_hosts.is_empty() {
            doc.insert("mailserverHostCnt".into(), json!(self.mx_hosts.len()));
            doc.insert("mailserverHost".into(), json!(self.mx_hosts));
        }
        if !self.puny_hosts.is_empty() {
            doc.insert("punyCnt".into(), json!(self.puny_hosts.len()));
            doc.insert("puny".into(), json!(self.puny_hosts));
        }
        if !self.ips.is_empty() {
            doc.insert("ipCnt".into(), json!(self.ips.len()));
            let ips: Vec<String> = self.ips.iter().map(ip6_string).collect();
            doc.insert("ip".into(), json!(ips));
        }
        if !self.ns_ips.is_empty() {
            doc.insert("nameserverIpCnt".into(), json!(self.ns_ips.len()));
            let ips: Vec<String> = self.ns_ips.iter().map(ip6_string).collect();
            doc.insert("nameserverIp".into(), json!(ips));
        }
        if !self.mx_ips.is_empty() {
            doc.insert("mailserverIpCnt".into(), json!(self.mx_ips.len()));
            let ips: Vec<String> = self.mx_ips.iter().map(ip6_string).collect();
            doc.insert("mailserverIp".into(), json!(ips));
        }
        if self.rcode_id >= 0 {
            if let Some(rcode) = RCODES.get(self.rcode_id as usize) {
                doc.insert("status".into(), json!(rcode));
            }
            // Both shapes are supported downstream: with the option off the
            // document carries only the aggregated host/ip sets above.
            if self.output_answers {
                doc.insert("answersCnt".into(), json!(self.answers.len()));
                let answers: Vec<Value> =
                    self.answers.iter().map(answer_json).collect();
                doc.insert("answers".into(), json!(answers));
            }
        }
        Value::Object(doc)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

fn answer_json(a: &DnsAnswer) -> Value {
    let mut doc = Map::new();
    match &a.rdata {
        DnsRData::A(ip) => {
            doc.insert("ip".into(), json!(ip4_string(ip)));
        },
        DnsRData::Aaaa(ip) => {
            doc.insert("ip".into(), json!(ip6_string(ip)));
        },
        DnsRData::Cname(name) => {
            doc.insert("cname".into(), json!(name));
        },
        DnsRData::Ns(name) => {
            doc.insert("nameserver".into(), json!(name));
        },
        DnsRData::Mx {
            preference,
            exchange,
        } => {
            doc.insert("exchange".into(), json!(format!("({preference}){exchange}")));
        },
        DnsRData::Txt(txt) => {
            doc.insert("txt".into(), json!(txt));
        },
        DnsRData::Https(svcb) => {
            let mut s = format!("HTTPS {} {}", svcb.priority, svcb.dname);
            for alpn in &svcb.alpn {
                s.push_str(&format!(" alpn=\"{alpn}\""));
            }
            if let Some(port) = svcb.port {
                s.push_str(&format!(" port={port}"));
            }
            for hint in &svcb.ipv4_hints {
                s.push_str(&format!(" ipv4hint:\"{}\"", ip4_string(hint)));
            }
            for hint in &svcb.ipv6_hints {
                s.push_str(&format!(" ipv6hint:\"{}\"", ip6_string(hint)));
            }
            doc.insert("https".into(), json!(s));
        },
        DnsRData::Caa { flags, tag, value } => {
            doc.insert("caa".into(), json!(format!("CAA {flags} {tag} {value}")));
        },
    }
    doc.insert("class".into(), json!(a.class_name));
    doc.insert("type".into(), json!(a.type_name));
    doc.insert("ttl".into(), json!(a.ttl));
    if !a.flags.is_empty() {
        doc.insert("flags".into(), json!(a.flags));
    }
    doc.insert("name".into(), json!(a.name));
    Value::Object(doc)
}

// ── field positions ──────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct DnsFields {
    pub object_pos: u16,
}

// ── wire parsing ─────────────────────────────────────────────────────────

fn v4_mapped(b: [u8; 4]) -> Ipv6Addr {
    std::net::Ipv4Addr::from(b).to_ipv6_mapped()
}

fn record_puny(dns: &mut DnsObject, raw: &str) {
    if raw.contains("xn--") {
        push_unique(&mut dns.puny_hosts, raw.to_ascii_lowercase());
    }
}

fn parse_svcb(rdata: &[u8]) -> Option<SvcbData> {
    if rdata.len() < 10 {
        return None;
    }
    let mut svcb = SvcbData {
        priority: crate::utils::be16(rdata, 0),
        ..Default::default()
    };

    let mut pos = 2usize;
    let name = dns_name(rdata, &mut pos)?;
    svcb.dname = if name.is_empty() {
        "<root>".to_string()
    } else {
        name
    };

    while pos + 4 <= rdata.len() {
        let key = crate::utils::be16(rdata, pos);
        let len = crate::utils::be16(rdata, pos + 2) as usize;
        pos += 4;
        let Some(value) = rdata.get(pos..pos + len) else {
            break;
        };
        match key {
            1 => {
                // alpn: length-prefixed ids
                let mut a = 0usize;
                while a < value.len() {
                    let alen = value[a] as usize;
                    match value.get(a + 1..a + 1 + alen) {
                        Some(id) => {
                            svcb.alpn
                                .push(String::from_utf8_lossy(id).into_owned());
                            a += 1 + alen;
                        },
                        None => break,
                    }
                }
            },
            3 if len == 2 => {
                svcb.port = Some(crate::utils::be16(value, 0));
            },
            4 if len == 4 => {
                svcb.ipv4_hints.push([value[0], value[1], value[2], value[3]]);
            },
            6 if len == 16 => {
                svcb.ipv6_hints.push(Ipv6Addr::from(crate::utils::arr16(value, 0)));
            },
            _ => {},
        }
        pos += len;
    }
    Some(svcb)
}

/// Parses one DNS message and folds it into the session's DNS objects.
/// `kind` selects the protocol tag: 0 dns, 1 llmnr, 2 mdns.
pub fn dns_parser(session: &mut Session, kind: u32, data: &[u8], reg: &Registry) {
    if data.len() < 17 {
        return;
    }

    let id = crate::utils::be16(data, 0);
    let qr = (data[2] >> 7) & 0x1;
    let opcode = (data[2] >> 3) & 0xf;
    let aa = (data[2] >> 2) & 0x1;
    let tc = (data[2] >> 1) & 0x1;
    let rd = data[2] & 0x1;
    let ra = (data[3] >> 7) & 0x1;
    let ad = (data[3] >> 5) & 0x1;
    let cd = (data[3] >> 4) & 0x1;
    if opcode > 5 {
        return;
    }

    let qd_count = crate::utils::be16(data, 4);
    let record_counts = [
        crate::utils::be16(data, 6),  // answer / prerequisite
        crate::utils::be16(data, 8),  // authoritative / update
        crate::utils::be16(data, 10), // additional
    ];

    match kind {
        1 => session.add_protocol("llmnr"),
        2 => session.add_protocol("mdns"),
        _ => session.add_protocol("dns"),
    }

    if qd_count != 1 {
        session.add_tag("dns:qdcount-not-1");
        return;
    }

    // Question section.
    let mut pos = 12usize;
    let Some(raw_name) = dns_name(data, &mut pos) else {
        return;
    };

    let mut dns = DnsObject::new(reg.dns_output_answers);
    dns.packet_uid = id;
    dns.opcode_id = opcode;
    dns.opcode = OPCODES[opcode as usize];

    if raw_name.is_empty() {
        dns.hostname = "<root>".to_string();
    } else {
        dns.hostname = raw_name.to_ascii_lowercase();
        push_unique(&mut dns.hosts, dns.hostname.clone());
        record_puny(&mut dns, &raw_name);
    }

    let qtype = crate::utils::be16(data, pos);
    let qclass = crate::utils::be16(data, pos + 2);
    pos += 4;

    if let Some(name) = qclass_name(qclass) {
        dns.qclass = name;
        dns.qclass_id = qclass;
    }
    if let Some(name) = qtype_name(qtype) {
        dns.qtype = name;
        dns.qtype_id = qtype;
    }

    let is_response = qr == 1;
    let rcode_id = (data[3] & 0xf) as i16;

    let Some(entry) =
        session
            .fields
            .add_object(&reg.schema, reg.dns.object_pos, Box::new(dns))
    else {
        return;
    };
    let Some(dns) = entry.as_any_mut().downcast_mut::<DnsObject>() else {
        return;
    };

    if !is_response {
        return;
    }
    dns.rcode_id = rcode_id;

    let mut header_flags: Vec<&'static str> = Vec::new();
    for (set, name) in [
        (aa, "AA"),
        (tc, "TC"),
        (rd, "RD"),
        (ra, "RA"),
        (ad, "AD"),
        (cd, "CD"),
    ] {
        if set == 1 {
            header_flags.push(name);
        }
    }

    // Answer, authority, and additional sections.
    for &record_count in &record_counts {
        for _ in 0..record_count {
            let Some(raw_name) = dns_name(data, &mut pos) else {
                return;
            };
            let name = if raw_name.is_empty() {
                "<root>".to_string()
            } else {
                record_puny(dns, &raw_name);
                raw_name.to_ascii_lowercase()
            };

            if pos + 10 > data.len() {
                return;
            }
            let antype = crate::utils::be16(data, pos);
            let anclass = crate::utils::be16(data, pos + 2);
            let anttl = crate::utils::be32(data, pos + 4);
            let rdlength = crate::utils::be16(data, pos + 8) as usize;
            pos += 10;

            let Some(rdata) = data.get(pos..pos + rdlength) else {
                return;
            };
            let rdata_start = pos;
            pos += rdlength;

            if anclass != CLASS_IN {
                continue;
            }

            let rdata_value = match antype {
                RR_A => {
                    if rdlength != 4 {
                        continue;
                    }
                    let ip = [rdata[0], rdata[1], rdata[2], rdata[3]];
                    let v6 = v4_mapped(ip);
                    if dns.hostname == name || dns.hosts.iter().any(|h| h == &name) {
                        push_unique_ip(&mut dns.ips, v6);
                    }
                    if dns.ns_hosts.iter().any(|h| h == &name) {
                        push_unique_ip(&mut dns.ns_ips, v6);
                    }
                    if dns.mx_hosts.iter().any(|h| h == &name) {
                        push_unique_ip(&mut dns.mx_ips, v6);
                    }
                    DnsRData::A(ip)
                },
                RR_AAAA => {
                    if rdlength != 16 {
                        continue;
                    }
                    let v6 = Ipv6Addr::from(crate::utils::arr16(rdata, 0));
                    if dns.hostname == name || dns.hosts.iter().any(|h| h == &name) {
                        push_unique_ip(&mut dns.ips, v6);
                    }
                    if dns.ns_hosts.iter().any(|h| h == &name) {
                        push_unique_ip(&mut dns.ns_ips, v6);
                    }
                    if dns.mx_hosts.iter().any(|h| h == &name) {
                        push_unique_ip(&mut dns.mx_ips, v6);
                    }
                    DnsRData::Aaaa(v6)
                },
                RR_NS => {
                    let mut rpos = rdata_start;
                    let Some(raw) = dns_name(data, &mut rpos) else {
                        continue;
                    };
                    if raw.is_empty() {
                        continue;
                    }
                    record_puny(dns, &raw);
                    let lower = raw.to_ascii_lowercase();
                    push_unique(&mut dns.ns_hosts, lower.clone());
                    DnsRData::Ns(lower)
                },
                RR_CNAME => {
                    let mut rpos = rdata_start;
                    let Some(raw) = dns_name(data, &mut rpos) else {
                        continue;
                    };
                    if raw.is_empty() {
                        continue;
                    }
                    record_puny(dns, &raw);
                    let lower = raw.to_ascii_lowercase();
                    push_unique(&mut dns.hosts, lower.clone());
                    DnsRData::Cname(lower)
                },
                RR_MX => {
                    let preference = crate::utils::be16(rdata, 0);
                    let mut rpos = rdata_start + 2;
                    let Some(raw) = dns_name(data, &mut rpos) else {
                        continue;
                    };
                    if raw.is_empty() {
                        continue;
                    }
                    record_puny(dns, &raw);
                    let lower = raw.to_ascii_lowercase();
                    push_unique(&mut dns.mx_hosts, lower.clone());
                    DnsRData::Mx {
                        preference,
                        exchange: lower,
                    }
                },
                RR_TXT => {
                    if rdata.is_empty() {
                        continue;
                    }
                    let txt_len = (rdata[0] as usize).min(rdata.len() - 1);
                    DnsRData::Txt(
                        String::from_utf8_lossy(&rdata[1..1 + txt_len]).into_owned(),
                    )
                },
                RR_HTTPS => match parse_svcb(rdata) {
                    Some(svcb) => DnsRData::Https(svcb),
                    None => continue,
                },
                RR_CAA => {
                    if rdlength <= 3 {
                        continue;
                    }
                    let flags = rdata[0];
                    let tag_len = rdata[1] as usize;
                    let Some(tag) = rdata.get(2..2 + tag_len) else {
                        continue;
                    };
                    let value = rdata.get(2 + tag_len..).unwrap_or(&[]);
                    DnsRData::Caa {
                        flags,
                        tag: String::from_utf8_lossy(tag).into_owned(),
                        value: String::from_utf8_lossy(value).into_owned(),
                    }
                },
                _ => continue,
            };

            dns.answers.push(DnsAnswer {
                name,
                type_id: antype,
                class_name: qclass_name(anclass).unwrap_or(""),
                type_name: qtype_name(antype).unwrap_or(""),
                ttl: anttl,
                packet_uid: id,
                flags: header_flags.clone(),
                rdata: rdata_value,
            });
        }
    }
}

// ── session parsers ──────────────────────────────────────────────────────

/// UDP flavour: every datagram is one message.
pub struct DnsUdpParser {
    pub kind: u32,
}

impl SessionParser for DnsUdpParser {
    fn parse(
        &mut self,
        session: &mut Session,
        registry: &Registry,
        data: &[u8],
        _which: usize,
    ) -> ParserResult {
        // The llmnr/mdns flavours skip datagrams on the plain DNS port.
        if self.kind == 0 || (session.port1 != 53 && session.port2 != 53) {
            dns_parser(session, self.kind, data, registry);
        }
        ParserResult::Continue
    }
}

/// TCP flavour: 2-byte length framing, messages may span segments.
pub struct DnsTcpParser {
    buf: ParserBuf,
}

impl DnsTcpParser {
    pub fn new() -> Self {
        DnsTcpParser {
            buf: ParserBuf::new(),
        }
    }
}

impl Default for DnsTcpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionParser for DnsTcpParser {
    fn parse(
        &mut self,
        session: &mut Session,
        registry: &Registry,
        data: &[u8],
        which: usize,
    ) -> ParserResult {
        if self.buf.add(which, data).is_err() {
            return ParserResult::Unregister;
        }
        loop {
            let held = self.buf.data(which);
            if held.len() < 2 {
                return ParserResult::Continue;
            }
            let msg_len = crate::utils::be16(held, 0) as usize;
            if msg_len < 18 {
                return ParserResult::Unregister;
            }
            if held.len() < 2 + msg_len {
                return ParserResult::Continue;
            }
            let message = held[2..2 + msg_len].to_vec();
            dns_parser(session, 0, &message, registry);
            self.buf.del(which, 2 + msg_len);
        }
    }
}

// ── classification ───────────────────────────────────────────────────────

fn dns_udp_classify(
    session: &mut Session,
    _data: &[u8],
    _which: usize,
    arg: u32,
    _reg: &Registry,
) {
    session.register_parser(crate::parsers::ParserState::DnsUdp(DnsUdpParser {
        kind: arg,
    }));
}

fn dns_tcp_classify(
    session: &mut Session,
    _data: &[u8],
    _which: usize,
    _arg: u32,
    _reg: &Registry,
) {
    if session.port2 == 53 && !session.has_protocol("dns") {
        session.add_protocol("dns");
        session.register_parser(crate::parsers::ParserState::DnsTcp(
            DnsTcpParser::new(),
        ));
    }
}

pub fn init(reg: &mut Registry, schema: &mut FieldSchema) {
    reg.dns = DnsFields {
        object_pos: schema.define(
            "dns",
            "dns",
            FieldKind::Object,
            Container::Array,
            FieldFlags::CNT,
        ),
    };

    reg.register_port_classifier("dns", 53, PortKind::TcpDst, 0, dns_tcp_classify);
    reg.register_port_classifier("dns", 53, PortKind::Udp, 0, dns_udp_classify);
    reg.register_port_classifier("llmnr", 5355, PortKind::Udp, 1, dns_udp_classify);
    reg.register_port_classifier("mdns", 5353, PortKind::Udp, 2, dns_udp_classify);
}

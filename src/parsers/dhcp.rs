// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! DHCPv4 and DHCPv6.
//!
//! DHCPv4 sessions are keyed on the 6-byte client MAC so the whole lease
//! conversation lands in one session regardless of transaction ids; DHCPv6
//! keys on the 3-byte transaction id.

use crate::{
    cfg::config::Config,
    fields::{Container, FieldFlags, FieldKind, FieldSchema},
    packet::{Packet, PacketRc},
    parsers::{MProtocol, Registry, SessionKind, cursor::Cursor},
    session::{Session, SessionId},
    utils::be16,
};

const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

const NAMES_V4: [&str; 19] = [
    "",
    "DISCOVER",
    "OFFER",
    "REQUEST",
    "DECLINE",
    "ACK",
    "NAK",
    "RELEASE",
    "INFORM",
    "FORCERENEW",
    "LEASEQUERY",
    "LEASEUNASSIGNED",
    "LEASEUNKNOWN",
    "LEASEACTIVE",
    "BULKLEASEQUERY",
    "LEASEQUERYDONE",
    "ACTIVELEASEQUERY",
    "LEASEQUERYSTATUS",
    "TLS",
];

const NAMES_V6: [&str; 22] = [
    "",
    "SOLICIT",
    "ADVERTISE",
    "REQUEST",
    "CONFIRM",
    "RENEW",
    "REBIND",
    "REPLY",
    "RELEASE",
    "DECLINE",
    "RECONFIGURE",
    "INFORMATION_REQUEST",
    "RELAY_FORW",
    "RELAY_REPL",
    "LEASEQUERY",
    "LEASEQUERY_REPLY",
    "LEASEQUERY_DONE",
    "LEASEQUERY_DATA",
    "LEASEQUERY_NO_DATA",
    "LEASEQUERY_STATUS",
    "LEASEQUERY_RECONF",
    "LEASEQUERY_RECONF_REPLY",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct DhcpFields {
    pub kind: u16,
    pub host: u16,
    pub mac: u16,
    pub oui: u16,
    pub id: u16,
    pub class_id: u16,
    pub request_ip: u16,
    pub named_func: u8,
}

// ── DHCPv4 ───────────────────────────────────────────────────────────────

fn dhcp_session_id(packet: &Packet, mprotocol: u8) -> SessionId {
    let off = packet.payload_offset as usize;
    let mac = packet.buf.get(off + 28..off + 34).unwrap_or(&[]);
    SessionId::opaque(8, mprotocol, mac)
}

fn dhcp_create_session_id(packet: &Packet) -> SessionId {
    dhcp_session_id(packet, packet.mprotocol)
}

fn dhcp_enqueue(
    packet: &mut Packet,
    off: usize,
    len: usize,
    reg: &Registry,
) -> PacketRc {
    let data = match packet.buf.get(off..off + len) {
        Some(d) => d,
        None => return PacketRc::Corrupt,
    };

    // op request/reply, Ethernet hardware, 6-byte addresses, magic cookie.
    if len < 256
        || (data[0] != 1 && data[0] != 2)
        || data[236..240] != MAGIC_COOKIE
        || data[1] != 1
        || data[2] != 6
    {
        return PacketRc::Unknown;
    }

    packet.payload_offset = off as u16;
    packet.payload_len = len as u16;
    packet.mprotocol = reg.mp.dhcp;
    packet.hash = dhcp_session_id(packet, reg.mp.dhcp).hash();
    PacketRc::DoProcess
}

fn udp_ports_before_payload(packet: &Packet) -> (u16, u16) {
    // The payload offset points past the UDP header for DHCP packets.
    let off = (packet.payload_offset as usize).saturating_sub(8);
    (be16(&packet.buf, off), be16(&packet.buf, off + 2))
}

fn dhcp_pre_process(
    session: &mut Session,
    packet: &mut Packet,
    is_new: bool,
    _reg: &Registry,
) {
    let (sport, dport) = udp_ports_before_payload(packet);
    if is_new {
        let (src, dst) = super::transport::packet_src_dst(packet);
        session.addr1 = src;
        session.addr2 = dst;
        session.port1 = sport;
        session.port2 = dport;
        session.add_protocol("udp");
        session.add_protocol("dhcp");
    }
    packet.direction =
        u8::from(!(session.port1 == sport && session.port2 == dport));
    session.databytes[packet.direction as usize] += packet.payload_len as u64;
}

fn dhcp_process(session: &mut Session, packet: &Packet, reg: &Registry) -> bool {
    let data = packet.payload().to_vec();
    if data.len() < 256 {
        return false;
    }

    if data[1] == 1 {
        session
            .fields
            .add_mac_oui(&reg.schema, reg.dhcp.mac, reg.dhcp.oui, &data[28..34]);
    }

    let xid = crate::utils::be32(&data, 4);
    session
        .fields
        .add_string(&reg.schema, reg.dhcp.id, &format!("{xid:x}"));

    let mut c = Cursor::new(&data);
    c.skip(240); // fixed header + magic
    while c.remaining() >= 2 {
        let t = c.u8();
        if t == 255 {
            break;
        }
        let l = c.u8() as usize;
        if c.is_error() || l == 0 || l > c.remaining() {
            break;
        }
        match t {
            12 => {
                let v = c.take(l);
                let host = String::from_utf8_lossy(v).into_owned();
                session
                    .fields
                    .add_string_lower(&reg.schema, reg.dhcp.host, &host);
            },
            53 => {
                if l == 1 {
                    let v = c.u8() as usize;
                    if v > 0 && v < NAMES_V4.len() {
                        session
                            .fields
                            .add_string(&reg.schema, reg.dhcp.kind, NAMES_V4[v]);
                    }
                } else {
                    c.skip(l);
                }
            },
            60 => {
                let v = c.take(l);
                session.fields.add_string(
                    &reg.schema,
                    reg.dhcp.class_id,
                    &String::from_utf8_lossy(v),
                );
            },
            50 => {
                if l == 4 {
                    let v = c.take(4);
                    let ip = u32::from_be_bytes([v[0], v[1], v[2], v[3]]);
                    session.fields.add_ip4(&reg.schema, reg.dhcp.request_ip, ip);
                } else {
                    c.skip(l);
                }
            },
            61 => {
                let hw = c.u8();
                if l == 7 && hw == 1 {
                    let mac = c.take(6);
                    session
                        .fields
                        .add_mac_oui(&reg.schema, reg.dhcp.mac, reg.dhcp.oui, mac);
                } else {
                    c.skip(l.saturating_sub(1));
                }
            },
            81 => {
                if l < 3 {
                    c.skip(l);
                } else {
                    let encoding = c.u8();
                    c.skip(2);
                    if encoding != 0 {
                        c.skip(l - 1);
                    } else {
                        let v = c.take(l - 3);
                        let host = String::from_utf8_lossy(v).into_owned();
                        session
                            .fields
                            .add_string_lower(&reg.schema, reg.dhcp.host, &host);
                    }
                }
            },
            _ => c.skip(l),
        }
    }

    reg.call_named(reg.dhcp.named_func, session, &data);
    true
}

// ── DHCPv6 ───────────────────────────────────────────────────────────────

fn dhcpv6_session_id(packet: &Packet, mprotocol: u8) -> SessionId {
    let off = packet.payload_offset as usize;
    let xid = packet.buf.get(off + 1..off + 4).unwrap_or(&[]);
    SessionId::opaque(3, mprotocol, xid)
}

fn dhcpv6_create_session_id(packet: &Packet) -> SessionId {
    dhcpv6_session_id(packet, packet.mprotocol)
}

fn dhcpv6_enqueue(
    packet: &mut Packet,
    off: usize,
    len: usize,
    reg: &Registry,
) -> PacketRc {
    let msg_type = packet.buf.get(off).copied().unwrap_or(0) as usize;
    if len < 4 || msg_type == 0 || msg_type >= NAMES_V6.len() {
        return PacketRc::Unknown;
    }

    packet.payload_offset = off as u16;
    packet.payload_len = len as u16;
    packet.mprotocol = reg.mp.dhcpv6;
    packet.hash = dhcpv6_session_id(packet, reg.mp.dhcpv6).hash();
    PacketRc::DoProcess
}

fn dhcpv6_pre_process(
    session: &mut Session,
    packet: &mut Packet,
    is_new: bool,
    _reg: &Registry,
) {
    let (sport, dport) = udp_ports_before_payload(packet);
    if is_new {
        let (src, dst) = super::transport::packet_src_dst(packet);
        session.addr1 = src;
        session.addr2 = dst;
        session.port1 = sport;
        session.port2 = dport;
        session.add_protocol("udp");
        session.add_protocol("dhcpv6");
    }
    packet.direction =
        u8::from(!(session.port1 == sport && session.port2 == dport));
    session.databytes[packet.direction as usize] += packet.payload_len as u64;
}

fn dhcpv6_process(session: &mut Session, packet: &Packet, reg: &Registry) -> bool {
    let data = packet.payload().to_vec();
    let msg_type = data.first().copied().unwrap_or(0) as usize;
    if data.len() < 4 || msg_type == 0 || msg_type >= NAMES_V6.len() {
        return false;
    }

    session
        .fields
        .add_string(&reg.schema, reg.dhcp.kind, NAMES_V6[msg_type]);

    let xid = ((data[1] as u32) << 16) | ((data[2] as u32) << 8) | data[3] as u32;
    session
        .fields
        .add_string(&reg.schema, reg.dhcp.id, &format!("{xid:x}"));

    let mut c = Cursor::new(&data[4..]);
    while c.remaining() >= 4 {
        let code = c.be16();
        let len = c.be16() as usize;
        if c.is_error() || len > c.remaining() {
            break;
        }
        match code {
            16 => {
                // Vendor class
                let v = c.take(len);
                if !v.is_empty() {
                    session.fields.add_string(
                        &reg.schema,
                        reg.dhcp.class_id,
                        &String::from_utf8_lossy(v),
                    );
                }
            },
            _ => c.skip(len),
        }
    }

    reg.call_named(reg.dhcp.named_func, session, &data);
    true
}

pub fn init(reg: &mut Registry, schema: &mut FieldSchema, cfg: &Config) {
    reg.dhcp = DhcpFields {
        kind: schema.define(
            "dhcp",
            "dhcp.type",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        host: schema.define(
            "dhcp",
            "dhcp.host",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        mac: schema.define(
            "dhcp",
            "dhcp.mac",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        oui: schema.define(
            "dhcp",
            "dhcp.oui",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        id: schema.define(
            "dhcp",
            "dhcp.id",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        class_id: schema.define(
            "dhcp",
            "dhcp.classId",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        request_ip: schema.define(
            "dhcp",
            "dhcp.requestIp",
            FieldKind::Ip,
            Container::Set,
            FieldFlags::CNT,
        ),
        named_func: reg.get_named_func("dhcp_packet"),
    };

    reg.set_udpport_cb(67, dhcp_enqueue);
    reg.set_udpport_cb(68, dhcp_enqueue);
    reg.set_udpport_cb(546, dhcpv6_enqueue);
    reg.set_udpport_cb(547, dhcpv6_enqueue);

    reg.mp.dhcp = reg.register_mprotocol(MProtocol {
        name: "dhcp",
        kind: SessionKind::Other,
        create_session_id: dhcp_create_session_id,
        pre_process: Some(dhcp_pre_process),
        process: Some(dhcp_process),
        timeout: cfg.dhcp_timeout,
    });

    reg.mp.dhcpv6 = reg.register_mprotocol(MProtocol {
        name: "dhcpv6",
        kind: SessionKind::Other,
        create_session_id: dhcpv6_create_session_id,
        pre_process: Some(dhcpv6_pre_process),
        process: Some(dhcpv6_process),
        timeout: cfg.dhcp_timeout,
    });
}

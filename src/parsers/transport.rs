// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TCP, UDP, and ESP transports: enqueue callbacks that key the flow, and
//! the per-packet pre/process hooks that drive classification.

use std::net::Ipv6Addr;

use crate::{
    cfg::config::Config,
    fields::FieldSchema,
    packet::{Packet, PacketRc},
    parsers::{MProtocol, Registry, SessionKind, Transport},
    session::{Session, SessionId, mapped_v4},
    utils::{arr4, arr16, be16},
};

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ESP: u8 = 50;

// ── address helpers ──────────────────────────────────────────────────────

#[inline]
pub fn packet_src_dst(packet: &Packet) -> (Ipv6Addr, Ipv6Addr) {
    let off = packet.ip_offset as usize;
    if packet.v6 {
        (
            Ipv6Addr::from(arr16(&packet.buf, off + 8)),
            Ipv6Addr::from(arr16(&packet.buf, off + 24)),
        )
    } else {
        (
            mapped_v4(arr4(&packet.buf, off + 12)),
            mapped_v4(arr4(&packet.buf, off + 16)),
        )
    }
}

/// Canonical tuple id for the packet with explicit ports.
pub fn tuple_session_id(packet: &Packet, sport: u16, dport: u16) -> SessionId {
    let off = packet.ip_offset as usize;
    if packet.v6 {
        SessionId::v6(
            arr16(&packet.buf, off + 8),
            sport,
            arr16(&packet.buf, off + 24),
            dport,
            packet.vlan,
            packet.vni,
        )
    } else {
        SessionId::v4(
            arr4(&packet.buf, off + 12),
            sport,
            arr4(&packet.buf, off + 16),
            dport,
            packet.vlan,
            packet.vni,
        )
    }
}

#[inline]
fn transport_ports(packet: &Packet) -> (u16, u16) {
    let off = packet.payload_offset as usize;
    (be16(&packet.buf, off), be16(&packet.buf, off + 2))
}

/// Direction for the packet given the session's canonical endpoints: 0 when
/// src/dst match addr1/addr2 in insert order.
fn direction_of(session: &Session, packet: &Packet, sport: u16, dport: u16) -> u8 {
    let (src, dst) = packet_src_dst(packet);
    let same = src == session.addr1
        && dst == session.addr2
        && sport == session.port1
        && dport == session.port2;
    u8::from(!same)
}

// ── UDP ──────────────────────────────────────────────────────────────────

fn udp_enqueue(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 8 {
        return PacketRc::Corrupt;
    }
    let dport = be16(&packet.buf, off + 2);
    let sport = be16(&packet.buf, off);

    // Tunnel and protocol callbacks bound to well-known UDP ports peel
    // first; Unknown falls back to plain UDP tracking.
    for port in [dport, sport] {
        if let Some(cb) = reg.udpport_cbs.get(&port).copied() {
            packet.payload_offset = off as u16;
            packet.payload_len = len as u16;
            let rc = cb(packet, off + 8, len - 8, reg);
            if rc != PacketRc::Unknown {
                return rc;
            }
        }
    }

    packet.payload_offset = off as u16;
    packet.payload_len = len as u16;
    let id = tuple_session_id(packet, sport, dport);
    packet.hash = id.hash();
    packet.mprotocol = reg.mp.udp;
    PacketRc::DoProcess
}

fn udp_create_session_id(packet: &Packet) -> SessionId {
    let (sport, dport) = transport_ports(packet);
    tuple_session_id(packet, sport, dport)
}

fn udp_pre_process(
    session: &mut Session,
    packet: &mut Packet,
    is_new: bool,
    _reg: &Registry,
) {
    let (sport, dport) = transport_ports(packet);
    if is_new {
        let (src, dst) = packet_src_dst(packet);
        session.addr1 = src;
        session.addr2 = dst;
        session.port1 = sport;
        session.port2 = dport;
        session.add_protocol("udp");
    }
    packet.direction = direction_of(session, packet, sport, dport);
    session.databytes[packet.direction as usize] +=
        (packet.payload_len as u64).saturating_sub(8);
}

fn udp_process(session: &mut Session, packet: &Packet, reg: &Registry) -> bool {
    let payload = packet.payload();
    if payload.len() <= 8 {
        return true;
    }
    let data = payload[8..].to_vec();
    let which = packet.direction as usize;

    if session.record_first_bytes(which, &data) {
        reg.classify(session, &data, which, Transport::Udp);
    }
    reg.run_parsers(session, &data, which);
    true
}

// ── TCP ──────────────────────────────────────────────────────────────────

fn tcp_enqueue(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 20 {
        return PacketRc::Corrupt;
    }
    packet.payload_offset = off as u16;
    packet.payload_len = len as u16;
    let sport = be16(&packet.buf, off);
    let dport = be16(&packet.buf, off + 2);
    let id = tuple_session_id(packet, sport, dport);
    packet.hash = id.hash();
    packet.mprotocol = reg.mp.tcp;
    PacketRc::DoProcess
}

fn tcp_create_session_id(packet: &Packet) -> SessionId {
    udp_create_session_id(packet)
}

#[inline]
fn tcp_header_len(payload: &[u8]) -> usize {
    match payload.get(12) {
        Some(b) => ((b >> 4) as usize) * 4,
        None => 20,
    }
}

fn tcp_pre_process(
    session: &mut Session,
    packet: &mut Packet,
    is_new: bool,
    _reg: &Registry,
) {
    let (sport, dport) = transport_ports(packet);
    if is_new {
        let (src, dst) = packet_src_dst(packet);
        session.addr1 = src;
        session.addr2 = dst;
        session.port1 = sport;
        session.port2 = dport;
        session.add_protocol("tcp");
    }
    packet.direction = direction_of(session, packet, sport, dport);
    let hlen = tcp_header_len(packet.payload()).max(20);
    session.databytes[packet.direction as usize] +=
        (packet.payload_len as u64).saturating_sub(hlen as u64);
}

fn tcp_process(session: &mut Session, packet: &Packet, reg: &Registry) -> bool {
    let payload = packet.payload();
    let hlen = tcp_header_len(payload).max(20);
    if payload.len() <= hlen {
        return true;
    }
    let data = payload[hlen..].to_vec();
    let which = packet.direction as usize;

    if session.record_first_bytes(which, &data) {
        reg.classify(session, &data, which, Transport::Tcp);
    }
    reg.run_parsers(session, &data, which);
    true
}

// ── ESP ──────────────────────────────────────────────────────────────────

fn esp_enqueue(
    packet: &mut Packet,
    off: usize,
    len: usize,
    reg: &Registry,
) -> PacketRc {
    packet.payload_offset = off as u16;
    packet.payload_len = len as u16;
    let id = tuple_session_id(packet, 0, 0);
    packet.hash = id.hash();
    packet.mprotocol = reg.mp.esp;
    PacketRc::DoProcess
}

fn esp_create_session_id(packet: &Packet) -> SessionId {
    tuple_session_id(packet, 0, 0)
}

fn esp_pre_process(
    session: &mut Session,
    packet: &mut Packet,
    is_new: bool,
    _reg: &Registry,
) {
    if is_new {
        let (src, dst) = packet_src_dst(packet);
        session.addr1 = src;
        session.addr2 = dst;
        session.add_protocol("esp");
    }
    let (src, dst) = packet_src_dst(packet);
    packet.direction = u8::from(!(src == session.addr1 && dst == session.addr2));
    session.databytes[packet.direction as usize] += packet.payload_len as u64;
    // Raw ESP payloads are opaque; keep the session indexable but skip the
    // writer. Packets already in flight for this flow may still land.
    session.stop_saving = true;
}

// ── registration ─────────────────────────────────────────────────────────

pub fn init(reg: &mut Registry, _schema: &mut FieldSchema, cfg: &Config) {
    reg.set_ip_cb(IPPROTO_TCP, tcp_enqueue);
    reg.set_ip_cb(IPPROTO_UDP, udp_enqueue);

    reg.mp.tcp = reg.register_mprotocol(MProtocol {
        name: "tcp",
        kind: SessionKind::Tcp,
        create_session_id: tcp_create_session_id,
        pre_process: Some(tcp_pre_process),
        process: Some(tcp_process),
        timeout: cfg.tcp_timeout,
    });

    reg.mp.udp = reg.register_mprotocol(MProtocol {
        name: "udp",
        kind: SessionKind::Udp,
        create_session_id: udp_create_session_id,
        pre_process: Some(udp_pre_process),
        process: Some(udp_process),
        timeout: cfg.udp_timeout,
    });

    if cfg.track_esp {
        reg.set_ip_cb(IPPROTO_ESP, esp_enqueue);
        reg.mp.esp = reg.register_mprotocol(MProtocol {
            name: "esp",
            kind: SessionKind::Esp,
            create_session_id: esp_create_session_id,
            pre_process: Some(esp_pre_process),
            process: None,
            timeout: cfg.esp_timeout,
        });
    }
}

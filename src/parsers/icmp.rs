// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! ICMP and ICMPv6: sessions are keyed on addresses only; the first
//! payload's type and code bytes are recorded as integer fields.

use crate::{
    cfg::config::Config,
    fields::{Container, FieldFlags, FieldKind, FieldSchema},
    packet::{Packet, PacketRc},
    parsers::{MProtocol, Registry, SessionKind},
    session::{Session, SessionId},
};

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_ICMPV6: u8 = 58;

#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpFields {
    pub type_pos: u16,
    pub code_pos: u16,
}

fn icmp_session_id(packet: &Packet) -> SessionId {
    crate::parsers::transport::tuple_session_id(packet, 0, 0)
}

fn icmp_enqueue(
    packet: &mut Packet,
    off: usize,
    len: usize,
    reg: &Registry,
) -> PacketRc {
    packet.payload_offset = off as u16;
    packet.payload_len = len as u16;
    let id = icmp_session_id(packet);
    packet.hash = id.hash();
    packet.mprotocol = reg.mp.icmp;
    PacketRc::DoProcess
}

fn icmpv6_enqueue(
    packet: &mut Packet,
    off: usize,
    len: usize,
    reg: &Registry,
) -> PacketRc {
    if !packet.v6 {
        return PacketRc::Corrupt;
    }
    packet.payload_offset = off as u16;
    packet.payload_len = len as u16;
    let id = icmp_session_id(packet);
    packet.hash = id.hash();
    packet.mprotocol = reg.mp.icmpv6;
    PacketRc::DoProcess
}

fn icmp_pre_process(
    session: &mut Session,
    packet: &mut Packet,
    is_new: bool,
    _reg: &Registry,
) {
    if is_new {
        let (src, dst) = super::transport::packet_src_dst(packet);
        session.addr1 = src;
        session.addr2 = dst;
        session.add_protocol("icmp");
    }
    let (src, dst) = super::transport::packet_src_dst(packet);
    packet.direction = u8::from(!(src == session.addr1 && dst == session.addr2));
    session.databytes[packet.direction as usize] += packet.payload_len as u64;
}

fn icmp_process(session: &mut Session, packet: &Packet, reg: &Registry) -> bool {
    let payload = packet.payload();
    if payload.len() >= 2 {
        if session.icmp_info == [0, 0] {
            session.icmp_info = [payload[0], payload[1]];
        }
        session
            .fields
            .add_int(&reg.schema, reg.icmp.type_pos, payload[0] as i64);
        session
            .fields
            .add_int(&reg.schema, reg.icmp.code_pos, payload[1] as i64);
    }
    true
}

pub fn init(reg: &mut Registry, schema: &mut FieldSchema, cfg: &Config) {
    reg.icmp = IcmpFields {
        type_pos: schema.define(
            "general",
            "icmp.type",
            FieldKind::Int,
            Container::Set,
            FieldFlags::empty(),
        ),
        code_pos: schema.define(
            "general",
            "icmp.code",
            FieldKind::Int,
            Container::Set,
            FieldFlags::empty(),
        ),
    };

    reg.set_ip_cb(IPPROTO_ICMP, icmp_enqueue);
    reg.set_ip_cb(IPPROTO_ICMPV6, icmpv6_enqueue);

    reg.mp.icmp = reg.register_mprotocol(MProtocol {
        name: "icmp",
        kind: SessionKind::Icmp,
        create_session_id: icmp_session_id,
        pre_process: Some(icmp_pre_process),
        process: Some(icmp_process),
        timeout: cfg.icmp_timeout,
    });

    reg.mp.icmpv6 = reg.register_mprotocol(MProtocol {
        name: "icmpv6",
        kind: SessionKind::Icmp,
        create_session_id: icmp_session_id,
        pre_process: Some(icmp_pre_process),
        process: Some(icmp_process),
        timeout: cfg.icmp_timeout,
    });
}

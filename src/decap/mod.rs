//! Link-layer dispatch and tunnel peeling.
//!
//! Frames enter through [`process_frame`] on the reader, walk the
//! EtherType / IP-protocol / UDP-port callback tables, and leave with a
//! flow hash and mProtocol assigned (or a drop disposition). Every peel
//! validates its header against the remaining length and records the
//! traversed encapsulation in the packet's tunnel mask.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::{
    cfg::config::Config,
    packet::{Packet, PacketRc, Tunnel},
    parsers::Registry,
    utils::{be16, be32},
};

pub const ETHERTYPE_IP4: u16 = 0x0800;
pub const ETHERTYPE_IP6: u16 = 0x86dd;
pub const ETHERTYPE_VLAN: u16 = 0x8100;
pub const ETHERTYPE_QINQ: u16 = 0x88a8;
pub const ETHERTYPE_MPLS: u16 = 0x8847;
pub const ETHERTYPE_NSH: u16 = 0x894f;
pub const ETHERTYPE_TEB: u16 = 0x6558;

/// Pseudo EtherType: the payload starts with a complete Ethernet header.
pub const ETHERTYPE_ETHER_FRAME: u16 = 0xffff;

// Link types from the pcap header.
pub const DLT_NULL: u16 = 0;
pub const DLT_EN10MB: u16 = 1;
pub const DLT_RAW: u16 = 101;

const IPPROTO_IPV4: u8 = 4;
const IPPROTO_IPV6: u8 = 41;
const IPPROTO_GRE: u8 = 47;
const IPPROTO_AH: u8 = 51;

/// Entry point for a raw captured frame.
pub fn process_frame(packet: &mut Packet, reg: &Registry) -> PacketRc {
    let len = packet.buf.len();
    match packet.link_type {
        DLT_EN10MB => run_ethertype(packet, 0, len, ETHERTYPE_ETHER_FRAME, reg),
        DLT_RAW => match packet.buf.first().map(|b| b >> 4) {
            Some(4) => run_ethertype(packet, 0, len, ETHERTYPE_IP4, reg),
            Some(6) => run_ethertype(packet, 0, len, ETHERTYPE_IP6, reg),
            _ => PacketRc::Corrupt,
        },
        DLT_NULL => {
            if len < 4 {
                return PacketRc::Corrupt;
            }
            match packet.buf[0] {
                2 => run_ethertype(packet, 4, len - 4, ETHERTYPE_IP4, reg),
                24 | 28 | 30 => run_ethertype(packet, 4, len - 4, ETHERTYPE_IP6, reg),
                _ => PacketRc::Unknown,
            }
        },
        _ => PacketRc::Unknown,
    }
}

/// EtherType dispatcher; tunnels re-enter here after peeling.
pub fn run_ethertype(
    packet: &mut Packet,
    off: usize,
    len: usize,
    ethertype: u16,
    reg: &Registry,
) -> PacketRc {
    match ethertype {
        ETHERTYPE_ETHER_FRAME => ethernet(packet, off, len, reg),
        ETHERTYPE_IP4 => ip4(packet, off, len, reg),
        ETHERTYPE_IP6 => ip6(packet, off, len, reg),
        ETHERTYPE_MPLS => mpls(packet, off, len, reg),
        other => match reg.ethertype_cbs.get(&other).copied() {
            Some(cb) => cb(packet, off, len, reg),
            None => PacketRc::Unknown,
        },
    }
}

/// IP-protocol dispatcher; every transport and IP-level tunnel registers
/// here.
pub fn run_ip_proto(
    packet: &mut Packet,
    off: usize,
    len: usize,
    proto: u8,
    reg: &Registry,
) -> PacketRc {
    match reg.ipproto_cbs[proto as usize] {
        Some(cb) => cb(packet, off, len, reg),
        None => PacketRc::Unknown,
    }
}

fn ethernet(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 14 {
        return PacketRc::Corrupt;
    }
    let mut pos = off + 12;
    let mut remaining = len - 12;
    let mut ethertype = be16(&packet.buf, pos);
    pos += 2;
    remaining -= 2;

    // Peel 802.1Q / 802.1ad tags; the outermost id wins.
    while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        if remaining < 4 {
            return PacketRc::Corrupt;
        }
        let tci = be16(&packet.buf, pos);
        if packet.vlan == 0 {
            packet.vlan = tci & 0xfff;
        }
        ethertype = be16(&packet.buf, pos + 2);
        pos += 4;
        remaining -= 4;
    }

    run_ethertype(packet, pos, remaining, ethertype, reg)
}

fn ip4(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 20 {
        return PacketRc::Corrupt;
    }
    let b0 = packet.buf[off];
    if b0 >> 4 != 4 {
        return PacketRc::Corrupt;
    }
    let ihl = ((b0 & 0xf) as usize) * 4;
    if ihl < 20 || ihl > len {
        return PacketRc::Corrupt;
    }
    let total_len = be16(&packet.buf, off + 2) as usize;
    if total_len < ihl {
        return PacketRc::Corrupt;
    }
    let avail = len.min(total_len);

    // Fragments are not reassembled; only first fragments carry a parseable
    // transport header, the rest are dropped as unknown.
    let frag = be16(&packet.buf, off + 6);
    if frag & 0x1fff != 0 {
        return PacketRc::Unknown;
    }

    let proto = packet.buf[off + 9];
    packet.ip_offset = off as u16;
    packet.v6 = false;
    run_ip_proto(packet, off + ihl, avail - ihl, proto, reg)
}

fn ip6(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 40 {
        return PacketRc::Corrupt;
    }
    if packet.buf[off] >> 4 != 6 {
        return PacketRc::Corrupt;
    }
    let payload_len = be16(&packet.buf, off + 4) as usize;
    let avail = len.min(40 + payload_len);

    packet.ip_offset = off as u16;
    packet.v6 = true;

    let mut next = packet.buf[off + 6];
    let mut pos = off + 40;
    let mut remaining = avail - 40;

    // Walk the extension chain far enough to reach the transport.
    loop {
        match next {
            0 | 43 | 60 => {
                if remaining < 8 {
                    return PacketRc::Corrupt;
                }
                let hlen = (packet.buf[pos + 1] as usize + 1) * 8;
                if hlen > remaining {
                    return PacketRc::Corrupt;
                }
                next = packet.buf[pos];
                pos += hlen;
                remaining -= hlen;
            },
            44 => {
                // Fragment header: only unfragmented-offset-zero continues.
                if remaining < 8 {
                    return PacketRc::Corrupt;
                }
                if be16(&packet.buf, pos + 2) & 0xfff8 != 0 {
                    return PacketRc::Unknown;
                }
                next = packet.buf[pos];
                pos += 8;
                remaining -= 8;
            },
            _ => break,
        }
    }

    run_ip_proto(packet, pos, remaining, next, reg)
}

fn mpls(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    let mut pos = off;
    let mut remaining = len;
    packet.tunnel |= Tunnel::MPLS;

    loop {
        if remaining < 4 {
            return PacketRc::Corrupt;
        }
        let entry = be32(&packet.buf, pos);
        pos += 4;
        remaining -= 4;
        if entry & 0x100 != 0 {
            break; // bottom of stack
        }
    }

    match packet.buf.get(pos).map(|b| b >> 4) {
        Some(4) => run_ethertype(packet, pos, remaining, ETHERTYPE_IP4, reg),
        Some(6) => run_ethertype(packet, pos, remaining, ETHERTYPE_IP6, reg),
        _ => PacketRc::Corrupt,
    }
}

// ── tunnels ──────────────────────────────────────────────────────────────

/// Authentication Header: length field is `(data[1] + 2) * 4`, next
/// protocol in byte 0.
fn ah(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 2 {
        return PacketRc::Corrupt;
    }
    let hlen = (packet.buf[off + 1] as usize + 2) * 4;
    if hlen > len {
        return PacketRc::Corrupt;
    }
    let next = packet.buf[off];
    run_ip_proto(packet, off + hlen, len - hlen, next, reg)
}

fn ipip4(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    run_ethertype(packet, off, len, ETHERTYPE_IP4, reg)
}

fn ipip6(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    run_ethertype(packet, off, len, ETHERTYPE_IP6, reg)
}

fn gre(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 4 {
        return PacketRc::Corrupt;
    }
    let flags = be16(&packet.buf, off);
    let proto = be16(&packet.buf, off + 2);

    if flags & 0x4000 != 0 {
        // Source-routed GRE is ancient and unparsed.
        return PacketRc::Unknown;
    }

    let mut hlen = 4usize;
    if flags & 0x8000 != 0 {
        hlen += 4; // checksum + reserved
    }
    if flags & 0x2000 != 0 {
        hlen += 4; // key
    }
    if flags & 0x1000 != 0 {
        hlen += 4; // sequence
    }
    if hlen > len {
        return PacketRc::Corrupt;
    }

    packet.tunnel |= Tunnel::GRE;
    let inner = if proto == ETHERTYPE_TEB {
        ETHERTYPE_ETHER_FRAME
    } else {
        proto
    };
    run_ethertype(packet, off + hlen, len - hlen, inner, reg)
}

/// VXLAN (RFC 7348): reserved bits must be clear; the I flag gates the VNI.
fn vxlan(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len <= 8 {
        return PacketRc::Unknown;
    }
    let data = &packet.buf[off..];
    if data[0] & 0x77 != 0 || data[1] & 0xb7 != 0 {
        return PacketRc::Unknown;
    }
    if data[0] & 0x08 == 0x08 {
        packet.vni =
            ((data[4] as u32) << 16) | ((data[5] as u32) << 8) | data[6] as u32;
    }

    packet.tunnel |= Tunnel::VXLAN;
    run_ethertype(packet, off + 8, len - 8, ETHERTYPE_ETHER_FRAME, reg)
}

/// VXLAN-GPE: the next-protocol byte selects the inner dispatcher.
fn vxlan_gpe(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len <= 8 {
        return PacketRc::Unknown;
    }
    let data = &packet.buf[off..];
    if data[0] & 0xf0 != 0 || data[1] != 0 {
        return PacketRc::Unknown;
    }
    let next_proto = data[3];

    packet.tunnel |= Tunnel::VXLAN_GPE;
    match next_proto {
        1 => run_ethertype(packet, off + 8, len - 8, ETHERTYPE_IP4, reg),
        2 => run_ethertype(packet, off + 8, len - 8, ETHERTYPE_IP6, reg),
        3 => run_ethertype(packet, off + 8, len - 8, ETHERTYPE_ETHER_FRAME, reg),
        4 => run_ethertype(packet, off + 8, len - 8, ETHERTYPE_NSH, reg),
        _ => PacketRc::Unknown,
    }
}

/// Network Service Header: 4-byte-unit length, next protocol in byte 3.
fn nsh(packet: &mut Packet, off: usize, len: usize, reg: &Registry) -> PacketRc {
    if len < 4 {
        return PacketRc::Corrupt;
    }
    let data = &packet.buf[off..];
    let hlen = ((data[1] & 0x3f) as usize) * 4;
    if hlen < 4 || hlen > len {
        return PacketRc::Corrupt;
    }
    let next_proto = data[3];

    packet.tunnel |= Tunnel::NSH;
    match next_proto {
        1 => run_ethertype(packet, off + hlen, len - hlen, ETHERTYPE_IP4, reg),
        2 => run_ethertype(packet, off + hlen, len - hlen, ETHERTYPE_IP6, reg),
        3 => run_ethertype(packet, off + hlen, len - hlen, ETHERTYPE_ETHER_FRAME, reg),
        4 => run_ethertype(packet, off + hlen, len - hlen, ETHERTYPE_NSH, reg),
        5 => run_ethertype(packet, off + hlen, len - hlen, ETHERTYPE_MPLS, reg),
        _ => PacketRc::Corrupt,
    }
}

/// Registers the tunnel peelers on the shared dispatch tables.
pub fn init(reg: &mut Registry, _cfg: &Config) {
    reg.set_ethertype_cb(ETHERTYPE_NSH, nsh);
    reg.set_ip_cb(IPPROTO_AH, ah);
    reg.set_ip_cb(IPPROTO_GRE, gre);
    reg.set_ip_cb(IPPROTO_IPV4, ipip4);
    reg.set_ip_cb(IPPROTO_IPV6, ipip6);
    reg.set_udpport_cb(4789, vxlan);
    reg.set_udpport_cb(4790, vxlan_gpe);
}

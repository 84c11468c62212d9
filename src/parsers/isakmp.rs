// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! ISAKMP / IKE dissection (RFC 2409 IKEv1, RFC 7296 IKEv2).
//!
//! The 28-byte header carries both SPIs, the version nibble pair, exchange
//! type, and flags. NAT-T traffic on port 4500 prefixes four zero bytes.
//! Unencrypted SA payloads yield the negotiated algorithm names.

use crate::{
    cfg::enums::PortKind,
    fields::{Container, FieldFlags, FieldKind, FieldSchema},
    parsers::{ParserResult, Registry, SessionParser, cursor::Cursor},
    session::Session,
    utils::hex_string,
};

const PAYLOAD_SA: u8 = 1;
const PAYLOAD_VENDOR_ID: u8 = 13;
const PAYLOAD_SA_V2: u8 = 33;
const PAYLOAD_VENDOR_ID_V2: u8 = 43;

fn exchange_type_v1(t: u8) -> Option<&'static str> {
    Some(match t {
        0 => "none",
        1 => "base",
        2 => "identity-protection",
        3 => "authentication-only",
        4 => "aggressive",
        5 => "informational",
        32 => "quick-mode",
        33 => "new-group-mode",
        _ => return None,
    })
}

fn exchange_type_v2(t: u8) -> Option<&'static str> {
    Some(match t {
        34 => "ike-sa-init",
        35 => "ike-auth",
        36 => "create-child-sa",
        37 => "informational",
        _ => return None,
    })
}

fn encryption_name(id: u16) -> Option<&'static str> {
    Some(match id {
        1 => "des-cbc",
        2 => "idea-cbc",
        3 => "blowfish-cbc",
        4 => "rc5-r16-b64-cbc",
        5 => "3des-cbc",
        6 => "cast-cbc",
        7 => "aes-cbc",
        8 => "camellia-cbc",
        12 => "aes-ctr",
        13 => "aes-ccm-8",
        14 => "aes-ccm-12",
        15 => "aes-ccm-16",
        18 => "aes-gcm-8",
        19 => "aes-gcm-12",
        20 => "aes-gcm-16",
        23 => "chacha20-poly1305",
        _ => return None,
    })
}

fn hash_name(id: u16) -> Option<&'static str> {
    Some(match id {
        1 => "md5",
        2 => "sha1",
        3 => "tiger",
        4 => "sha2-256",
        5 => "sha2-384",
        6 => "sha2-512",
        _ => return None,
    })
}

fn prf_name(id: u16) -> Option<&'static str> {
    Some(match id {
        1 => "prf-hmac-md5",
        2 => "prf-hmac-sha1",
        3 => "prf-hmac-tiger",
        4 => "prf-aes128-xcbc",
        5 => "prf-hmac-sha2-256",
        6 => "prf-hmac-sha2-384",
        7 => "prf-hmac-sha2-512",
        _ => return None,
    })
}

fn dh_group_name(id: u16) -> Option<&'static str> {
    Some(match id {
        1 => "modp768",
        2 => "modp1024",
        5 => "modp1536",
        14 => "modp2048",
        15 => "modp3072",
        16 => "modp4096",
        17 => "modp6144",
        18 => "modp8192",
        19 => "ecp256",
        20 => "ecp384",
        21 => "ecp521",
        22 => "modp1024s160",
        23 => "modp2048s224",
        24 => "modp2048s256",
        25 => "ecp192",
        26 => "ecp224",
        27 => "brainpoolp224",
        28 => "brainpoolp256",
        29 => "brainpoolp384",
        30 => "brainpoolp512",
        31 => "curve25519",
        32 => "curve448",
        _ => return None,
    })
}

fn auth_method_name(id: u16) -> Option<&'static str> {
    Some(match id {
        1 => "psk",
        2 => "dss-sig",
        3 => "rsa-sig",
        4 | 5 => "rsa-enc",
        64221 => "hybrid-rsa",
        65001 => "xauth-psk",
        65005 => "xauth-rsa",
        _ => return None,
    })
}

const KNOWN_VENDORS: &[(&[u8], &str)] = &[
    (b"\x4a\x13\x1c\x81\x07\x03\x58\x45", "rfc3947-nat-t"),
    (b"\x90\xcb\x80\x91\x3e\xbb\x69\x6e", "draft-ietf-nat-t-02"),
    (b"\xcd\x60\x46\x43\x35\xdf\x21\xf8", "draft-ietf-nat-t-03"),
    (b"\x7d\x94\x19\xa6\x53\x10\xca\x6f", "draft-ietf-nat-t-rfc"),
    (b"\xaf\xca\xd7\x13\x68\xa1\xf1\xc9", "dpd"),
    (b"\x12\xf5\xf2\x8c\x45\x71\x68\xa9", "cisco-unity"),
    (b"\x09\x00\x26\x89\xdf\xd6\xb7\x12", "xauth"),
    (b"\x1f\x07\xf7\x0e\xaa\x65\x14\xd3", "cisco-concentrator"),
    (b"\x40\x48\xb7\xd5\x6e\xbc\xe8\x85", "ikev2"),
    (b"\x4d\x53\x2d\x4d\x61\x6d\x69\x65", "ms-ikev2"),
    (b"\x1e\x2b\x51\x69\x05\x99\x1c\x7d", "windows"),
    (b"\x4f\x45\x2e\x48\x4a\x52\x41\x4e", "fortigate"),
    (b"\x16\x6f\x93\x2d\x55\xeb\x64\xd8", "strongswan"),
    (b"\x69\x93\x69\x22\x87\x41\xc6\xd4", "openswan"),
    (b"\x4f\x50\x45\x4e\x53\x77\x61\x6e", "openswan2"),
    (b"\xfb\xf4\x76\x14\x98\x40\x31\xfa", "checkpoint"),
    (b"\xf4\xed\x19\xe0\xc1\x14\xeb\x51", "checkpoint-ng"),
];

fn lookup_vendor(data: &[u8]) -> Option<&'static str> {
    KNOWN_VENDORS
        .iter()
        .find(|(pat, _)| data.len() >= pat.len() && &data[..pat.len()] == *pat)
        .map(|(_, name)| *name)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IsakmpFields {
    pub initiator_spi: u16,
    pub responder_spi: u16,
    pub version: u16,
    pub exchange_type: u16,
    pub vendor_id: u16,
    pub encryption: u16,
    pub hash: u16,
    pub dh_group: u16,
    pub auth_method: u16,
}

fn parse_transform_v1(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>) {
    if c.remaining() < 4 {
        return;
    }
    c.skip(4); // transform#, id, reserved

    while c.remaining() >= 4 && !c.is_error() {
        let attr_type = c.be16();
        let short_form = attr_type & 0x8000 != 0;
        let kind = attr_type & 0x7fff;

        if short_form {
            let value = c.be16();
            match kind {
                1 => {
                    if let Some(name) = encryption_name(value) {
                        session.fields.add_string(&reg.schema, reg.isakmp.encryption, name);
                    }
                },
                2 => {
                    if let Some(name) = hash_name(value) {
                        session.fields.add_string(&reg.schema, reg.isakmp.hash, name);
                    }
                },
                3 => {
                    if let Some(name) = auth_method_name(value) {
                        session
                            .fields
                            .add_string(&reg.schema, reg.isakmp.auth_method, name);
                    }
                },
                4 => {
                    if let Some(name) = dh_group_name(value) {
                        session.fields.add_string(&reg.schema, reg.isakmp.dh_group, name);
                    }
                },
                _ => {},
            }
        } else {
            let attr_len = c.be16() as usize;
            c.skip(attr_len);
        }
    }
}

fn parse_transform_v2(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>) {
    if c.remaining() < 8 {
        return;
    }
    c.skip(4); // last, reserved, length
    let transform_type = c.u8();
    c.skip(1);
    let transform_id = c.be16();

    match transform_type {
        1 => {
            if let Some(name) = encryption_name(transform_id) {
                session.fields.add_string(&reg.schema, reg.isakmp.encryption, name);
            }
        },
        2 => {
            if let Some(name) = prf_name(transform_id) {
                session.fields.add_string(&reg.schema, reg.isakmp.hash, name);
            }
        },
        4 => {
            if let Some(name) = dh_group_name(transform_id) {
                session.fields.add_string(&reg.schema, reg.isakmp.dh_group, name);
            }
        },
        _ => {},
    }
}

fn parse_proposal_v1(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>) {
    if c.remaining() < 4 {
        return;
    }
    c.skip(2);
    let spi_size = c.u8() as usize;
    let num_transforms = c.u8();
    c.skip(spi_size);

    for _ in 0..num_transforms {
        if c.remaining() < 4 || c.is_error() {
            break;
        }
        c.skip(2); // next, reserved
        let transform_len = c.be16() as usize;
        if transform_len < 4 || transform_len - 4 > c.remaining() {
            break;
        }
        let mut t = c.sub(transform_len - 4);
        parse_transform_v1(session, reg, &mut t);
    }
}

fn parse_proposal_v2(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>) {
    if c.remaining() < 8 {
        return;
    }
    c.skip(6);
    let spi_size = c.u8() as usize;
    let num_transforms = c.u8();
    c.skip(spi_size);

    for _ in 0..num_transforms {
        if c.remaining() < 8 || c.is_error() {
            break;
        }
        c.skip(2); // last, reserved
        let transform_len = c.be16() as usize;
        if transform_len < 8 || transform_len - 4 > c.remaining() {
            break;
        }
        let mut t = c.sub(transform_len - 4);
        parse_transform_v2(session, reg, &mut t);
    }
}

fn parse_sa_v1(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>) {
    if c.remaining() < 8 {
        return;
    }
    let doi = c.be32();
    c.skip(4); // situation
    if doi != 1 {
        return;
    }

    while c.remaining() >= 4 && !c.is_error() {
        let next_payload = c.u8();
        c.skip(1);
        let proposal_len = c.be16() as usize;
        if proposal_len < 4 || proposal_len - 4 > c.remaining() {
            break;
        }
        let mut p = c.sub(proposal_len - 4);
        parse_proposal_v1(session, reg, &mut p);
        if next_payload == 0 {
            break;
        }
    }
}

fn parse_sa_v2(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>) {
    while c.remaining() >= 8 && !c.is_error() {
        let last = c.u8();
        c.skip(1);
        let proposal_len = c.be16() as usize;
        if proposal_len < 8 || proposal_len - 4 > c.remaining() {
            break;
        }
        let mut p = c.sub(proposal_len - 4);
        parse_proposal_v2(session, reg, &mut p);
        if last == 0 {
            break;
        }
    }
}

/// Stateless per-datagram IKE parser.
pub struct IsakmpParser;

impl SessionParser for IsakmpParser {
    fn parse(
        &mut self,
        session: &mut Session,
        registry: &Registry,
        data: &[u8],
        _which: usize,
    ) -> ParserResult {
        ike_parse(session, registry, data);
        ParserResult::Continue
    }
}

fn nat_t_offset(session: &Session, data: &[u8]) -> Option<usize> {
    if (session.port1 == 4500 || session.port2 == 4500) && data.len() >= 4 {
        if data[..4] == [0, 0, 0, 0] {
            return Some(4);
        }
        return None;
    }
    Some(0)
}

fn ike_parse(session: &mut Session, reg: &Registry, data: &[u8]) {
    let offset = match nat_t_offset(session, data) {
        Some(o) => o,
        None => return,
    };
    let data = &data[offset.min(data.len())..];
    if data.len() < 28 {
        return;
    }

    let mut c = Cursor::new(data);
    let initiator_spi = c.take(8).to_vec();
    let responder_spi = c.take(8).to_vec();
    let mut next_payload = c.u8();
    let version = c.u8();
    let exchange_type = c.u8();
    let flags = c.u8();
    c.skip(8); // message id + length
    if c.is_error() {
        return;
    }

    let major = (version >> 4) & 0x0f;
    let minor = version & 0x0f;
    let is_v2 = major == 2;

    session.fields.add_string(
        &reg.schema,
        reg.isakmp.initiator_spi,
        &hex_string(&initiator_spi),
    );
    if responder_spi.iter().any(|&b| b != 0) {
        session.fields.add_string(
            &reg.schema,
            reg.isakmp.responder_spi,
            &hex_string(&responder_spi),
        );
    }
    session.fields.add_string(
        &reg.schema,
        reg.isakmp.version,
        &format!("{major}.{minor}"),
    );

    let exchange = if is_v2 {
        exchange_type_v2(exchange_type)
    } else {
        exchange_type_v1(exchange_type)
    };
    if let Some(name) = exchange {
        session
            .fields
            .add_string(&reg.schema, reg.isakmp.exchange_type, name);
    }

    let encrypted = if is_v2 {
        flags & 0x08 != 0
    } else {
        flags & 0x01 != 0
    };
    if encrypted {
        return;
    }

    while next_payload != 0 && c.remaining() >= 4 && !c.is_error() {
        let current = next_payload;
        next_payload = c.u8();
        c.skip(1);
        let payload_len = c.be16() as usize;
        if payload_len < 4 || payload_len - 4 > c.remaining() {
            break;
        }
        let mut p = c.sub(payload_len - 4);

        match current {
            PAYLOAD_SA if !is_v2 => parse_sa_v1(session, reg, &mut p),
            PAYLOAD_SA_V2 if is_v2 => parse_sa_v2(session, reg, &mut p),
            PAYLOAD_VENDOR_ID | PAYLOAD_VENDOR_ID_V2 => {
                let vendor = p.rest();
                if !vendor.is_empty() {
                    match lookup_vendor(vendor) {
                        Some(name) => {
                            session
                                .fields
                                .add_string(&reg.schema, reg.isakmp.vendor_id, name);
                        },
                        None => {
                            let n = vendor.len().min(16);
                            session.fields.add_string(
                                &reg.schema,
                                reg.isakmp.vendor_id,
                                &hex_string(&vendor[..n]),
                            );
                        },
                    }
                }
            },
            _ => {},
        }
    }
}

fn ike_udp_classify(
    session: &mut Session,
    data: &[u8],
    _which: usize,
    _arg: u32,
    _reg: &Registry,
) {
    let offset = match nat_t_offset(session, data) {
        Some(o) => o,
        None => return,
    };
    let data = &data[offset.min(data.len())..];
    if data.len() < 28 {
        return;
    }

    let major = (data[17] >> 4) & 0x0f;
    if major != 1 && major != 2 {
        return;
    }

    let exchange_type = data[18];
    if major == 1 {
        if (6..32).contains(&exchange_type) || (34..240).contains(&exchange_type) {
            return;
        }
    } else if !(34..=37).contains(&exchange_type) {
        return;
    }

    let flags = data[19];
    if major == 1 {
        if flags & 0xf8 != 0 {
            return;
        }
    } else if flags & 0xc7 != 0 {
        return;
    }

    session.add_protocol("isakmp");
    session.register_parser(crate::parsers::ParserState::Isakmp(IsakmpParser));
}

pub fn init(reg: &mut Registry, schema: &mut FieldSchema) {
    reg.isakmp = IsakmpFields {
        initiator_spi: schema.define(
            "isakmp",
            "isakmp.initiatorSpi",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        responder_spi: schema.define(
            "isakmp",
            "isakmp.responderSpi",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        version: schema.define(
            "isakmp",
            "isakmp.version",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        exchange_type: schema.define(
            "isakmp",
            "isakmp.exchangeType",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        vendor_id: schema.define(
            "isakmp",
            "isakmp.vendorId",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        encryption: schema.define(
            "isakmp",
            "isakmp.encryption",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        hash: schema.define(
            "isakmp",
            "isakmp.hash",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        dh_group: schema.define(
            "isakmp",
            "isakmp.dhGroup",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        auth_method: schema.define(
            "isakmp",
            "isakmp.authMethod",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
    };

    reg.register_port_classifier("isakmp", 500, PortKind::Udp, 0, ike_udp_classify);
    reg.register_port_classifier("isakmp", 4500, PortKind::Udp, 0, ike_udp_classify);
}

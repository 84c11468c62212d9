// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! DCE/RPC dissection: fragment reassembly, BIND context-item walks, and
//! interface-UUID resolution through the sub-parser registry.
//!
//! Byte order is carried explicitly from the data-representation field (bit
//! 4 of byte 4): both endiannesses appear on real networks.

use crate::{
    fields::{Container, FieldFlags, FieldKind, FieldSchema},
    parsers::{
        ParserResult, Registry, SessionParser, Transport, buffer::ParserBuf,
        cursor::Cursor,
    },
    session::Session,
};

const HEADER_LEN: usize = 16;
const MIN_FRAG: usize = 16;
const MAX_FRAG: usize = 8192;

const PTYPE_REQUEST: u8 = 0;
const PTYPE_BIND: u8 = 11;
const PTYPE_ALTER_CTX: u8 = 14;

fn msg_type_name(ptype: u8) -> Option<&'static str> {
    Some(match ptype {
        0 => "request",
        2 => "response",
        3 => "fault",
        11 => "bind",
        12 => "bind-ack",
        13 => "bind-nak",
        14 => "alter-context",
        15 => "alter-context-resp",
        17 => "shutdown",
        18 => "co-cancel",
        19 => "orphaned",
        _ => return None,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DceRpcFields {
    pub uuid: u16,
    pub interface: u16,
    pub msg_type: u16,
    pub opnum: u16,
    pub version: u16,
}

#[inline]
fn read_u16(c: &mut Cursor<'_>, le: bool) -> u16 {
    if le { c.le16() } else { c.be16() }
}

#[inline]
fn read_u32(c: &mut Cursor<'_>, le: bool) -> u32 {
    if le { c.le32() } else { c.be32() }
}

/// Wire UUID to the canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form.
fn format_uuid(c: &mut Cursor<'_>, le: bool) -> Option<String> {
    let data1 = read_u32(c, le);
    let data2 = read_u16(c, le);
    let data3 = read_u16(c, le);
    let data4 = c.take(8);
    if c.is_error() || data4.len() != 8 {
        return None;
    }
    Some(format!(
        "{data1:08x}-{data2:04x}-{data3:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        data4[0], data4[1], data4[2], data4[3], data4[4], data4[5], data4[6], data4[7]
    ))
}

fn parse_bind(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>, le: bool) {
    c.skip(8); // max xmit/recv frag, assoc group
    let num_ctx = c.u8();
    c.skip(3);
    if c.is_error() {
        return;
    }

    for _ in 0..num_ctx {
        if c.remaining() < 44 {
            break;
        }
        c.skip(2); // context id
        let num_trans = c.u8() as usize;
        c.skip(1);
        if c.is_error() {
            return;
        }

        let Some(uuid) = format_uuid(c, le) else {
            return;
        };
        let iface_ver = read_u16(c, le);
        c.skip(2); // minor version
        if c.is_error() {
            return;
        }

        session.fields.add_string(&reg.schema, reg.dcerpc.uuid, &uuid);
        if let Some(name) = reg.lookup_sub("dcerpc", &uuid) {
            session
                .fields
                .add_string(&reg.schema, reg.dcerpc.interface, name);
            session.add_protocol(name);
        }
        session
            .fields
            .add_string(&reg.schema, reg.dcerpc.version, &iface_ver.to_string());

        // Transfer syntaxes: 16-byte UUID + 4-byte version each.
        c.skip(num_trans * 20);
    }
}

fn parse_request(session: &mut Session, reg: &Registry, c: &mut Cursor<'_>, le: bool) {
    c.skip(6); // alloc hint, context id
    let opnum = read_u16(c, le);
    if c.is_error() {
        return;
    }
    session
        .fields
        .add_int(&reg.schema, reg.dcerpc.opnum, opnum as i64);
}

fn process_pdu(session: &mut Session, reg: &Registry, data: &[u8]) {
    let mut c = Cursor::new(data);
    c.skip(2); // version
    let ptype = c.u8();
    c.skip(1); // flags
    let data_rep = c.u8();
    c.skip(11); // rest of drep, frag len, auth len, call id
    if c.is_error() {
        return;
    }

    if let Some(name) = msg_type_name(ptype) {
        session
            .fields
            .add_string(&reg.schema, reg.dcerpc.msg_type, name);
    }

    let le = data_rep & 0x10 != 0;
    match ptype {
        PTYPE_BIND | PTYPE_ALTER_CTX => parse_bind(session, reg, &mut c, le),
        PTYPE_REQUEST => parse_request(session, reg, &mut c, le),
        _ => {},
    }
}

/// Streaming reassembly over the fragment length in each 16-byte header.
pub struct DceRpcParser {
    buf: ParserBuf,
}

impl DceRpcParser {
    pub fn new() -> Self {
        DceRpcParser {
            buf: ParserBuf::new(),
        }
    }
}

impl Default for DceRpcParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionParser for DceRpcParser {
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

        while self.buf.len(which) >= HEADER_LEN {
            let held = self.buf.data(which);
            let le = held[4] & 0x10 != 0;
            let frag_len = if le {
                u16::from_le_bytes([held[8], held[9]])
            } else {
                u16::from_be_bytes([held[8], held[9]])
            } as usize;

            if !(MIN_FRAG..=MAX_FRAG).contains(&frag_len) {
                // A fragment length outside sane bounds means the stream is
                // lost; drop everything buffered.
                let len = self.buf.len(which);
                self.buf.skip(which, len);
                return ParserResult::Continue;
            }
            if self.buf.len(which) < frag_len {
                return ParserResult::Continue;
            }

            let pdu = self.buf.data(which)[..frag_len].to_vec();
            process_pdu(session, registry, &pdu);
            self.buf.del(which, frag_len);
        }
        ParserResult::Continue
    }
}

fn dcerpc_classify(
    session: &mut Session,
    data: &[u8],
    _which: usize,
    _arg: u32,
    _reg: &Registry,
) {
    if data.len() < 16 || data[0] != 5 || data[1] != 0 || data[2] > 19 {
        return;
    }
    if session.has_protocol("dcerpc") {
        return;
    }
    session.add_protocol("dcerpc");
    session.register_parser(crate::parsers::ParserState::DceRpc(DceRpcParser::new()));
}

pub fn init(reg: &mut Registry, schema: &mut FieldSchema) {
    // Interfaces worth naming: directory replication, account and service
    // management, and the usual lateral-movement suspects.
    for (uuid, name) in [
        ("e3514235-4b06-11d1-ab04-00c04fc2dcd2", "drsuapi"),
        ("12345778-1234-abcd-ef00-0123456789ac", "samr"),
        ("12345678-1234-abcd-ef00-01234567cffb", "netlogon"),
        ("367abb81-9844-35f1-ad32-98f038001003", "svcctl"),
        ("4b324fc8-1670-01d3-1278-5a47bf6ee188", "srvsvc"),
        ("1ff70682-0a51-30e8-076d-740be8cee98b", "atsvc"),
        ("338cd001-2244-31f1-aaaa-900038001003", "winreg"),
        ("c681d488-d850-11d0-8c52-00c04fd90f7e", "efsrpc"),
        ("df1941c5-fe89-4e79-bf10-463657acf44d", "efsr"),
        ("12345778-1234-abcd-ef00-0123456789ab", "lsarpc"),
        ("6bffd098-a112-3610-9833-46c3f87e345a", "wkssvc"),
        ("3919286a-b10c-11d0-9ba8-00c04fd92ef5", "dssetup"),
        ("e1af8308-5d1f-11c9-91a4-08002b14a0fa", "epmapper"),
        ("86d35949-83c9-4044-b424-db363231fd0c", "itaskscheduler"),
        ("00000131-0000-0000-c000-000000000046", "ioxidresolver"),
        ("00000134-0000-0000-c000-000000000046", "iremunknown"),
        ("000001a0-0000-0000-c000-000000000046", "iremunknown2"),
        ("ccd8c074-d0e5-4a40-92b4-d074faa6ba28", "witness"),
        ("afa8bd80-7d8a-11c9-bef4-08002b102989", "mgmt"),
        ("f5cc5a18-4264-101a-8c59-08002b2f8426", "nspi"),
    ] {
        reg.register_sub("dcerpc", uuid, name);
    }

    reg.dcerpc = DceRpcFields {
        uuid: schema.define(
            "dcerpc",
            "dcerpc.uuid",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        interface: schema.define(
            "dcerpc",
            "dcerpc.interface",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        msg_type: schema.define(
            "dcerpc",
            "dcerpc.msgType",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        opnum: schema.define(
            "dcerpc",
            "dcerpc.opnum",
            FieldKind::Int,
            Container::Set,
            FieldFlags::CNT,
        ),
        version: schema.define(
            "dcerpc",
            "dcerpc.version",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
    };

    // Version 5.0 plus the packet types seen first on a stream.
    reg.register_classifier(Transport::Tcp, "dcerpc", 0, b"\x05\x00\x0b", 0, dcerpc_classify);
    reg.register_classifier(Transport::Tcp, "dcerpc", 0, b"\x05\x00\x00", 0, dcerpc_classify);
    reg.register_classifier(Transport::Tcp, "dcerpc", 0, b"\x05\x00\x02", 0, dcerpc_classify);
    reg.register_classifier(Transport::Tcp, "dcerpc", 0, b"\x05\x00\x0c", 0, dcerpc_classify);
}

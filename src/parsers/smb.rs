// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! SMB1/SMB2 dissection: NetBIOS framing, per-direction command state
//! machines, NTLMSSP security-blob identity extraction, share and filename
//! capture, and dialect resolution.

use crate::{
    fields::{Container, FieldFlags, FieldKind, FieldSchema},
    parsers::{
        ParserResult, Registry, SessionParser, Transport, asn1, cursor::Cursor,
    },
    session::Session,
    warn_rate,
};

const MAX_SMB_BUFFER: usize = 8192;
const MAX_SMB1_DIALECTS: usize = 10;

const SMB1_FLAGS_REPLY: u8 = 0x80;
const SMB1_FLAGS2_UNICODE: u16 = 0x8000;
const SMB2_FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum SmbState {
    #[default]
    Netbios,
    Header,
    Skip,
    Smb1TreeConnect,
    Smb1Delete,
    Smb1OpenAndX,
    Smb1CreateAndX,
    Smb1SetupAndX,
    Smb1NegotiateReq,
    Smb1NegotiateRsp,
    Smb2TreeConnect,
    Smb2Create,
    Smb2Negotiate,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SmbFields {
    pub share: u16,
    pub filename: u16,
    pub os: u16,
    pub domain: u16,
    pub version: u16,
    pub dialect: u16,
    pub user: u16,
    pub host: u16,
}

/// Decodes UCS-2LE into UTF-8, dropping invalid units.
fn ucs2_to_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
        .trim_end_matches('\0')
        .to_string()
}

fn smb_string(buf: &[u8], unicode: bool) -> String {
    if unicode {
        ucs2_to_string(buf)
    } else {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }
}

fn add_smb_string(
    session: &mut Session,
    reg: &Registry,
    pos: u16,
    buf: &[u8],
    unicode: bool,
) {
    let s = smb_string(buf, unicode);
    if !s.is_empty() {
        session.fields.add_string(&reg.schema, pos, &s);
    }
}

/// NTLMSSP AUTHENTICATE inside a SPNEGO blob: domain, user, and host.
fn smb_security_blob(session: &mut Session, reg: &Registry, data: &[u8]) {
    let mut cursor = data;
    let Some(t1) = asn1::get_tlv(&mut cursor) else {
        return;
    };
    if t1.tag != 1 {
        return;
    }
    let mut cursor = t1.value;
    let Some(t2) = asn1::get_tlv(&mut cursor) else {
        return;
    };
    if t2.tag != 16 {
        return;
    }
    let mut cursor = t2.value;
    let Some(t3) = asn1::get_tlv(&mut cursor) else {
        return;
    };
    if t3.tag != 2 {
        return;
    }
    let mut cursor = t3.value;
    let Some(t4) = asn1::get_tlv(&mut cursor) else {
        return;
    };
    if t4.tag != 4 || t4.value.len() < 12 || &t4.value[..7] != b"NTLMSSP" {
        return;
    }

    let ntlm = t4.value;
    let mut c = Cursor::new(ntlm);
    c.skip(8);
    let msg_type = c.le32();
    if msg_type != 3 {
        return;
    }

    // Six (len, maxlen, offset) descriptors follow; 2=domain 3=user 4=host.
    let mut lens = [0usize; 6];
    let mut offsets = [0usize; 6];
    for i in 0..6 {
        lens[i] = c.le16() as usize;
        c.skip(2);
        offsets[i] = c.le32() as usize;
        if c.is_error()
            || offsets[i] > ntlm.len()
            || lens[i] > ntlm.len()
            || offsets[i] + lens[i] > ntlm.len()
        {
            session.add_tag("smb:bad-security-blob");
            return;
        }
    }

    for (idx, pos) in [(2, reg.smb.domain), (3, reg.smb.user), (4, reg.smb.host)] {
        if lens[idx] > 0 {
            add_smb_string(
                session,
                reg,
                pos,
                &ntlm[offsets[idx]..offsets[idx] + lens[idx]],
                true,
            );
        }
    }
}

fn null_split(buf: &str, max: usize) -> Vec<&str> {
    buf.split('\0').filter(|s| !s.is_empty()).take(max).collect()
}

/// Per-session SMB state machine, one lane per direction.
pub struct SmbParser {
    buf: [Vec<u8>; 2],
    remlen: [u32; 2],
    flags2: [u16; 2],
    version: [u8; 2],
    state: [SmbState; 2],
    dialects: Vec<String>,
}

impl SmbParser {
    pub fn new() -> Self {
        SmbParser {
            buf: [Vec::new(), Vec::new()],
            remlen: [0; 2],
            flags2: [0; 2],
            version: [0; 2],
            state: [SmbState::default(); 2],
            dialects: Vec::new(),
        }
    }

    fn smb1_negotiate_request(&mut self, buf: &[u8]) {
        let mut c = Cursor::new(buf);
        while self.dialects.len() < MAX_SMB1_DIALECTS && c.remaining() > 0 {
            c.skip(1); // buffer-format byte
            let start = c.rest();
            let end = match start.iter().position(|&b| b == 0) {
                Some(e) => e,
                None => break,
            };
            self.dialects
                .push(String::from_utf8_lossy(&start[..end]).into_owned());
            c.skip(end + 1);
        }
    }

    /// One SMB1 command; returns true when more payload is needed.
    #[allow(clippy::too_many_lines)]
    fn smb1_parse(
        &mut self,
        session: &mut Session,
        reg: &Registry,
        c: &mut Cursor<'_>,
        which: usize,
    ) -> bool {
        let start_pos = c.pos();
        match self.state[which] {
            SmbState::Header => {
                if c.remaining() < 32 {
                    return true;
                }
                c.skip(4);
                let cmd = c.u8();
                c.skip(4);
                let flags = c.u8();
                self.flags2[which] = c.le16();
                c.skip(20);
                self.state[which] = if flags & SMB1_FLAGS_REPLY == 0 {
                    match cmd {
                        0x06 => SmbState::Smb1Delete,
                        0x2d => SmbState::Smb1OpenAndX,
                        0x72 => SmbState::Smb1NegotiateReq,
                        0x73 => SmbState::Smb1SetupAndX,
                        0x75 => SmbState::Smb1TreeConnect,
                        0xa2 => SmbState::Smb1CreateAndX,
                        _ => SmbState::Skip,
                    }
                } else {
                    match cmd {
                        0x72 => SmbState::Smb1NegotiateRsp,
                        _ => SmbState::Skip,
                    }
                };
            },
            SmbState::Smb1CreateAndX | SmbState::Smb1OpenAndX | SmbState::Smb1Delete => {
                if (c.remaining() as u32) < self.remlen[which] {
                    return true;
                }
                let wordcount = c.u8() as usize;
                c.skip(wordcount * 2 + 3);
                if !c.is_error() {
                    add_smb_string(
                        session,
                        reg,
                        reg.smb.filename,
                        c.rest(),
                        self.flags2[which] & SMB1_FLAGS2_UNICODE != 0,
                    );
                }
                self.state[which] = SmbState::Skip;
            },
            SmbState::Smb1TreeConnect => {
                if (c.remaining() as u32) < self.remlen[which] {
                    return true;
                }
                c.skip(6);
                let passlength = c.be16() as usize;
                c.skip(2 + passlength);
                let offset = if (c.pos() - start_pos) % 2 == 0 { 2 } else { 1 };
                if !c.is_error() && offset <= c.remaining() {
                    add_smb_string(
                        session,
                        reg,
                        reg.smb.share,
                        &c.rest()[offset..],
                        self.flags2[which] & SMB1_FLAGS2_UNICODE != 0,
                    );
                }
                self.state[which] = SmbState::Skip;
            },
            SmbState::Smb1SetupAndX => {
                if (c.remaining() as u32) < self.remlen[which] {
                    c.set_error();
                    return true;
                }
                let unicode = self.flags2[which] & SMB1_FLAGS2_UNICODE != 0;
                let wordcount = c.u8();
                if wordcount == 12 {
                    c.skip(14);
                    let securitylen = c.le16() as usize;
                    c.skip(10);
                    if securitylen > c.remaining() {
                        c.set_error();
                        return true;
                    }
                    let blob = c.take(securitylen);
                    smb_security_blob(session, reg, blob);
                    let offset = if (c.pos() - start_pos) % 2 == 0 { 0 } else { 1 };
                    c.skip(offset);
                    if !c.is_error() {
                        let text = if unicode {
                            ucs2_to_string(c.rest())
                        } else {
                            String::from_utf8_lossy(c.rest()).into_owned()
                        };
                        let outs = null_split(&text, 3);
                        for (i, pos) in
                            [reg.smb.os, reg.smb.version, reg.smb.domain]
                                .into_iter()
                                .enumerate()
                        {
                            if let Some(v) = outs.get(i) {
                                session.fields.add_string(&reg.schema, pos, v);
                            }
                        }
                    }
                } else if wordcount == 13 {
                    c.skip(14);
                    let ansipw = c.le16() as usize;
                    let upw = c.le16() as usize;
                    c.skip(10 + ansipw + upw);
                    let offset = if (c.pos() - start_pos) % 2 == 0 { 0 } else { 1 };
                    c.skip(offset);
                    if !c.is_error() {
                        let text = if unicode {
                            ucs2_to_string(c.rest())
                        } else {
                            String::from_utf8_lossy(c.rest()).into_owned()
                        };
                        let outs = null_split(&text, 4);
                        for (i, pos) in [
                            reg.smb.user,
                            reg.smb.domain,
                            reg.smb.os,
                            reg.smb.version,
                        ]
                        .into_iter()
                        .enumerate()
                        {
                            if let Some(v) = outs.get(i) {
                                session.fields.add_string(&reg.schema, pos, v);
                            }
                        }
                    }
                }
                self.state[which] = SmbState::Skip;
            },
            SmbState::Smb1NegotiateReq => {
                if (c.remaining() as u32) < self.remlen[which] {
                    c.set_error();
                    return true;
                }
                c.skip(1); // wordcount
                let bytecount = c.u8();
                if bytecount > 0 && !c.is_error() {
                    let rest = c.rest().to_vec();
                    self.smb1_negotiate_request(&rest);
                }
                self.state[which] = SmbState::Skip;
            },
            SmbState::Smb1NegotiateRsp => {
                if (c.remaining() as u32) < self.remlen[which] {
                    c.set_error();
                    return true;
                }
                let wordcount = c.u8();
                if wordcount >= 13 {
                    let dialect = c.u8() as usize;
                    if let Some(name) = self.dialects.get(dialect) {
                        session.fields.add_string(&reg.schema, reg.smb.dialect, name);
                    }
                }
                self.state[which] = SmbState::Skip;
            },
            _ => {},
        }

        self.remlen[which] =
            self.remlen[which].saturating_sub((c.pos() - start_pos) as u32);
        false
    }

    /// One SMB2 command; returns true when more payload is needed.
    fn smb2_parse(
        &mut self,
        session: &mut Session,
        reg: &Registry,
        c: &mut Cursor<'_>,
        which: usize,
    ) -> bool {
        let start_pos = c.pos();
        match self.state[which] {
            SmbState::Header => {
                if c.remaining() < 64 {
                    return true;
                }
                c.skip(12);
                let cmd = c.le16();
                c.skip(2);
                let flags = c.le32();
                c.skip(44);
                self.state[which] = if flags & SMB2_FLAGS_SERVER_TO_REDIR == 0 {
                    match cmd {
                        0x03 => SmbState::Smb2TreeConnect,
                        0x05 => SmbState::Smb2Create,
                        _ => SmbState::Skip,
                    }
                } else {
                    match cmd {
                        0x00 => SmbState::Smb2Negotiate,
                        _ => SmbState::Skip,
                    }
                };
            },
            SmbState::Smb2Negotiate => {
                if (c.remaining() as u32) < self.remlen[which] {
                    return true;
                }
                c.skip(4);
                let dialect = c.le16();
                if dialect != 0 && dialect != 0x02ff {
                    let name = format!(
                        "SMB {}.{}.{}",
                        (dialect >> 8) & 0xf,
                        (dialect >> 4) & 0xf,
                        dialect & 0xf
                    );
                    session.fields.add_string(&reg.schema, reg.smb.dialect, &name);
                }
                self.state[which] = SmbState::Skip;
            },
            SmbState::Smb2TreeConnect => {
                if (c.remaining() as u32) < self.remlen[which] {
                    return true;
                }
                c.skip(4);
                let pathoffset = (c.le16() as usize).wrapping_sub(64 + 8);
                let pathlen = c.le16() as usize;
                c.skip(pathoffset);
                if !c.is_error() && pathlen < c.remaining() {
                    add_smb_string(session, reg, reg.smb.share, &c.rest()[..pathlen], true);
                }
                self.state[which] = SmbState::Skip;
            },
            SmbState::Smb2Create => {
                if (c.remaining() as u32) < self.remlen[which] {
                    return true;
                }
                c.skip(44);
                let nameoffset = (c.le16() as usize).wrapping_sub(64 + 48);
                let namelen = c.le16() as usize;
                c.skip(nameoffset);
                if !c.is_error() && namelen < c.remaining() {
                    let name = ucs2_to_string(&c.rest()[..namelen]);
                    if !name.is_empty() {
                        session.fields.add_string(&reg.schema, reg.smb.filename, &name);
                    }
                }
                self.state[which] = SmbState::Skip;
            },
            _ => {},
        }

        self.remlen[which] =
            self.remlen[which].saturating_sub((c.pos() - start_pos) as u32);
        false
    }
}

impl Default for SmbParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionParser for SmbParser {
    fn parse(
        &mut self,
        session: &mut Session,
        registry: &Registry,
        data: &[u8],
        which: usize,
    ) -> ParserResult {
        let mut remaining = data;

        while !remaining.is_empty() {
            let work: Vec<u8> = if self.buf[which].is_empty() {
                let w = remaining.to_vec();
                remaining = &[];
                w
            } else {
                let room = MAX_SMB_BUFFER - self.buf[which].len().min(MAX_SMB_BUFFER);
                let take = remaining.len().min(room);
                let mut w = std::mem::take(&mut self.buf[which]);
                w.extend_from_slice(&remaining[..take]);
                remaining = &remaining[take..];
                w
            };

            if self.state[which] != SmbState::Skip
                && self.remlen[which] as usize > MAX_SMB_BUFFER
            {
                warn_rate!(
                    5,
                    remlen = self.remlen[which],
                    "smb message too large to reassemble"
                );
                return ParserResult::Unregister;
            }

            let mut c = Cursor::new(&work);
            let mut done = false;
            while !done && c.remaining() > 0 {
                match self.state[which] {
                    SmbState::Netbios => {
                        if c.remaining() < 5 {
                            done = true;
                            continue;
                        }
                        c.skip(1);
                        self.remlen[which] = c.be24();
                        self.version[which] = c.peek_u8().unwrap_or(0);
                        self.state[which] = SmbState::Header;
                    },
                    SmbState::Skip => {
                        let rem = c.remaining() as u32;
                        if rem < self.remlen[which] {
                            self.remlen[which] -= rem;
                            c.skip(rem as usize);
                        } else {
                            c.skip(self.remlen[which] as usize);
                            self.remlen[which] = 0;
                            self.state[which] = SmbState::Netbios;
                        }
                    },
                    _ => {
                        done = if self.version[which] == 0xff {
                            self.smb1_parse(session, registry, &mut c, which)
                        } else {
                            self.smb2_parse(session, registry, &mut c, which)
                        };
                    },
                }
            }

            if c.is_error() {
                return ParserResult::Unregister;
            }

            let leftover = c.rest();
            if leftover.len() > MAX_SMB_BUFFER {
                warn_rate!(5, len = leftover.len(), "smb leftover exceeds buffer");
                return ParserResult::Unregister;
            }
            self.buf[which] = leftover.to_vec();
        }
        ParserResult::Continue
    }
}

fn smb_classify(
    session: &mut Session,
    data: &[u8],
    _which: usize,
    _arg: u32,
    _reg: &Registry,
) {
    if data.len() < 5 || (data[4] != 0xff && data[4] != 0xfe) {
        return;
    }
    if session.has_protocol("smb") {
        return;
    }
    session.add_protocol("smb");
    session.register_parser(crate::parsers::ParserState::Smb(SmbParser::new()));
}

pub fn init(reg: &mut Registry, schema: &mut FieldSchema) {
    reg.smb = SmbFields {
        share: schema.define(
            "smb",
            "smb.share",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        filename: schema.define(
            "smb",
            "smb.filename",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        os: schema.define(
            "smb",
            "smb.os",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        domain: schema.define(
            "smb",
            "smb.domain",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        version: schema.define(
            "smb",
            "smb.version",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        dialect: schema.define(
            "smb",
            "smb.dialect",
            FieldKind::Str,
            Container::Set,
            FieldFlags::empty(),
        ),
        user: schema.define(
            "smb",
            "smb.user",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        host: schema.define(
            "smb",
            "smb.host",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
    };

    reg.register_classifier(Transport::Tcp, "smb", 5, b"SMB", 0, smb_classify);
}

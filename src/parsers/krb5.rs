// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Kerberos v5 dissection over UDP and TCP.
//!
//! Messages are ASN.1 application-tagged: 10 AS-REQ, 11 AS-REP, 12 TGS-REQ,
//! 13 TGS-REP, 30 KRB-ERROR. The TCP classifier requires the first two
//! bytes of the 4-byte length prefix to be zero, which rejects legitimate
//! messages of 64 KiB and up; known limitation, kept for classifier
//! stability.

use crate::{
    fields::{Container, FieldFlags, FieldKind, FieldSchema},
    parsers::{
        ParserResult, Registry, SessionParser, Transport, asn1, buffer::ParserBuf,
    },
    session::Session,
};

fn etype_name(etype: i64) -> Option<&'static str> {
    Some(match etype {
        1 => "des-cbc-crc",
        2 => "des-cbc-md4",
        3 => "des-cbc-md5",
        5 => "des3-cbc-md5",
        7 => "des3-cbc-sha1",
        16 => "des3-cbc-sha1-kd",
        17 => "aes128-cts-hmac-sha1-96",
        18 => "aes256-cts-hmac-sha1-96",
        19 => "aes128-cts-hmac-sha256-128",
        20 => "aes256-cts-hmac-sha384-192",
        23 => "rc4-hmac",
        24 => "rc4-hmac-exp",
        25 => "camellia128-cts-cmac",
        26 => "camellia256-cts-cmac",
        _ => return None,
    })
}

fn error_name(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "KDC_ERR_NONE",
        1 => "KDC_ERR_NAME_EXP",
        2 => "KDC_ERR_SERVICE_EXP",
        3 => "KDC_ERR_BAD_PVNO",
        4 => "KDC_ERR_C_OLD_MAST_KVNO",
        5 => "KDC_ERR_S_OLD_MAST_KVNO",
        6 => "KDC_ERR_C_PRINCIPAL_UNKNOWN",
        7 => "KDC_ERR_S_PRINCIPAL_UNKNOWN",
        8 => "KDC_ERR_PRINCIPAL_NOT_UNIQUE",
        9 => "KDC_ERR_NULL_KEY",
        10 => "KDC_ERR_CANNOT_POSTDATE",
        11 => "KDC_ERR_NEVER_VALID",
        12 => "KDC_ERR_POLICY",
        13 => "KDC_ERR_BADOPTION",
        14 => "KDC_ERR_ETYPE_NOSUPP",
        15 => "KDC_ERR_SUMTYPE_NOSUPP",
        16 => "KDC_ERR_PADATA_TYPE_NOSUPP",
        17 => "KDC_ERR_TRTYPE_NOSUPP",
        18 => "KDC_ERR_CLIENT_REVOKED",
        19 => "KDC_ERR_SERVICE_REVOKED",
        20 => "KDC_ERR_TGT_REVOKED",
        21 => "KDC_ERR_CLIENT_NOTYET",
        22 => "KDC_ERR_SERVICE_NOTYET",
        23 => "KDC_ERR_KEY_EXPIRED",
        24 => "KDC_ERR_PREAUTH_FAILED",
        25 => "KDC_ERR_PREAUTH_REQUIRED",
        26 => "KDC_ERR_SERVER_NOMATCH",
        27 => "KDC_ERR_MUST_USE_USER2USER",
        28 => "KDC_ERR_PATH_NOT_ACCEPTED",
        29 => "KDC_ERR_SVC_UNAVAILABLE",
        31 => "KRB_AP_ERR_BAD_INTEGRITY",
        32 => "KRB_AP_ERR_TKT_EXPIRED",
        33 => "KRB_AP_ERR_TKT_NYV",
        34 => "KRB_AP_ERR_REPEAT",
        35 => "KRB_AP_ERR_NOT_US",
        36 => "KRB_AP_ERR_BADMATCH",
        37 => "KRB_AP_ERR_SKEW",
        38 => "KRB_AP_ERR_BADADDR",
        39 => "KRB_AP_ERR_BADVERSION",
        40 => "KRB_AP_ERR_MSG_TYPE",
        41 => "KRB_AP_ERR_MODIFIED",
        42 => "KRB_AP_ERR_BADORDER",
        44 => "KRB_AP_ERR_BADKEYVER",
        45 => "KRB_AP_ERR_NOKEY",
        46 => "KRB_AP_ERR_MUT_FAIL",
        47 => "KRB_AP_ERR_BADDIRECTION",
        48 => "KRB_AP_ERR_METHOD",
        49 => "KRB_AP_ERR_BADSEQ",
        50 => "KRB_AP_ERR_INAPP_CKSUM",
        51 => "KRB_AP_PATH_NOT_ACCEPTED",
        52 => "KRB_ERR_RESPONSE_TOO_BIG",
        60 => "KRB_ERR_GENERIC",
        61 => "KRB_ERR_FIELD_TOOLONG",
        62 => "KDC_ERROR_CLIENT_NOT_TRUSTED",
        63 => "KDC_ERROR_KDC_NOT_TRUSTED",
        64 => "KDC_ERROR_INVALID_SIG",
        65 => "KDC_ERR_KEY_TOO_WEAK",
        66 => "KDC_ERR_CERTIFICATE_MISMATCH",
        67 => "KRB_AP_ERR_NO_TGT",
        68 => "KDC_ERR_WRONG_REALM",
        69 => "KRB_AP_ERR_USER_TO_USER_REQUIRED",
        70 => "KDC_ERR_CANT_VERIFY_CERTIFICATE",
        71 => "KDC_ERR_INVALID_CERTIFICATE",
        72 => "KDC_ERR_REVOKED_CERTIFICATE",
        73 => "KDC_ERR_REVOCATION_STATUS_UNKNOWN",
        74 => "KDC_ERR_REVOCATION_STATUS_UNAVAILABLE",
        75 => "KDC_ERR_CLIENT_NAME_MISMATCH",
        76 => "KDC_ERR_KDC_NAME_MISMATCH",
        _ => return None,
    })
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Krb5Fields {
    pub realm: u16,
    pub cname: u16,
    pub sname: u16,
    pub etype: u16,
    pub error: u16,
}

/// PrincipalName ::= SEQUENCE { name-type[0], name-string[1] SEQUENCE OF
/// GeneralString }. Two components compose as `a/b`.
fn parse_principal_name(
    session: &mut Session,
    reg: &Registry,
    field: u16,
    data: &[u8],
) {
    let seq = asn1::get_sequence(data, 2, true);
    if seq.len() < 2 || seq[1].tag != 1 {
        return;
    }

    let parts = asn1::get_sequence(seq[1].value, 2, true);
    match parts.len() {
        1 => {
            if let Some(v) = asn1::tlv_to_str(&parts[0]) {
                if !v.is_empty() {
                    session.fields.add_string(&reg.schema, field, v);
                }
            }
        },
        2 => {
            if let (Some(a), Some(b)) =
                (asn1::tlv_to_str(&parts[0]), asn1::tlv_to_str(&parts[1]))
            {
                session
                    .fields
                    .add_string(&reg.schema, field, &format!("{a}/{b}"));
            }
        },
        _ => {},
    }
}

/// KDC-REQ-BODY: cname[1], realm[2], sname[3], etype[8].
fn parse_req_body(session: &mut Session, reg: &Registry, data: &[u8]) {
    for item in asn1::get_sequence(data, 12, true) {
        match item.tag {
            1 => parse_principal_name(session, reg, reg.krb5.cname, item.value),
            2 => {
                if let Some(v) = asn1::tlv_to_str(&item) {
                    if !v.is_empty() {
                        session.fields.add_string(&reg.schema, reg.krb5.realm, v);
                    }
                }
            },
            3 => parse_principal_name(session, reg, reg.krb5.sname, item.value),
            8 => {
                for etype in asn1::get_sequence(item.value, 20, true) {
                    if let Some(name) = etype_name(asn1::tlv_to_int(&etype)) {
                        session.fields.add_string(&reg.schema, reg.krb5.etype, name);
                    }
                }
            },
            _ => {},
        }
    }
}

/// KDC-REQ: pvno[1] must be 5, msg-type[2] 10 or 12, req-body[4].
fn parse_req(session: &mut Session, reg: &Registry, data: &[u8]) {
    let seq = asn1::get_sequence(data, 5, true);
    if seq.len() < 3 || seq[0].value.is_empty() || seq[1].value.is_empty() {
        return;
    }

    if !seq[0].constructed || seq[0].tag != 1 || *seq[0].value.last().unwrap_or(&0) != 5
    {
        return;
    }
    let msg_type = *seq[1].value.last().unwrap_or(&0);
    if !seq[1].constructed || seq[1].tag != 2 || (msg_type != 10 && msg_type != 12) {
        return;
    }

    session.add_protocol("krb5");

    if seq[2].constructed && seq[2].tag == 4 {
        parse_req_body(session, reg, seq[2].value);
    } else if seq.len() == 4 && seq[3].constructed && seq[3].tag == 4 {
        parse_req_body(session, reg, seq[3].value);
    }
}

/// KRB-ERROR: error-code[6], crealm[7], cname[8], realm[9], sname[10].
fn parse_error(session: &mut Session, reg: &Registry, data: &[u8]) {
    let seq = asn1::get_sequence(data, 13, true);
    if seq.len() < 2 {
        return;
    }

    session.add_protocol("krb5");

    for item in seq {
        match item.tag {
            6 => {
                if let Some(name) = error_name(asn1::tlv_to_int(&item)) {
                    session.fields.add_string(&reg.schema, reg.krb5.error, name);
                }
            },
            7 | 9 => {
                if let Some(v) = asn1::tlv_to_str(&item) {
                    if !v.is_empty() {
                        session.fields.add_string(&reg.schema, reg.krb5.realm, v);
                    }
                }
            },
            8 => parse_principal_name(session, reg, reg.krb5.cname, item.value),
            10 => parse_principal_name(session, reg, reg.krb5.sname, item.value),
            _ => {},
        }
    }
}

fn krb5_parse(session: &mut Session, reg: &Registry, data: &[u8]) {
    let mut cursor = data;
    let Some(outer) = asn1::get_tlv(&mut cursor) else {
        return;
    };
    if !outer.constructed {
        return;
    }

    match outer.tag {
        10 | 12 => parse_req(session, reg, outer.value),
        11 | 13 => session.add_protocol("krb5"),
        30 => parse_error(session, reg, outer.value),
        _ => {},
    }
}

/// UDP flavour: one message per datagram.
pub struct Krb5UdpParser;

impl SessionParser for Krb5UdpParser {
    fn parse(
        &mut self,
        session: &mut Session,
        registry: &Registry,
        data: &[u8],
        _which: usize,
    ) -> ParserResult {
        krb5_parse(session, registry, data);
        ParserResult::Continue
    }
}

/// TCP flavour: 4-byte length prefix per message.
pub struct Krb5TcpParser {
    buf: ParserBuf,
}

impl Krb5TcpParser {
    pub fn new() -> Self {
        Krb5TcpParser {
            buf: ParserBuf::new(),
        }
    }
}

impl Default for Krb5TcpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionParser for Krb5TcpParser {
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
            if held.len() < 4 {
                return ParserResult::Continue;
            }
            let len = crate::utils::be16(held, 2) as usize;
            if held.len() < len + 4 {
                return ParserResult::Continue;
            }
            let message = held[4..4 + len].to_vec();
            krb5_parse(session, registry, &message);
            self.buf.del(which, len + 4);
        }
    }
}

fn krb5_udp_classify(
    session: &mut Session,
    data: &[u8],
    _which: usize,
    _arg: u32,
    _reg: &Registry,
) {
    if session.has_protocol("krb5") {
        return;
    }

    let mut cursor = data;
    let Some(outer) = asn1::get_tlv(&mut cursor) else {
        return;
    };
    if outer.constructed && matches!(outer.tag, 10 | 12 | 30) {
        session.register_parser(crate::parsers::ParserState::Krb5Udp(Krb5UdpParser));
    }
}

fn krb5_tcp_classify(
    session: &mut Session,
    data: &[u8],
    _which: usize,
    _arg: u32,
    _reg: &Registry,
) {
    // Length prefix sanity: small messages only, then a plausible
    // application tag.
    if data.len() < 5 || data[0] != 0 || data[1] != 0 {
        return;
    }
    if !matches!(data[4], 0x6a | 0x6b | 0x6c | 0x6d | 0x7e) {
        return;
    }
    session.register_parser(crate::parsers::ParserState::Krb5Tcp(
        Krb5TcpParser::new(),
    ));
}

pub fn init(reg: &mut Registry, schema: &mut FieldSchema) {
    reg.krb5 = Krb5Fields {
        realm: schema.define(
            "krb5",
            "krb5.realm",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        cname: schema.define(
            "krb5",
            "krb5.cname",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        sname: schema.define(
            "krb5",
            "krb5.sname",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
        etype: schema.define(
            "krb5",
            "krb5.etype",
            FieldKind::Str,
            Container::Array,
            FieldFlags::CNT,
        ),
        error: schema.define(
            "krb5",
            "krb5.error",
            FieldKind::Str,
            Container::Set,
            FieldFlags::CNT,
        ),
    };

    // The INTEGER 5 of pvno lands at these offsets in DER encodings.
    reg.register_classifier(
        Transport::Udp,
        "krb5",
        7,
        b"\x03\x02\x01\x05",
        0,
        krb5_udp_classify,
    );
    reg.register_classifier(
        Transport::Udp,
        "krb5",
        9,
        b"\x03\x02\x01\x05",
        0,
        krb5_udp_classify,
    );
    reg.register_classifier(
        Transport::Tcp,
        "krb5",
        11,
        b"\x03\x02\x01\x05",
        0,
        krb5_tcp_classify,
    );
    reg.register_classifier(
        Transport::Tcp,
        "krb5",
        13,
        b"\x03\x02\x01\x05",
        0,
        krb5_tcp_classify,
    );
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! AWS Signature Version 4 request signing for the S3 upload path.
//!
//! Signed headers are fixed: `host`, `x-amz-content-sha256`, `x-amz-date`,
//! plus `x-amz-security-token` with session credentials and
//! `x-amz-storage-class` on upload initiation.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::writer::creds::Credentials;

type HmacSha256 = Hmac<Sha256>;

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    #[allow(clippy::expect_used)]
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Everything the signature covers.
pub struct SignRequest<'a> {
    pub method: &'a str,
    /// Canonical URI (path-style key when bucket-in-path addressing).
    pub uri: &'a str,
    /// Canonical query string, already sorted and encoded.
    pub query: &'a str,
    pub host: &'a str,
    pub region: &'a str,
    /// `YYYYMMDDTHHMMSSZ`.
    pub datetime: &'a str,
    pub body_sha256: &'a str,
    pub storage_class: Option<&'a str>,
}

/// Produces the headers to attach: `(name, value)` pairs including
/// `Authorization`.
pub fn sign(req: &SignRequest<'_>, creds: &Credentials) -> Vec<(String, String)> {
    let mut canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        req.host, req.body_sha256, req.datetime
    );
    let mut signed_headers =
        String::from("host;x-amz-content-sha256;x-amz-date");

    if let Some(token) = &creds.token {
        canonical_headers.push_str(&format!("x-amz-security-token:{token}\n"));
        signed_headers.push_str(";x-amz-security-token");
    }
    if let Some(class) = req.storage_class {
        canonical_headers.push_str(&format!("x-amz-storage-class:{class}\n"));
        signed_headers.push_str(";x-amz-storage-class");
    }

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        req.uri,
        req.query,
        canonical_headers,
        signed_headers,
        req.body_sha256
    );

    let date = &req.datetime[..8];
    let scope = format!("{date}/{}/s3/aws4_request", req.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{scope}\n{}",
        req.datetime,
        sha256_hex(canonical_request.as_bytes())
    );

    let k_secret = format!("AWS4{}", creds.secret_access_key);
    let k_date = hmac_sha256(k_secret.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, req.region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    let k_signing = hmac_sha256(&k_service, b"aws4_request");
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope},SignedHeaders={signed_headers},Signature={signature}",
        creds.access_key_id
    );

    let mut headers = vec![
        ("Authorization".to_string(), authorization),
        (
            "x-amz-content-sha256".to_string(),
            req.body_sha256.to_string(),
        ),
        ("x-amz-date".to_string(), req.datetime.to_string()),
    ];
    if let Some(token) = &creds.token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }
    if let Some(class) = req.storage_class {
        headers.push(("x-amz-storage-class".to_string(), class.to_string()));
    }
    headers
}

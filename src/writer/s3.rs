// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Multipart S3 uploads.
//!
//! Each output file is one multipart upload: an initiation POST yields the
//! UploadId, parts PUT as the packet stream fills buffers, and a completion
//! POST lists the collected etags once every part is acknowledged. Parts
//! produced before the UploadId arrives queue on the file and drain when
//! the initiation response lands.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
};

use anyhow::Result;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    writer::{
        creds::CredStore,
        http::HttpClient,
        metadata::MetadataSink,
        sigv4::{SignRequest, sha256_hex, sign},
    },
};

pub struct S3File {
    pub file_num: u32,
    /// Display name, `s3://region/bucket/...`.
    pub file_name: String,
    /// Key path beginning with `/`.
    pub object_path: String,
    pub upload_id: Option<String>,
    /// Next part number to assign; 0 until initiation completes.
    pub part_number: u32,
    pub part_responses: u32,
    pub etags: BTreeMap<u32, String>,
    /// Parts waiting for the UploadId.
    pub pending: Vec<Bytes>,
    pub do_close: bool,
    pub packets: u64,
    pub packet_bytes: u64,
}

pub type SharedS3File = Arc<Mutex<S3File>>;

fn lock(file: &SharedS3File) -> std::sync::MutexGuard<'_, S3File> {
    match file.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct S3Inner {
    bucket: String,
    region: String,
    host: String,
    scheme: &'static str,
    path_style: bool,
    storage_class: String,
    node_name: String,
    extension: &'static str,
    client: HttpClient,
    creds: CredStore,
    sink: MetadataSink,
    queue: AtomicUsize,
    file_counter: AtomicU32,
}

/// Cloneable handle shared by every packet worker.
#[derive(Clone)]
pub struct S3Uploader {
    inner: Arc<S3Inner>,
}

impl S3Uploader {
    pub fn new(
        cfg: &Config,
        client: HttpClient,
        creds: CredStore,
        sink: MetadataSink,
    ) -> Self {
        S3Uploader {
            inner: Arc::new(S3Inner {
                bucket: cfg.s3_bucket.clone(),
                region: cfg.s3_region.clone(),
                host: cfg.s3_endpoint_host(),
                scheme: if cfg.s3_use_http { "http" } else { "https" },
                path_style: cfg.s3_path_style(),
                storage_class: cfg.s3_storage_class.clone(),
                node_name: cfg.node_name.clone(),
                extension: cfg.s3_compression.extension(),
                client,
                creds,
                sink,
                queue: AtomicUsize::new(0),
                file_counter: AtomicU32::new(1),
            }),
        }
    }

    /// Queued buffers plus in-flight requests; nonzero means "not ready to
    /// exit".
    pub fn queue_length(&self) -> usize {
        self.inner.queue.load(Ordering::Relaxed)
    }

    /// Starts a new output file and its multipart upload.
    pub fn create_file(&self, ts_sec: u64) -> SharedS3File {
        let inner = &self.inner;
        let file_num = inner.file_counter.fetch_add(1, Ordering::Relaxed);
        let date = Utc
            .timestamp_opt(ts_sec as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let object_path = format!(
            "/{}/{file_num:x}-{}-{file_num}.pcap{}",
            inner.node_name,
            date.format("%y%m%d"),
            inner.extension
        );
        let file_name = format!(
            "s3://{}/{}{}",
            inner.region, inner.bucket, object_path
        );

        let file = Arc::new(Mutex::new(S3File {
            file_num,
            file_name,
            object_path,
            upload_id: None,
            part_number: 0,
            part_responses: 0,
            etags: BTreeMap::new(),
            pending: Vec::new(),
            do_close: false,
            packets: 0,
            packet_bytes: 0,
        }));

        self.spawn_init(Arc::clone(&file));
        file
    }

    /// Queues one upload part for the file.
    pub fn send_part(&self, file: &SharedS3File, data: Vec<u8>) {
        let data = Bytes::from(data);
        let mut guard = lock(file);
        if guard.upload_id.is_some() {
            let part = guard.part_number;
            guard.part_number += 1;
            let (path, upload_id) = (
                guard.object_path.clone(),
                guard.upload_id.clone().unwrap_or_default(),
            );
            drop(guard);
            self.spawn_part(Arc::clone(file), path, upload_id, part, data);
        } else {
            guard.pending.push(data);
        }
    }

    /// Marks the file finished; completion posts once outstanding parts
    /// acknowledge.
    pub fn close_file(&self, file: &SharedS3File) {
        {
            let mut guard = lock(file);
            guard.do_close = true;
        }
        self.maybe_complete(file);
    }

    // ── request plumbing ─────────────────────────────────────────────────

    fn canonical_uri(&self, object_path: &str) -> String {
        if self.inner.path_style {
            format!("/{}{}", self.inner.bucket, object_path)
        } else {
            object_path.to_string()
        }
    }

    async fn signed_request(
        &self,
        method: &str,
        object_path: &str,
        query: &str,
        body: Bytes,
        storage_class: bool,
    ) -> Result<crate::writer::http::HttpResponse> {
        let inner = &self.inner;
        let uri = self.canonical_uri(object_path);
        let datetime = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let body_hash = sha256_hex(&body);
        let creds = inner.creds.get();

        let mut headers = sign(
            &SignRequest {
                method,
                uri: &uri,
                query,
                host: &inner.host,
                region: &inner.region,
                datetime: &datetime,
                body_sha256: &body_hash,
                storage_class: storage_class.then_some(inner.storage_class.as_str()),
            },
            &creds,
        );
        headers.push(("Host".to_string(), inner.host.clone()));

        let url = if query.is_empty() {
            format!("{}://{}{uri}", inner.scheme, inner.host)
        } else {
            format!("{}://{}{uri}?{query}", inner.scheme, inner.host)
        };
        inner.client.request(method, &url, &headers, body).await
    }

    fn spawn_init(&self, file: SharedS3File) {
        let this = self.clone();
        self.inner.queue.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let path = lock(&file).object_path.clone();
            let result = this
                .signed_request("POST", &path, "uploads=", Bytes::new(), true)
                .await;
            this.inner.queue.fetch_sub(1, Ordering::Relaxed);

            let response = match result {
                Ok(r) => r,
                Err(err) => {
                    warn!(error = %err, "s3 initiate failed");
                    return;
                },
            };
            if response.status.as_u16() != 200 {
                warn!(
                    code = response.status.as_u16(),
                    body = %String::from_utf8_lossy(&response.body[..response.body.len().min(200)]),
                    "bad initiate response"
                );
            }

            let body = String::from_utf8_lossy(&response.body);
            let upload_id = body
                .split("<UploadId>")
                .nth(1)
                .and_then(|tail| tail.split("</UploadId>").next())
                .map(|s| s.to_string());
            let Some(upload_id) = upload_id else {
                warn!(body = %body, "no UploadId in s3 response");
                return;
            };

            // Drain parts buffered while the initiation was in flight.
            let (path, queued) = {
                let mut guard = lock(&file);
                guard.upload_id = Some(upload_id.clone());
                guard.part_number = 1;
                guard.part_responses = 1;
                (guard.object_path.clone(), std::mem::take(&mut guard.pending))
            };
            for data in queued {
                let part = {
                    let mut guard = lock(&file);
                    let part = guard.part_number;
                    guard.part_number += 1;
                    part
                };
                this.spawn_part(
                    Arc::clone(&file),
                    path.clone(),
                    upload_id.clone(),
                    part,
                    data,
                );
            }
        });
    }

    fn spawn_part(
        &self,
        file: SharedS3File,
        path: String,
        upload_id: String,
        part: u32,
        data: Bytes,
    ) {
        let this = self.clone();
        self.inner.queue.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let query = format!("partNumber={part}&uploadId={upload_id}");
            debug!(file = %lock(&file).file_name, %query, "part request");
            let result = this
                .signed_request("PUT", &path, &query, data, false)
                .await;
            this.inner.queue.fetch_sub(1, Ordering::Relaxed);

            match result {
                Ok(response) => {
                    if response.status.as_u16() != 200 {
                        warn!(
                            code = response.status.as_u16(),
                            body = %String::from_utf8_lossy(
                                &response.body[..response.body.len().min(200)]
                            ),
                            "bad part response"
                        );
                    }
                    if let Some(etag) = response.headers.get("etag") {
                        let etag =
                            String::from_utf8_lossy(etag.as_bytes()).into_owned();
                        let etag = etag.trim_matches('"').to_string();
                        lock(&file).etags.insert(part, etag);
                    }
                },
                Err(err) => warn!(error = %err, part, "s3 part upload failed"),
            }

            lock(&file).part_responses += 1;
            this.maybe_complete(&file);
        });
    }

    fn maybe_complete(&self, file: &SharedS3File) {
        let (ready, path, upload_id, parts) = {
            let guard = lock(file);
            let ready = guard.do_close
                && guard.upload_id.is_some()
                && guard.part_number == guard.part_responses;
            (
                ready,
                guard.object_path.clone(),
                guard.upload_id.clone().unwrap_or_default(),
                guard.etags.clone(),
            )
        };
        if !ready {
            return;
        }

        let mut body = String::from("<CompleteMultipartUpload>\n");
        for (number, etag) in parts {
            body.push_str(&format!(
                "<Part><PartNumber>{number}</PartNumber><ETag>{etag}</ETag></Part>\n"
            ));
        }
        body.push_str("</CompleteMultipartUpload>\n");

        let this = self.clone();
        let file = Arc::clone(file);
        self.inner.queue.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            let query = format!("uploadId={upload_id}");
            let result = this
                .signed_request("POST", &path, &query, Bytes::from(body), false)
                .await;
            this.inner.queue.fetch_sub(1, Ordering::Relaxed);

            match result {
                Ok(response) if response.status.as_u16() == 200 => {
                    let guard = lock(&file);
                    debug!(
                        file = %guard.file_name,
                        packets = guard.packets,
                        bytes = guard.packet_bytes,
                        "upload complete"
                    );
                    // One document per capture file for the search backend.
                    this.inner.sink.send(serde_json::json!({
                        "num": guard.file_num,
                        "name": guard.file_name,
                        "node": this.inner.node_name,
                        "packets": guard.packets,
                        "packetBytes": guard.packet_bytes,
                    }));
                },
                Ok(response) => warn!(
                    code = response.status.as_u16(),
                    file = %lock(&file).file_name,
                    body = %String::from_utf8_lossy(
                        &response.body[..response.body.len().min(200)]
                    ),
                    "bad complete response"
                ),
                Err(err) => warn!(error = %err, "s3 completion failed"),
            }
        });
    }
}

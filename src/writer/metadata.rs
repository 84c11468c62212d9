// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session metadata sink: one JSON document per saved session (and per
//! capture file), handed to the HTTP client for delivery to the search
//! backend. Without a configured URL, documents are traced and dropped.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::writer::http::HttpClient;

/// Cloneable producer handle used by packet workers.
#[derive(Clone)]
pub struct MetadataSink {
    tx: mpsc::UnboundedSender<Value>,
    queued: Arc<AtomicUsize>,
}

impl MetadataSink {
    /// Builds the sink and spawns its delivery task.
    pub fn start(url: Option<String>, client: HttpClient) -> MetadataSink {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        let queued = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&queued);

        tokio::spawn(async move {
            while let Some(doc) = rx.recv().await {
                match &url {
                    Some(url) => {
                        let body = Bytes::from(doc.to_string());
                        let headers = [(
                            "Content-Type".to_string(),
                            "application/json".to_string(),
                        )];
                        match client.request("POST", url, &headers, body).await {
                            Ok(response) if response.status.is_success() => {},
                            Ok(response) => warn!(
                                code = response.status.as_u16(),
                                "metadata delivery rejected"
                            ),
                            Err(err) => {
                                warn!(error = %err, "metadata delivery failed");
                            },
                        }
                    },
                    None => debug!(session = %doc, "session document"),
                }
                counter.fetch_sub(1, Ordering::Relaxed);
            }
        });

        MetadataSink { tx, queued }
    }

    /// Sink that drops everything; for dry runs and tests.
    pub fn null() -> MetadataSink {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        MetadataSink {
            tx,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn send(&self, doc: Value) {
        self.queued.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(doc).is_err() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Documents accepted but not yet delivered.
    pub fn queue_length(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

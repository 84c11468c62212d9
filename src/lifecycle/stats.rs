// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{Arc, atomic::{AtomicU64, Ordering}};

use serde_json::{Value, json};

use crate::packet::PacketRc;

/// Process-wide counters. Relaxed ordering everywhere: these are
/// monotonically increasing telemetry, not synchronization.
#[derive(Debug, Default)]
pub struct Stats {
    pub packets_read: AtomicU64,
    pub packets_processed: AtomicU64,
    pub packets_corrupt: AtomicU64,
    pub packets_unknown: AtomicU64,
    pub sessions_created: AtomicU64,
    pub sessions_saved: AtomicU64,
}

impl Stats {
    pub fn new() -> Arc<Stats> {
        Arc::new(Stats::default())
    }

    #[inline]
    pub fn bump_read(&self) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bump_drop(&self, rc: PacketRc) {
        match rc {
            PacketRc::Corrupt => {
                self.packets_corrupt.fetch_add(1, Ordering::Relaxed);
            },
            PacketRc::Unknown => {
                self.packets_unknown.fetch_add(1, Ordering::Relaxed);
            },
            _ => {},
        }
    }

    pub fn snapshot(&self) -> Value {
        json!({
            "packetsRead": self.packets_read.load(Ordering::Relaxed),
            "packetsProcessed": self.packets_processed.load(Ordering::Relaxed),
            "packetsCorrupt": self.packets_corrupt.load(Ordering::Relaxed),
            "packetsUnknown": self.packets_unknown.load(Ordering::Relaxed),
            "sessionsCreated": self.sessions_created.load(Ordering::Relaxed),
            "sessionsSaved": self.sessions_saved.load(Ordering::Relaxed),
        })
    }
}

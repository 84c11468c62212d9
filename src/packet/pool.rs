// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use crate::packet::packet::Packet;

/// Bounded free list of packet buffers with heap fallback.
///
/// Readers draw buffers here and packet workers return them once both the
/// session path and the writer are done with a packet. The pool never blocks:
/// an empty pool allocates, a full pool drops the returned buffer.
#[derive(Debug)]
pub struct PacketPool {
    free: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    buf_size: usize,
    in_use: AtomicUsize,
}

pub type SharedPool = Arc<PacketPool>;

impl PacketPool {
    pub fn new(capacity: usize, buf_size: usize) -> SharedPool {
        Arc::new(PacketPool {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            buf_size,
            in_use: AtomicUsize::new(0),
        })
    }

    /// Takes a cleared buffer, allocating on exhaustion.
    pub fn take(&self) -> Vec<u8> {
        self.in_use.fetch_add(1, Ordering::Relaxed);
        let mut free = match self.free.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        free.pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buf_size))
    }

    /// Returns a packet's buffer to the free list.
    pub fn give(&self, mut packet: Packet) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        packet.buf.clear();
        let mut free = match self.free.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        if free.len() < self.capacity {
            free.push(packet.buf);
        }
    }

    /// Buffers currently checked out. Zero after shutdown is an invariant
    /// the quit path asserts on.
    pub fn outstanding(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

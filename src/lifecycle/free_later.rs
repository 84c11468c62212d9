// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Delayed destruction with a grace period.
//!
//! Values that other tasks might still be reading (swapped credentials,
//! retired lookup tables) are parked here instead of dropped; the timer
//! loop drains entries once their grace has elapsed. The grace duration is
//! a tunable (`freeLaterGrace`), seven seconds by default.

use std::{
    any::Any,
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Instant,
};

/// Ring capacity; exceeding it drops the oldest entry immediately, as a
/// full ring means the drain is badly behind.
const MAX_ENTRIES: usize = 4096;

struct Entry {
    deadline: Instant,
    value: Box<dyn Any + Send>,
}

struct Inner {
    entries: VecDeque<Entry>,
    grace_secs: u64,
}

/// Cloneable handle to the process-wide delayed-destruction ring.
#[derive(Clone)]
pub struct FreeLater {
    inner: Arc<Mutex<Inner>>,
}

impl FreeLater {
    pub fn new(grace_secs: u64) -> Self {
        FreeLater {
            inner: Arc::new(Mutex::new(Inner {
                entries: VecDeque::new(),
                grace_secs,
            })),
        }
    }

    /// Parks a value until the grace period passes.
    pub fn defer<T: Send + 'static>(&self, value: T) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.entries.len() >= MAX_ENTRIES {
            inner.entries.pop_front();
        }
        let deadline =
            Instant::now() + std::time::Duration::from_secs(inner.grace_secs);
        inner.entries.push_back(Entry {
            deadline,
            value: Box::new(value),
        });
    }

    /// Drops every entry whose grace has elapsed; returns how many went.
    pub fn drain(&self) -> usize {
        let now = Instant::now();
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut dropped = 0;
        while let Some(front) = inner.entries.front() {
            if front.deadline > now {
                break;
            }
            inner.entries.pop_front();
            dropped += 1;
        }
        dropped
    }

    /// Outstanding parked values.
    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything regardless of deadline; used at final shutdown.
    pub fn drain_all(&self) {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.entries.clear();
    }
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use crate::session::{id::SessionId, session::Session};

/// Slot-count ladder; the table picks the first prime at or above the
/// configured target.
const PRIME_LADDER: &[u32] = &[
    101, 211, 503, 1009, 2003, 5003, 10007, 21001, 50021, 100003, 200003, 500009,
    1000003, 2000003, 5000011, 10000019,
];

/// Timeout wheel span in seconds; idle timeouts beyond this are clamped.
const WHEEL_SECONDS: usize = 1024;

fn pick_slots(target: u32) -> usize {
    for &p in PRIME_LADDER {
        if p >= target {
            return p as usize;
        }
    }
    *PRIME_LADDER.last().unwrap_or(&100003) as usize
}

/// Per-worker session table: chained hash buckets plus a second-resolution
/// timeout wheel. Never touched by more than one task.
pub struct SessionTable {
    buckets: Vec<Vec<Session>>,
    wheel: Vec<Vec<SessionId>>,
    wheel_pos: usize,
    wheel_sec: u64,
    count: usize,
}

impl SessionTable {
    pub fn new(target: u32) -> Self {
        let slots = pick_slots(target);
        SessionTable {
            buckets: (0..slots).map(|_| Vec::new()).collect(),
            wheel: (0..WHEEL_SECONDS).map(|_| Vec::new()).collect(),
            wheel_pos: 0,
            wheel_sec: 0,
            count: 0,
        }
    }

    #[inline]
    fn bucket_idx(&self, id: &SessionId) -> usize {
        id.hash() as usize % self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        let b = self.bucket_idx(id);
        self.buckets[b].iter_mut().find(|s| s.id == *id)
    }

    /// Looks the flow up, creating and wheel-enqueueing a session on miss.
    /// Returns the session and whether it was just created.
    pub fn lookup_or_create(
        &mut self,
        id: SessionId,
        mprotocol: u8,
        ts_sec: u64,
    ) -> (&mut Session, bool) {
        let b = self.bucket_idx(&id);
        if let Some(pos) = self.buckets[b].iter().position(|s| s.id == id) {
            let session = &mut self.buckets[b][pos];
            session.last_sec = session.last_sec.max(ts_sec);
            return (session, false);
        }

        let session = Session::new(id, mprotocol, ts_sec);
        // First wheel visit happens on the next tick; the visit reinserts
        // the session at its real deadline.
        let wheel_slot = (ts_sec as usize + 1) % WHEEL_SECONDS;
        self.wheel[wheel_slot].push(id);
        self.buckets[b].push(session);
        self.count += 1;
        let last = self.buckets[b].len() - 1;
        (&mut self.buckets[b][last], true)
    }

    fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let b = self.bucket_idx(id);
        let pos = self.buckets[b].iter().position(|s| s.id == *id)?;
        self.count -= 1;
        Some(self.buckets[b].swap_remove(pos))
    }

    /// Advances the wheel to `now`, expiring sessions idle past their
    /// per-mProtocol timeout. Sessions with outstanding references are
    /// pushed one slot forward instead of expiring.
    pub fn expire<F>(&mut self, now: u64, timeout_of: F) -> Vec<Session>
    where F: Fn(u8) -> u32 {
        let mut expired = Vec::new();
        if self.wheel_sec == 0 {
            self.wheel_sec = now;
            self.wheel_pos = (now as usize) % WHEEL_SECONDS;
            return expired;
        }

        // A large clock jump needs at most one revolution: every slot gets
        // visited once on the way to `now`.
        if now > self.wheel_sec + WHEEL_SECONDS as u64 {
            self.wheel_sec = now - WHEEL_SECONDS as u64;
        }

        while self.wheel_sec < now {
            self.wheel_sec += 1;
            self.wheel_pos = (self.wheel_sec as usize) % WHEEL_SECONDS;
            let due = std::mem::take(&mut self.wheel[self.wheel_pos]);
            for id in due {
                let (last_sec, mprotocol, busy) = match self.get_mut(&id) {
                    Some(s) => (s.last_sec, s.mprotocol, s.outstanding > 0),
                    None => continue,
                };
                let timeout = timeout_of(mprotocol).min(WHEEL_SECONDS as u32 - 2) as u64;
                if busy {
                    let slot = (self.wheel_sec as usize + 1) % WHEEL_SECONDS;
                    self.wheel[slot].push(id);
                } else if last_sec + timeout <= self.wheel_sec {
                    if let Some(session) = self.remove(&id) {
                        expired.push(session);
                    }
                } else {
                    // Lazy reinsertion at the refreshed deadline.
                    let slot = ((last_sec + timeout) as usize) % WHEEL_SECONDS;
                    self.wheel[slot].push(id);
                }
            }
        }
        expired
    }

    /// Drains every tracked session; used at quiesce.
    pub fn drain_all(&mut self) -> Vec<Session> {
        let mut all = Vec::with_capacity(self.count);
        for bucket in self.buckets.iter_mut() {
            all.append(bucket);
        }
        for slot in self.wheel.iter_mut() {
            slot.clear();
        }
        self.count = 0;
        all
    }
}

//! Packet value type, bounded buffer pool, and reader-side batching.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod batch;
#[allow(clippy::module_inception)]
pub mod packet;
pub mod pool;

pub use batch::{BATCH_SIZE, PacketBatch};
pub use packet::{Packet, PacketRc, Tunnel};
pub use pool::{PacketPool, SharedPool};

//! Session table, flow canonicalization, and the packet-worker loop.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod id;
#[allow(clippy::module_inception)]
pub mod session;
pub mod table;
pub mod worker;

pub use id::{SessionId, mapped_v4};
pub use session::{FIRST_BYTES, Session};
pub use table::SessionTable;
pub use worker::{PacketWorker, WorkerCommand, WorkerMsg};

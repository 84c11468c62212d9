// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    lifecycle::stats::Stats,
    packet::{Packet, SharedPool},
    parsers::Registry,
    session::{Session, table::SessionTable},
    writer::{PacketWriter, metadata::MetadataSink},
};

/// Closure executed inline on a packet worker, between batches.
pub type WorkerCommand = Box<dyn FnOnce(&mut PacketWorker) + Send>;

/// Everything a packet worker can be asked to do.
pub enum WorkerMsg {
    /// Packets whose flow hash maps to this worker, in capture order.
    Batch(Vec<Packet>),
    Command(WorkerCommand),
    /// Wall-clock tick; advances the timeout wheel in live operation.
    Tick(u64),
    /// Save and drop every session (quiesce).
    Flush,
    Exit,
}

/// One packet thread: owns a session-table shard and processes its share of
/// the traffic serially.
pub struct PacketWorker {
    pub idx: usize,
    pub table: SessionTable,
    pub registry: Arc<Registry>,
    pub writer: Box<dyn PacketWriter>,
    pub sink: MetadataSink,
    pub pool: SharedPool,
    pub stats: Arc<Stats>,
    pub node_name: String,
    /// Tags from the CLI, applied to every session at save time.
    pub extra_tags: Vec<String>,
    /// `--op expression=value` pairs applied to every session at save time.
    pub field_ops: Vec<(String, String)>,
}

impl PacketWorker {
    /// Drains the channel until `Exit`. Sessions left at exit have already
    /// been flushed by the quiesce sequence.
    pub async fn run(mut self, mut rx: mpsc::Receiver<WorkerMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMsg::Batch(batch) => {
                    for packet in batch {
                        self.process_packet(packet);
                    }
                },
                WorkerMsg::Command(cmd) => cmd(&mut self),
                // Session timeouts are data-driven (packet time); the
                // wall-clock tick only ages the output file.
                WorkerMsg::Tick(now) => self.writer.time_check(now),
                WorkerMsg::Flush => self.flush_sessions(),
                WorkerMsg::Exit => break,
            }
        }
        self.writer.finish();
        debug!(worker = self.idx, "packet worker exited");
    }

    fn process_packet(&mut self, mut packet: Packet) {
        let registry = Arc::clone(&self.registry);
        let mp = registry.mprotocol(packet.mprotocol);
        let id = (mp.create_session_id)(&packet);
        let now = packet.ts_sec;

        let (session, is_new) =
            self.table.lookup_or_create(id, packet.mprotocol, now);
        if is_new {
            session.vlan = packet.vlan;
            session.vni = packet.vni;
            self.stats.sessions_created.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }

        if let Some(pre) = mp.pre_process {
            pre(session, &mut packet, is_new, &registry);
        }

        let dir = packet.direction as usize;
        session.packets[dir] += 1;
        session.bytes[dir] += packet.caplen() as u64;
        session.last_sec = session.last_sec.max(now);

        if let Some(process) = mp.process {
            process(session, &packet, &registry);
        }

        let stop_saving = session.stop_saving;
        if !stop_saving {
            self.writer.write(&mut packet);
            if packet.writer_file_num != 0 {
                if let Some(session) = self.table.get_mut(&id) {
                    session
                        .packet_positions
                        .push((packet.writer_file_num, packet.writer_file_pos));
                }
            }
        }

        self.stats
            .packets_processed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.pool.give(packet);

        self.expire(now);
    }

    fn expire(&mut self, now: u64) {
        let registry = Arc::clone(&self.registry);
        let expired = self
            .table
            .expire(now, |mp| registry.mprotocol_timeout(mp));
        for session in expired {
            self.save_session(session);
        }
    }

    fn flush_sessions(&mut self) {
        let all = self.table.drain_all();
        debug!(worker = self.idx, sessions = all.len(), "flushing sessions");
        for session in all {
            self.save_session(session);
        }
    }

    fn save_session(&mut self, mut session: Session) {
        if session.stop_spi {
            return;
        }
        for tag in &self.extra_tags {
            session.add_tag(tag);
        }
        for (expression, value) in &self.field_ops {
            if let Some(pos) = self.registry.schema.by_expression(expression) {
                session
                    .fields
                    .add_string(&self.registry.schema, pos, value);
            }
        }
        let doc = session.to_json(&self.registry.schema, &self.node_name);
        self.sink.send(doc);
        self.stats
            .sessions_saved
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
}

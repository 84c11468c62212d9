// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use tokio::sync::mpsc;

use crate::{packet::packet::Packet, session::WorkerMsg};

/// Default number of packets a reader collects before flushing.
pub const BATCH_SIZE: usize = 256;

/// Reader-side packet batch, partitioned by flow hash.
///
/// Packets accumulate per destination worker; `flush` moves each partition
/// onto its worker's bounded channel in one send. Awaiting the send is the
/// back-pressure point for readers.
pub struct PacketBatch {
    partitions: Vec<Vec<Packet>>,
    senders: Vec<mpsc::Sender<WorkerMsg>>,
    count: usize,
}

impl PacketBatch {
    pub fn new(senders: Vec<mpsc::Sender<WorkerMsg>>) -> Self {
        let partitions = senders.iter().map(|_| Vec::new()).collect();
        PacketBatch {
            partitions,
            senders,
            count: 0,
        }
    }

    /// Queues a packet for the worker its flow hash maps to.
    #[inline]
    pub fn push(&mut self, packet: Packet) {
        let idx = packet.hash as usize % self.partitions.len();
        self.partitions[idx].push(packet);
        self.count += 1;
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count >= BATCH_SIZE
    }

    /// Sends every non-empty partition to its worker, awaiting channel
    /// capacity.
    pub async fn flush(&mut self) -> Result<()> {
        for (idx, part) in self.partitions.iter_mut().enumerate() {
            if part.is_empty() {
                continue;
            }
            let batch = std::mem::take(part);
            self.senders[idx]
                .send(WorkerMsg::Batch(batch))
                .await
                .map_err(|_| anyhow::anyhow!("packet worker {idx} is gone"))?;
        }
        self.count = 0;
        Ok(())
    }
}

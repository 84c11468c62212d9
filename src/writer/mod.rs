//! Durable packet writer: block-compressed pcap accumulated into multipart
//! S3 uploads, with packed file positions for random access.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod block;
pub mod creds;
pub mod http;
pub mod metadata;
pub mod pcap;
pub mod s3;
pub mod sigv4;

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use anyhow::Result;
use tracing::{debug, warn};
use zerocopy::IntoBytes;

use crate::{
    cfg::config::Config,
    packet::Packet,
    writer::{
        block::BlockWriter,
        pcap::{PcapFileHeader, PcapRecordHeader},
        s3::{S3Uploader, SharedS3File},
    },
};

/// Multipart uploads refuse parts under 5 MiB (except the last).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Per-worker packet writer. The current output file is owned by exactly
/// one packet worker; completed buffers move to the upload subsystem.
pub trait PacketWriter: Send {
    /// Appends one packet, assigning its file number and packed position.
    fn write(&mut self, packet: &mut Packet);
    /// Rolls the file when it has outlived `maxFileTimeM`.
    fn time_check(&mut self, now_sec: u64);
    /// Final flush at worker exit.
    fn finish(&mut self);
}

/// Writer for dry runs: packets flow through untouched.
pub struct NullWriter;

impl PacketWriter for NullWriter {
    fn write(&mut self, _packet: &mut Packet) {}
    fn time_check(&mut self, _now_sec: u64) {}
    fn finish(&mut self) {}
}

struct ActiveFile {
    handle: SharedS3File,
    block: BlockWriter,
    file_num: u32,
    created_sec: u64,
}

/// S3-backed writer, one per packet worker.
pub struct S3PacketWriter {
    uploader: S3Uploader,
    current: Option<ActiveFile>,
    cfg: WriterConfig,
    link_type: Arc<AtomicU32>,
}

#[derive(Clone)]
struct WriterConfig {
    pcap_write_size: usize,
    max_file_size: u64,
    max_file_time_secs: u64,
    block_size: u32,
    compression: crate::cfg::enums::CompressionMode,
    compression_level: u32,
    snap_len: u32,
}

impl S3PacketWriter {
    pub fn new(cfg: &Config, uploader: S3Uploader, link_type: Arc<AtomicU32>) -> Self {
        S3PacketWriter {
            uploader,
            current: None,
            cfg: WriterConfig {
                pcap_write_size: cfg.pcap_write_size.max(MIN_PART_SIZE),
                max_file_size: cfg.max_file_size_b,
                max_file_time_secs: cfg.max_file_time_m * 60,
                block_size: cfg.s3_compression_block_size,
                compression: cfg.s3_compression,
                compression_level: cfg.s3_compression_level,
                snap_len: cfg.snap_len,
            },
            link_type,
        }
    }

    fn open_file(&mut self, ts_sec: u64) -> Result<&mut ActiveFile> {
        if self.current.is_none() {
            // Packet time names the file; wall time ages it.
            let created_sec = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let handle = self.uploader.create_file(ts_sec);
            let file_num = {
                match handle.lock() {
                    Ok(g) => g.file_num,
                    Err(poisoned) => poisoned.into_inner().file_num,
                }
            };
            let mut block = BlockWriter::new(
                self.cfg.compression,
                self.cfg.compression_level,
                self.cfg.block_size,
            )?;

            // The global header gets its own block so a reader can fetch it
            // without touching packet data.
            let link_type = self.link_type.load(Ordering::Relaxed);
            let header = PcapFileHeader::new(self.cfg.snap_len, link_type);
            block.append(header.as_bytes(), false, 0)?;
            block.new_block()?;

            debug!(file_num, "opened output file");
            self.current = Some(ActiveFile {
                handle,
                block,
                file_num,
                created_sec,
            });
        }
        #[allow(clippy::expect_used)]
        Ok(self.current.as_mut().expect("just placed"))
    }

    fn ship_ready_parts(&mut self) {
        let min = self.cfg.pcap_write_size;
        if let Some(file) = self.current.as_mut() {
            while let Some(part) = file.block.take_part(min) {
                self.uploader.send_part(&file.handle, part);
            }
        }
    }

    fn roll(&mut self) {
        let Some(mut file) = self.current.take() else {
            return;
        };
        if let Err(err) = file.block.finish() {
            warn!(error = %err, "failed to finish output stream");
        }
        while let Some(part) = file.block.take_part(self.cfg.pcap_write_size) {
            self.uploader.send_part(&file.handle, part);
        }
        if let Some(rest) = file.block.take_rest() {
            self.uploader.send_part(&file.handle, rest);
        }
        self.uploader.close_file(&file.handle);
    }
}

impl PacketWriter for S3PacketWriter {
    fn write(&mut self, packet: &mut Packet) {
        let header = PcapRecordHeader {
            ts_sec: packet.ts_sec as u32,
            ts_usec: packet.ts_usec,
            caplen: packet.caplen() as u32,
            len: packet.wire_len,
        };

        let ts_sec = packet.ts_sec;
        let file = match self.open_file(ts_sec) {
            Ok(f) => f,
            Err(err) => {
                warn!(error = %err, "cannot open output file; dropping write");
                return;
            },
        };

        let caplen = packet.caplen();
        let pos = match file.block.append(header.as_bytes(), true, caplen) {
            Ok(pos) => pos,
            Err(err) => {
                warn!(error = %err, "output append failed");
                return;
            },
        };
        if let Err(err) = file.block.append(&packet.buf, false, 0) {
            warn!(error = %err, "output append failed");
            return;
        }

        {
            let mut guard = match file.handle.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.packets += 1;
            guard.packet_bytes += caplen as u64;
        }

        packet.writer_file_num = file.file_num;
        packet.writer_file_pos = pos;

        let over_size = file.block.total_out() >= self.cfg.max_file_size;
        self.ship_ready_parts();
        if over_size {
            self.roll();
        }
    }

    fn time_check(&mut self, now_sec: u64) {
        if self.cfg.max_file_time_secs == 0 {
            return;
        }
        let expired = match &self.current {
            Some(file) => {
                file.block.total_out() > pcap::FILE_HEADER_LEN as u64
                    && now_sec.saturating_sub(file.created_sec)
                        >= self.cfg.max_file_time_secs
            },
            None => false,
        };
        if expired {
            self.roll();
        }
    }

    fn finish(&mut self) {
        self.roll();
    }
}

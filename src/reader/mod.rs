//! Offline capture input: a scheme registry (`file://`, directories,
//! stdin `-`) feeding the decapsulation pipeline and the per-worker
//! dispatch queues.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod pcap;

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{io::AsyncReadExt, sync::mpsc};
use tracing::{debug, info, warn};

use crate::{
    decap,
    lifecycle::stats::Stats,
    packet::{Packet, PacketBatch, PacketRc, SharedPool},
    parsers::Registry,
    reader::pcap::{PcapStream, RawRecord},
    session::WorkerMsg,
};

const READ_CHUNK: usize = 0xf_ffff;

bitflags::bitflags! {
    /// How a scheme walks its input.
    #[derive(Debug, Clone, Copy)]
    pub struct SchemeFlags: u8 {
        const RECURSIVE = 0x01;
        const MONITOR   = 0x02;
        const DELETE    = 0x04;
        const SKIP      = 0x08;
    }
}

/// Everything a reader needs to turn bytes into dispatched packets.
pub struct Reader {
    pub registry: Arc<Registry>,
    pub pool: SharedPool,
    pub stats: Arc<Stats>,
    batch: PacketBatch,
    reader_idx: u8,
    seen: HashSet<PathBuf>,
    link_type_out: Option<Arc<AtomicU32>>,
}

impl Reader {
    pub fn new(
        registry: Arc<Registry>,
        pool: SharedPool,
        stats: Arc<Stats>,
        senders: Vec<mpsc::Sender<WorkerMsg>>,
        reader_idx: u8,
    ) -> Self {
        Reader {
            registry,
            pool,
            stats,
            batch: PacketBatch::new(senders),
            reader_idx,
            seen: HashSet::new(),
            link_type_out: None,
        }
    }

    /// Publishes the link type of the current input for the writer side.
    pub fn link_type_out(&mut self, out: Arc<AtomicU32>) {
        self.link_type_out = Some(out);
    }

    /// Resolves the scheme prefix and loads one input URI.
    pub async fn load(&mut self, uri: &str, flags: SchemeFlags) -> Result<()> {
        // Only the file scheme is registered in this build; unknown schemes
        // are refused rather than guessed at.
        let path = match uri.split_once("://") {
            None => uri,
            Some(("file", rest)) => rest,
            Some((scheme, _)) => {
                anyhow::bail!("unsupported capture scheme {scheme}://")
            },
        };

        if path == "-" {
            return self.load_stdin().await;
        }

        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot stat {path}"))?;
        if meta.is_dir() {
            self.load_dir(Path::new(path), flags).await
        } else {
            self.load_file(Path::new(path), flags).await
        }
    }

    /// Watches a directory, processing files as they appear. Polling keeps
    /// this portable; the interval is coarse because capture files are
    /// large and infrequent.
    pub async fn monitor(&mut self, dir: &str, flags: SchemeFlags) -> Result<()> {
        let dir = PathBuf::from(dir);
        loop {
            if let Err(err) = self.load_dir(&dir, flags).await {
                warn!(error = %err, "monitor scan failed");
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    async fn load_dir(&mut self, dir: &Path, flags: SchemeFlags) -> Result<()> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("cannot open pcap directory {dir:?}"))?;
        let mut files = Vec::new();
        let mut dirs = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with('.') {
                continue;
            }
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                dirs.push(path);
            } else if path.extension().is_some_and(|e| e == "pcap") {
                files.push(path);
            }
        }

        files.sort();
        for file in files {
            if self.seen.contains(&file) {
                continue;
            }
            if let Err(err) = self.load_file(&file, flags).await {
                warn!(file = %file.display(), error = %err, "skipping bad file");
            }
        }

        if flags.contains(SchemeFlags::RECURSIVE) {
            for sub in dirs {
                Box::pin(self.load_dir(&sub, flags)).await?;
            }
        }
        Ok(())
    }

    async fn load_file(&mut self, path: &Path, flags: SchemeFlags) -> Result<()> {
        let path = path
            .canonicalize()
            .with_context(|| format!("cannot resolve {path:?}"))?;
        if flags.contains(SchemeFlags::SKIP) && self.seen.contains(&path) {
            debug!(file = %path.display(), "skipping already-processed file");
            return Ok(());
        }

        info!(file = %path.display(), "processing");
        let mut file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("pcap open failed for {path:?}"))?;

        let mut stream = PcapStream::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut records = Vec::new();
        loop {
            let n = file.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            stream.feed(&chunk[..n], &mut records)?;
            self.dispatch_records(&mut records, stream.link_type).await?;
        }
        self.batch.flush().await?;
        self.seen.insert(path.clone());

        if flags.contains(SchemeFlags::DELETE) {
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(file = %path.display(), error = %err, "delete failed");
            }
        }
        Ok(())
    }

    async fn load_stdin(&mut self) -> Result<()> {
        let mut stdin = tokio::io::stdin();
        let mut stream = PcapStream::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut records = Vec::new();
        loop {
            let n = stdin.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            stream.feed(&chunk[..n], &mut records)?;
            self.dispatch_records(&mut records, stream.link_type).await?;
        }
        self.batch.flush().await
    }

    async fn dispatch_records(
        &mut self,
        records: &mut Vec<RawRecord>,
        link_type: u16,
    ) -> Result<()> {
        if let Some(out) = &self.link_type_out {
            out.store(link_type as u32, Ordering::Relaxed);
        }
        for record in records.drain(..) {
            let mut buf = self.pool.take();
            buf.extend_from_slice(&record.data);
            let mut packet = Packet::new(buf, record.ts_sec, record.ts_usec, record.wire_len);
            packet.link_type = link_type;
            packet.reader_idx = self.reader_idx;

            self.stats.bump_read();
            match decap::process_frame(&mut packet, &self.registry) {
                PacketRc::DoProcess => {
                    self.batch.push(packet);
                    if self.batch.is_full() {
                        self.batch.flush().await?;
                    }
                },
                rc => {
                    self.stats.bump_drop(rc);
                    self.pool.give(packet);
                },
            }
        }
        Ok(())
    }

    /// Flushes anything still batched; call when the input set is done.
    pub async fn finish(&mut self) -> Result<()> {
        self.batch.flush().await
    }
}

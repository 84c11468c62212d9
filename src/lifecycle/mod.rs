//! Engine wiring, the cooperative timer loop, and the quiesce protocol.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod command;
pub mod free_later;
pub mod stats;

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result, bail};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cfg::{cli::Cli, config::Config},
    lifecycle::{command::CommandRegistry, free_later::FreeLater, stats::Stats},
    packet::{PacketPool, SharedPool},
    parsers::{self, Registry},
    reader::{Reader, SchemeFlags},
    session::{PacketWorker, SessionTable, WorkerMsg},
    writer::{
        NullWriter, PacketWriter, S3PacketWriter, creds::CredStore, http::HttpClient,
        metadata::MetadataSink, s3::S3Uploader,
    },
};

/// Depth of each worker's inbound channel, in batches.
const WORKER_QUEUE_DEPTH: usize = 64;

type CanQuitFn = Box<dyn Fn() -> usize + Send + Sync>;

fn wall_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The assembled engine: registries, workers, writer, sink, and timers.
pub struct Engine {
    cfg: Config,
    cli: Cli,
    registry: Arc<Registry>,
    stats: Arc<Stats>,
    pool: SharedPool,
    free_later: FreeLater,
    senders: Vec<mpsc::Sender<WorkerMsg>>,
    workers: Vec<JoinHandle<()>>,
    uploader: Option<S3Uploader>,
    sink: MetadataSink,
    link_type: Arc<AtomicU32>,
    cancel: CancellationToken,
    can_quit: Vec<(&'static str, CanQuitFn)>,
}

impl Engine {
    /// Builds every subsystem; any failure here is fatal before the main
    /// loop starts.
    pub async fn build(cli: Cli, mut cfg: Config) -> Result<Engine> {
        if let Some(node) = &cli.node {
            cfg.node_name = node.clone();
        }

        let registry = Arc::new(parsers::init(&cfg));
        let stats = Stats::new();
        let pool = PacketPool::new(8192, cfg.snap_len as usize);
        let free_later = FreeLater::new(cfg.free_later_grace);
        let cancel = CancellationToken::new();
        let link_type = Arc::new(AtomicU32::new(crate::decap::DLT_EN10MB as u32));

        let client = HttpClient::new()?;
        let sink = if cli.dryrun {
            MetadataSink::null()
        } else {
            let url = (!cfg.metadata_url.is_empty()).then(|| cfg.metadata_url.clone());
            MetadataSink::start(url, client.clone())
        };

        let uploader = if cli.dryrun {
            None
        } else {
            if cfg.s3_bucket.is_empty() {
                bail!("must set s3Bucket to save packets");
            }
            let creds = CredStore::init(&cfg, client.clone())
                .await
                .context("cannot initialize s3 credentials")?;
            creds.clone().spawn_refresher(free_later.clone());
            Some(S3Uploader::new(&cfg, client, creds, sink.clone()))
        };

        let mut engine = Engine {
            cfg,
            cli,
            registry,
            stats,
            pool,
            free_later,
            senders: Vec::new(),
            workers: Vec::new(),
            uploader,
            sink,
            link_type,
            cancel,
            can_quit: Vec::new(),
        };
        engine.spawn_workers();
        engine.register_can_quits();
        Ok(engine)
    }

    fn make_writer(&self) -> Box<dyn PacketWriter> {
        match &self.uploader {
            Some(uploader) => Box::new(S3PacketWriter::new(
                &self.cfg,
                uploader.clone(),
                Arc::clone(&self.link_type),
            )),
            None => Box::new(NullWriter),
        }
    }

    fn spawn_workers(&mut self) {
        let per_worker_target =
            (self.cfg.max_streams / self.cfg.packet_threads as u32).max(1024);

        let field_ops: Vec<(String, String)> = self
            .cli
            .ops
            .iter()
            .filter_map(|op| {
                op.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();

        for idx in 0..self.cfg.packet_threads {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
            let worker = PacketWorker {
                idx,
                table: SessionTable::new(per_worker_target),
                registry: Arc::clone(&self.registry),
                writer: self.make_writer(),
                sink: self.sink.clone(),
                pool: Arc::clone(&self.pool),
                stats: Arc::clone(&self.stats),
                node_name: self.cfg.node_name.clone(),
                extra_tags: self.cli.tags.clone(),
                field_ops: field_ops.clone(),
            };
            self.senders.push(tx);
            self.workers.push(tokio::spawn(worker.run(rx)));
        }
    }

    fn register_can_quits(&mut self) {
        if let Some(uploader) = &self.uploader {
            let uploader = uploader.clone();
            self.can_quit
                .push(("writer queue", Box::new(move || uploader.queue_length())));
        }
        let sink = self.sink.clone();
        self.can_quit
            .push(("metadata queue", Box::new(move || sink.queue_length())));
    }

    fn scheme_flags(&self) -> SchemeFlags {
        let mut flags = SchemeFlags::empty();
        if self.cli.recursive {
            flags |= SchemeFlags::RECURSIVE;
        }
        if self.cli.monitor {
            flags |= SchemeFlags::MONITOR;
        }
        if self.cli.delete {
            flags |= SchemeFlags::DELETE;
        }
        if self.cli.skip {
            flags |= SchemeFlags::SKIP;
        }
        flags
    }

    fn command_registry(&self) -> Arc<CommandRegistry> {
        let mut registry = CommandRegistry::new();
        registry.register(
            "version",
            "Print version information",
            Arc::new(|_args| {
                format!("{} {}\n", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            }),
        );
        let stats = Arc::clone(&self.stats);
        registry.register(
            "stats",
            "Print engine counters",
            Arc::new(move |_args| format!("{}\n", stats.snapshot())),
        );
        registry.register(
            "exit",
            "Close the connection, can also use Ctrl-D",
            Arc::new(|_args| String::new()),
        );
        registry.register(
            "shutdown",
            "Initiate graceful shutdown",
            Arc::new(|_args| String::new()),
        );
        Arc::new(registry)
    }

    /// Runs the engine to completion: readers, timers, shutdown.
    pub async fn run(mut self) -> Result<()> {
        if let Some(path) = self.cli.command_socket.clone() {
            let registry = self.command_registry();
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                if let Err(err) = command::serve(path, registry, cancel).await {
                    warn!(error = %err, "command socket failed");
                }
            });
        }

        let reader_task = self.spawn_reader();

        // Cooperative timer loop: free-later drain and worker ticks every
        // second until something asks us to quit.
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut sigint_seen = false;
        let mut tick_count = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.free_later.drain();
                    let now = wall_secs();
                    tick_count += 1;
                    for tx in &self.senders {
                        let _ = tx.try_send(WorkerMsg::Tick(now));
                    }
                    // Writer time-roll check fans out as a per-worker
                    // command every 30 seconds.
                    if tick_count % 30 == 0 {
                        for tx in &self.senders {
                            let _ = tx.try_send(WorkerMsg::Command(Box::new(
                                move |worker| worker.writer.time_check(now),
                            )));
                        }
                    }
                },
                _ = tokio::signal::ctrl_c() => {
                    if sigint_seen {
                        warn!("second interrupt, exiting immediately");
                        std::process::exit(1);
                    }
                    sigint_seen = true;
                    info!("interrupt received, shutting down");
                    self.cancel.cancel();
                },
                _ = self.cancel.cancelled() => break,
            }
        }

        reader_task.abort();
        self.quiesce().await
    }

    fn spawn_reader(&self) -> JoinHandle<()> {
        let mut inputs: Vec<String> = Vec::new();
        inputs.extend(self.cli.pcapfile.iter().cloned());
        inputs.extend(self.cli.pcapdir.iter().cloned());
        let filelists = self.cli.filelist.clone();
        let monitor_dirs = self.cli.monitor.then(|| self.cli.pcapdir.clone());
        let flags = self.scheme_flags();
        let flush_at_end = self.cli.flush;

        let mut reader = Reader::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.stats),
            self.senders.clone(),
            0,
        );
        reader.link_type_out(Arc::clone(&self.link_type));

        let cancel = self.cancel.clone();
        let senders = self.senders.clone();
        tokio::spawn(async move {
            for list in filelists {
                match tokio::fs::read_to_string(&list).await {
                    Ok(content) => inputs.extend(
                        content
                            .lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .map(String::from),
                    ),
                    Err(err) => warn!(file = %list, error = %err, "cannot read filelist"),
                }
            }

            for input in &inputs {
                if cancel.is_cancelled() {
                    return;
                }
                if let Err(err) = reader.load(input, flags).await {
                    warn!(input = %input, error = %err, "input failed");
                }
            }
            if let Err(err) = reader.finish().await {
                warn!(error = %err, "reader flush failed");
            }

            if flush_at_end {
                for tx in &senders {
                    let _ = tx.send(WorkerMsg::Flush).await;
                }
            }

            match monitor_dirs {
                Some(dirs) if !dirs.is_empty() => {
                    for dir in dirs {
                        if let Err(err) = reader.monitor(&dir, flags).await {
                            warn!(dir = %dir, error = %err, "monitor failed");
                        }
                    }
                },
                _ => {
                    // Offline one-shot run: the input set is the whole job.
                    info!("offline input exhausted");
                    cancel.cancel();
                },
            }
        })
    }

    /// The quiesce protocol: readers stopped, sessions flushed, can-quit
    /// callbacks polled to zero, writers closed, queues drained.
    async fn quiesce(mut self) -> Result<()> {
        debug!("quiesce: flushing sessions");
        for tx in &self.senders {
            let _ = tx.send(WorkerMsg::Flush).await;
        }

        for _ in 0..200 {
            let blocked: Vec<&str> = self
                .can_quit
                .iter()
                .filter(|(_, f)| f() > 0)
                .map(|(name, _)| *name)
                .collect();
            if blocked.is_empty() {
                break;
            }
            debug!(?blocked, "waiting to quit");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        debug!("quiesce: stopping workers");
        for tx in &self.senders {
            let _ = tx.send(WorkerMsg::Exit).await;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.await;
        }

        // Worker exit closed the writers; wait for the final uploads.
        if let Some(uploader) = &self.uploader {
            for _ in 0..600 {
                if uploader.queue_length() == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if uploader.queue_length() != 0 {
                warn!("exiting with incomplete uploads");
            }
        }

        self.free_later.drain_all();
        info!(
            stats = %self.stats.snapshot(),
            "shutdown complete"
        );
        Ok(())
    }
}

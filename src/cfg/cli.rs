// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

/// Full-packet capture engine.
#[derive(Parser, Debug, Clone)]
#[command(name = "flowcap", version, about)]
pub struct Cli {
    /// Config file to use
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Offline pcap file to process
    #[arg(short = 'r', long = "pcapfile")]
    pub pcapfile: Vec<String>,

    /// Offline pcap directory to process; all files matching *.pcap
    #[arg(short = 'R', long = "pcapdir")]
    pub pcapdir: Vec<String>,

    /// File containing a list of pcap paths, one per line
    #[arg(short = 'F', long = "filelist")]
    pub filelist: Vec<String>,

    /// Node name to report sessions under
    #[arg(short = 'n', long = "node")]
    pub node: Option<String>,

    /// Hostname to report, overriding the system name
    #[arg(long = "host")]
    pub hostname: Option<String>,

    /// Extra tag applied to every session
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,

    /// Config override, `key=value`; may repeat
    #[arg(short = 'o', long = "option")]
    pub options: Vec<String>,

    /// Field operation applied to every session, `expression=value`
    #[arg(long = "op")]
    pub ops: Vec<String>,

    /// Keep watching the pcap directory for new files
    #[arg(long = "monitor")]
    pub monitor: bool,

    /// Recurse into subdirectories of --pcapdir
    #[arg(long = "recursive")]
    pub recursive: bool,

    /// Delete offline pcap files once processed
    #[arg(long = "delete")]
    pub delete: bool,

    /// Skip files already processed
    #[arg(long = "skip")]
    pub skip: bool,

    /// Only process files already seen before
    #[arg(long = "reprocess")]
    pub reprocess: bool,

    /// Copy the raw packets to the writer even when reading offline
    #[arg(long = "copy")]
    pub copy: bool,

    /// Parse packets but write nothing
    #[arg(long = "dryrun")]
    pub dryrun: bool,

    /// Flush sessions as soon as the input is exhausted
    #[arg(long = "flush")]
    pub flush: bool,

    /// Disable certificate verification on outbound HTTPS
    #[arg(long = "insecure")]
    pub insecure: bool,

    /// Do not lock offline pcap files while reading
    #[arg(long = "nolockpcap")]
    pub nolockpcap: bool,

    /// Force a capture scheme for positional inputs
    #[arg(long = "scheme")]
    pub scheme: Option<String>,

    /// Use the libpcap reader even when another is configured
    #[arg(long = "libpcap")]
    pub libpcap: bool,

    /// Credential provider override for object-store writers
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Credential profile name
    #[arg(long = "profile")]
    pub profile: Option<String>,

    /// Unix-domain socket path for the command channel
    #[arg(long = "command-socket")]
    pub command_socket: Option<PathBuf>,

    /// Increase debug logging; may repeat
    #[arg(long = "debug", action = clap::ArgAction::Count)]
    pub debug: u8,
}

pub fn resolve_config_path(rel: &Path) -> Result<PathBuf> {
    let abs = if rel.is_absolute() {
        rel.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(rel)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}

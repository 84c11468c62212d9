// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt;

use serde::{Deserialize, Serialize};

/// Compression applied to pcap output before upload.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    None,
    Gzip,
    #[default]
    Zstd,
}

impl CompressionMode {
    /// File name suffix appended after `.pcap`.
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionMode::None => "",
            CompressionMode::Gzip => ".gz",
            CompressionMode::Zstd => ".zst",
        }
    }
}

impl fmt::Display for CompressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMode::None => write!(f, "none"),
            CompressionMode::Gzip => write!(f, "gzip"),
            CompressionMode::Zstd => write!(f, "zstd"),
        }
    }
}

/// Which transport a port classifier binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    Udp,
    Tcp,
    /// TCP, destination port only.
    TcpDst,
}

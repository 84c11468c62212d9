// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cfg::enums::CompressionMode;

/// The five-minute default keeps offsets inside the 33-bit compressed range
/// even on slow links; see [`Config::validate_and_normalize`].
pub const MAX_COMPRESSED_FILE_SIZE: u64 = 0x1_fff0_0000;

/// S3 hard limit per object.
pub const MAX_S3_OBJECT_SIZE: u64 = 0x500_0000_0000;

/// Engine configuration, loaded from YAML with `--option K=V` overrides.
///
/// Key names follow the capture config vocabulary (`pcapWriteSize`,
/// `maxFileSizeB`, `s3Bucket`, ...). Unknown keys are collected and logged
/// with a warning instead of failing startup.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "d_node", rename = "nodeName")]
    pub node_name: String,

    /// Part buffer size; the writer raises this to the 5 MiB multipart
    /// minimum at startup.
    #[serde(default = "d_pcap_write_size", rename = "pcapWriteSize")]
    pub pcap_write_size: usize,

    #[serde(default = "d_max_file_size", rename = "maxFileSizeB")]
    pub max_file_size_b: u64,

    /// Minutes before an output file is rolled regardless of size. 0 = never.
    #[serde(default, rename = "maxFileTimeM")]
    pub max_file_time_m: u64,

    #[serde(default = "d_packet_threads", rename = "packetThreads")]
    pub packet_threads: usize,

    #[serde(default = "d_snap_len", rename = "snapLen")]
    pub snap_len: u32,

    #[serde(default, rename = "bpf")]
    pub bpf: String,

    #[serde(default, rename = "interface")]
    pub interface: Vec<String>,

    /// Target session count per packet thread; rounded up to the next prime
    /// of the table ladder.
    #[serde(default = "d_max_streams", rename = "maxStreams")]
    pub max_streams: u32,

    // ── timeouts (seconds, per mProtocol) ─────────────────────────────────
    #[serde(default = "d_tcp_timeout", rename = "tcpTimeout")]
    pub tcp_timeout: u32,
    #[serde(default = "d_udp_timeout", rename = "udpTimeout")]
    pub udp_timeout: u32,
    #[serde(default = "d_icmp_timeout", rename = "icmpTimeout")]
    pub icmp_timeout: u32,
    #[serde(default = "d_esp_timeout", rename = "espTimeout")]
    pub esp_timeout: u32,
    #[serde(default = "d_dhcp_timeout", rename = "dhcpTimeout")]
    pub dhcp_timeout: u32,

    /// Grace before delayed destruction, seconds.
    #[serde(default = "d_free_later_grace", rename = "freeLaterGrace")]
    pub free_later_grace: u64,

    // ── S3 writer ─────────────────────────────────────────────────────────
    #[serde(default, rename = "s3Bucket")]
    pub s3_bucket: String,
    #[serde(default = "d_s3_region", rename = "s3Region")]
    pub s3_region: String,
    #[serde(default, rename = "s3Host")]
    pub s3_host: String,
    #[serde(default, rename = "s3PathAccessStyle")]
    pub s3_path_access_style: Option<bool>,
    #[serde(default, rename = "s3Compression")]
    pub s3_compression: CompressionMode,
    #[serde(default, rename = "s3CompressionLevel")]
    pub s3_compression_level: u32,
    #[serde(default = "d_s3_block_size", rename = "s3CompressionBlockSize")]
    pub s3_compression_block_size: u32,
    #[serde(default = "d_s3_storage_class", rename = "s3StorageClass")]
    pub s3_storage_class: String,
    #[serde(default = "d_s3_max_conns", rename = "s3MaxConns")]
    pub s3_max_conns: u32,
    #[serde(default = "d_s3_max_requests", rename = "s3MaxRequests")]
    pub s3_max_requests: u32,
    #[serde(default, rename = "s3UseHttp")]
    pub s3_use_http: bool,
    #[serde(default = "d_true", rename = "s3UseTokenForMetadata")]
    pub s3_use_token_for_metadata: bool,
    #[serde(default, rename = "s3UseECSEnv")]
    pub s3_use_ecs_env: bool,
    #[serde(default, rename = "s3AccessKeyId")]
    pub s3_access_key_id: String,
    #[serde(default, rename = "s3SecretAccessKey")]
    pub s3_secret_access_key: String,

    // ── dissector knobs ───────────────────────────────────────────────────
    #[serde(default, rename = "dnsOutputAnswers")]
    pub dns_output_answers: bool,
    #[serde(default = "d_true", rename = "trackESP")]
    pub track_esp: bool,

    #[serde(default, rename = "ignoreErrors")]
    pub ignore_errors: bool,

    #[serde(default, rename = "metadataUrl")]
    pub metadata_url: String,

    /// Anything we do not recognize lands here and is warned about once.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

fn d_node() -> String {
    "localhost".to_string()
}
fn d_pcap_write_size() -> usize {
    262_144
}
fn d_max_file_size() -> u64 {
    12_000_000_000
}
fn d_packet_threads() -> usize {
    2
}
fn d_snap_len() -> u32 {
    16_384
}
fn d_max_streams() -> u32 {
    1_500_000
}
fn d_tcp_timeout() -> u32 {
    480
}
fn d_udp_timeout() -> u32 {
    60
}
fn d_icmp_timeout() -> u32 {
    10
}
fn d_esp_timeout() -> u32 {
    600
}
fn d_dhcp_timeout() -> u32 {
    60
}
fn d_free_later_grace() -> u64 {
    7
}
fn d_s3_region() -> String {
    "us-east-1".to_string()
}
fn d_s3_block_size() -> u32 {
    100_000
}
fn d_s3_storage_class() -> String {
    "STANDARD".to_string()
}
fn d_s3_max_conns() -> u32 {
    20
}
fn d_s3_max_requests() -> u32 {
    500
}
fn d_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        #[allow(clippy::expect_used)]
        serde_yaml::from_str("{}").expect("empty config deserializes")
    }
}

impl Config {
    /// Loads the configuration, applies `--option K=V` overrides, validates
    /// invariants, and returns the ready-to-use value.
    pub fn load<P: AsRef<Path>>(path: Option<P>, overrides: &[String]) -> Result<Self> {
        let mut value: serde_yaml::Value = match path {
            Some(p) => {
                let s = fs::read_to_string(p.as_ref()).with_context(|| {
                    format!("failed to read config file {:?}", p.as_ref())
                })?;
                serde_yaml::from_str(&s).context("failed to parse config YAML")?
            },
            None => serde_yaml::Value::Mapping(Default::default()),
        };

        if !value.is_mapping() {
            anyhow::bail!("config file must contain a key/value mapping");
        }

        for entry in overrides {
            let (k, v) = entry
                .split_once('=')
                .with_context(|| format!("--option {entry:?} is not K=V"))?;
            let parsed: serde_yaml::Value = serde_yaml::from_str(v)
                .unwrap_or_else(|_| serde_yaml::Value::String(v.to_string()));
            if let Some(map) = value.as_mapping_mut() {
                map.insert(serde_yaml::Value::String(k.to_string()), parsed);
            }
        }

        let mut cfg: Config =
            serde_yaml::from_value(value).context("failed to interpret config")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and clamps derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(self.packet_threads >= 1, "packetThreads must be >= 1");
        self.packet_threads = self.packet_threads.min(24);

        ensure!(self.snap_len >= 96, "snapLen must be >= 96");

        self.s3_compression_level = self.s3_compression_level.min(22);
        self.s3_compression_block_size =
            self.s3_compression_block_size.clamp(0xffff, 0x7_ffff);
        self.dhcp_timeout = self.dhcp_timeout.clamp(10, 0xffff);
        self.s3_max_conns = self.s3_max_conns.clamp(5, 1000);
        self.s3_max_requests = self.s3_max_requests.clamp(10, 5000);

        // Support up to 1000 parts per upload, the S3 object cap, and the
        // 33-bit compressed-offset ceiling.
        self.max_file_size_b = self
            .max_file_size_b
            .min(self.pcap_write_size as u64 * 1000)
            .min(MAX_S3_OBJECT_SIZE);
        if self.s3_compression != CompressionMode::None {
            self.max_file_size_b = self.max_file_size_b.min(MAX_COMPRESSED_FILE_SIZE);
        }

        if !self.s3_access_key_id.is_empty() {
            ensure!(
                !self.s3_secret_access_key.is_empty(),
                "s3SecretAccessKey must be set when s3AccessKeyId is"
            );
        }

        for key in self.extra.keys() {
            if key.starts_with("tpacketv3") {
                warn!(%key, "live-capture option is accepted but not supported by this build");
            } else {
                warn!(%key, "unknown config option ignored");
            }
        }

        Ok(())
    }

    /// Virtual-host or path style addressing, with the bucket-dot heuristic
    /// when unset.
    pub fn s3_path_style(&self) -> bool {
        self.s3_path_access_style
            .unwrap_or_else(|| self.s3_bucket.contains('.'))
    }

    /// Endpoint host, derived from region/bucket when `s3Host` is unset.
    pub fn s3_endpoint_host(&self) -> String {
        if !self.s3_host.is_empty() {
            return self.s3_host.clone();
        }
        match (self.s3_path_style(), self.s3_region.as_str()) {
            (true, "us-east-1") => "s3.amazonaws.com".to_string(),
            (true, region) => format!("s3-{region}.amazonaws.com"),
            (false, "us-east-1") => format!("{}.s3.amazonaws.com", self.s3_bucket),
            (false, region) => format!("{}.s3-{region}.amazonaws.com", self.s3_bucket),
        }
    }
}

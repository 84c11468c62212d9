// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! S3 credentials: static configuration, the EC2 instance-metadata service
//! (IMDSv1 or v2 with a session token), or the ECS container endpoint.
//!
//! Dynamic credentials refresh on a timer. The previous value is retired
//! through the free-later pool so a request signed mid-swap keeps a valid
//! reference until the grace elapses.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    lifecycle::free_later::FreeLater,
    writer::http::HttpClient,
};

/// How often dynamic credentials are re-fetched, seconds.
pub const REFRESH_INTERVAL_SECS: u64 = 280;

const IMDS_BASE: &str = "http://169.254.169.254";
const IMDS_ROLE_PATH: &str = "/latest/meta-data/iam/security-credentials/";

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
enum Source {
    Static,
    Imds { cred_url: String, use_token: bool },
    Ecs { cred_url: String },
}

/// Shared credential store; readers grab an `Arc` snapshot per request.
#[derive(Clone)]
pub struct CredStore {
    current: Arc<RwLock<Arc<Credentials>>>,
    source: Source,
    client: HttpClient,
}

async fn imds_get(client: &HttpClient, path: &str, use_token: bool) -> Result<Bytes> {
    let mut headers: Vec<(String, String)> = Vec::new();
    if use_token {
        debug!("requesting IMDSv2 metadata token");
        let token = client
            .request(
                "PUT",
                &format!("{IMDS_BASE}/latest/api/token"),
                &[(
                    "X-aws-ec2-metadata-token-ttl-seconds".to_string(),
                    "30".to_string(),
                )],
                Bytes::new(),
            )
            .await
            .context("IMDSv2 token request failed")?;
        headers.push((
            "X-aws-ec2-metadata-token".to_string(),
            String::from_utf8_lossy(&token.body).into_owned(),
        ));
    }
    let response = client
        .request("GET", &format!("{IMDS_BASE}{path}"), &headers, Bytes::new())
        .await?;
    Ok(response.body)
}

fn parse_creds_json(body: &[u8]) -> Result<Credentials> {
    let doc: serde_json::Value =
        serde_json::from_slice(body).context("credential response is not JSON")?;
    let get = |key: &str| {
        doc.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };
    let (Some(access_key_id), Some(secret_access_key)) =
        (get("AccessKeyId"), get("SecretAccessKey"))
    else {
        bail!("credential response is missing key material");
    };
    Ok(Credentials {
        access_key_id,
        secret_access_key,
        token: get("Token"),
    })
}

impl CredStore {
    /// Resolves the credential source per configuration and performs the
    /// first fetch. Fatal when no usable source exists.
    pub async fn init(cfg: &Config, client: HttpClient) -> Result<Self> {
        let source = if cfg.s3_use_ecs_env {
            let base = std::env::var("ECS_CONTAINER_METADATA_URI_V4")
                .context("ECS_CONTAINER_METADATA_URI_V4 not set")?;
            let relative = std::env::var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI")
                .context("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI not set")?;
            // Keep scheme://host only from the metadata base.
            let mut parts = base.splitn(4, '/');
            let scheme = parts.next().unwrap_or("http:");
            let _ = parts.next();
            let host = parts.next().unwrap_or("");
            Source::Ecs {
                cred_url: format!("{scheme}//{host}{relative}"),
            }
        } else if !cfg.s3_access_key_id.is_empty() {
            Source::Static
        } else {
            let role = imds_get(&client, IMDS_ROLE_PATH, cfg.s3_use_token_for_metadata)
                .await
                .context("cannot retrieve role name from metadata service")?;
            let role = String::from_utf8_lossy(&role);
            let role = role.trim();
            if role.is_empty() || role.starts_with('<') {
                bail!("cannot retrieve role name from metadata service");
            }
            Source::Imds {
                cred_url: format!("{IMDS_ROLE_PATH}{role}"),
                use_token: cfg.s3_use_token_for_metadata,
            }
        };

        let store = CredStore {
            current: Arc::new(RwLock::new(Arc::new(Credentials {
                access_key_id: cfg.s3_access_key_id.clone(),
                secret_access_key: cfg.s3_secret_access_key.clone(),
                token: None,
            }))),
            source,
            client,
        };

        if !matches!(store.source, Source::Static) {
            store.refresh(None).await?;
        }
        Ok(store)
    }

    /// Snapshot for signing one request.
    pub fn get(&self) -> Arc<Credentials> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        !matches!(self.source, Source::Static)
    }

    /// Re-fetches dynamic credentials and swaps them in; the old snapshot
    /// is parked in the free-later pool when one is provided.
    pub async fn refresh(&self, free_later: Option<&FreeLater>) -> Result<()> {
        let fetched = match &self.source {
            Source::Static => return Ok(()),
            Source::Imds {
                cred_url,
                use_token,
            } => {
                let body = imds_get(&self.client, cred_url, *use_token).await?;
                parse_creds_json(&body)?
            },
            Source::Ecs { cred_url } => {
                let response = self
                    .client
                    .request("GET", cred_url, &[], Bytes::new())
                    .await?;
                parse_creds_json(&response.body)?
            },
        };

        if fetched.access_key_id.is_empty() || fetched.secret_access_key.is_empty() {
            bail!("metadata service returned unusable credentials");
        }
        debug!(access_key = %fetched.access_key_id, "refreshed s3 credentials");

        let old = {
            let mut guard = match self.current.write() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::replace(&mut *guard, Arc::new(fetched))
        };
        if let Some(pool) = free_later {
            pool.defer(old);
        }
        Ok(())
    }

    /// Background refresh loop for dynamic credentials.
    pub fn spawn_refresher(self, free_later: FreeLater) {
        if !self.is_dynamic() {
            return;
        }
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
                REFRESH_INTERVAL_SECS,
            ));
            ticker.tick().await; // immediate first tick, already fetched
            loop {
                ticker.tick().await;
                if let Err(err) = self.refresh(Some(&free_later)).await {
                    warn!(error = %err, "credential refresh failed, keeping previous");
                }
            }
        });
    }
}

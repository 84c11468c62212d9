// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::HashMap,
    io::IsTerminal,
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the level is derived from the
/// `--debug` repeat count. Output goes to stderr through a non-blocking
/// writer so the packet path never stalls on a slow terminal.
pub fn init_logger(debug: u8) -> Result<WorkerGuard> {
    let default = match debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default))
        .context("failed to build log filter")?;

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(debug > 0)
        .with_line_number(debug > 1);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to set global default subscriber")?;

    Ok(guard)
}

static RATE_GATE: Lazy<Mutex<HashMap<&'static str, Instant>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// True at most once per `secs` seconds for a given call site key. Gates
/// duplicate warnings on the packet path.
pub fn rate_gate(key: &'static str, secs: u64) -> bool {
    let mut gate = match RATE_GATE.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    let now = Instant::now();
    match gate.get(key) {
        Some(last) if now.duration_since(*last) < Duration::from_secs(secs) => false,
        _ => {
            gate.insert(key, now);
            true
        },
    }
}

/// `warn!` limited to once per `$secs` seconds per call site.
#[macro_export]
macro_rules! warn_rate {
    ($secs:expr, $($arg:tt)*) => {
        if $crate::cfg::logger::rate_gate(concat!(file!(), ":", line!()), $secs) {
            tracing::warn!($($arg)*);
        }
    };
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Context, Result};
use clap::Parser;
use flowcap::{
    cfg::{cli::Cli, config::Config, logger::init_logger},
    lifecycle::Engine,
};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _log_guard = match init_logger(cli.debug) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("failed to initialize logging: {err:#}");
            std::process::exit(1);
        },
    };

    if let Err(err) = run(cli).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = Config::load(cli.config.as_deref(), &cli.options)
        .context("failed to load configuration")?;

    let engine = Engine::build(cli, cfg)
        .await
        .context("engine startup failed")?;
    engine.run().await
}

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Line-delimited command channel on a Unix-domain socket.
//!
//! Each line is shell-tokenized; the first token selects a registered
//! command and the response bytes are written straight back. Built-ins:
//! `help`, `exit`, `version`, `shutdown`.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixListener,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub type CommandFn = Arc<dyn Fn(&[String]) -> String + Send + Sync>;

struct Command {
    func: CommandFn,
    help: &'static str,
}

/// Registered commands; built once at startup.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<&'static str, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &'static str,
        help: &'static str,
        func: CommandFn,
    ) {
        self.commands.insert(name, Command { func, help });
    }

    fn help_text(&self) -> String {
        let width = self
            .commands
            .keys()
            .map(|n| n.len())
            .max()
            .unwrap_or(0)
            .min(60);
        let mut out = String::new();
        for (name, cmd) in &self.commands {
            out.push_str(&format!("{name:width$} - {}\n", cmd.help));
        }
        out
    }

    fn run(&self, line: &str) -> Option<String> {
        let tokens = tokenize(line);
        let first = tokens.first()?;
        match first.as_str() {
            "help" => Some(self.help_text()),
            other => match self.commands.get(other) {
                Some(cmd) => Some((cmd.func)(&tokens)),
                None => Some(format!("Unknown command {other}\n")),
            },
        }
    }
}

/// Shell-style tokenizer: whitespace-separated with single/double quotes.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in line.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None if ch.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            },
            None => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Binds the socket and serves clients until cancellation. Failing to bind
/// is fatal; the process must not come up half-configured.
pub async fn serve(
    path: PathBuf,
    registry: Arc<CommandRegistry>,
    cancel: CancellationToken,
) -> Result<()> {
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("error binding command socket {path:?}"))?;
    debug!(path = %path.display(), "command socket listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("error accepting command client")?;
                let registry = Arc::clone(&registry);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_client(stream, registry, cancel).await {
                        warn!(error = %err, "command client failed");
                    }
                });
            },
        }
    }
}

async fn handle_client(
    stream: tokio::net::UnixStream,
    registry: Arc<CommandRegistry>,
    cancel: CancellationToken,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "exit" {
            return Ok(());
        }
        if trimmed == "shutdown" {
            write.write_all(b"shutting down\n").await?;
            cancel.cancel();
            continue;
        }
        let response = registry
            .run(trimmed)
            .unwrap_or_else(|| "No command sent\n".to_string());
        write.write_all(response.as_bytes()).await?;
    }
    Ok(())
}

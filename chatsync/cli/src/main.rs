//! Chatsync - Terminal Chat Client
//!
//! Line-oriented client for a remote chat assistant. Reads messages from stdin,
//! prints the conversation to stdout as assistant replies are revealed, and
//! logs to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Connect to the development server (ws://localhost:8000/ws/chat)
//! chatsync --dev
//!
//! # Explicit address
//! chatsync --url wss://chat.example.com/ws/chat
//!
//! # Production host, secure socket
//! chatsync --host chat.example.com --secure
//!
//! # Verbose logging
//! RUST_LOG=debug chatsync --dev
//! ```
//!
//! # Commands
//!
//! - `/connect`: reconnect after a disconnect or exhausted retries
//! - `/disconnect`: close the connection without reconnecting
//! - `/quit`: shut down (also EOF, Ctrl-C or SIGTERM)

mod render;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use chatsync_core::config::{load_config, load_config_from_path};
use chatsync_core::{ChatClient, ConfigOverrides};

use render::Renderer;

/// Chatsync - terminal client for a streaming chat assistant
#[derive(Parser, Debug)]
#[command(name = "chatsync")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Full ws:// or wss:// address, or a path on --host
    #[arg(short = 'u', long, value_name = "URL")]
    url: Option<String>,

    /// Host (and port) of the chat server
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Use wss:// instead of ws://
    #[arg(long)]
    secure: bool,

    /// Target the development server on localhost:8000
    #[arg(long)]
    dev: bool,

    /// Configuration file path
    #[arg(short = 'c', long, env = "CHATSYNC_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Reconnect attempts after an unexpected close
    #[arg(long, value_name = "N")]
    max_reconnect_attempts: Option<u32>,

    /// Delay between reconnect attempts in milliseconds
    #[arg(long, value_name = "MS")]
    reconnect_delay_ms: Option<u64>,

    /// Time between reveal ticks in milliseconds
    #[arg(long, value_name = "MS")]
    reveal_interval_ms: Option<u64>,

    /// Characters revealed per tick
    #[arg(long, value_name = "N")]
    reveal_step: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "CHATSYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            host: self.host.clone(),
            secure: self.secure.then_some(true),
            development: self.dev.then_some(true),
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay_ms: self.reconnect_delay_ms,
            reveal_interval_ms: self.reveal_interval_ms,
            reveal_step: self.reveal_step,
        }
    }
}

/// A line typed by the user
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Connect,
    Disconnect,
    Quit,
    Message(&'a str),
    Blank,
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => Self::Blank,
            "/connect" => Self::Connect,
            "/disconnect" => Self::Disconnect,
            "/quit" => Self::Quit,
            _ => Self::Message(line),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout is the conversation
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("chatsync={}", args.log_level).parse()?)
                .add_directive(format!("chatsync_core={}", args.log_level).parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let mut config = match &args.config {
        Some(path) => load_config_from_path(Some(path.clone())),
        None => load_config(),
    }
    .context("Failed to load configuration")?;
    args.overrides().apply(&mut config);
    config.validate().context("Invalid configuration")?;

    info!(
        address = %config.address(),
        source = %config.source(),
        "Starting chat client"
    );

    let client = ChatClient::spawn_websocket(&config);
    run_session(
        &client,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        shutdown_signal(),
    )
    .await?;

    let report = client.shutdown().await.context("Engine already stopped")?;
    info!(
        pending_timers = report.pending_timers,
        transport_active = report.transport_active,
        "Shutdown complete"
    );

    Ok(())
}

/// Pump snapshots to `output` and input lines to the engine until the user
/// quits, input ends, the engine stops, or `shutdown` resolves
async fn run_session<R, W, S>(client: &ChatClient, input: R, mut output: W, shutdown: S) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut updates = client.subscribe();
    let mut renderer = Renderer::default();
    let mut lines = input.lines();

    let snapshot = updates.borrow_and_update().clone();
    write_rendered(&mut output, &renderer.render(&snapshot)).await?;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Engine stopped");
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                write_rendered(&mut output, &renderer.render(&snapshot)).await?;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    info!("End of input");
                    break;
                };
                match Input::parse(&line) {
                    Input::Blank => {}
                    Input::Quit => break,
                    Input::Connect => client.connect()?,
                    Input::Disconnect => client.disconnect()?,
                    Input::Message(text) => {
                        if let Err(e) = client.submit(text).await {
                            warn!(error = %e, "Message not sent");
                        }
                    }
                }
            }
            () = &mut shutdown => break,
        }
    }

    Ok(())
}

async fn write_rendered<W: AsyncWrite + Unpin>(output: &mut W, rendered: &str) -> Result<()> {
    if !rendered.is_empty() {
        output.write_all(rendered.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

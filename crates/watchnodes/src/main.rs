//! Reference client for the corelink daemon.
//!
//! Connects, authenticates at the requested level, prints the daemon's
//! version and every node list it pushes, and echoes new lines of the
//! daemon's current log file. Reconnects on its own until interrupted.
//!
//! Usage:
//!   corelink-watchnodes --auth basic
//!   corelink-watchnodes --config watchnodes.toml --once
//!
//! `RUST_LOG` overrides the log filter from the config file.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use corelink_client::{
    format_node, AuthLevel, Client, ClientBuilder, ClientConfig, ClientHandler, DaemonServer,
    DaemonSession, NodeList,
};
use corelink_domain::config::LoggingConfig;
use tokio::sync::Notify;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "corelink-watchnodes", version, about)]
struct Cli {
    /// TOML client config. Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Authentication level: none, basic or admin.
    #[arg(long)]
    auth: Option<AuthLevel>,
    /// Display name reported to the daemon.
    #[arg(long)]
    name: Option<String>,
    /// Exit after the first node list (or the handshake at auth level none).
    #[arg(long)]
    once: bool,
    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

struct Printer {
    done: Arc<Notify>,
}

#[async_trait]
impl ClientHandler for Printer {
    async fn on_connect(&self, server: DaemonServer, session: Option<DaemonSession>) {
        match server.version().await {
            Ok(v) => println!("daemon {} ({}, {})", v.version, v.serverarch, v.buildtime),
            Err(e) => tracing::warn!(error = %e, "version request failed"),
        }
        if session.is_none() {
            self.done.notify_one();
        }
    }

    async fn on_disconnect(&self) {
        println!("-- disconnected");
    }

    async fn on_nodes_update(&self, nodes: &NodeList) {
        println!("-- {} node(s)", nodes.len());
        for node in nodes {
            println!("{}", format_node(node));
        }
        self.done.notify_one();
    }

    async fn on_core_log_entry(&self, line: &str) {
        println!("log| {line}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::default(),
    };
    init_tracing(&config.logging, cli.json_logs);

    let done = Arc::new(Notify::new());
    let mut builder = ClientBuilder::new()
        .config(config)
        .handler(Printer { done: done.clone() });
    if let Some(host) = cli.host {
        builder = builder.host(host);
    }
    if let Some(port) = cli.port {
        builder = builder.port(port);
    }
    if let Some(level) = cli.auth {
        builder = builder.auth(level);
    }
    if let Some(name) = cli.name {
        builder = builder.name(name);
    }
    let client: Arc<Client> = Arc::new(builder.build()?);

    let mut runner = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    tokio::select! {
        joined = &mut runner => {
            // The retry loop only ends on its own after a permanent failure.
            joined.context("client task panicked")??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, shutting down"),
        _ = done.notified(), if cli.once => tracing::debug!("first update received"),
    }

    client.disconnect().await;
    runner.await.context("client task panicked")??;
    Ok(())
}

/// Human-readable output on stderr by default; JSON when asked for on the
/// command line or in the config file.
fn init_tracing(logging: &LoggingConfig, json_flag: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));

    if json_flag || logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

//! Server entry point: configuration, logging, accept loop.

use clap::Parser;
use novakv::commands::CommandRegistry;
use novakv::config::Config;
use novakv::connection::{serve_connection, ConnectionStats};
use novakv::db::Database;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;
    init_logging(&config)?;

    let databases: Arc<Vec<Database>> = Arc::new(
        (0..config.databases)
            .map(|_| Database::new(config.shards))
            .collect(),
    );
    let registry = Arc::new(CommandRegistry::standard());
    let stats = Arc::new(ConnectionStats::new());
    info!(
        databases = config.databases,
        shards = config.shards,
        commands = registry.len(),
        "storage initialized"
    );

    let listener = TcpListener::bind(config.bind_address()).await?;
    println!(
        "novakv v{} listening on {}",
        novakv::VERSION,
        config.bind_address()
    );
    info!(addr = %config.bind_address(), "listening");

    let shutdown = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl-C handler");
        }
        info!("shutdown signal received");
    };

    tokio::select! {
        _ = accept_loop(listener, databases, registry, stats) => {}
        _ = shutdown => {}
    }

    info!("server stopped");
    Ok(())
}

/// Accepts connections forever, spawning one task per client.
async fn accept_loop(
    listener: TcpListener,
    databases: Arc<Vec<Database>>,
    registry: Arc<CommandRegistry>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(serve_connection(
                    stream,
                    addr,
                    Arc::clone(&databases),
                    Arc::clone(&registry),
                    Arc::clone(&stats),
                ));
            }
            Err(err) => {
                error!(error = %err, "accept failed");
            }
        }
    }
}

/// Wires tracing to stdout, or to a file inside `--log-dir` when given.
fn init_logging(config: &Config) -> anyhow::Result<()> {
    let level = config.tracing_level()?;

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file = std::fs::File::create(dir.join("novakv.log"))?;
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_target(false)
                .init();
        }
    }
    Ok(())
}

//! Parcel server binary

use anyhow::Context;
use clap::{value_parser, Arg, Command};
use parcel_core::EngineConfig;
use parcel_engine::StorageEngine;
use parcel_server::ParcelServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("parcel-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Multipart object store over HTTP/2")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("PATH")
                .help("Data directory path")
                .env("PARCEL_DATA_DIR")
                .value_parser(value_parser!(PathBuf))
                .default_value("./data"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Bind address")
                .env("PARCEL_BIND")
                .value_parser(value_parser!(SocketAddr))
                .default_value("127.0.0.1:8080"),
        )
        .arg(
            Arg::new("max-part-size")
                .long("max-part-size")
                .value_name("BYTES")
                .help("Largest part body accepted")
                .env("PARCEL_MAX_PART_SIZE")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log output format")
                .value_parser(["text", "json"])
                .default_value("text"),
        )
}

fn init_tracing(format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let log_format = matches
        .get_one::<String>("log-format")
        .map(String::as_str)
        .unwrap_or("text");
    init_tracing(log_format);

    let data_dir = matches
        .get_one::<PathBuf>("data-dir")
        .cloned()
        .context("missing --data-dir")?;
    let bind_addr = *matches
        .get_one::<SocketAddr>("bind")
        .context("missing --bind")?;

    let mut config = EngineConfig::default();
    if let Some(max_part_size) = matches.get_one::<u64>("max-part-size") {
        config.max_part_size = *max_part_size;
    }

    info!("Starting Parcel server");
    info!("Data directory: {}", data_dir.display());
    info!("Bind address: {}", bind_addr);

    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;
        info!("Created data directory: {}", data_dir.display());
    }

    let engine = StorageEngine::with_config(&data_dir, config)
        .context("Failed to initialize storage engine")?;
    info!("Storage engine initialized");

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    ParcelServer::new(engine.clone())
        .serve_listener(listener, shutdown)
        .await
        .context("server error")?;

    engine.persist().context("flushing storage on shutdown")?;
    info!("Server shutdown gracefully");
    Ok(())
}

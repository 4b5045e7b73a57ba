// src/main.rs

//! The main entry point for the Hardware Manager process.

use anyhow::{Context, Result, bail};
use std::env;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(err) = run_app().await {
        tracing::error!(%err, "fatal startup error");
        eprintln!("hm: {err:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run_app() -> Result<()> {
    let config_path = parse_args()?;
    init_logging();

    tracing::info!(config = %config_path, "starting hm");
    hm::server::run(&config_path).await.context("server run failed")
}

fn parse_args() -> Result<String> {
    let args: Vec<String> = env::args().collect();
    let mut config_path = None;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-c" => {
                i += 1;
                let path = args.get(i).context("-c requires a path argument")?;
                config_path = Some(path.clone());
            }
            "--version" => {
                println!("hm {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => bail!("unrecognized argument: {other}"),
        }
        i += 1;
    }
    config_path.context("usage: hm -c <config.xml>")
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (layer, _reload_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

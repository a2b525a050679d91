// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2025 BLite

//! Process root: config, tracing, context wiring, serve loops.

use std::path::PathBuf;
use std::sync::Arc;

use blite_core::config::ServerConfig;
use blite_runtime::ServerContext;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blite-server")]
#[command(about = "BLite Server - multi-tenant document database frontend", long_about = None)]
#[command(version)]
struct Args {
	/// Path to the TOML configuration file.
	#[arg(short, long, env = "BLITE_CONFIG")]
	config: Option<PathBuf>,

	/// Override the data directory from the config file.
	#[arg(long, env = "BLITE_DATA_DIR")]
	data_dir: Option<PathBuf>,
}

fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	tokio::runtime::Builder::new_multi_thread()
		.thread_name("blite-server")
		.enable_all()
		.build()
		.expect("tokio runtime")
		.block_on(async {
			if let Err(err) = run().await {
				error!(%err, "server failed");
				std::process::exit(1);
			}
		});
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();
	let mut config = match &args.config {
		Some(path) => ServerConfig::load(path)?,
		None => ServerConfig::default(),
	};
	if let Some(data_dir) = args.data_dir {
		config.server.data_dir = data_dir;
	}

	let rpc_addr = config.server.rpc_addr.clone();
	let http_addr = config.server.http_addr.clone();

	// Engine and identity loading is blocking work.
	let ctx = tokio::task::spawn_blocking(move || ServerContext::open(config)).await??;
	if let Some(root_key) = ctx.take_root_key() {
		// Printed once, on the startup that minted it. There is no way to
		// recover it later; rotate if lost.
		warn!("root API key minted: {root_key}");
	}

	let _background = ctx.spawn_background_tasks();
	ctx.populator.resync()?;

	let rpc_listener = tokio::net::TcpListener::bind(&rpc_addr).await?;
	let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;

	let rpc = tokio::spawn(blite_server_rpc::RpcServer::new(Arc::clone(&ctx)).serve(rpc_listener));
	let http = tokio::spawn(blite_server_http::serve(Arc::clone(&ctx), http_listener));

	info!(rpc = %rpc_addr, http = %http_addr, "blite-server started");

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			info!("shutdown signal received");
		}
		result = rpc => {
			result??;
		}
		result = http => {
			result??;
		}
	}
	Ok(())
}

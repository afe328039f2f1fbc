//! Sidekick broker daemon.
//!
//! Accepts client sessions and one authenticated covenant server link
//! over TCP, and fans resource updates and channel messages out to
//! subscribers.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use covenant_sidekick::core::{SidekickConfig, SidekickCore};
use covenant_sidekick::{LinkAuth, serve};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Broker command line arguments. Flags win over the config file.
#[derive(Parser, Debug)]
#[command(name = "covenant-sidekick")]
#[command(about = "Sidekick: covenant pub/sub broker")]
struct Args {
	/// Address to listen on
	#[arg(short, long, value_name = "ADDR", env = "COVENANT_SIDEKICK_LISTEN")]
	listen: Option<String>,

	/// Shared secret the covenant server must present
	#[arg(short, long, env = "COVENANT_SIDEKICK_SECRET", hide_env_values = true)]
	secret: Option<String>,

	/// Delay before rejecting a failed link authentication, in
	/// milliseconds
	#[arg(long, value_name = "MS")]
	auth_delay_ms: Option<u64>,

	/// Per-session outbound queue capacity
	#[arg(long, value_name = "FRAMES")]
	queue_capacity: Option<usize>,

	/// TOML config file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

/// Optional TOML configuration, merged beneath CLI flags.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
	listen: Option<String>,
	secret: Option<String>,
	auth_delay_ms: Option<u64>,
	queue_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let file = match &args.config {
		Some(path) => {
			let text = std::fs::read_to_string(path)?;
			toml::from_str::<FileConfig>(&text)?
		}
		None => FileConfig::default(),
	};

	let listen = args
		.listen
		.or(file.listen)
		.unwrap_or_else(|| "127.0.0.1:4380".to_string());
	let Some(secret) = args.secret.or(file.secret) else {
		return Err("a link secret is required (--secret or COVENANT_SIDEKICK_SECRET)".into());
	};

	let mut auth = LinkAuth::new(secret);
	if let Some(ms) = args.auth_delay_ms.or(file.auth_delay_ms) {
		auth.delay = Duration::from_millis(ms);
	}

	let mut config = SidekickConfig::default();
	if let Some(capacity) = args.queue_capacity.or(file.queue_capacity) {
		config.session_queue_capacity = capacity;
	}

	info!("starting covenant-sidekick");

	let core = SidekickCore::with_config(config);
	let listener = TcpListener::bind(&listen).await?;
	info!(addr = %listen, "listening");

	let shutdown = CancellationToken::new();
	let ctrlc = shutdown.clone();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("shutdown requested");
			ctrlc.cancel();
		}
	});

	serve(listener, core, auth, shutdown).await?;

	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	// Per-process file logs for smoke testing, stderr otherwise.
	if let Some(log_dir) = std::env::var("COVENANT_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let pid = std::process::id();
		let log_path = log_dir.join(format!("covenant-sidekick.{pid}.log"));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("covenant_sidekick=trace,debug")
				} else {
					EnvFilter::new("covenant_sidekick=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_target(true);

			tracing_subscriber::registry()
				.with(filter)
				.with(file_layer)
				.init();

			tracing::info!(path = ?log_path, "sidekick tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt()
		.with_max_level(if verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.init();
}

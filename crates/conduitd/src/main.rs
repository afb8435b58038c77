//! `conduitd`: loads a pipeline spec, runs it to completion, and
//! optionally serves its metrics over HTTP.
//!
//! Grounded on `examples/rm-dr-copper`'s `ufod` binary: a clap-parsed CLI
//! over a TOML config, `tracing_subscriber` initialized from that config,
//! and a `tokio` runtime carrying the long-lived HTTP server alongside the
//! rest of the daemon's work.

mod config;
mod metrics_http;
mod pipeline_spec;

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use conduit_pipeline::PipelineBuilder;
use tracing_subscriber::EnvFilter;

use config::ConduitdConfig;

#[derive(Parser, Debug)]
#[command(name = "conduitd", about = "Runs a staged data-flow pipeline from a TOML spec")]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
	/// Run a pipeline spec to completion
	Run {
		/// Path to the pipeline spec TOML file
		pipeline: PathBuf,

		/// Path to the daemon config TOML file. Falls back to built-in
		/// defaults if omitted.
		#[arg(long)]
		config: Option<PathBuf>,
	},

	/// Write the default daemon config to a file
	InitConfig {
		/// Where to write the default config
		out: PathBuf,
	},
}

fn main() -> Result<()> {
	// conduit_nodes must be registered before we might re-exec into a
	// PROCESS-isolated node's bootstrap: run_child_if_requested never
	// returns when this process was spawned as a worker child, and the
	// child hydrates its node through the very same registry.
	conduit_nodes::register_all();
	conduit_pipeline::worker::run_child_if_requested();

	let args = Args::parse();

	match args.command {
		Command::InitConfig { out } => {
			ConduitdConfig::create_default_config(&out)?;
			println!("wrote default config to {}", out.display());
			Ok(())
		}
		Command::Run { pipeline, config } => run(pipeline, config),
	}
}

fn run(pipeline_path: PathBuf, config_path: Option<PathBuf>) -> Result<()> {
	let config = match config_path {
		Some(path) => ConduitdConfig::load_from_file(&path)?,
		None => ConduitdConfig::default(),
	};

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::new(config.logging.to_env_filter()))
		.init();

	let specs = pipeline_spec::load(&pipeline_path)?;

	let mut builder = PipelineBuilder::new()
		.queue_capacity(config.pipeline.queue_capacity)
		.watchdog_interval(std::time::Duration::from_millis(config.pipeline.watchdog_interval_ms));
	if config.liveness.enabled {
		builder = builder.liveness_monitor(config.liveness.stall_threshold());
	}
	for spec in specs {
		builder = builder.add_node(spec);
	}

	let built = builder.build()?;
	let supervisor = Arc::new(built.start());

	if config.metrics.enabled {
		let supervisor = supervisor.clone();
		let addr = config.metrics.server_addr.to_string();
		let runtime = tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.build()
			.expect("failed to build metrics HTTP runtime");
		std::thread::Builder::new()
			.name("conduit-metrics-http".into())
			.spawn(move || {
				runtime.block_on(async move {
					if let Err(e) = metrics_http::serve(&addr, supervisor).await {
						tracing::error!(error = %e, "metrics HTTP server exited with an error");
					}
				});
			})
			.expect("failed to spawn metrics HTTP thread");
	}

	supervisor.join();
	// join() already waits for every ordinary node; the liveness monitor
	// never reaches a terminal status on its own; shutdown() is only
	// needed to stop it (and is a no-op on queues/nodes that already
	// finished cleanly).
	if config.liveness.enabled {
		supervisor.shutdown();
	}

	Ok(())
}

use std::{
	fs,
	path::PathBuf,
	sync::{Arc, OnceLock},
};

use anyhow::{Result, bail};
use bus::FurnaceBusFactory;
use clap::Parser;
use config::FurnaceConfig;
use kiln_backend_clients::ExternalClients;
use kiln_backend_service::BackendServices;
use kiln_furnace_jobrunner::JobRunner;
use kiln_furnace_periodic::PeriodicTasks;
use tokio::net::{TcpListener, UnixListener};
use tracing::info;

mod bus;
mod config;
mod routes;

#[derive(clap::Parser)]
struct Args {
	#[arg(short, long, default_value = "furnace.toml")]
	config: PathBuf,
	/// Log at debug level.
	#[arg(long)]
	debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let config_path = &args.config;
	let config = toml::from_str::<FurnaceConfig>(&fs::read_to_string(config_path)?)?;

	let level = if args.debug || config.debug {
		tracing::Level::DEBUG
	} else {
		tracing::Level::INFO
	};
	tracing::subscriber::set_global_default(
		tracing_subscriber::FmtSubscriber::builder()
			.with_max_level(level)
			.finish(),
	)?;
	info!("loaded configuration from file: {:?}", config_path);

	info!("initializing backend services ...");
	let services_ref = Arc::new(OnceLock::new());
	let backend_services = Arc::new(
		BackendServices::new(
			config.clone().try_into()?,
			FurnaceBusFactory(services_ref.clone()),
		)
		.await?,
	);
	info!("connecting external clients ...");
	let clients = ExternalClients::connect(&config.clients()).await?;

	info!("initializing runner service ...");
	backend_services.job_queue.requeue_stale().await?;
	let runner = JobRunner::new(backend_services.clone(), clients.clone())?;
	let periodic = PeriodicTasks::new(backend_services.clone(), clients);
	let services = FurnaceServices {
		config: Arc::new(config),
		backend: backend_services,
		runner: Arc::new(runner),
		periodic: Arc::new(periodic),
	};
	if services_ref.set(services.clone()).is_err() {
		bail!("furnace services initialized twice");
	}

	tokio::spawn(bus::handle_bus_message(services.clone()));
	for i in 0..services.config.runners {
		tokio::spawn(services.runner.clone().run(i));
	}
	tokio::spawn(services.runner.clone().run_watcher(services.config.runners));
	tokio::spawn(services.periodic.clone().run_status_loop());
	tokio::spawn(services.periodic.clone().run_signing_loop());

	let listen_addr = services.config.http.listen.clone();
	let router = routes::make_router(services)?;
	if let Some(path) = listen_addr.strip_prefix("unix://") {
		let path = PathBuf::from(path);
		_ = fs::remove_file(&path);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)?;
		}

		let listener = UnixListener::bind(&path)?;
		info!("listening on UDS: {:?}", path);
		axum::serve(listener, router).await?;
	} else if let Some(addr) = listen_addr.strip_prefix("tcp://") {
		let listener = TcpListener::bind(addr).await?;
		info!("listening on TCP {}", listener.local_addr()?);
		axum::serve(listener, router).await?;
	} else {
		bail!("unsupported http.listen schema")
	}

	Ok(())
}

#[derive(Debug, Clone)]
pub struct FurnaceServices {
	pub config: Arc<FurnaceConfig>,
	pub backend: Arc<BackendServices>,
	pub runner: Arc<JobRunner>,
	pub periodic: Arc<PeriodicTasks>,
}

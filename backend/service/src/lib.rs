//! Kiln backend services.

use std::sync::Arc;

use build::BuildService;
use bus::{BackendBusFactory, BoxedBusService};
use cipher::{CipherError, MessageCipher};
use config::BackendConfig;
use database::{DatabaseError, DatabaseService};
use import::ImportService;
use job_queue::{JobQueue, JobQueueError};
use kiln_backend_model::{
	bus::LockKey,
	db::entity::{BuildRef, ImportRef, PackageRef},
};
use redis::{RedisError, RedisService};
use thiserror::Error;
use time::Duration;

pub mod build;
pub mod bus;
pub mod cipher;
pub mod config;
pub mod database;
pub mod import;
pub mod job_queue;
pub mod redis;
pub mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

/// Service container for Kiln backends.
///
/// All services are wrapped with [`Arc`].
#[derive(Debug, Clone)]
pub struct BackendServices {
	pub config: Arc<BackendConfig>,
	pub redis: Arc<RedisService>,
	pub database: Arc<DatabaseService>,
	pub job_queue: Arc<JobQueue>,
	pub cipher: Arc<MessageCipher>,
	pub bus: Arc<BoxedBusService>,
	pub imports: Arc<ImportService>,
	pub builds: Arc<BuildService>,
}

impl BackendServices {
	/// Connects every service.
	///
	/// Database migrations run while holding a distributed lock, so that
	/// concurrent instances do not race on them.
	#[tracing::instrument(skip(config, bus))]
	pub async fn new<B: BackendBusFactory>(config: BackendConfig, bus: B) -> Result<Self> {
		let redis = Arc::new(RedisService::new(&config.redis)?);
		let database = {
			let _lock = redis.lock(LockKey::Migration, Duration::minutes(5)).await?;
			Arc::new(DatabaseService::new(&config.database).await?)
		};
		Self::with_services(config, redis, database, bus).await
	}

	async fn with_services<B: BackendBusFactory>(
		config: BackendConfig,
		redis: Arc<RedisService>,
		database: Arc<DatabaseService>,
		bus: B,
	) -> Result<Self> {
		let config = Arc::new(config);
		let cipher = Arc::new(MessageCipher::new(&config.scheduler.message_secret)?);
		let job_queue = Arc::new(JobQueue::new(
			database.clone(),
			config.scheduler.max_attempts,
			Duration::seconds(config.scheduler.job_lease_secs as i64),
		));
		let bus = Arc::new(bus.construct(redis.clone()).await?);
		let imports = Arc::new(ImportService::new(
			config.clone(),
			database.clone(),
			job_queue.clone(),
			bus.clone(),
		));
		let builds = Arc::new(BuildService::new(
			config.clone(),
			database.clone(),
			job_queue.clone(),
			cipher.clone(),
			bus.clone(),
		));

		Ok(Self {
			config,
			redis,
			database,
			job_queue,
			cipher,
			bus,
			imports,
			builds,
		})
	}
}

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
	#[error("JSON error: {0}")]
	JsonError(#[from] serde_json::Error),
	#[error(transparent)]
	DatabaseError(#[from] DatabaseError),
	#[error(transparent)]
	RedisError(#[from] RedisError),
	#[error(transparent)]
	JobQueueError(#[from] JobQueueError),
	#[error(transparent)]
	CipherError(#[from] CipherError),
	#[error(transparent)]
	RequestError(#[from] RequestError),
}

/// Requests refused by the producer services.
#[derive(Debug, Error)]
pub enum RequestError {
	#[error("package {0} does not exist")]
	UnknownPackage(PackageRef),
	#[error("import {0} does not exist")]
	UnknownImport(ImportRef),
	#[error("build {0} does not exist")]
	UnknownBuild(BuildRef),
	#[error("package {0} is a modular candidate, use its module instead")]
	ModularCandidate(String),
	#[error("package {0} has neither an RPM nor a module source")]
	NothingToImport(String),
	#[error("package {0} has no successful import")]
	NotImported(String),
	#[error("no branch of package {0} can be built")]
	NothingToBuild(String),
	#[error("module builds of package {0} require a bearer token")]
	TokenRequired(String),
}

/// A specialized [`Result`] for backend errors.
pub type Result<T, E = BackendError> = std::result::Result<T, E>;

impl From<diesel::result::Error> for BackendError {
	fn from(value: diesel::result::Error) -> Self {
		Self::DatabaseError(DatabaseError::QueryError(value))
	}
}

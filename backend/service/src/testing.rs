//! Test environment backed by an in memory SQLite database.
//!
//! No Redis server is needed: nothing connects to Redis unless a lock or a
//! bus message is requested, and the test bus only records messages.

use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use kiln_backend_model::{
	bus::SchedulerBusMessage,
	db::{
		BoxedSqlConn,
		entity::{ImportCommitRef, ImportRef, PackageRef},
	},
};
use kiln_common_model::{distro::DistroConfig, status::ImportStatus};

use crate::{
	BackendServices, Result,
	bus::{BackendBusFactory, BackendBusService, BoxedBusService},
	config::{BackendConfig, SchedulerConfig},
	database::{DatabaseConfig, DatabaseService},
	redis::{RedisConfig, RedisService},
	store::{
		build::NewBuild,
		import::{self, NewImport},
		package::{self, NewPackage},
	},
};

pub const TEST_SECRET: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

pub fn test_config() -> BackendConfig {
	BackendConfig {
		database: DatabaseConfig {
			url: "sqlite://:memory:".to_string(),
			max_connections: 1,
		},
		redis: RedisConfig {
			url: "redis://127.0.0.1".to_string(),
			max_connections: 1,
		},
		distro: DistroConfig {
			version: 8,
			tag_prefix: "rocky".to_string(),
			git_host: "git.example.org".to_string(),
			repo_prefix: "/staging".to_string(),
			ssh_user: "git".to_string(),
			ssh_port: 22,
		},
		scheduler: SchedulerConfig {
			message_secret: TEST_SECRET.to_string(),
			poll_interval_secs: 300,
			watch_interval_secs: 180,
			max_attempts: 3,
			job_lease_secs: 3600,
		},
	}
}

/// Bus recording every message sent to the scheduler.
#[derive(Debug, Default, Clone)]
pub struct RecordingBus {
	pub messages: Arc<Mutex<Vec<SchedulerBusMessage>>>,
}

impl BackendBusService for RecordingBus {
	fn send(&self, message: SchedulerBusMessage) -> BoxFuture<'_, Result<()>> {
		if let Ok(mut messages) = self.messages.lock() {
			messages.push(message);
		}
		async { Ok(()) }.boxed()
	}
}

impl BackendBusFactory for RecordingBus {
	fn construct(self, _redis: Arc<RedisService>) -> BoxFuture<'static, Result<BoxedBusService>> {
		async move { Ok(Box::new(self) as BoxedBusService) }.boxed()
	}
}

pub async fn test_env() -> BackendServices {
	test_env_with_bus(RecordingBus::default()).await
}

pub async fn test_env_with_bus<B: BackendBusFactory>(bus: B) -> BackendServices {
	test_env_with(test_config(), bus).await
}

/// Test environment on another database, e.g. a SQLite file shared by
/// several pooled connections.
pub async fn test_env_with_database(database: DatabaseConfig) -> BackendServices {
	let config = BackendConfig {
		database,
		..test_config()
	};
	test_env_with(config, RecordingBus::default()).await
}

async fn test_env_with<B: BackendBusFactory>(config: BackendConfig, bus: B) -> BackendServices {
	let redis = Arc::new(RedisService::new(&config.redis).unwrap());
	let database = Arc::new(DatabaseService::new(&config.database).await.unwrap());
	BackendServices::with_services(config, redis, database, bus)
		.await
		.unwrap()
}

/// A package with one succeeded import carrying one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixture {
	pub package_id: PackageRef,
	pub import_id: ImportRef,
	pub commit_id: ImportCommitRef,
}

impl Fixture {
	pub async fn package_with_commit(conn: &mut BoxedSqlConn, name: &str, branch: &str) -> Self {
		let package_id = package::create(
			conn,
			&NewPackage {
				name,
				is_package: true,
				is_module: false,
				part_of_module: false,
				repo: None,
			},
		)
		.await
		.unwrap();
		Self::import_commit(conn, package_id, branch).await
	}

	/// Records a succeeded import of an existing package.
	pub async fn import_commit(conn: &mut BoxedSqlConn, package_id: PackageRef, branch: &str) -> Self {
		let import_id = import::create(
			conn,
			&NewImport {
				package_id,
				module: false,
				version: 8,
				single_tag: None,
				executor_username: "tester",
			},
		)
		.await
		.unwrap();
		assert!(import::start(conn, import_id).await.unwrap());
		assert!(import::finish(conn, import_id, ImportStatus::Succeeded)
			.await
			.unwrap());
		let commit_id = import::add_commit(conn, import_id, branch, "0123abcd")
			.await
			.unwrap();
		Self {
			package_id,
			import_id,
			commit_id,
		}
	}

	pub fn new_build(&self, mbs: bool) -> NewBuild<'static> {
		NewBuild {
			package_id: self.package_id,
			import_commit_id: self.commit_id,
			mbs,
			scratch: false,
			force_tag: None,
			arch_override: None,
			executor_username: "tester",
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[tokio::test]
	async fn test_init_services() {
		let env = test_env().await;
		assert!(env.job_queue.fetch_and_start().await.unwrap().is_none());
		assert_eq!(env.config.distro.base_tag(), "dist-rocky8");
	}
}

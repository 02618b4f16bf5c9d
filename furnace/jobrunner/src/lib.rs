use std::{sync::Arc, time::Duration};

use anyhow::Result;
use kiln_backend_clients::ExternalClients;
use kiln_backend_model::{db::BoxedSqlConn, job::JobCommand};
use kiln_backend_service::BackendServices;
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, info_span, warn};

mod build;
mod import;
mod merge;

pub use build::BuildOutcome;

#[derive(Debug)]
pub struct JobRunner {
	/// Notifier to resume the runners immediately.
	notifier: Notify,
	/// Backend services
	backend: Arc<BackendServices>,
	clients: ExternalClients,
}

impl JobRunner {
	pub fn new(backend: Arc<BackendServices>, clients: ExternalClients) -> Result<Self> {
		Ok(Self {
			notifier: Notify::const_new(),
			backend,
			clients,
		})
	}

	#[tracing::instrument(level = "info", name = "jobrunner", skip(self))]
	pub async fn run(self: Arc<Self>, index: usize) {
		info!("job runner started");
		loop {
			self.notifier.notified().await;
			debug!("notified to resume");

			let result = async {
				while self.run_next().await? {}
				Ok::<_, anyhow::Error>(())
			}
			.await;
			if let Err(error) = result {
				error!(?error, "job runner error")
			}
		}
	}

	#[tracing::instrument(level = "debug", name = "job_watcher", skip(self))]
	pub async fn run_watcher(self: Arc<Self>, runners: usize) {
		info!("job watcher started");
		let interval = Duration::from_secs(self.backend.config.scheduler.watch_interval_secs);
		loop {
			let result = async {
				self.backend.job_queue.requeue_stale().await?;
				let count = self.backend.job_queue.count_pending(runners).await?;
				for _ in 0..count {
					self.notify_one();
				}

				Ok::<_, anyhow::Error>(())
			}
			.await;
			if let Err(error) = result {
				error!(?error, "job watcher error")
			}
			tokio::time::sleep(interval).await;
		}
	}

	pub fn notify_one(&self) {
		self.notifier.notify_one();
	}

	pub fn notify_all(&self) {
		self.notifier.notify_waiters();
	}

	/// Claims and runs one job.
	///
	/// Returns whether a job was found.
	pub async fn run_next(&self) -> Result<bool> {
		let Some(job) = self.backend.job_queue.fetch_and_start().await? else {
			return Ok(false);
		};
		let mut db = self.backend.database.get().await?;
		let result = self
			.exec(&mut db, &job.command)
			.instrument(info_span!("execute job", job = %job.id, kind = job.command.kind()))
			.await;
		match result {
			Ok(follow_up) => {
				// the next link of a chain is queued only once this one is acknowledged
				db.begin().await?;
				let result = async {
					if let Some(command) = follow_up {
						self.backend.job_queue.enqueue(&mut db, command).await?;
					}
					self.backend.job_queue.finish_job(&mut db, job.id).await?;
					Ok::<_, anyhow::Error>(())
				}
				.await;
				db.end_transaction(result).await?;
			}
			Err(error) => {
				warn!(job = %job.id, ?error, "job failed");
				let requeued = self.backend.job_queue.release_job(&mut db, &job).await?;
				// a dropped link must not take the rest of its chain with it
				let next = match &job.command {
					JobCommand::ImportPackage { dependents, .. } if !requeued => {
						JobCommand::next_import(dependents)
					}
					_ => None,
				};
				if let Some(command) = next {
					self.backend.job_queue.enqueue(&mut db, command).await?;
				}
			}
		}
		Ok(true)
	}

	/// Runs a job command, returning the command to run next, if any.
	async fn exec(&self, conn: &mut BoxedSqlConn, job: &JobCommand) -> Result<Option<JobCommand>> {
		match job {
			JobCommand::ImportPackage {
				package_id,
				import_id,
				dependents,
			} => {
				self.run_import(conn, *package_id, *import_id).await?;
				Ok(JobCommand::next_import(dependents))
			}
			JobCommand::BuildPackage {
				package_id,
				build_id,
				token,
			} => {
				self.run_build(conn, *package_id, *build_id, token.as_ref())
					.await?;
				Ok(None)
			}
			JobCommand::MergeScratch { build_id } => {
				self.merge_scratch(conn, *build_id).await?;
				Ok(None)
			}
		}
	}
}

#[cfg(test)]
pub(crate) mod test {
	use std::sync::Arc;

	use kiln_backend_clients::testing::FakeClients;
	use kiln_backend_model::{
		db::{
			BoxedSqlConn,
			entity::{ImportRef, PackageRef},
		},
		job::JobCommand,
	};
	use kiln_backend_service::{
		BackendServices,
		store::{
			import::{self, NewImport},
			package::{self, NewPackage},
		},
		testing::test_env,
	};
	use kiln_common_model::status::ImportStatus;

	use super::JobRunner;

	pub async fn runner() -> (JobRunner, Arc<BackendServices>, FakeClients) {
		let backend = Arc::new(test_env().await);
		let fakes = FakeClients::new();
		let runner = JobRunner::new(backend.clone(), fakes.clients()).unwrap();
		(runner, backend, fakes)
	}

	#[tokio::test]
	async fn test_run_next_on_empty_queue() {
		let (runner, _, _) = runner().await;
		assert!(!runner.run_next().await.unwrap());
	}

	async fn queued_import(conn: &mut BoxedSqlConn, name: &str) -> (PackageRef, ImportRef) {
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
		(package_id, import_id)
	}

	#[tokio::test]
	async fn test_failed_import_advances_chain() {
		let (runner, backend, fakes) = runner().await;
		fakes.importer.set_result("libuv", &[("c8", "abc123")]);
		let mut db = backend.database.get().await.unwrap();
		// the importer has no result for http-parser
		let (first_package, first_import) = queued_import(&mut db, "http-parser").await;
		let (second_package, second_import) = queued_import(&mut db, "libuv").await;
		backend
			.job_queue
			.enqueue(
				&mut db,
				JobCommand::ImportPackage {
					package_id: first_package,
					import_id: first_import,
					dependents: vec![(second_package, second_import)],
				},
			)
			.await
			.unwrap();
		drop(db);

		assert!(runner.run_next().await.unwrap());
		assert!(runner.run_next().await.unwrap());
		assert!(!runner.run_next().await.unwrap());

		let mut db = backend.database.get().await.unwrap();
		let first = import::get(&mut db, first_import).await.unwrap();
		assert_eq!(first.status(), ImportStatus::Failed);
		let second = import::get(&mut db, second_import).await.unwrap();
		assert_eq!(second.status(), ImportStatus::Succeeded);
		assert_eq!(fakes.importer.state().calls.len(), 2);
	}

	#[tokio::test]
	async fn test_dropped_link_advances_chain() {
		let (runner, backend, fakes) = runner().await;
		fakes.importer.set_result("libuv", &[("c8", "abc123")]);
		let mut db = backend.database.get().await.unwrap();
		let (package_id, import_id) = queued_import(&mut db, "libuv").await;
		// the first link refers to an import that does not exist, so every
		// attempt fails on the database
		backend
			.job_queue
			.enqueue(
				&mut db,
				JobCommand::ImportPackage {
					package_id,
					import_id: import_id + 1000,
					dependents: vec![(package_id, import_id)],
				},
			)
			.await
			.unwrap();
		drop(db);

		// max attempts is 3 in the test environment
		for _ in 0..3 {
			assert!(runner.run_next().await.unwrap());
			assert!(fakes.importer.state().calls.is_empty());
		}
		assert!(runner.run_next().await.unwrap());
		assert!(!runner.run_next().await.unwrap());

		let mut db = backend.database.get().await.unwrap();
		let record = import::get(&mut db, import_id).await.unwrap();
		assert_eq!(record.status(), ImportStatus::Succeeded);
		assert_eq!(fakes.importer.state().calls.len(), 1);
	}
}

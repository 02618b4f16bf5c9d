use std::{collections::HashSet, sync::Arc};

use diesel::OptionalExtension;
use futures::future::{BoxFuture, FutureExt};
use kiln_backend_model::{
	bus::SchedulerBusMessage,
	db::{
		BoxedSqlConn,
		entity::{BatchRef, ImportRef, PackageRef, SqlPackage},
	},
	job::JobCommand,
};
use tracing::{info, warn};

use crate::{
	RequestError, Result,
	bus::BoxedBusService,
	config::BackendConfig,
	database::DatabaseService,
	job_queue::JobQueue,
	store::{
		batch,
		import::{self, NewImport},
		package,
	},
};

/// An import request from a user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportRequest {
	pub username: String,
	/// Import a single tag of the upstream sources.
	pub single_tag: Option<String>,
	/// Record the imports into this batch.
	pub batch: Option<BatchRef>,
}

/// Import ordering and queueing, used by API front ends.
#[derive(Debug)]
pub struct ImportService {
	config: Arc<BackendConfig>,
	db: Arc<DatabaseService>,
	job_queue: Arc<JobQueue>,
	bus: Arc<BoxedBusService>,
}

impl ImportService {
	pub fn new(
		config: Arc<BackendConfig>,
		db: Arc<DatabaseService>,
		job_queue: Arc<JobQueue>,
		bus: Arc<BoxedBusService>,
	) -> Self {
		Self {
			config,
			db,
			job_queue,
			bus,
		}
	}

	/// Records queued imports of `package` and its never imported module
	/// members, in the order they must run.
	///
	/// Members come before their module, so the module import always sees
	/// the sources of every member.
	pub async fn create_import_order(
		&self,
		conn: &mut BoxedSqlConn,
		package: &SqlPackage,
		request: &ImportRequest,
	) -> Result<Vec<(PackageRef, ImportRef)>> {
		if package.is_modular_candidate() {
			return Err(RequestError::ModularCandidate(package.name.clone()).into());
		}
		let mut walk = ImportWalk {
			version: self.config.distro.version as i32,
			request,
			visited: HashSet::new(),
			order: Vec::new(),
		};
		walk.visit(conn, package.clone()).await?;
		if walk.order.is_empty() {
			return Err(RequestError::NothingToImport(package.name.clone()).into());
		}
		if let Some(batch) = request.batch {
			for (_, import) in &walk.order {
				batch::add_import(conn, batch, *import).await?;
			}
		}
		Ok(walk.order)
	}

	/// Creates the import order of a package, and enqueues its first link.
	#[tracing::instrument(skip(self, request), fields(user = %request.username))]
	pub async fn queue_import(
		&self,
		package_id: PackageRef,
		request: &ImportRequest,
	) -> Result<Vec<(PackageRef, ImportRef)>> {
		let mut conn = self.db.get().await?;
		let package = package::get(&mut conn, package_id)
			.await
			.optional()?
			.ok_or(RequestError::UnknownPackage(package_id))?;

		conn.begin().await?;
		let result = async {
			let order = self.create_import_order(&mut conn, &package, request).await?;
			if let Some(head) = JobCommand::next_import(&order) {
				self.job_queue.enqueue(&mut conn, head).await?;
			}
			Ok::<_, crate::BackendError>(order)
		}
		.await;
		let order = conn.end_transaction(result).await?;
		drop(conn);

		info!(package = %package.name, imports = order.len(), "queued import chain");
		self.resume_job_runner().await;
		Ok(order)
	}

	/// Cancels an import which has not finished.
	///
	/// Returns whether the import was cancelled. Imports in progress keep
	/// running, their result is then discarded.
	pub async fn cancel_import(&self, import_id: ImportRef) -> Result<bool> {
		let mut conn = self.db.get().await?;
		import::get(&mut conn, import_id)
			.await
			.optional()?
			.ok_or(RequestError::UnknownImport(import_id))?;
		let cancelled = import::cancel(&mut conn, import_id).await?;
		info!(import = import_id, cancelled, "cancel import requested");
		Ok(cancelled)
	}

	pub async fn cancel_batch(&self, batch: BatchRef) -> Result<usize> {
		let mut conn = self.db.get().await?;
		let cancelled = batch::cancel_imports(&mut conn, batch).await?;
		info!(batch, cancelled, "cancelled batch imports");
		Ok(cancelled)
	}

	async fn resume_job_runner(&self) {
		if let Err(error) = self.bus.send(SchedulerBusMessage::ResumeJobRunner).await {
			// the scheduler watcher still picks the jobs up
			warn!(?error, "failed to notify the scheduler");
		}
	}
}

struct ImportWalk<'r> {
	version: i32,
	request: &'r ImportRequest,
	visited: HashSet<PackageRef>,
	order: Vec<(PackageRef, ImportRef)>,
}

impl ImportWalk<'_> {
	fn visit<'a>(
		&'a mut self,
		conn: &'a mut BoxedSqlConn,
		package: SqlPackage,
	) -> BoxFuture<'a, Result<()>> {
		async move {
			if !self.visited.insert(package.id) {
				warn!(package = %package.name, "module membership cycle, skipping");
				return Ok(());
			}
			if package.is_package {
				self.record(conn, &package, false).await?;
			}
			if package.is_module {
				for member in package::module_members(conn, package.id).await? {
					if import::count_for_package(conn, member.id).await? == 0 {
						self.visit(conn, member).await?;
					}
				}
				self.record(conn, &package, true).await?;
			}
			Ok(())
		}
		.boxed()
	}

	async fn record(&mut self, conn: &mut BoxedSqlConn, package: &SqlPackage, module: bool) -> Result<()> {
		let id = import::create(
			conn,
			&NewImport {
				package_id: package.id,
				module,
				version: self.version,
				single_tag: self.request.single_tag.as_deref(),
				executor_username: &self.request.username,
			},
		)
		.await?;
		self.order.push((package.id, id));
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use kiln_common_model::{package::Repo, status::ImportStatus};

	use super::*;
	use crate::{
		store::package::NewPackage,
		testing::{Fixture, RecordingBus, test_env, test_env_with_bus},
	};

	async fn create(conn: &mut BoxedSqlConn, name: &str, is_package: bool, is_module: bool, repo: Option<Repo>) -> PackageRef {
		package::create(
			conn,
			&NewPackage {
				name,
				is_package,
				is_module,
				part_of_module: repo == Some(Repo::ModularCandidate),
				repo,
			},
		)
		.await
		.unwrap()
	}

	fn request() -> ImportRequest {
		ImportRequest {
			username: "alice".to_string(),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn test_plain_package_order() {
		let bus = RecordingBus::default();
		let env = test_env_with_bus(bus.clone()).await;
		let mut db = env.database.get().await.unwrap();
		let bash = create(&mut db, "bash", true, false, Some(Repo::BaseOs)).await;
		drop(db);

		let order = env.imports.queue_import(bash, &request()).await.unwrap();
		assert_eq!(order.len(), 1);
		assert_eq!(order[0].0, bash);

		let job = env.job_queue.fetch_and_start().await.unwrap().unwrap();
		assert_eq!(
			job.command,
			JobCommand::ImportPackage {
				package_id: bash,
				import_id: order[0].1,
				dependents: vec![],
			}
		);
		assert_eq!(
			*bus.messages.lock().unwrap(),
			vec![SchedulerBusMessage::ResumeJobRunner]
		);
	}

	#[tokio::test]
	async fn test_module_members_come_first() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let perl = create(&mut db, "perl", false, true, Some(Repo::AppStream)).await;
		let dbi = create(&mut db, "perl-DBI", false, false, Some(Repo::ModularCandidate)).await;
		let dbd = create(&mut db, "perl-DBD", false, false, Some(Repo::ModularCandidate)).await;
		let yaml = create(&mut db, "perl-YAML", true, false, Some(Repo::ModularCandidate)).await;
		for member in [dbi, dbd, yaml] {
			package::add_module_member(&mut db, perl, member).await.unwrap();
		}
		// perl-DBD was imported before, it must not be imported again
		Fixture::import_commit(&mut db, dbd, "c8").await;

		let module = package::get(&mut db, perl).await.unwrap();
		let order = env
			.imports
			.create_import_order(&mut db, &module, &request())
			.await
			.unwrap();
		let packages: Vec<PackageRef> = order.iter().map(|(package, _)| *package).collect();
		// perl-DBI has no RPM source, so nothing is imported for it
		assert_eq!(packages, vec![yaml, perl]);

		let module_import = import::get(&mut db, order[1].1).await.unwrap();
		assert!(module_import.module);
		assert_eq!(module_import.status(), ImportStatus::Queued);
		assert_eq!(module_import.version, 8);
		assert!(!import::get(&mut db, order[0].1).await.unwrap().module);
	}

	#[tokio::test]
	async fn test_package_and_module() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let nodejs = create(&mut db, "nodejs", true, true, Some(Repo::AppStream)).await;
		let npm = create(&mut db, "npm", true, false, Some(Repo::ModularCandidate)).await;
		package::add_module_member(&mut db, nodejs, npm).await.unwrap();
		let batch = batch::create_import_batch(&mut db).await.unwrap();
		drop(db);

		let order = env
			.imports
			.queue_import(
				nodejs,
				&ImportRequest {
					batch: Some(batch),
					..request()
				},
			)
			.await
			.unwrap();
		let packages: Vec<PackageRef> = order.iter().map(|(package, _)| *package).collect();
		assert_eq!(packages, vec![nodejs, npm, nodejs]);

		let job = env.job_queue.fetch_and_start().await.unwrap().unwrap();
		assert_eq!(
			job.command,
			JobCommand::ImportPackage {
				package_id: nodejs,
				import_id: order[0].1,
				dependents: order[1..].to_vec(),
			}
		);

		let mut db = env.database.get().await.unwrap();
		assert_eq!(batch::imports(&mut db, batch).await.unwrap().len(), 3);
		drop(db);
		assert_eq!(env.imports.cancel_batch(batch).await.unwrap(), 3);
		assert!(!env.imports.cancel_import(order[0].1).await.unwrap());
	}

	#[tokio::test]
	async fn test_refuses_modular_candidates() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let npm = create(&mut db, "npm", true, false, Some(Repo::ModularCandidate)).await;
		drop(db);

		let error = env.imports.queue_import(npm, &request()).await.unwrap_err();
		assert!(matches!(
			error,
			crate::BackendError::RequestError(RequestError::ModularCandidate(_))
		));
		assert!(env.job_queue.fetch_and_start().await.unwrap().is_none());
		assert!(matches!(
			env.imports.queue_import(404, &request()).await,
			Err(crate::BackendError::RequestError(RequestError::UnknownPackage(404)))
		));
	}
}

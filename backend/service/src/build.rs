use std::sync::Arc;

use diesel::OptionalExtension;
use kiln_backend_model::{
	bus::SchedulerBusMessage,
	db::entity::{BatchRef, BuildRef, PackageRef, SqlImportCommit, SqlPackage},
	job::JobCommand,
};
use tracing::{debug, info, warn};

use crate::{
	RequestError, Result,
	bus::BoxedBusService,
	cipher::MessageCipher,
	config::BackendConfig,
	database::DatabaseService,
	job_queue::JobQueue,
	store::{
		batch,
		build::{self, NewBuild},
		import, package,
	},
};

/// Backend a branch is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildRoute {
	/// RPM build on the build hub.
	Hub,
	/// Module build on the module build service.
	ModuleBuildService,
}

/// Decides where a branch of `package` is built, or whether it is skipped.
///
/// - pre-release (`-beta`) branches are never built;
/// - container-only streams (`-container` suffix) are never built;
/// - module streams (`-stream-`) are built as modules, unless modules are
///   ignored or the package is only a member of some module;
/// - every other branch is an RPM build.
pub fn route_branch(package: &SqlPackage, branch: &str, ignore_modules: bool) -> Option<BuildRoute> {
	if branch.contains("-beta") || branch.ends_with("-container") {
		return None;
	}
	if branch.contains("-stream-") {
		if ignore_modules || (package.part_of_module && !package.is_module) {
			return None;
		}
		return Some(BuildRoute::ModuleBuildService);
	}
	Some(BuildRoute::Hub)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBuild {
	pub commit: SqlImportCommit,
	pub route: BuildRoute,
}

/// Applies [`route_branch`] to every imported branch.
pub fn plan_builds(
	package: &SqlPackage,
	commits: &[SqlImportCommit],
	ignore_modules: bool,
) -> Vec<PlannedBuild> {
	commits
		.iter()
		.filter_map(|commit| {
			let route = route_branch(package, &commit.branch, ignore_modules);
			if route.is_none() {
				debug!(package = %package.name, branch = %commit.branch, "skipping branch");
			}
			route.map(|route| PlannedBuild {
				commit: commit.clone(),
				route,
			})
		})
		.collect()
}

/// A build request from a user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BuildRequest {
	pub username: String,
	pub scratch: bool,
	/// Build into the testing tag. Ignored for scratch builds.
	pub testing: bool,
	/// Build into this tag instead of the base tag.
	pub force_tag: Option<String>,
	pub arch_override: Option<String>,
	/// Skip module stream branches.
	pub ignore_modules: bool,
	/// Bearer token of the user, required for module builds.
	pub token: Option<String>,
	/// Record the builds into this batch.
	pub batch: Option<BatchRef>,
}

/// Build planning and queueing, used by API front ends.
#[derive(Debug)]
pub struct BuildService {
	config: Arc<BackendConfig>,
	db: Arc<DatabaseService>,
	job_queue: Arc<JobQueue>,
	cipher: Arc<MessageCipher>,
	bus: Arc<BoxedBusService>,
}

impl BuildService {
	pub fn new(
		config: Arc<BackendConfig>,
		db: Arc<DatabaseService>,
		job_queue: Arc<JobQueue>,
		cipher: Arc<MessageCipher>,
		bus: Arc<BoxedBusService>,
	) -> Self {
		Self {
			config,
			db,
			job_queue,
			cipher,
			bus,
		}
	}

	/// Target tag replacing the base tag, if any.
	///
	/// An explicit tag wins over the scratch tag, which wins over the testing tag.
	pub fn target_override(&self, request: &BuildRequest) -> Option<String> {
		let distro = &self.config.distro;
		if let Some(tag) = &request.force_tag {
			Some(tag.clone())
		} else if request.scratch {
			Some(distro.scratch_tag())
		} else if request.testing {
			Some(distro.testing_tag())
		} else {
			None
		}
	}

	/// Queues builds of every buildable branch of the latest successful import.
	#[tracing::instrument(skip(self, request), fields(user = %request.username))]
	pub async fn queue_builds(
		&self,
		package_id: PackageRef,
		request: &BuildRequest,
	) -> Result<Vec<BuildRef>> {
		let mut conn = self.db.get().await?;
		let package = package::get(&mut conn, package_id)
			.await
			.optional()?
			.ok_or(RequestError::UnknownPackage(package_id))?;
		if package.is_modular_candidate() {
			return Err(RequestError::ModularCandidate(package.name).into());
		}
		let latest = import::latest_succeeded(&mut conn, package_id)
			.await?
			.ok_or_else(|| RequestError::NotImported(package.name.clone()))?;
		let commits = import::commits(&mut conn, latest.id).await?;
		let plan = plan_builds(&package, &commits, request.ignore_modules);
		if plan.is_empty() {
			return Err(RequestError::NothingToBuild(package.name).into());
		}

		let token = if plan
			.iter()
			.any(|build| build.route == BuildRoute::ModuleBuildService)
		{
			let token = request
				.token
				.as_deref()
				.ok_or_else(|| RequestError::TokenRequired(package.name.clone()))?;
			Some(self.cipher.seal(token)?)
		} else {
			None
		};
		let force_tag = self.target_override(request);

		conn.begin().await?;
		let result = async {
			let mut ids = Vec::with_capacity(plan.len());
			for planned in &plan {
				let mbs = planned.route == BuildRoute::ModuleBuildService;
				let id = build::create(
					&mut conn,
					&NewBuild {
						package_id,
						import_commit_id: planned.commit.id,
						mbs,
						scratch: request.scratch,
						force_tag: force_tag.as_deref(),
						arch_override: request.arch_override.as_deref(),
						executor_username: &request.username,
					},
				)
				.await?;
				if let Some(batch) = request.batch {
					batch::add_build(&mut conn, batch, id).await?;
				}
				let command = JobCommand::BuildPackage {
					package_id,
					build_id: id,
					token: if mbs { token.clone() } else { None },
				};
				self.job_queue.enqueue(&mut conn, command).await?;
				ids.push(id);
			}
			Ok::<_, crate::BackendError>(ids)
		}
		.await;
		let ids = conn.end_transaction(result).await?;
		drop(conn);

		info!(package = %package.name, builds = ids.len(), "queued builds");
		if let Err(error) = self.bus.send(SchedulerBusMessage::ResumeJobRunner).await {
			warn!(?error, "failed to notify the scheduler");
		}
		Ok(ids)
	}

	/// Cancels a build which has not finished.
	pub async fn cancel_build(&self, build_id: BuildRef) -> Result<bool> {
		let mut conn = self.db.get().await?;
		build::get(&mut conn, build_id)
			.await
			.optional()?
			.ok_or(RequestError::UnknownBuild(build_id))?;
		let cancelled = build::cancel(&mut conn, build_id).await?;
		info!(build = build_id, cancelled, "cancel build requested");
		Ok(cancelled)
	}

	pub async fn cancel_batch(&self, batch: BatchRef) -> Result<usize> {
		let mut conn = self.db.get().await?;
		let cancelled = batch::cancel_builds(&mut conn, batch).await?;
		info!(batch, cancelled, "cancelled batch builds");
		Ok(cancelled)
	}
}

#[cfg(test)]
mod test {
	use kiln_backend_model::db::BoxedSqlConn;
	use kiln_common_model::{package::Repo, status::BuildStatus};

	use super::*;
	use crate::{
		BackendError,
		store::package::NewPackage,
		testing::{Fixture, test_env},
	};

	fn package(part_of_module: bool, is_module: bool) -> SqlPackage {
		let time = kiln_backend_model::db::now();
		SqlPackage {
			id: 1,
			name: "perl".to_string(),
			is_package: true,
			is_module,
			part_of_module,
			repo: None,
			signed: false,
			last_import: None,
			last_build: None,
			created_at: time,
		}
	}

	#[test]
	fn test_route_branch() {
		let plain = package(false, false);
		assert_eq!(route_branch(&plain, "c8", false), Some(BuildRoute::Hub));
		assert_eq!(route_branch(&plain, "c8-beta", false), None);
		assert_eq!(route_branch(&plain, "c8-stream-1.0-container", false), None);

		let module = package(false, true);
		assert_eq!(
			route_branch(&module, "c8-stream-5.30", false),
			Some(BuildRoute::ModuleBuildService)
		);
		assert_eq!(route_branch(&module, "c8-stream-5.30", true), None);
		assert_eq!(route_branch(&module, "c8", true), Some(BuildRoute::Hub));

		let member = package(true, false);
		assert_eq!(route_branch(&member, "c8-stream-5.30", false), None);
		assert_eq!(route_branch(&member, "c8", false), Some(BuildRoute::Hub));
	}

	async fn module_with_import(conn: &mut BoxedSqlConn) -> PackageRef {
		let id = package::create(
			conn,
			&NewPackage {
				name: "perl",
				is_package: true,
				is_module: true,
				part_of_module: false,
				repo: Some(Repo::AppStream),
			},
		)
		.await
		.unwrap();
		let fixture = Fixture::import_commit(conn, id, "c8").await;
		import::add_commit(conn, fixture.import_id, "c8-stream-5.30", "feed")
			.await
			.unwrap();
		import::add_commit(conn, fixture.import_id, "c8-beta", "beef")
			.await
			.unwrap();
		id
	}

	#[tokio::test]
	async fn test_queue_builds() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let perl = module_with_import(&mut db).await;
		drop(db);

		let request = BuildRequest {
			username: "alice".to_string(),
			token: Some("bearer".to_string()),
			testing: true,
			..Default::default()
		};
		let ids = env.builds.queue_builds(perl, &request).await.unwrap();
		assert_eq!(ids.len(), 2);

		let mut db = env.database.get().await.unwrap();
		let hub = build::get(&mut db, ids[0]).await.unwrap();
		let mbs = build::get(&mut db, ids[1]).await.unwrap();
		assert!(!hub.mbs);
		assert!(mbs.mbs);
		assert_eq!(hub.status(), BuildStatus::Queued);
		assert_eq!(hub.force_tag.as_deref(), Some("dist-rocky8-testing"));
		drop(db);

		let first = env.job_queue.fetch_and_start().await.unwrap().unwrap();
		assert_eq!(
			first.command,
			JobCommand::BuildPackage {
				package_id: perl,
				build_id: ids[0],
				token: None,
			}
		);
		let second = env.job_queue.fetch_and_start().await.unwrap().unwrap();
		let JobCommand::BuildPackage {
			token: Some(token), ..
		} = second.command
		else {
			panic!("module build without a token");
		};
		assert_eq!(env.cipher.open(&token).unwrap(), "bearer");
	}

	#[tokio::test]
	async fn test_module_builds_need_token() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let perl = module_with_import(&mut db).await;
		drop(db);

		let request = BuildRequest {
			username: "alice".to_string(),
			..Default::default()
		};
		assert!(matches!(
			env.builds.queue_builds(perl, &request).await,
			Err(BackendError::RequestError(RequestError::TokenRequired(_)))
		));
		let ignoring = BuildRequest {
			ignore_modules: true,
			scratch: true,
			..request
		};
		let ids = env.builds.queue_builds(perl, &ignoring).await.unwrap();
		assert_eq!(ids.len(), 1);

		let mut db = env.database.get().await.unwrap();
		let scratch = build::get(&mut db, ids[0]).await.unwrap();
		assert!(scratch.scratch);
		assert_eq!(scratch.force_tag.as_deref(), Some("dist-rocky8-scratch"));
		drop(db);

		assert!(env.builds.cancel_build(ids[0]).await.unwrap());
		assert!(!env.builds.cancel_build(ids[0]).await.unwrap());
	}

	#[tokio::test]
	async fn test_requires_successful_import() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let id = package::create(
			&mut db,
			&NewPackage {
				name: "bash",
				is_package: true,
				is_module: false,
				part_of_module: false,
				repo: Some(Repo::BaseOs),
			},
		)
		.await
		.unwrap();
		drop(db);

		assert!(matches!(
			env.builds.queue_builds(id, &BuildRequest::default()).await,
			Err(BackendError::RequestError(RequestError::NotImported(_)))
		));
	}
}

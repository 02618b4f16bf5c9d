//! Build dispatcher.

use anyhow::{Result, anyhow};
use kiln_backend_clients::{hub::BuildOptions, mbs::MbsSubmission};
use kiln_backend_model::{
	db::{
		BoxedSqlConn,
		entity::{BuildRef, PackageRef, SqlBuild, SqlImportCommit, SqlPackage},
	},
	job::SealedToken,
};
use kiln_backend_service::store::{build, import, package};
use kiln_common_model::status::BuildStatus;
use tracing::{error, info, warn};

use crate::JobRunner;

/// Outcome of a submission that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
	/// The backend accepted the build, which is now BUILDING.
	Started,
	/// The module build service already builds this scmurl. The build is
	/// CANCELLED.
	Conflict,
	/// The build is no longer queued.
	Skipped,
}

impl JobRunner {
	/// Submits one build.
	///
	/// A failed submission marks the build FAILED, so only database errors
	/// are returned.
	#[tracing::instrument(skip(self, conn, token))]
	pub(crate) async fn run_build(
		&self,
		conn: &mut BoxedSqlConn,
		package_id: PackageRef,
		build_id: BuildRef,
		token: Option<&SealedToken>,
	) -> Result<BuildOutcome> {
		let record = build::get(conn, build_id).await?;
		if record.status() != BuildStatus::Queued {
			info!(status = %record.status(), "skipping build");
			return Ok(BuildOutcome::Skipped);
		}
		let package = package::get(conn, package_id).await?;
		let commit = import::get_commit(conn, record.import_commit_id).await?;

		conn.begin().await?;
		let result = self.dispatch(conn, &package, &record, &commit, token).await;
		let result = conn.end_transaction(result).await;

		match result {
			Ok(outcome) => {
				info!(package = %package.name, ?outcome, "build dispatched");
				Ok(outcome)
			}
			Err(error) => {
				error!(package = %package.name, ?error, "build submission failed");
				build::abandon_queued(conn, build_id, BuildStatus::Failed).await?;
				Ok(BuildOutcome::Skipped)
			}
		}
	}

	async fn dispatch(
		&self,
		conn: &mut BoxedSqlConn,
		package: &SqlPackage,
		record: &SqlBuild,
		commit: &SqlImportCommit,
		token: Option<&SealedToken>,
	) -> Result<BuildOutcome> {
		let distro = &self.backend.config.distro;

		if record.mbs {
			let token = token.ok_or_else(|| anyhow!("module build {} carries no token", record.id))?;
			let token = self.backend.cipher.open(token)?;
			let scmurl = distro.module_scm_url(&package.name, &commit.commit_hash);
			match self.clients.mbs.submit(&token, &scmurl, &commit.branch).await? {
				MbsSubmission::Created(mbs_id) => {
					if !build::start_module_build(conn, record.id, mbs_id).await? {
						warn!(mbs_id, "build cancelled during submission, module build left untracked");
						return Ok(BuildOutcome::Skipped);
					}
					Ok(BuildOutcome::Started)
				}
				MbsSubmission::Conflict => {
					warn!(%scmurl, "module is already being built");
					build::abandon_queued(conn, record.id, BuildStatus::Cancelled).await?;
					Ok(BuildOutcome::Conflict)
				}
			}
		} else {
			let source = distro.rpm_source_url(&package.name, &commit.commit_hash);
			let target = record
				.force_tag
				.clone()
				.unwrap_or_else(|| distro.base_tag());
			let options = BuildOptions {
				scratch: record.scratch,
				arch_override: record.arch_override.clone(),
			};
			let task_id = self.clients.hub.build(&source, &target, &options).await?;
			if !build::start_hub_build(conn, record.id, task_id).await? {
				warn!(task_id, "build cancelled during submission, hub task left untracked");
				return Ok(BuildOutcome::Skipped);
			}
			Ok(BuildOutcome::Started)
		}
	}
}

#[cfg(test)]
mod test {
	use std::sync::Arc;

	use async_trait::async_trait;
	use kiln_backend_clients::{
		hub::BuildOptions,
		mbs::{self, MbsSubmission, ModuleBuild, ModuleBuildService},
		testing::FakeClients,
	};
	use kiln_backend_model::db::entity::BuildRef;
	use kiln_backend_service::{
		BackendServices,
		database::DatabaseConfig,
		store::build::{self, NewBuild},
		testing::{Fixture, test_env_with_database},
	};
	use kiln_common_model::status::BuildStatus;

	use super::BuildOutcome;
	use crate::{JobRunner, test::runner};

	#[tokio::test]
	async fn test_hub_build() {
		let (runner, backend, fakes) = runner().await;
		let mut db = backend.database.get().await.unwrap();
		let fixture = Fixture::package_with_commit(&mut db, "gtk+", "r8").await;
		let build_id = build::create(
			&mut db,
			&NewBuild {
				scratch: true,
				force_tag: Some("dist-rocky8-scratch"),
				arch_override: Some("x86_64"),
				..fixture.new_build(false)
			},
		)
		.await
		.unwrap();

		let outcome = runner
			.run_build(&mut db, fixture.package_id, build_id, None)
			.await
			.unwrap();
		assert_eq!(outcome, BuildOutcome::Started);

		let record = build::get(&mut db, build_id).await.unwrap();
		assert_eq!(record.status(), BuildStatus::Building);
		assert_eq!(record.koji_id, Some(1000));
		assert_eq!(
			fakes.hub.state().submitted,
			vec![(
				"git+https://git.example.org/staging/rpms/gtkplus.git#0123abcd".to_string(),
				"dist-rocky8-scratch".to_string(),
				BuildOptions {
					scratch: true,
					arch_override: Some("x86_64".to_string()),
				},
			)]
		);

		// a redelivered job does not submit twice
		let outcome = runner
			.run_build(&mut db, fixture.package_id, build_id, None)
			.await
			.unwrap();
		assert_eq!(outcome, BuildOutcome::Skipped);
		assert_eq!(fakes.hub.state().submitted.len(), 1);
	}

	#[tokio::test]
	async fn test_module_build() {
		let (runner, backend, fakes) = runner().await;
		let token = backend.cipher.seal("bearer-token").unwrap();
		let mut db = backend.database.get().await.unwrap();
		let fixture = Fixture::package_with_commit(&mut db, "nodejs", "r8-stream-14").await;
		let build_id = build::create(&mut db, &fixture.new_build(true)).await.unwrap();

		let outcome = runner
			.run_build(&mut db, fixture.package_id, build_id, Some(&token))
			.await
			.unwrap();
		assert_eq!(outcome, BuildOutcome::Started);

		let record = build::get(&mut db, build_id).await.unwrap();
		assert_eq!(record.status(), BuildStatus::Building);
		assert_eq!(record.mbs_id, Some(500));
		assert_eq!(
			fakes.mbs.state().submissions,
			vec![(
				"bearer-token".to_string(),
				"https://git.example.org/staging/modules/nodejs?#0123abcd".to_string(),
				"r8-stream-14".to_string(),
			)]
		);
	}

	#[tokio::test]
	async fn test_module_build_conflict() {
		let (runner, backend, fakes) = runner().await;
		fakes.mbs.state().conflict = true;
		let token = backend.cipher.seal("bearer-token").unwrap();
		let mut db = backend.database.get().await.unwrap();
		let fixture = Fixture::package_with_commit(&mut db, "nodejs", "r8-stream-14").await;
		let build_id = build::create(&mut db, &fixture.new_build(true)).await.unwrap();

		let outcome = runner
			.run_build(&mut db, fixture.package_id, build_id, Some(&token))
			.await
			.unwrap();
		assert_eq!(outcome, BuildOutcome::Conflict);

		let record = build::get(&mut db, build_id).await.unwrap();
		assert_eq!(record.status(), BuildStatus::Cancelled);
		assert_eq!(record.mbs_id, None);
		assert_eq!(record.koji_id, None);
	}

	#[tokio::test]
	async fn test_failed_submission() {
		let (runner, backend, fakes) = runner().await;
		fakes.hub.state().build_fault = Some(1000);
		let mut db = backend.database.get().await.unwrap();
		let fixture = Fixture::package_with_commit(&mut db, "bash", "r8").await;
		let hub_build = build::create(&mut db, &fixture.new_build(false)).await.unwrap();
		let module_build = build::create(&mut db, &fixture.new_build(true)).await.unwrap();

		runner
			.run_build(&mut db, fixture.package_id, hub_build, None)
			.await
			.unwrap();
		// module builds cannot be submitted without a token
		runner
			.run_build(&mut db, fixture.package_id, module_build, None)
			.await
			.unwrap();

		for id in [hub_build, module_build] {
			let record = build::get(&mut db, id).await.unwrap();
			assert_eq!(record.status(), BuildStatus::Failed);
		}
		assert!(fakes.mbs.state().submissions.is_empty());
		let package = kiln_backend_service::store::package::get(&mut db, fixture.package_id)
			.await
			.unwrap();
		assert!(package.last_build.is_none());
	}

	/// Module build service accepting a build that gets cancelled through
	/// the API before the runner records it.
	struct CancelledOnSubmit {
		backend: Arc<BackendServices>,
		build_id: BuildRef,
	}

	#[async_trait]
	impl ModuleBuildService for CancelledOnSubmit {
		async fn submit(&self, _token: &str, _scmurl: &str, _branch: &str) -> mbs::Result<MbsSubmission> {
			assert!(self.backend.builds.cancel_build(self.build_id).await.unwrap());
			Ok(MbsSubmission::Created(77))
		}

		async fn get_build(&self, id: i64) -> mbs::Result<ModuleBuild> {
			Err(mbs::MbsError::NotFound(id))
		}
	}

	#[tokio::test]
	async fn test_build_cancelled_during_submission() {
		let dir = tempfile::tempdir().unwrap();
		let backend = Arc::new(
			test_env_with_database(DatabaseConfig {
				url: format!("sqlite://{}", dir.path().join("kiln.db").display()),
				max_connections: 2,
			})
			.await,
		);
		let token = backend.cipher.seal("bearer-token").unwrap();
		let mut db = backend.database.get().await.unwrap();
		let fixture = Fixture::package_with_commit(&mut db, "nodejs", "r8-stream-14").await;
		let build_id = build::create(&mut db, &fixture.new_build(true)).await.unwrap();

		let mut clients = FakeClients::new().clients();
		clients.mbs = Arc::new(CancelledOnSubmit {
			backend: backend.clone(),
			build_id,
		});
		let runner = JobRunner::new(backend.clone(), clients).unwrap();

		let outcome = runner
			.run_build(&mut db, fixture.package_id, build_id, Some(&token))
			.await
			.unwrap();
		assert_eq!(outcome, BuildOutcome::Skipped);

		let record = build::get(&mut db, build_id).await.unwrap();
		assert_eq!(record.status(), BuildStatus::Cancelled);
		assert_eq!(record.mbs_id, None);
	}
}

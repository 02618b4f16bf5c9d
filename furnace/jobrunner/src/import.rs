//! Import executor.

use anyhow::Result;
use kiln_backend_clients::srpmproc::ImportRequest;
use kiln_backend_model::db::{
	BoxedSqlConn,
	entity::{ImportRef, PackageRef, SqlImport, SqlPackage},
	now,
};
use kiln_backend_service::store::{import, package};
use kiln_common_model::{distro::SourceKind, status::ImportStatus};
use tracing::{error, info, warn};

use crate::JobRunner;

impl JobRunner {
	/// Runs one import.
	///
	/// Failures of the import itself are recorded on the import, so only
	/// database errors are returned.
	#[tracing::instrument(skip(self, conn))]
	pub(crate) async fn run_import(
		&self,
		conn: &mut BoxedSqlConn,
		package_id: PackageRef,
		import_id: ImportRef,
	) -> Result<()> {
		let record = import::get(conn, import_id).await?;
		if record.status().is_terminal() || !import::start(conn, import_id).await? {
			info!(status = %record.status(), "skipping import");
			return Ok(());
		}
		let package = package::get(conn, package_id).await?;

		conn.begin().await?;
		let result = self.import_package(conn, &package, &record).await;
		let result = conn.end_transaction(result).await;

		match result {
			Ok(()) => info!(package = %package.name, "import succeeded"),
			Err(error) => {
				conn.begin().await?;
				let result = async {
					let failed = import::finish(conn, import_id, ImportStatus::Failed).await?;
					// a cancelled import keeps the freshness of earlier imports
					if failed {
						package::set_last_import(conn, package_id, None).await?;
					}
					Ok::<_, anyhow::Error>(failed)
				}
				.await;
				if conn.end_transaction(result).await? {
					error!(package = %package.name, ?error, "import failed");
				} else {
					warn!(package = %package.name, ?error, "import cancelled while running");
				}
			}
		}
		Ok(())
	}

	async fn import_package(
		&self,
		conn: &mut BoxedSqlConn,
		package: &SqlPackage,
		record: &SqlImport,
	) -> Result<()> {
		let distro = &self.backend.config.distro;
		if package.is_standalone_for(record.module) {
			self.clients
				.hub
				.package_list_add(&distro.base_tag(), &package.name)
				.await?;
		}

		let commits = self
			.clients
			.importer
			.import(&ImportRequest {
				import_id: record.id,
				package: &package.name,
				module_mode: record.module,
				single_tag: record.single_tag.as_deref(),
			})
			.await?;
		for (branch, commit) in &commits {
			import::add_commit(conn, record.id, branch, commit).await?;
		}
		package::set_last_import(conn, package.id, Some(now())).await?;

		let kind = if record.module {
			SourceKind::Modules
		} else {
			SourceKind::Rpms
		};
		self.clients
			.git
			.make_public(&distro.project_path(kind, &package.name))
			.await?;

		if !import::finish(conn, record.id, ImportStatus::Succeeded).await? {
			anyhow::bail!("import {} was cancelled", record.id);
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::sync::Arc;

	use async_trait::async_trait;
	use kiln_backend_clients::{
		srpmproc::{self, BranchCommits, ImportRequest, ImportTool},
		testing::FakeClients,
	};
	use kiln_backend_model::{db::BoxedSqlConn, job::JobCommand};
	use kiln_backend_service::{
		BackendServices,
		database::DatabaseConfig,
		store::{
			import::{self, NewImport},
			package::{self, NewPackage},
		},
		testing::test_env_with_database,
	};
	use kiln_common_model::status::ImportStatus;

	use crate::{JobRunner, test::runner};

	async fn package_and_import(conn: &mut BoxedSqlConn, name: &str, module: bool) -> (i64, i64) {
		let package_id = package::create(
			conn,
			&NewPackage {
				name,
				is_package: !module,
				is_module: module,
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
				module,
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
	async fn test_import_succeeds() {
		let (runner, backend, fakes) = runner().await;
		fakes.importer.set_result("bash", &[("main", "abc123")]);
		let mut db = backend.database.get().await.unwrap();
		let (package_id, import_id) = package_and_import(&mut db, "bash", false).await;

		runner.run_import(&mut db, package_id, import_id).await.unwrap();

		let record = import::get(&mut db, import_id).await.unwrap();
		assert_eq!(record.status(), ImportStatus::Succeeded);
		let commits = import::commits(&mut db, import_id).await.unwrap();
		assert_eq!(commits.len(), 1);
		assert_eq!(commits[0].branch, "main");
		assert_eq!(commits[0].commit_hash, "abc123");
		assert!(package::get(&mut db, package_id).await.unwrap().last_import.is_some());

		assert_eq!(
			fakes.hub.state().package_lists,
			vec![("dist-rocky8".to_string(), "bash".to_string())]
		);
		assert_eq!(fakes.git.public(), vec!["staging/rpms/bash".to_string()]);
	}

	#[tokio::test]
	async fn test_module_import_is_not_listed() {
		let (runner, backend, fakes) = runner().await;
		fakes.importer.set_result("nodejs", &[("r8-stream-14", "f00")]);
		let mut db = backend.database.get().await.unwrap();
		let (package_id, import_id) = package_and_import(&mut db, "nodejs", true).await;

		runner.run_import(&mut db, package_id, import_id).await.unwrap();

		assert!(fakes.hub.state().package_lists.is_empty());
		assert_eq!(fakes.git.public(), vec!["staging/modules/nodejs".to_string()]);
		let calls = fakes.importer.state().calls.clone();
		assert_eq!(calls, vec![(import_id, "nodejs".to_string(), true, None)]);
	}

	#[tokio::test]
	async fn test_import_failure_clears_freshness() {
		let (runner, backend, fakes) = runner().await;
		let mut db = backend.database.get().await.unwrap();
		let (package_id, import_id) = package_and_import(&mut db, "bash", false).await;
		package::set_last_import(&mut db, package_id, Some(kiln_backend_model::db::now()))
			.await
			.unwrap();

		// the importer has no result for bash
		runner.run_import(&mut db, package_id, import_id).await.unwrap();

		let record = import::get(&mut db, import_id).await.unwrap();
		assert_eq!(record.status(), ImportStatus::Failed);
		assert!(import::commits(&mut db, import_id).await.unwrap().is_empty());
		assert!(package::get(&mut db, package_id).await.unwrap().last_import.is_none());
		assert!(fakes.git.public().is_empty());
	}

	#[tokio::test]
	async fn test_cancelled_import_advances_chain() {
		let (runner, backend, fakes) = runner().await;
		fakes.importer.set_result("nodejs", &[("r8-stream-14", "f00")]);
		let mut db = backend.database.get().await.unwrap();
		let (member_id, member_import) = package_and_import(&mut db, "libuv", false).await;
		let (module_id, module_import) = package_and_import(&mut db, "nodejs", true).await;
		assert!(import::cancel(&mut db, member_import).await.unwrap());
		backend
			.job_queue
			.enqueue(
				&mut db,
				JobCommand::ImportPackage {
					package_id: member_id,
					import_id: member_import,
					dependents: vec![(module_id, module_import)],
				},
			)
			.await
			.unwrap();
		drop(db);

		assert!(runner.run_next().await.unwrap());
		assert!(fakes.importer.state().calls.is_empty());

		assert!(runner.run_next().await.unwrap());
		assert_eq!(fakes.importer.state().calls.len(), 1);
		assert!(!runner.run_next().await.unwrap());

		let mut db = backend.database.get().await.unwrap();
		let record = import::get(&mut db, module_import).await.unwrap();
		assert_eq!(record.status(), ImportStatus::Succeeded);
		let record = import::get(&mut db, member_import).await.unwrap();
		assert_eq!(record.status(), ImportStatus::Cancelled);
	}

	/// Import tool whose import gets cancelled through the API while it runs.
	struct CancelledMidway {
		backend: Arc<BackendServices>,
	}

	#[async_trait]
	impl ImportTool for CancelledMidway {
		async fn import(&self, request: &ImportRequest<'_>) -> srpmproc::Result<BranchCommits> {
			let cancelled = self.backend.imports.cancel_import(request.import_id).await.unwrap();
			assert!(cancelled);
			Ok(BranchCommits::from([("c8".to_string(), "abc123".to_string())]))
		}
	}

	#[tokio::test]
	async fn test_import_cancelled_while_running() {
		let dir = tempfile::tempdir().unwrap();
		let backend = Arc::new(
			test_env_with_database(DatabaseConfig {
				url: format!("sqlite://{}", dir.path().join("kiln.db").display()),
				max_connections: 2,
			})
			.await,
		);
		let fakes = FakeClients::new();
		let mut clients = fakes.clients();
		clients.importer = Arc::new(CancelledMidway {
			backend: backend.clone(),
		});
		let runner = JobRunner::new(backend.clone(), clients).unwrap();

		let mut db = backend.database.get().await.unwrap();
		let (package_id, import_id) = package_and_import(&mut db, "bash", false).await;
		package::set_last_import(&mut db, package_id, Some(kiln_backend_model::db::now()))
			.await
			.unwrap();

		runner.run_import(&mut db, package_id, import_id).await.unwrap();

		let record = import::get(&mut db, import_id).await.unwrap();
		assert_eq!(record.status(), ImportStatus::Cancelled);
		assert!(import::commits(&mut db, import_id).await.unwrap().is_empty());
		assert!(package::get(&mut db, package_id).await.unwrap().last_import.is_some());
	}
}

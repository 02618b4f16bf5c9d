use diesel::{QueryResult, insert_into, prelude::*, update};
use kiln_backend_model::db::{
	BoxedSqlConn,
	entity::{ImportCommitRef, ImportRef, PackageRef, SqlImport, SqlImportCommit},
	schema::{import, import_commit},
	types::SqlImportStatus,
};
use kiln_common_model::status::ImportStatus;

/// An import to be recorded in the queued state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImport<'a> {
	pub package_id: PackageRef,
	pub module: bool,
	pub version: i32,
	pub single_tag: Option<&'a str>,
	pub executor_username: &'a str,
}

pub async fn create(conn: &mut BoxedSqlConn, new: &NewImport<'_>) -> QueryResult<ImportRef> {
	conn.get_result(
		insert_into(import::table)
			.values((
				import::package_id.eq(new.package_id),
				import::status.eq(SqlImportStatus::code(ImportStatus::Queued)),
				import::module.eq(new.module),
				import::version.eq(new.version),
				import::single_tag.eq(new.single_tag),
				import::executor_username.eq(new.executor_username),
			))
			.returning(import::id),
	)
	.await
}

pub async fn get(conn: &mut BoxedSqlConn, id: ImportRef) -> QueryResult<SqlImport> {
	conn.get_result(import::table.find(id)).await
}

fn code(status: ImportStatus) -> i16 {
	SqlImportStatus::code(status)
}

/// Claims an import for a job runner.
///
/// Imports left IN_PROGRESS by a runner that died are claimed again.
/// Returns whether the import was claimed.
pub async fn start(conn: &mut BoxedSqlConn, id: ImportRef) -> QueryResult<bool> {
	let queued = code(ImportStatus::Queued);
	let in_progress = code(ImportStatus::InProgress);
	let cols = conn
		.execute(
			update(
				import::table.filter(
					import::id
						.eq(id)
						.and(import::status.eq(queued).or(import::status.eq(in_progress))),
				),
			)
			.set(import::status.eq(in_progress)),
		)
		.await?;
	Ok(cols != 0)
}

/// Moves an IN_PROGRESS import to its final state.
///
/// Returns whether the import was still in progress, i.e. not cancelled
/// while running.
pub async fn finish(conn: &mut BoxedSqlConn, id: ImportRef, status: ImportStatus) -> QueryResult<bool> {
	let cols = conn
		.execute(
			update(import::table.filter(import::id.eq(id).and(import::status.eq(code(ImportStatus::InProgress)))))
				.set(import::status.eq(code(status))),
		)
		.await?;
	Ok(cols != 0)
}

/// Cancels an import that no job runner has finished.
///
/// Returns whether the import was cancelled.
pub async fn cancel(conn: &mut BoxedSqlConn, id: ImportRef) -> QueryResult<bool> {
	let queued = SqlImportStatus::code(ImportStatus::Queued);
	let in_progress = SqlImportStatus::code(ImportStatus::InProgress);
	let cols = conn
		.execute(
			update(
				import::table.filter(
					import::id
						.eq(id)
						.and(import::status.eq(queued).or(import::status.eq(in_progress))),
				),
			)
			.set(import::status.eq(SqlImportStatus::code(ImportStatus::Cancelled))),
		)
		.await?;
	Ok(cols != 0)
}

pub async fn count_for_package(conn: &mut BoxedSqlConn, package: PackageRef) -> QueryResult<i64> {
	conn.get_result(
		import::table
			.filter(import::package_id.eq(package))
			.count(),
	)
	.await
}

/// The most recent successful import of a package.
pub async fn latest_succeeded(
	conn: &mut BoxedSqlConn,
	package: PackageRef,
) -> QueryResult<Option<SqlImport>> {
	conn.get_result(
		import::table
			.filter(
				import::package_id
					.eq(package)
					.and(import::status.eq(SqlImportStatus::code(ImportStatus::Succeeded))),
			)
			.order(import::id.desc())
			.limit(1),
	)
	.await
	.optional()
}

pub async fn add_commit(
	conn: &mut BoxedSqlConn,
	import: ImportRef,
	branch: &str,
	commit_hash: &str,
) -> QueryResult<ImportCommitRef> {
	conn.get_result(
		insert_into(import_commit::table)
			.values((
				import_commit::import_id.eq(import),
				import_commit::branch.eq(branch),
				import_commit::commit_hash.eq(commit_hash),
			))
			.returning(import_commit::id),
	)
	.await
}

/// Commits of an import, ordered by ID.
pub async fn commits(conn: &mut BoxedSqlConn, import: ImportRef) -> QueryResult<Vec<SqlImportCommit>> {
	conn.load(
		import_commit::table
			.filter(import_commit::import_id.eq(import))
			.order(import_commit::id.asc()),
	)
	.await
}

pub async fn get_commit(
	conn: &mut BoxedSqlConn,
	id: ImportCommitRef,
) -> QueryResult<SqlImportCommit> {
	conn.get_result(import_commit::table.find(id)).await
}

use diesel::{QueryResult, insert_into, prelude::*, update};
use kiln_backend_model::db::{
	BoxedSqlConn,
	entity::{BuildRef, ImportCommitRef, PackageRef, SqlBuild},
	schema::build,
	types::SqlBuildStatus,
};
use kiln_common_model::status::BuildStatus;

/// A build to be recorded in the queued state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBuild<'a> {
	pub package_id: PackageRef,
	pub import_commit_id: ImportCommitRef,
	pub mbs: bool,
	pub scratch: bool,
	pub force_tag: Option<&'a str>,
	pub arch_override: Option<&'a str>,
	pub executor_username: &'a str,
}

fn code(status: BuildStatus) -> i16 {
	SqlBuildStatus::code(status)
}

pub async fn create(conn: &mut BoxedSqlConn, new: &NewBuild<'_>) -> QueryResult<BuildRef> {
	conn.get_result(
		insert_into(build::table)
			.values((
				build::package_id.eq(new.package_id),
				build::import_commit_id.eq(new.import_commit_id),
				build::status.eq(code(BuildStatus::Queued)),
				build::mbs.eq(new.mbs),
				build::scratch.eq(new.scratch),
				build::scratch_merged.eq(false),
				build::force_tag.eq(new.force_tag),
				build::arch_override.eq(new.arch_override),
				build::signed.eq(false),
				build::executor_username.eq(new.executor_username),
			))
			.returning(build::id),
	)
	.await
}

pub async fn get(conn: &mut BoxedSqlConn, id: BuildRef) -> QueryResult<SqlBuild> {
	conn.get_result(build::table.find(id)).await
}

/// Builds in `status`, ordered by ID.
pub async fn list_by_status(
	conn: &mut BoxedSqlConn,
	status: BuildStatus,
) -> QueryResult<Vec<SqlBuild>> {
	conn.load(
		build::table
			.filter(build::status.eq(code(status)))
			.order(build::id.asc()),
	)
	.await
}

/// Succeeded regular builds which are not signed yet, ordered by ID.
pub async fn list_unsigned(conn: &mut BoxedSqlConn) -> QueryResult<Vec<SqlBuild>> {
	conn.load(
		build::table
			.filter(
				build::status
					.eq(code(BuildStatus::Succeeded))
					.and(build::signed.eq(false))
					.and(build::scratch.eq(false)),
			)
			.order(build::id.asc()),
	)
	.await
}

/// Moves a queued build to BUILDING on the build hub.
///
/// Returns whether the build was still queued.
pub async fn start_hub_build(
	conn: &mut BoxedSqlConn,
	id: BuildRef,
	task_id: i64,
) -> QueryResult<bool> {
	let cols = conn
		.execute(
			update(build::table.filter(build::id.eq(id).and(build::status.eq(code(BuildStatus::Queued)))))
				.set((
					build::status.eq(code(BuildStatus::Building)),
					build::koji_id.eq(Some(task_id)),
				)),
		)
		.await?;
	Ok(cols != 0)
}

/// Moves a queued build to BUILDING on the module build service.
pub async fn start_module_build(
	conn: &mut BoxedSqlConn,
	id: BuildRef,
	mbs_id: i64,
) -> QueryResult<bool> {
	let cols = conn
		.execute(
			update(build::table.filter(build::id.eq(id).and(build::status.eq(code(BuildStatus::Queued)))))
				.set((
					build::status.eq(code(BuildStatus::Building)),
					build::mbs_id.eq(Some(mbs_id)),
				)),
		)
		.await?;
	Ok(cols != 0)
}

/// Moves a queued build to a terminal state without submitting it.
pub async fn abandon_queued(
	conn: &mut BoxedSqlConn,
	id: BuildRef,
	status: BuildStatus,
) -> QueryResult<bool> {
	let cols = conn
		.execute(
			update(build::table.filter(build::id.eq(id).and(build::status.eq(code(BuildStatus::Queued)))))
				.set(build::status.eq(code(status))),
		)
		.await?;
	Ok(cols != 0)
}

/// Moves a BUILDING build to its final state.
///
/// Returns whether the build was still building.
pub async fn finish_building(
	conn: &mut BoxedSqlConn,
	id: BuildRef,
	status: BuildStatus,
) -> QueryResult<bool> {
	let cols = conn
		.execute(
			update(build::table.filter(build::id.eq(id).and(build::status.eq(code(BuildStatus::Building)))))
				.set(build::status.eq(code(status))),
		)
		.await?;
	Ok(cols != 0)
}

/// Cancels a build that has not reached a terminal state.
///
/// Builds already submitted keep running on their backend; the scheduler
/// only stops tracking them.
pub async fn cancel(conn: &mut BoxedSqlConn, id: BuildRef) -> QueryResult<bool> {
	let queued = code(BuildStatus::Queued);
	let building = code(BuildStatus::Building);
	let cols = conn
		.execute(
			update(
				build::table.filter(
					build::id
						.eq(id)
						.and(build::status.eq(queued).or(build::status.eq(building))),
				),
			)
			.set(build::status.eq(code(BuildStatus::Cancelled))),
		)
		.await?;
	Ok(cols != 0)
}

/// Marks a build signed, unless it already is.
pub async fn mark_signed(conn: &mut BoxedSqlConn, id: BuildRef) -> QueryResult<bool> {
	let cols = conn
		.execute(
			update(build::table.filter(build::id.eq(id).and(build::signed.eq(false))))
				.set(build::signed.eq(true)),
		)
		.await?;
	Ok(cols != 0)
}

pub async fn mark_scratch_merged(conn: &mut BoxedSqlConn, id: BuildRef) -> QueryResult<bool> {
	let cols = conn
		.execute(
			update(build::table.filter(build::id.eq(id).and(build::scratch_merged.eq(false))))
				.set(build::scratch_merged.eq(true)),
		)
		.await?;
	Ok(cols != 0)
}

use diesel::{QueryResult, insert_into, prelude::*};
use kiln_backend_model::db::{
	BoxedSqlConn,
	now,
	entity::{BatchRef, BuildRef, ImportRef},
	schema::{batch_build, batch_build_item, batch_import, batch_import_item},
};

use super::{build, import};

pub async fn create_import_batch(conn: &mut BoxedSqlConn) -> QueryResult<BatchRef> {
	conn.get_result(
		insert_into(batch_import::table)
			.values(batch_import::created_at.eq(now()))
			.returning(batch_import::id),
	)
	.await
}

pub async fn add_import(
	conn: &mut BoxedSqlConn,
	batch: BatchRef,
	import: ImportRef,
) -> QueryResult<()> {
	conn.execute(insert_into(batch_import_item::table).values((
		batch_import_item::batch_import_id.eq(batch),
		batch_import_item::import_id.eq(import),
	)))
	.await?;
	Ok(())
}

pub async fn imports(conn: &mut BoxedSqlConn, batch: BatchRef) -> QueryResult<Vec<ImportRef>> {
	conn.load(
		batch_import_item::table
			.filter(batch_import_item::batch_import_id.eq(batch))
			.order(batch_import_item::import_id.asc())
			.select(batch_import_item::import_id),
	)
	.await
}

pub async fn create_build_batch(conn: &mut BoxedSqlConn) -> QueryResult<BatchRef> {
	conn.get_result(
		insert_into(batch_build::table)
			.values(batch_build::created_at.eq(now()))
			.returning(batch_build::id),
	)
	.await
}

pub async fn add_build(conn: &mut BoxedSqlConn, batch: BatchRef, build: BuildRef) -> QueryResult<()> {
	conn.execute(insert_into(batch_build_item::table).values((
		batch_build_item::batch_build_id.eq(batch),
		batch_build_item::build_id.eq(build),
	)))
	.await?;
	Ok(())
}

pub async fn builds(conn: &mut BoxedSqlConn, batch: BatchRef) -> QueryResult<Vec<BuildRef>> {
	conn.load(
		batch_build_item::table
			.filter(batch_build_item::batch_build_id.eq(batch))
			.order(batch_build_item::build_id.asc())
			.select(batch_build_item::build_id),
	)
	.await
}

/// Cancels every unfinished import of a batch, returning the count cancelled.
pub async fn cancel_imports(conn: &mut BoxedSqlConn, batch: BatchRef) -> QueryResult<usize> {
	let mut cancelled = 0;
	for id in imports(conn, batch).await? {
		if import::cancel(conn, id).await? {
			cancelled += 1;
		}
	}
	Ok(cancelled)
}

/// Cancels every unfinished build of a batch, returning the count cancelled.
pub async fn cancel_builds(conn: &mut BoxedSqlConn, batch: BatchRef) -> QueryResult<usize> {
	let mut cancelled = 0;
	for id in builds(conn, batch).await? {
		if build::cancel(conn, id).await? {
			cancelled += 1;
		}
	}
	Ok(cancelled)
}

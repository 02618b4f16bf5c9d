use diesel::{
	QueryResult, RunQueryDsl, SqliteConnection,
	connection::{AnsiTransactionManager, SimpleConnection, TransactionManager},
	migration::MigrationVersion,
	query_builder::AsQuery,
	query_dsl::methods::{ExecuteDsl, LoadQuery},
};
use diesel_async::{
	AnsiTransactionManager as AsyncAnsiTransactionManager, AsyncPgConnection,
	RunQueryDsl as AsyncRunQueryDsl, SimpleAsyncConnection,
	TransactionManager as AsyncTransactionManager,
	async_connection_wrapper::AsyncConnectionWrapper,
	methods::{ExecuteDsl as AsyncExecuteDsl, LoadQuery as AsyncLoadQuery},
	pooled_connection::PoolableConnection,
};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use futures::future::{BoxFuture, FutureExt, ready};
use time::{OffsetDateTime, PrimitiveDateTime};

pub mod entity;
pub mod schema;
pub mod types;

/// A connection to either of the supported databases.
///
/// PostgreSQL is used in production. SQLite is used for tests and
/// small single-node deployments.
pub enum BoxedSqlConn {
	Pg(AsyncPgConnection),
	Sqlite(SqliteConnection),
}

/// Current UTC time as stored in timestamp columns.
pub fn now() -> PrimitiveDateTime {
	let now = OffsetDateTime::now_utc();
	PrimitiveDateTime::new(now.date(), now.time())
}

impl BoxedSqlConn {
	/// Executes `SELECT 1` to test if the connection is ready for use.
	pub fn ping(&mut self) -> BoxFuture<Result<(), diesel::result::Error>> {
		match self {
			BoxedSqlConn::Pg(conn) => conn.batch_execute("SELECT 1").boxed(),
			BoxedSqlConn::Sqlite(conn) => ready(conn.batch_execute("SELECT 1")).boxed(),
		}
	}

	pub fn is_broken(&mut self) -> bool {
		match self {
			BoxedSqlConn::Pg(conn) => conn.is_broken(),
			BoxedSqlConn::Sqlite(conn) => {
				AnsiTransactionManager::is_broken_transaction_manager(conn)
			}
		}
	}
}

/// Explicit transaction control.
///
/// Every [`begin`](BoxedSqlConn::begin) must be paired with either
/// [`commit`](BoxedSqlConn::commit), [`rollback`](BoxedSqlConn::rollback)
/// or [`end_transaction`](BoxedSqlConn::end_transaction) before the
/// connection is returned to the pool.
impl BoxedSqlConn {
	pub async fn begin(&mut self) -> QueryResult<()> {
		match self {
			BoxedSqlConn::Pg(conn) => AsyncAnsiTransactionManager::begin_transaction(conn).await,
			BoxedSqlConn::Sqlite(conn) => AnsiTransactionManager::begin_transaction(conn),
		}
	}

	pub async fn commit(&mut self) -> QueryResult<()> {
		match self {
			BoxedSqlConn::Pg(conn) => AsyncAnsiTransactionManager::commit_transaction(conn).await,
			BoxedSqlConn::Sqlite(conn) => AnsiTransactionManager::commit_transaction(conn),
		}
	}

	pub async fn rollback(&mut self) -> QueryResult<()> {
		match self {
			BoxedSqlConn::Pg(conn) => {
				AsyncAnsiTransactionManager::rollback_transaction(conn).await
			}
			BoxedSqlConn::Sqlite(conn) => AnsiTransactionManager::rollback_transaction(conn),
		}
	}

	/// Commits the current transaction if `result` is `Ok`, or rolls it back
	/// otherwise, then returns `result`.
	pub async fn end_transaction<R, E>(&mut self, result: Result<R, E>) -> Result<R, E>
	where
		E: From<diesel::result::Error>,
	{
		match result {
			Ok(value) => {
				self.commit().await?;
				Ok(value)
			}
			Err(user_error) => match self.rollback().await {
				Ok(()) => Err(user_error),
				// The original error most likely broke the transaction manager.
				Err(diesel::result::Error::BrokenTransactionManager) => Err(user_error),
				Err(rollback_error) => Err(rollback_error.into()),
			},
		}
	}
}

impl<'query> BoxedSqlConn {
	/// Executes the given command, returning the number of rows affected.
	///
	/// `execute` is usually used in conjunction with [`insert_into`](diesel::insert_into()),
	/// [`update`](diesel::update()) and [`delete`](diesel::delete()) where the number of
	/// affected rows is often enough information.
	///
	/// Dispatches [RunQueryDsl::execute].
	pub fn execute<Q>(&'query mut self, query: Q) -> BoxFuture<'query, QueryResult<usize>>
	where
		Q: AsQuery,
		Q: AsyncExecuteDsl<AsyncPgConnection> + 'query,
		Q: ExecuteDsl<SqliteConnection>,
	{
		match self {
			BoxedSqlConn::Pg(conn) => AsyncExecuteDsl::execute(query, conn),
			BoxedSqlConn::Sqlite(conn) => ready(ExecuteDsl::execute(query, conn)).boxed(),
		}
	}

	/// Executes the given query, returning a [`Vec`] with the returned rows.
	///
	/// Dispatches [RunQueryDsl::load].
	pub fn load<'conn, Q, U>(&'conn mut self, query: Q) -> BoxFuture<'query, QueryResult<Vec<U>>>
	where
		Q: Send,
		Q: AsyncLoadQuery<'query, AsyncPgConnection, U> + 'query,
		Q: LoadQuery<'query, SqliteConnection, U>,
		U: Send + 'query,
		'conn: 'query,
	{
		match self {
			BoxedSqlConn::Pg(conn) => AsyncRunQueryDsl::load(query, conn).boxed(),
			BoxedSqlConn::Sqlite(conn) => ready(RunQueryDsl::load(query, conn)).boxed(),
		}
	}

	/// Runs the command, and returns the affected row.
	///
	/// `Err(NotFound)` will be returned if the query affected 0 rows. You can
	/// call `.optional()` on the result of this if the command was optional to
	/// get back a `Result<Option<U>>`
	///
	/// Dispatches [RunQueryDsl::get_result].
	pub fn get_result<Q, U>(&'query mut self, query: Q) -> BoxFuture<'query, QueryResult<U>>
	where
		Q: AsQuery + Send,
		Q: AsyncLoadQuery<'query, AsyncPgConnection, U> + 'query,
		Q: LoadQuery<'query, SqliteConnection, U>,
		U: Send + 'query,
	{
		match self {
			BoxedSqlConn::Pg(conn) => AsyncRunQueryDsl::get_result(query, conn).boxed(),
			BoxedSqlConn::Sqlite(conn) => ready(RunQueryDsl::get_result(query, conn)).boxed(),
		}
	}
}

const POSTGRESQL_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/postgresql");
const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/sqlite");

/// Run all pending migrations.
///
/// This is not async, so a spawn-blocking wrapper is required.
///
/// Dispatches [MigrationHarness::run_pending_migrations].
pub fn run_migrations(
	conn: BoxedSqlConn,
) -> diesel::migration::Result<Vec<MigrationVersion<'static>>> {
	match conn {
		BoxedSqlConn::Pg(conn) => {
			let mut async_wrapper: AsyncConnectionWrapper<AsyncPgConnection> =
				AsyncConnectionWrapper::from(conn);
			async_wrapper
				.run_pending_migrations(POSTGRESQL_MIGRATIONS)
				.map(|versions| {
					versions
						.into_iter()
						.map(|version| version.as_owned())
						.collect()
				})
		}
		BoxedSqlConn::Sqlite(mut conn) => run_migrations_sqlite(&mut conn),
	}
}

/// Run migrations for SQLite.
///
/// In memory databases live and die with their only connection, so the
/// migrations must run on the very connection that is handed out later.
pub fn run_migrations_sqlite(
	conn: &mut SqliteConnection,
) -> diesel::migration::Result<Vec<MigrationVersion<'static>>> {
	conn.run_pending_migrations(SQLITE_MIGRATIONS)
		.map(|versions| {
			versions
				.into_iter()
				.map(|version| version.as_owned())
				.collect()
		})
}

#[cfg(test)]
pub(crate) mod test {
	use diesel::Connection;

	use super::*;

	pub fn make_test_db() -> BoxedSqlConn {
		let mut conn = SqliteConnection::establish(":memory:").unwrap();
		run_migrations_sqlite(&mut conn).unwrap();
		BoxedSqlConn::Sqlite(conn)
	}

	#[test]
	fn test_sqlite_migrations() {
		let db = BoxedSqlConn::Sqlite(SqliteConnection::establish(":memory:").unwrap());
		let versions = run_migrations(db).unwrap();
		assert_eq!(versions.len(), 1);
	}
}

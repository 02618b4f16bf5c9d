use std::sync::Arc;

use diesel::{delete, insert_into, prelude::*, update};
use kiln_backend_model::{
	db::{BoxedSqlConn, now, schema::job_queue::dsl},
	job::{Job, JobCommand, JobRef},
};
use thiserror::Error;
use time::{Duration, PrimitiveDateTime};
use tracing::{info, warn};

use crate::{Result, database::DatabaseService};

/// Default priority of enqueued jobs. Higher priorities run first.
pub const DEFAULT_PRIORITY: u16 = 100;

/// The durable job queue.
///
/// Jobs are fetched with at-least-once semantics: a job is deleted only
/// once its runner finishes it, so every handler must tolerate re-runs.
#[derive(Debug)]
pub struct JobQueue {
	db: Arc<DatabaseService>,
	max_attempts: u16,
	lease: Duration,
}

impl JobQueue {
	pub fn new(db: Arc<DatabaseService>, max_attempts: u16, lease: Duration) -> Self {
		Self {
			db,
			max_attempts,
			lease,
		}
	}

	pub async fn enqueue(&self, conn: &mut BoxedSqlConn, job: JobCommand) -> Result<JobRef> {
		self.enqueue_with_priority(conn, job, DEFAULT_PRIORITY).await
	}

	pub async fn enqueue_with_priority(
		&self,
		conn: &mut BoxedSqlConn,
		job: JobCommand,
		priority: u16,
	) -> Result<JobRef> {
		let (kind, job_data) = job.serialize()?;
		let job_data = serde_json::to_string(&job_data)?;

		let id: JobRef = conn
			.get_result(
				insert_into(dsl::job_queue)
					.values((
						dsl::kind.eq(kind.as_str()),
						dsl::data.eq(job_data),
						dsl::priority.eq(priority as i16),
						dsl::attempts.eq(0i16),
					))
					.returning(dsl::id),
			)
			.await?;
		info!(%kind, %id, "enqueued job");

		Ok(id)
	}

	/// Claims the pending job with the highest priority.
	///
	/// Jobs of unknown kinds, or with undecodable payloads, are logged and deleted.
	pub async fn fetch_and_start(&self) -> Result<Option<Job>> {
		let mut conn = self.db.get().await?;

		loop {
			// for jobs with the same priority, order them by ID,
			// which is equivalent to ordering by insertion time
			let result: Option<(JobRef, String, String, i16)> = conn
				.get_result(
					dsl::job_queue
						.limit(1)
						.filter(dsl::started_at.is_null())
						.order((dsl::priority.desc(), dsl::id.asc()))
						.select((dsl::id, dsl::kind, dsl::data, dsl::attempts)),
				)
				.await
				.optional()?;
			let Some((id, kind, data, attempts)) = result else {
				return Ok(None);
			};

			let cols = conn
				.execute(
					update(dsl::job_queue)
						.filter(dsl::id.eq(id).and(dsl::started_at.is_null()))
						.set(dsl::started_at.eq(Some(now()))),
				)
				.await?;
			if cols == 0 {
				warn!(%id, "SQL lightweight job queue polling hit contented");
				continue;
			}

			let command = serde_json::from_str(&data)
				.and_then(|data| JobCommand::deserialize(&kind, data));
			match command {
				Ok(command) => {
					info!(%id, %kind, "polled lightweight job");
					return Ok(Some(Job {
						id,
						attempts: attempts.max(0) as u16,
						command,
					}));
				}
				Err(error) => {
					warn!(%id, %kind, %error, "dropping undecodable job");
					conn.execute(delete(dsl::job_queue).filter(dsl::id.eq(id)))
						.await?;
				}
			}
		}
	}

	/// Deletes a finished job.
	pub async fn finish_job(&self, conn: &mut BoxedSqlConn, id: JobRef) -> Result<()> {
		let cols = conn
			.execute(
				delete(dsl::job_queue).filter(dsl::id.eq(id).and(dsl::started_at.is_not_null())),
			)
			.await?;
		if cols == 0 {
			warn!(%id, "job has been aborted or finished by another worker");
			return Err(JobQueueError::JobAborted(id).into());
		}
		Ok(())
	}

	/// Returns a failed job to the queue, or drops it after too many attempts.
	///
	/// Returns whether the job is still queued.
	pub async fn release_job(&self, conn: &mut BoxedSqlConn, job: &Job) -> Result<bool> {
		let attempts = job.attempts.saturating_add(1);
		if attempts >= self.max_attempts {
			warn!(id = job.id, attempts, "job exhausted its attempts, dropping it");
			conn.execute(delete(dsl::job_queue).filter(dsl::id.eq(job.id)))
				.await?;
			return Ok(false);
		}
		conn.execute(
			update(dsl::job_queue)
				.filter(dsl::id.eq(job.id))
				.set((
					dsl::started_at.eq(None::<PrimitiveDateTime>),
					dsl::attempts.eq(attempts as i16),
				)),
		)
		.await?;
		info!(id = job.id, attempts, "released job");
		Ok(true)
	}

	/// Returns jobs started longer ago than the lease to the queue.
	///
	/// Their runner is presumed dead, whichever scheduler instance it
	/// belonged to. Jobs of live runners are left alone.
	pub async fn requeue_stale(&self) -> Result<usize> {
		let mut conn = self.db.get().await?;
		let cutoff = now() - self.lease;
		let cols = conn
			.execute(
				update(dsl::job_queue)
					.filter(dsl::started_at.lt(Some(cutoff)))
					.set(dsl::started_at.eq(None::<PrimitiveDateTime>)),
			)
			.await?;
		if cols != 0 {
			warn!(count = cols, "requeued jobs whose runner is gone");
		}
		Ok(cols)
	}

	/// Counts pending jobs, up to `limit`.
	pub async fn count_pending(&self, limit: usize) -> Result<usize> {
		let mut conn = self.db.get().await?;
		let count: i64 = conn
			.get_result(dsl::job_queue.filter(dsl::started_at.is_null()).count())
			.await?;
		Ok((count.max(0) as usize).min(limit))
	}
}

#[derive(Debug, Error)]
pub enum JobQueueError {
	#[error("job {0} has been aborted")]
	JobAborted(JobRef),
}

#[cfg(test)]
mod test {
	use diesel::{QueryDsl, insert_into, prelude::*, update};
	use kiln_backend_model::{
		db::{now, schema::job_queue::dsl},
		job::JobCommand,
	};
	use time::Duration;

	use crate::testing::test_env;

	fn merge(build_id: i64) -> JobCommand {
		JobCommand::MergeScratch { build_id }
	}

	#[tokio::test]
	async fn test_enqueue() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let first = env.job_queue.enqueue(&mut db, merge(1)).await.unwrap();
		let second = env.job_queue.enqueue(&mut db, merge(2)).await.unwrap();
		assert!(second > first);
	}

	#[tokio::test]
	async fn test_enqueue_fetch() {
		let env = test_env().await;
		let mut db = env.database.get().await.unwrap();
		let jq = env.job_queue;
		jq.enqueue(&mut db, merge(1)).await.unwrap();
		jq.enqueue_with_priority(&mut db, merge(2), 120)
			.await
			.unwrap();
		jq.enqueue(&mut db, merge(3)).await.unwrap();
		drop(db);
		assert_eq!(jq.fetch_and_start().await.unwrap().unwrap().command, merge(2));
		assert_eq!(jq.fetch_and_start().await.unwrap().unwrap().command, merge(1));
		assert_eq!(jq.fetch_and_start().await.unwrap().unwrap().command, merge(3));
		assert!(jq.fetch_and_start().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_finish() {
		let env = test_env().await;
		let jq = env.job_queue;

		let mut db = env.database.get().await.unwrap();
		jq.enqueue(&mut db, merge(1)).await.unwrap();
		drop(db);

		let id = jq.fetch_and_start().await.unwrap().unwrap().id;

		let mut db = env.database.get().await.unwrap();
		jq.finish_job(&mut db, id).await.unwrap();
		let count: i64 = db.get_result(dsl::job_queue.count()).await.unwrap();
		assert_eq!(count, 0);
		assert!(jq.finish_job(&mut db, id).await.is_err());
		drop(db);

		assert!(jq.fetch_and_start().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_release_until_dropped() {
		let env = test_env().await;
		let jq = env.job_queue;

		let mut db = env.database.get().await.unwrap();
		jq.enqueue(&mut db, merge(1)).await.unwrap();
		drop(db);

		// max attempts is 3 in the test environment
		for expected_attempts in 0..3u16 {
			let job = jq.fetch_and_start().await.unwrap().unwrap();
			assert_eq!(job.attempts, expected_attempts);
			let mut db = env.database.get().await.unwrap();
			let queued = jq.release_job(&mut db, &job).await.unwrap();
			assert_eq!(queued, expected_attempts < 2);
		}
		assert!(jq.fetch_and_start().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_requeue_stale() {
		let env = test_env().await;
		let jq = env.job_queue;

		let mut db = env.database.get().await.unwrap();
		jq.enqueue(&mut db, merge(1)).await.unwrap();
		jq.enqueue(&mut db, merge(2)).await.unwrap();
		drop(db);

		let running = jq.fetch_and_start().await.unwrap().unwrap();
		assert_eq!(jq.count_pending(10).await.unwrap(), 1);
		// a job of a live runner is not taken away from it
		assert_eq!(jq.requeue_stale().await.unwrap(), 0);
		assert_eq!(jq.count_pending(10).await.unwrap(), 1);

		// the lease is one hour in the test environment
		let mut db = env.database.get().await.unwrap();
		db.execute(
			update(dsl::job_queue)
				.filter(dsl::id.eq(running.id))
				.set(dsl::started_at.eq(Some(now() - Duration::hours(2)))),
		)
		.await
		.unwrap();
		drop(db);

		assert_eq!(jq.requeue_stale().await.unwrap(), 1);
		assert_eq!(jq.count_pending(10).await.unwrap(), 2);
		assert_eq!(jq.count_pending(1).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_unknown_kind_is_dropped() {
		let env = test_env().await;
		let jq = env.job_queue;

		let mut db = env.database.get().await.unwrap();
		db.execute(insert_into(dsl::job_queue).values((
			dsl::kind.eq("rebuild_world"),
			dsl::data.eq("{}"),
			dsl::priority.eq(200i16),
			dsl::attempts.eq(0i16),
		)))
		.await
		.unwrap();
		jq.enqueue(&mut db, merge(7)).await.unwrap();
		drop(db);

		assert_eq!(jq.fetch_and_start().await.unwrap().unwrap().command, merge(7));
		assert!(jq.fetch_and_start().await.unwrap().is_none());
		assert_eq!(jq.count_pending(10).await.unwrap(), 0);
	}
}

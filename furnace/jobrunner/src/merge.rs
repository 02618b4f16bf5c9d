use anyhow::Result;
use kiln_backend_model::db::{BoxedSqlConn, entity::BuildRef};
use kiln_backend_service::store::build;
use kiln_common_model::status::BuildStatus;
use tracing::{error, info};

use crate::JobRunner;

impl JobRunner {
	/// Merges a succeeded scratch build into a real build on the hub.
	///
	/// Returns whether the build was merged. Hub failures leave the build
	/// unmerged so that the merge can be requested again.
	#[tracing::instrument(skip(self, conn))]
	pub(crate) async fn merge_scratch(&self, conn: &mut BoxedSqlConn, build_id: BuildRef) -> Result<bool> {
		let record = build::get(conn, build_id).await?;
		let task_id = match record.koji_id {
			Some(task_id)
				if record.scratch
					&& !record.scratch_merged
					&& record.status() == BuildStatus::Succeeded =>
			{
				task_id
			}
			_ => {
				info!(
					scratch = record.scratch,
					merged = record.scratch_merged,
					status = %record.status(),
					"build cannot be merged"
				);
				return Ok(false);
			}
		};

		if let Err(error) = self.clients.hub.merge_scratch(task_id).await {
			error!(task = task_id, ?error, "failed to merge scratch build");
			return Ok(false);
		}
		build::mark_scratch_merged(conn, build_id).await?;
		info!(task = task_id, "merged scratch build");
		Ok(true)
	}
}

#[cfg(test)]
mod test {
	use kiln_backend_service::{
		store::build::{self, NewBuild},
		testing::Fixture,
	};
	use kiln_common_model::status::BuildStatus;

	use crate::test::runner;

	#[tokio::test]
	async fn test_merge_scratch() {
		let (runner, backend, fakes) = runner().await;
		let mut db = backend.database.get().await.unwrap();
		let fixture = Fixture::package_with_commit(&mut db, "bash", "r8").await;
		let build_id = build::create(
			&mut db,
			&NewBuild {
				scratch: true,
				..fixture.new_build(false)
			},
		)
		.await
		.unwrap();

		// not finished yet
		assert!(!runner.merge_scratch(&mut db, build_id).await.unwrap());

		build::start_hub_build(&mut db, build_id, 42).await.unwrap();
		build::finish_building(&mut db, build_id, BuildStatus::Succeeded)
			.await
			.unwrap();

		fakes.hub.state().merge_fault = Some(1000);
		assert!(!runner.merge_scratch(&mut db, build_id).await.unwrap());
		assert!(!build::get(&mut db, build_id).await.unwrap().scratch_merged);

		fakes.hub.state().merge_fault = None;
		assert!(runner.merge_scratch(&mut db, build_id).await.unwrap());
		assert!(build::get(&mut db, build_id).await.unwrap().scratch_merged);
		assert!(!runner.merge_scratch(&mut db, build_id).await.unwrap());
		assert_eq!(fakes.hub.state().merged, vec![42]);
	}
}

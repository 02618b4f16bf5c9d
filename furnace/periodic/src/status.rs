//! Build status reconciliation.

use anyhow::Result;
use kiln_backend_clients::hub::{FaultClass, TaskId, TaskState};
use kiln_backend_model::db::{entity::SqlBuild, now};
use kiln_backend_service::store::{build, package};
use kiln_common_model::status::BuildStatus;
use tracing::{debug, info, warn};

use crate::{PeriodicTasks, TickReport};

impl PeriodicTasks {
	/// Moves every BUILDING build whose backend finished to its final state.
	pub async fn check_build_status(&self) -> Result<TickReport> {
		let builds = {
			let mut db = self.backend.database.get().await?;
			build::list_by_status(&mut db, BuildStatus::Building).await?
		};
		debug!(count = builds.len(), "checking building builds");

		let mut report = TickReport::default();
		for record in builds {
			let result = self.check_build(&record).await;
			report.record(result, record.id);
		}
		Ok(report)
	}

	/// Returns whether the build reached a final state.
	async fn check_build(&self, record: &SqlBuild) -> Result<bool> {
		let status = match (record.koji_id, record.mbs_id) {
			(Some(task_id), _) => self.hub_task_status(task_id).await?,
			(None, Some(mbs_id)) => self.module_build_status(mbs_id).await?,
			(None, None) => {
				warn!(build = record.id, "building build has no backend id");
				None
			}
		};
		let Some(status) = status else {
			return Ok(false);
		};

		let mut db = self.backend.database.get().await?;
		db.begin().await?;
		let result = async {
			// the build may have been cancelled since it was listed
			let finished = build::finish_building(&mut db, record.id, status).await?;
			if finished && status == BuildStatus::Succeeded {
				package::set_last_build(&mut db, record.package_id, now()).await?;
			}
			Ok::<_, anyhow::Error>(finished)
		}
		.await;
		let finished = db.end_transaction(result).await?;
		if finished {
			info!(build = record.id, %status, "build finished");
		}
		Ok(finished)
	}

	/// Final status of a hub task, or `None` while it runs.
	///
	/// A failed task is FAILED when the hub reports a build failure, and
	/// CANCELLED when it reports an invalid request.
	async fn hub_task_status(&self, task_id: TaskId) -> Result<Option<BuildStatus>> {
		let info = self.clients.hub.get_task_info(task_id).await?;
		let status = match info.state {
			TaskState::Closed => BuildStatus::Succeeded,
			TaskState::Canceled => BuildStatus::Cancelled,
			TaskState::Failed => match self.clients.hub.get_task_result(task_id).await {
				Ok(()) => BuildStatus::Failed,
				Err(error) => match error.fault_class() {
					Some(FaultClass::BuildFailure) => BuildStatus::Failed,
					Some(FaultClass::InvalidRequest) => BuildStatus::Cancelled,
					None => return Err(error.into()),
				},
			},
			TaskState::Free | TaskState::Open | TaskState::Assigned => return Ok(None),
		};
		Ok(Some(status))
	}

	async fn module_build_status(&self, mbs_id: i64) -> Result<Option<BuildStatus>> {
		let detail = self.clients.mbs.get_build(mbs_id).await?;
		Ok(match detail.state_name.as_str() {
			"ready" => Some(BuildStatus::Succeeded),
			"failed" => Some(BuildStatus::Failed),
			_ => None,
		})
	}
}

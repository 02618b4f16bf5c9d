//! Tagging and signing of succeeded builds.

use anyhow::Result;
use kiln_backend_clients::{
	hub::{HubBuild, TaskId},
	mbs::ModuleBuild,
	sigul::Signer,
};
use kiln_backend_model::db::{
	entity::{SqlBuild, SqlPackage},
	now,
};
use kiln_backend_service::store::{build, package};
use kiln_common_model::distro::strip_source_fragment;
use tracing::{debug, info, warn};

use crate::{PeriodicTasks, TickReport};

impl PeriodicTasks {
	/// Tags and signs every succeeded build that is not signed yet.
	pub async fn sign_unsigned_builds(&self) -> Result<TickReport> {
		let Some(signer) = self.clients.signer.clone() else {
			return Ok(TickReport::default());
		};
		let builds = {
			let mut db = self.backend.database.get().await?;
			build::list_unsigned(&mut db).await?
		};
		debug!(count = builds.len(), "signing unsigned builds");

		let mut report = TickReport::default();
		for record in builds {
			let result = self.sign_build(signer.as_ref(), &record).await;
			report.record(result, record.id);
		}
		Ok(report)
	}

	/// Returns whether the build is now signed.
	async fn sign_build(&self, signer: &dyn Signer, record: &SqlBuild) -> Result<bool> {
		let package = {
			let mut db = self.backend.database.get().await?;
			package::get(&mut db, record.package_id).await?
		};
		match (record.koji_id, record.mbs_id) {
			(Some(task_id), _) => self.sign_hub_build(signer, &package, task_id).await?,
			(None, Some(mbs_id)) => self.sign_module_build(signer, &package, mbs_id).await?,
			(None, None) => {
				warn!(build = record.id, "succeeded build has no backend id");
				return Ok(false);
			}
		}

		let mut db = self.backend.database.get().await?;
		db.begin().await?;
		let result = async {
			let signed = build::mark_signed(&mut db, record.id).await?;
			if record.mbs {
				package::mark_signed(&mut db, package.id).await?;
			}
			Ok::<_, anyhow::Error>(signed)
		}
		.await;
		let signed = db.end_transaction(result).await?;
		if signed {
			info!(build = record.id, package = %package.name, "build signed");
		} else {
			debug!(build = record.id, "build was signed concurrently");
		}
		Ok(signed)
	}

	async fn sign_hub_build(&self, signer: &dyn Signer, package: &SqlPackage, task_id: TaskId) -> Result<()> {
		let compose = self.backend.config.distro.compose_tag();
		self.clients
			.hub
			.package_list_add(&compose, &package.name)
			.await?;
		for hub_build in self.clients.hub.list_builds_for_task(task_id).await? {
			self.tag_once(&compose, &hub_build.nvr).await?;
			self.sign_rpms(signer, hub_build.build_id).await?;
		}
		Ok(())
	}

	async fn sign_module_build(&self, signer: &dyn Signer, module: &SqlPackage, mbs_id: i64) -> Result<()> {
		let detail = self.clients.mbs.get_build(mbs_id).await?;
		let mut details = Vec::with_capacity(1 + detail.siblings.len());
		for sibling in &detail.siblings {
			details.push(self.clients.mbs.get_build(*sibling).await?);
		}
		details.push(detail);

		let mut hub_builds = Vec::new();
		for detail in &details {
			hub_builds.extend(self.sign_components(signer, detail).await?);
		}

		let members = {
			let mut db = self.backend.database.get().await?;
			package::module_members(&mut db, module.id).await?
		};
		let distro = &self.backend.config.distro;
		let module_compose = distro.module_compose_tag();
		for member in members {
			{
				let mut db = self.backend.database.get().await?;
				package::set_last_build(&mut db, member.id, now()).await?;
			}
			if !member.is_modular_candidate() {
				continue;
			}
			self.clients
				.hub
				.package_list_add(&module_compose, &member.name)
				.await?;
			let source = distro.rpm_source_base(&member.name);
			let member_builds = hub_builds.iter().filter(|hub_build| {
				hub_build.source.as_deref().map(strip_source_fragment) == Some(source.as_str())
			});
			for hub_build in member_builds {
				self.tag_once(&module_compose, &hub_build.nvr).await?;
			}
		}
		Ok(())
	}

	/// Signs the complete components of one module build, returning their
	/// hub builds.
	async fn sign_components(&self, signer: &dyn Signer, detail: &ModuleBuild) -> Result<Vec<HubBuild>> {
		let mut hub_builds = Vec::new();
		for (name, component) in detail.complete_components() {
			let Some(task_id) = component.task_id else {
				warn!(module_build = detail.id, component = name, "complete component has no task");
				continue;
			};
			for hub_build in self.clients.hub.list_builds_for_task(task_id).await? {
				self.sign_rpms(signer, hub_build.build_id).await?;
				hub_builds.push(hub_build);
			}
		}
		Ok(hub_builds)
	}

	/// Tags `nvr` into `tag` unless the tag history shows it already is.
	async fn tag_once(&self, tag: &str, nvr: &str) -> Result<()> {
		if self.clients.hub.is_tagged(tag, nvr).await? {
			debug!(tag, nvr, "build already tagged");
			return Ok(());
		}
		self.clients.hub.tag_build(tag, nvr).await?;
		info!(tag, nvr, "tagged build");
		Ok(())
	}

	/// Signs every RPM of a hub build that lacks the signature.
	async fn sign_rpms(&self, signer: &dyn Signer, build_id: i64) -> Result<()> {
		let key_id = signer.key_id();
		for rpm in self.clients.hub.list_build_rpms(build_id).await? {
			let nvr_arch = rpm.nvr_arch();
			if self.clients.hub.has_signature(rpm.id, key_id).await? {
				debug!(rpm = %nvr_arch, "rpm already signed");
				continue;
			}
			signer.sign_rpm(&nvr_arch).await?;
			self.clients.hub.write_signed_rpm(&nvr_arch, key_id).await?;
			debug!(rpm = %nvr_arch, "signed rpm");
		}
		Ok(())
	}
}

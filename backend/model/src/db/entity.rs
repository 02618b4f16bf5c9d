//! Rows as loaded from the database.
//!
//! Field order follows the column order in [`schema`](super::schema).

use diesel::Queryable;
use kiln_common_model::{
	package::Repo,
	status::{BuildStatus, ImportStatus},
};
use time::PrimitiveDateTime;

use super::types::{SqlBuildStatus, SqlImportStatus, SqlRepo};

pub type PackageRef = i64;
pub type ImportRef = i64;
pub type ImportCommitRef = i64;
pub type BuildRef = i64;
pub type BatchRef = i64;

#[derive(Debug, Clone, PartialEq, Eq, Queryable)]
pub struct SqlPackage {
	pub id: PackageRef,
	pub name: String,
	pub is_package: bool,
	pub is_module: bool,
	pub part_of_module: bool,
	pub repo: Option<i16>,
	pub signed: bool,
	pub last_import: Option<PrimitiveDateTime>,
	pub last_build: Option<PrimitiveDateTime>,
	pub created_at: PrimitiveDateTime,
}

impl SqlPackage {
	pub fn repo(&self) -> Option<Repo> {
		self.repo.map(|repo| SqlRepo::from(repo).into_common())
	}

	pub fn is_modular_candidate(&self) -> bool {
		self.repo().is_some_and(|repo| !repo.is_standalone())
	}

	/// Whether an RPM import of this package is registered to the base tag
	/// on its own, i.e. the package is not only built inside a module.
	pub fn is_standalone_for(&self, module_import: bool) -> bool {
		!module_import && !(self.part_of_module && !self.is_package)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable)]
pub struct SqlImport {
	pub id: ImportRef,
	pub package_id: PackageRef,
	pub status: i16,
	pub module: bool,
	pub version: i32,
	pub single_tag: Option<String>,
	pub executor_username: String,
	pub created_at: PrimitiveDateTime,
}

impl SqlImport {
	pub fn status(&self) -> ImportStatus {
		SqlImportStatus::from(self.status).into_common()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable)]
pub struct SqlImportCommit {
	pub id: ImportCommitRef,
	pub import_id: ImportRef,
	pub branch: String,
	pub commit_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Queryable)]
pub struct SqlBuild {
	pub id: BuildRef,
	pub package_id: PackageRef,
	pub import_commit_id: ImportCommitRef,
	pub status: i16,
	pub mbs: bool,
	pub scratch: bool,
	pub scratch_merged: bool,
	pub force_tag: Option<String>,
	pub arch_override: Option<String>,
	pub koji_id: Option<i64>,
	pub mbs_id: Option<i64>,
	pub signed: bool,
	pub executor_username: String,
	pub created_at: PrimitiveDateTime,
}

impl SqlBuild {
	pub fn status(&self) -> BuildStatus {
		SqlBuildStatus::from(self.status).into_common()
	}
}

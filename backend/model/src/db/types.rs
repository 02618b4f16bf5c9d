use kiln_common_model::{
	package::Repo,
	status::{BuildStatus, ImportStatus},
};

/// State of an import.
///
/// Stored as a small integer column. Unknown values are decoded as cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SqlImportStatus {
	#[default]
	Queued = 0,
	InProgress = 1,
	Succeeded = 2,
	Failed = 3,
	Cancelled = 4,
}

impl From<i16> for SqlImportStatus {
	fn from(value: i16) -> Self {
		match value {
			0 => Self::Queued,
			1 => Self::InProgress,
			2 => Self::Succeeded,
			3 => Self::Failed,
			4 => Self::Cancelled,
			_ => Self::Cancelled,
		}
	}
}

impl From<ImportStatus> for SqlImportStatus {
	fn from(value: ImportStatus) -> Self {
		match value {
			ImportStatus::Queued => Self::Queued,
			ImportStatus::InProgress => Self::InProgress,
			ImportStatus::Succeeded => Self::Succeeded,
			ImportStatus::Failed => Self::Failed,
			ImportStatus::Cancelled => Self::Cancelled,
		}
	}
}

impl SqlImportStatus {
	pub fn code(status: ImportStatus) -> i16 {
		Self::from(status) as i16
	}

	pub fn into_common(self) -> ImportStatus {
		match self {
			Self::Queued => ImportStatus::Queued,
			Self::InProgress => ImportStatus::InProgress,
			Self::Succeeded => ImportStatus::Succeeded,
			Self::Failed => ImportStatus::Failed,
			Self::Cancelled => ImportStatus::Cancelled,
		}
	}
}

/// State of a build.
///
/// Stored as a small integer column. Unknown values are decoded as cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SqlBuildStatus {
	#[default]
	Queued = 0,
	Building = 1,
	Succeeded = 2,
	Failed = 3,
	Cancelled = 4,
}

impl From<i16> for SqlBuildStatus {
	fn from(value: i16) -> Self {
		match value {
			0 => Self::Queued,
			1 => Self::Building,
			2 => Self::Succeeded,
			3 => Self::Failed,
			4 => Self::Cancelled,
			_ => Self::Cancelled,
		}
	}
}

impl From<BuildStatus> for SqlBuildStatus {
	fn from(value: BuildStatus) -> Self {
		match value {
			BuildStatus::Queued => Self::Queued,
			BuildStatus::Building => Self::Building,
			BuildStatus::Succeeded => Self::Succeeded,
			BuildStatus::Failed => Self::Failed,
			BuildStatus::Cancelled => Self::Cancelled,
		}
	}
}

impl SqlBuildStatus {
	pub fn code(status: BuildStatus) -> i16 {
		Self::from(status) as i16
	}

	pub fn into_common(self) -> BuildStatus {
		match self {
			Self::Queued => BuildStatus::Queued,
			Self::Building => BuildStatus::Building,
			Self::Succeeded => BuildStatus::Succeeded,
			Self::Failed => BuildStatus::Failed,
			Self::Cancelled => BuildStatus::Cancelled,
		}
	}
}

/// Repository of a package.
///
/// Stored as a nullable small integer column. Unknown values are decoded as
/// modular candidates, which are never built on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SqlRepo {
	BaseOs = 0,
	AppStream = 1,
	PowerTools = 2,
	ModularCandidate = 3,
}

impl From<i16> for SqlRepo {
	fn from(value: i16) -> Self {
		match value {
			0 => Self::BaseOs,
			1 => Self::AppStream,
			2 => Self::PowerTools,
			3 => Self::ModularCandidate,
			_ => Self::ModularCandidate,
		}
	}
}

impl From<Repo> for SqlRepo {
	fn from(value: Repo) -> Self {
		match value {
			Repo::BaseOs => Self::BaseOs,
			Repo::AppStream => Self::AppStream,
			Repo::PowerTools => Self::PowerTools,
			Repo::ModularCandidate => Self::ModularCandidate,
		}
	}
}

impl SqlRepo {
	pub fn code(repo: Repo) -> i16 {
		Self::from(repo) as i16
	}

	pub fn into_common(self) -> Repo {
		match self {
			Self::BaseOs => Repo::BaseOs,
			Self::AppStream => Repo::AppStream,
			Self::PowerTools => Repo::PowerTools,
			Self::ModularCandidate => Repo::ModularCandidate,
		}
	}
}

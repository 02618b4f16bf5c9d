//! Build hub (koji) client.

use async_trait::async_trait;
use thiserror::Error;
use xmlrpc::XmlRpcError;

pub mod koji;
pub mod xmlrpc;

pub type TaskId = i64;

/// Koji `TASK_STATES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	Free,
	Open,
	Closed,
	Canceled,
	Assigned,
	Failed,
}

impl TaskState {
	pub fn from_code(code: i64) -> Option<Self> {
		Some(match code {
			0 => TaskState::Free,
			1 => TaskState::Open,
			2 => TaskState::Closed,
			3 => TaskState::Canceled,
			4 => TaskState::Assigned,
			5 => TaskState::Failed,
			_ => return None,
		})
	}

	pub fn code(&self) -> i64 {
		match self {
			TaskState::Free => 0,
			TaskState::Open => 1,
			TaskState::Closed => 2,
			TaskState::Canceled => 3,
			TaskState::Assigned => 4,
			TaskState::Failed => 5,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
	pub id: TaskId,
	pub state: TaskState,
}

/// A build produced by a hub task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubBuild {
	pub build_id: i64,
	pub nvr: String,
	pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRpm {
	pub id: i64,
	pub nvr: String,
	pub arch: String,
}

impl HubRpm {
	pub fn nvr_arch(&self) -> String {
		format!("{}.{}", self.nvr, self.arch)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
	pub scratch: bool,
	pub arch_override: Option<String>,
}

#[derive(Debug, Error)]
pub enum HubError {
	#[error("hub fault {code}: {message}")]
	Fault { code: i64, message: String },
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("protocol error: {0}")]
	Protocol(String),
	#[error("login failed: {0}")]
	Login(String),
	#[error("failed to read client certificate: {0}")]
	Certificate(#[from] std::io::Error),
}

impl From<XmlRpcError> for HubError {
	fn from(value: XmlRpcError) -> Self {
		match value {
			XmlRpcError::Fault { code, message } => HubError::Fault { code, message },
			XmlRpcError::Malformed(message) => HubError::Protocol(message),
		}
	}
}

/// How a failed task is accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
	/// The hub built something and the build failed.
	BuildFailure,
	/// The hub rejected what it was asked to do.
	InvalidRequest,
}

/// `BuildError` and its subclasses.
const BUILD_FAULT_CODES: [i64; 4] = [1005, 1010, 1011, 1012];
/// Session and availability faults: `AuthExpired`, `SequenceError`,
/// `RetryError` and `ServerOffline`. They say nothing about the task.
const TRANSIENT_FAULT_CODES: [i64; 4] = [1007, 1008, 1009, 1014];
/// `GenericError` and every other koji exception class.
const GENERIC_FAULT_CODES: std::ops::RangeInclusive<i64> = 1000..=1024;

impl HubError {
	/// Classifies a fault raised by the hub. Transport and protocol errors
	/// have no class, as nothing is known about the task.
	pub fn fault_class(&self) -> Option<FaultClass> {
		match self {
			HubError::Fault { code, .. } if TRANSIENT_FAULT_CODES.contains(code) => None,
			HubError::Fault { code, .. } if BUILD_FAULT_CODES.contains(code) => {
				Some(FaultClass::BuildFailure)
			}
			HubError::Fault { code, .. } if GENERIC_FAULT_CODES.contains(code) => {
				Some(FaultClass::InvalidRequest)
			}
			HubError::Fault { .. } => Some(FaultClass::BuildFailure),
			_ => None,
		}
	}
}

pub type Result<T, E = HubError> = std::result::Result<T, E>;

#[async_trait]
pub trait BuildHub: Send + Sync {
	async fn api_version(&self) -> Result<i64>;

	/// Submits a build of `source` into `target`.
	async fn build(&self, source: &str, target: &str, options: &BuildOptions) -> Result<TaskId>;

	async fn get_task_info(&self, task_id: TaskId) -> Result<TaskInfo>;

	/// Reads the result of a task. For failed tasks this raises the fault
	/// that failed it.
	async fn get_task_result(&self, task_id: TaskId) -> Result<()>;

	async fn list_builds_for_task(&self, task_id: TaskId) -> Result<Vec<HubBuild>>;

	async fn list_build_rpms(&self, build_id: i64) -> Result<Vec<HubRpm>>;

	/// Adds `package` to the package list of `tag`. Idempotent.
	async fn package_list_add(&self, tag: &str, package: &str) -> Result<()>;

	async fn tag_build(&self, tag: &str, nvr: &str) -> Result<()>;

	/// Whether the tag history holds an active listing of `nvr` in `tag`.
	async fn is_tagged(&self, tag: &str, nvr: &str) -> Result<bool>;

	async fn has_signature(&self, rpm_id: i64, key_id: &str) -> Result<bool>;

	async fn write_signed_rpm(&self, nvr_arch: &str, key_id: &str) -> Result<()>;

	async fn merge_scratch(&self, task_id: TaskId) -> Result<()>;
}

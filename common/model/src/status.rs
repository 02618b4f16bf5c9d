use std::fmt;

use serde::{Deserialize, Serialize};

/// State of an import attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
	/// Waiting for a job runner to pick the import up.
	Queued,
	/// The import tool is running.
	InProgress,
	Succeeded,
	Failed,
	/// Cancelled before a job runner started it.
	///
	/// Job runners skip cancelled imports, but still continue the
	/// dependency chain the import was part of.
	Cancelled,
}

impl ImportStatus {
	/// Whether no job runner will ever act on this import again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Queued => "QUEUED",
			Self::InProgress => "IN_PROGRESS",
			Self::Succeeded => "SUCCEEDED",
			Self::Failed => "FAILED",
			Self::Cancelled => "CANCELLED",
		}
	}
}

impl fmt::Display for ImportStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// State of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildStatus {
	/// Waiting for a job runner to submit it.
	Queued,
	/// Submitted to the build hub or the module build service.
	///
	/// Only builds in this state are polled by the status reconciler.
	Building,
	Succeeded,
	Failed,
	/// Cancelled by a user, by the backend, or rejected as a duplicate.
	Cancelled,
}

impl BuildStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Queued => "QUEUED",
			Self::Building => "BUILDING",
			Self::Succeeded => "SUCCEEDED",
			Self::Failed => "FAILED",
			Self::Cancelled => "CANCELLED",
		}
	}
}

impl fmt::Display for BuildStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

use std::fmt;

use kstring::KString;
use serde::{Deserialize, Serialize};

use crate::db::entity::{BuildRef, ImportRef, PackageRef};

/// A bearer token sealed with the scheduler message secret.
///
/// The plaintext never enters the job queue, and is only recovered right
/// before the module build service is called.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedToken(pub String);

impl fmt::Debug for SealedToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SealedToken(..)")
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "c", rename_all = "snake_case")]
pub enum JobCommand {
	/// Import one package, then continue with the remaining links of its
	/// dependency chain, in order.
	ImportPackage {
		package_id: PackageRef,
		import_id: ImportRef,
		#[serde(default)]
		dependents: Vec<(PackageRef, ImportRef)>,
	},
	/// Submit one build to the build hub or the module build service.
	BuildPackage {
		package_id: PackageRef,
		build_id: BuildRef,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		token: Option<SealedToken>,
	},
	/// Merge a finished scratch build into the regular build history.
	MergeScratch { build_id: BuildRef },
}

impl JobCommand {
	pub fn kind(&self) -> &'static str {
		match self {
			JobCommand::ImportPackage { .. } => "import_package",
			JobCommand::BuildPackage { .. } => "build_package",
			JobCommand::MergeScratch { .. } => "merge_scratch",
		}
	}

	pub fn serialize(&self) -> serde_json::Result<(KString, serde_json::Value)> {
		let mut value = serde_json::to_value(self)?;
		let data = value
			.get_mut("c")
			.map(serde_json::Value::take)
			.unwrap_or_default();
		Ok((KString::from_static(self.kind()), data))
	}

	pub fn deserialize(kind: &str, value: serde_json::Value) -> serde_json::Result<Self> {
		let value = serde_json::json!({ "t": kind, "c": value });
		serde_json::from_value(value)
	}

	/// The next link of an import chain, if any remains.
	pub fn next_import(dependents: &[(PackageRef, ImportRef)]) -> Option<Self> {
		let ((package_id, import_id), rest) = dependents.split_first()?;
		Some(JobCommand::ImportPackage {
			package_id: *package_id,
			import_id: *import_id,
			dependents: rest.to_vec(),
		})
	}
}

pub type JobRef = i64;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Job {
	pub id: JobRef,
	/// Count of previous failed executions.
	pub attempts: u16,
	pub command: JobCommand,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_command_payload() {
		let command = JobCommand::ImportPackage {
			package_id: 1,
			import_id: 10,
			dependents: vec![(2, 11), (3, 12)],
		};
		let (kind, data) = command.serialize().unwrap();
		assert_eq!(kind.as_str(), "import_package");
		assert_eq!(
			data,
			serde_json::json!({ "package_id": 1, "import_id": 10, "dependents": [[2, 11], [3, 12]] })
		);
		assert_eq!(JobCommand::deserialize(&kind, data).unwrap(), command);
	}

	#[test]
	fn test_token_is_omitted_when_absent() {
		let command = JobCommand::BuildPackage {
			package_id: 1,
			build_id: 2,
			token: None,
		};
		let (_, data) = command.serialize().unwrap();
		assert_eq!(data, serde_json::json!({ "package_id": 1, "build_id": 2 }));
		assert_eq!(format!("{:?}", SealedToken("secret".into())), "SealedToken(..)");
	}

	#[test]
	fn test_unknown_kind() {
		assert!(JobCommand::deserialize("explode", serde_json::json!({})).is_err());
	}

	#[test]
	fn test_next_import() {
		assert_eq!(JobCommand::next_import(&[]), None);
		assert_eq!(
			JobCommand::next_import(&[(2, 11), (3, 12)]),
			Some(JobCommand::ImportPackage {
				package_id: 2,
				import_id: 11,
				dependents: vec![(3, 12)],
			})
		);
	}
}

use serde::{Deserialize, Serialize};

/// Repository a package is shipped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Repo {
	#[serde(rename = "BASEOS")]
	BaseOs,
	#[serde(rename = "APPSTREAM")]
	AppStream,
	#[serde(rename = "POWERTOOLS")]
	PowerTools,
	/// Packages only shipped as part of a module.
	///
	/// These are never imported or built on their own. After their module
	/// is signed, their builds are tagged into the module compose tag.
	#[serde(rename = "MODULAR_CANDIDATE")]
	ModularCandidate,
}

impl Repo {
	/// Whether packages of this repository may be imported or built directly.
	pub fn is_standalone(&self) -> bool {
		!matches!(self, Self::ModularCandidate)
	}
}

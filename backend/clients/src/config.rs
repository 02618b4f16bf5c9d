use std::path::PathBuf;

use kiln_common_model::distro::DistroConfig;
use serde::{Deserialize, Serialize};

/// Configuration of every external collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientsConfig {
	pub distro: DistroConfig,
	pub hub: HubConfig,
	pub mbs: MbsConfig,
	#[serde(default)]
	pub sigul: SigulConfig,
	pub srpmproc: SrpmprocConfig,
	pub gitlab: GitlabConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HubConfig {
	/// XML-RPC endpoint, e.g. `https://koji.example.org/kojihub`.
	pub url: String,
	/// PEM client certificate. Together with `key`, enables `sslLogin`.
	#[serde(default)]
	pub cert: Option<PathBuf>,
	#[serde(default)]
	pub key: Option<PathBuf>,
	#[serde(default = "default_package_owner")]
	pub package_owner: String,
}

fn default_package_owner() -> String {
	"kiln".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MbsConfig {
	pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SigulConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_sigul_binary")]
	pub binary: PathBuf,
	#[serde(default)]
	pub config_file: PathBuf,
	#[serde(default)]
	pub passphrase: String,
	#[serde(default)]
	pub key_name: String,
	/// Signature key id as known to the hub.
	#[serde(default)]
	pub key_id: String,
}

impl Default for SigulConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			binary: default_sigul_binary(),
			config_file: PathBuf::new(),
			passphrase: String::new(),
			key_name: String::new(),
			key_id: String::new(),
		}
	}
}

fn default_sigul_binary() -> PathBuf {
	PathBuf::from("sigul")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SrpmprocConfig {
	#[serde(default = "default_srpmproc_binary")]
	pub binary: PathBuf,
	pub storage_addr: String,
	#[serde(default)]
	pub ssh_key_location: Option<PathBuf>,
	#[serde(default)]
	pub no_storage_download: bool,
	#[serde(default)]
	pub no_storage_upload: bool,
	pub logs_dir: PathBuf,
}

fn default_srpmproc_binary() -> PathBuf {
	PathBuf::from("srpmproc")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitlabConfig {
	/// e.g. `https://git.example.org/api/v4`.
	pub api_url: String,
	pub token: String,
}

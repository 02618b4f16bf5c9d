use kiln_backend_clients::config::{
	ClientsConfig, GitlabConfig, HubConfig, MbsConfig, SigulConfig, SrpmprocConfig,
};
use kiln_backend_service::{
	config::{BackendConfig, SchedulerConfig},
	database::DatabaseConfig,
	redis::RedisConfig,
};
use kiln_common_model::distro::DistroConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct FurnaceConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub redis: RedisConfig,
	pub distro: DistroConfig,
	pub scheduler: SchedulerConfig,
	pub hub: HubConfig,
	pub mbs: MbsConfig,
	#[serde(default)]
	pub sigul: SigulConfig,
	pub srpmproc: SrpmprocConfig,
	pub gitlab: GitlabConfig,
	/// Count of concurrent job runners.
	#[serde(default = "default_runners")]
	pub runners: usize,
	/// Log at debug level.
	#[serde(default)]
	pub debug: bool,
}

fn default_runners() -> usize {
	10
}

impl FurnaceConfig {
	pub fn clients(&self) -> ClientsConfig {
		ClientsConfig {
			distro: self.distro.clone(),
			hub: self.hub.clone(),
			mbs: self.mbs.clone(),
			sigul: self.sigul.clone(),
			srpmproc: self.srpmproc.clone(),
			gitlab: self.gitlab.clone(),
		}
	}
}

impl TryFrom<FurnaceConfig> for BackendConfig {
	type Error = anyhow::Error;

	fn try_from(config: FurnaceConfig) -> Result<Self, Self::Error> {
		if config.database.url.starts_with("sqlite://:memory:") && config.database.max_connections != 1 {
			anyhow::bail!("in memory databases require database.max-connections = 1");
		}
		Ok(BackendConfig {
			database: config.database,
			redis: config.redis,
			distro: config.distro,
			scheduler: config.scheduler,
		})
	}
}

#[derive(Debug, PartialEq, Eq, Clone, Hash, Deserialize, Serialize)]
pub struct HttpConfig {
	/// Address for the status endpoint to listen on.
	///
	/// Examples:
	/// - `unix://furnace.socket`
	/// - `tcp://127.0.0.1:8000`
	pub listen: String,
}

//! Clients of the external collaborators of Kiln: the build hub, the module
//! build service, the signing daemon, the source import tool and the git host.

use std::sync::Arc;

use config::ClientsConfig;
use gitlab::{GitHost, GitHostError, Gitlab};
use hub::{BuildHub, HubError, koji::KojiHub};
use mbs::{MbsClient, MbsError, ModuleBuildService};
use sigul::{Sigul, SigulError, Signer};
use srpmproc::{ImportTool, Srpmproc, SrpmprocError};
use thiserror::Error;
use tracing::{info, warn};

pub mod config;
pub mod gitlab;
pub mod hub;
pub mod mbs;
pub mod sigul;
pub mod srpmproc;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

/// Koji API version this client is written against.
pub const HUB_API_VERSION: i64 = 1;

/// Container of every external client.
#[derive(Clone)]
pub struct ExternalClients {
	pub hub: Arc<dyn BuildHub>,
	pub mbs: Arc<dyn ModuleBuildService>,
	pub importer: Arc<dyn ImportTool>,
	pub git: Arc<dyn GitHost>,
	/// Absent when signing is disabled.
	pub signer: Option<Arc<dyn Signer>>,
}

impl std::fmt::Debug for ExternalClients {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExternalClients")
			.field("signing", &self.signer.is_some())
			.finish_non_exhaustive()
	}
}

impl ExternalClients {
	/// Connects every client and verifies the ones that can be verified
	/// up front: the hub must answer `getAPIVersion`, and the signing key
	/// must be usable when signing is enabled.
	#[tracing::instrument(skip(config))]
	pub async fn connect(config: &ClientsConfig) -> Result<Self> {
		let hub = KojiHub::connect(&config.hub).await?;
		let version = hub.api_version().await?;
		if version != HUB_API_VERSION {
			warn!(version, expected = HUB_API_VERSION, "build hub API version mismatch");
		}
		info!(url = %config.hub.url, "connected to build hub");

		let signer: Option<Arc<dyn Signer>> = if config.sigul.enabled {
			let sigul = Sigul::new(config.sigul.clone());
			sigul.check_key().await?;
			info!(key = %config.sigul.key_name, "signing key verified");
			Some(Arc::new(sigul))
		} else {
			info!("signing is disabled");
			None
		};

		Ok(Self {
			hub: Arc::new(hub),
			mbs: Arc::new(MbsClient::new(&config.mbs)),
			importer: Arc::new(Srpmproc::new(
				config.srpmproc.clone(),
				config.distro.clone(),
			)),
			git: Arc::new(Gitlab::new(&config.gitlab)),
			signer,
		})
	}
}

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("build hub error: {0}")]
	Hub(#[from] HubError),
	#[error("module build service error: {0}")]
	Mbs(#[from] MbsError),
	#[error("signing error: {0}")]
	Sigul(#[from] SigulError),
	#[error("import tool error: {0}")]
	Srpmproc(#[from] SrpmprocError),
	#[error("git host error: {0}")]
	GitHost(#[from] GitHostError),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

//! Git host (GitLab) client.

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::config::GitlabConfig;

#[derive(Debug, Error)]
pub enum GitHostError {
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
}

pub type Result<T, E = GitHostError> = std::result::Result<T, E>;

#[async_trait]
pub trait GitHost: Send + Sync {
	/// Makes the project at `path` (e.g. `staging/rpms/bash`) public.
	async fn make_public(&self, path: &str) -> Result<()>;
}

#[derive(Debug)]
pub struct Gitlab {
	api_url: String,
	token: String,
	client: Client,
}

impl Gitlab {
	pub fn new(config: &GitlabConfig) -> Self {
		Self {
			api_url: config.api_url.trim_end_matches('/').to_string(),
			token: config.token.clone(),
			client: Client::new(),
		}
	}

	pub fn project_url(&self, path: &str) -> String {
		format!("{}/projects/{}", self.api_url, urlencoding::encode(path))
	}
}

#[async_trait]
impl GitHost for Gitlab {
	async fn make_public(&self, path: &str) -> Result<()> {
		debug!(path, "making project public");
		self.client
			.put(self.project_url(path))
			.header("PRIVATE-TOKEN", &self.token)
			.form(&[("visibility", "public")])
			.send()
			.await?
			.error_for_status()?;
		Ok(())
	}
}

//! Source import tool (srpmproc) invocation.

use std::{collections::BTreeMap, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use kiln_common_model::distro::DistroConfig;
use thiserror::Error;
use tokio::{
	fs::OpenOptions,
	io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
	process::Command,
};
use tracing::{debug, info};

use crate::config::SrpmprocConfig;

/// What to import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest<'a> {
	pub import_id: i64,
	pub package: &'a str,
	pub module_mode: bool,
	pub single_tag: Option<&'a str>,
}

/// Branch name to resulting commit hash.
pub type BranchCommits = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum SrpmprocError {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("import tool exited with {0}")]
	Exit(std::process::ExitStatus),
	#[error("import tool printed no result")]
	NoOutput,
	#[error("invalid import result: {0}")]
	Output(#[from] serde_json::Error),
}

pub type Result<T, E = SrpmprocError> = std::result::Result<T, E>;

#[async_trait]
pub trait ImportTool: Send + Sync {
	async fn import(&self, request: &ImportRequest<'_>) -> Result<BranchCommits>;
}

#[derive(Debug)]
pub struct Srpmproc {
	config: SrpmprocConfig,
	distro: DistroConfig,
}

impl Srpmproc {
	pub fn new(config: SrpmprocConfig, distro: DistroConfig) -> Self {
		Self { config, distro }
	}

	pub fn log_path(&self, import_id: i64) -> PathBuf {
		self.config.logs_dir.join(format!("import-{}.log", import_id))
	}

	fn args(&self, request: &ImportRequest<'_>) -> Vec<String> {
		let mut args = vec![
			"--version".to_string(),
			self.distro.version.to_string(),
			"--source-rpm".to_string(),
			request.package.to_string(),
			"--upstream-prefix".to_string(),
			self.distro.upstream_ssh_prefix(),
			"--upstream-prefix-https".to_string(),
			self.distro.upstream_https_prefix(),
			"--storage-addr".to_string(),
			self.config.storage_addr.clone(),
			"--ssh-user".to_string(),
			self.distro.ssh_user.clone(),
		];
		if let Some(key) = &self.config.ssh_key_location {
			args.push("--ssh-key-location".to_string());
			args.push(key.to_string_lossy().into_owned());
		}
		if self.config.no_storage_download {
			args.push("--no-storage-download".to_string());
		}
		if self.config.no_storage_upload {
			args.push("--no-storage-upload".to_string());
		}
		if request.module_mode {
			args.push("--module-mode".to_string());
		}
		if let Some(tag) = request.single_tag {
			args.push("--single-tag".to_string());
			args.push(tag.to_string());
		}
		args
	}
}

#[async_trait]
impl ImportTool for Srpmproc {
	#[tracing::instrument(skip(self), fields(import = request.import_id))]
	async fn import(&self, request: &ImportRequest<'_>) -> Result<BranchCommits> {
		let path = self.log_path(request.import_id);
		let mut log = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.await?;
		let stderr = log.try_clone().await?.into_std().await;

		info!(package = request.package, log = %path.display(), "running import tool");
		let mut child = Command::new(&self.config.binary)
			.args(self.args(request))
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(stderr)
			.kill_on_drop(true)
			.spawn()?;

		let mut last_line = None;
		if let Some(stdout) = child.stdout.take() {
			let mut lines = BufReader::new(stdout).lines();
			while let Some(line) = lines.next_line().await? {
				log.write_all(line.as_bytes()).await?;
				log.write_all(b"\n").await?;
				if !line.trim().is_empty() {
					last_line = Some(line);
				}
			}
		}
		let status = child.wait().await?;
		log.flush().await?;
		if !status.success() {
			return Err(SrpmprocError::Exit(status));
		}

		let last_line = last_line.ok_or(SrpmprocError::NoOutput)?;
		let commits: BranchCommits = serde_json::from_str(last_line.trim())?;
		debug!(?commits, "import tool finished");
		Ok(commits)
	}
}

//! Signing daemon (sigul) client.

use std::process::{Output, Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

use crate::config::SigulConfig;

/// Printed by sigul when the RPM already carries the signature.
const ALREADY_SIGNED: &str = "ERROR: I/O error: EOFError()";

#[derive(Debug, Error)]
pub enum SigulError {
	#[error("failed to run sigul: {0}")]
	Io(#[from] std::io::Error),
	#[error("sigul exited with {status}: {stderr}")]
	Failed {
		status: std::process::ExitStatus,
		stderr: String,
	},
}

pub type Result<T, E = SigulError> = std::result::Result<T, E>;

#[async_trait]
pub trait Signer: Send + Sync {
	/// Signature key id as recorded by the build hub.
	fn key_id(&self) -> &str;

	/// Verifies that the configured key is usable.
	async fn check_key(&self) -> Result<()>;

	/// Signs `nvr_arch` and stores the signature in the build hub.
	async fn sign_rpm(&self, nvr_arch: &str) -> Result<()>;
}

#[derive(Debug)]
pub struct Sigul {
	config: SigulConfig,
}

impl Sigul {
	pub fn new(config: SigulConfig) -> Self {
		Self { config }
	}

	async fn run(&self, args: &[&str]) -> Result<Output> {
		let mut child = Command::new(&self.config.binary)
			.arg("-c")
			.arg(&self.config.config_file)
			.arg("--batch")
			.args(args)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()?;

		if let Some(mut stdin) = child.stdin.take() {
			let passphrase = format!("{}\0", self.config.passphrase);
			// sigul may exit before reading its input
			if let Err(error) = stdin.write_all(passphrase.as_bytes()).await {
				debug!(?error, "sigul closed its standard input");
			}
		}

		let output = child.wait_with_output().await?;
		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
			if !stderr.contains(ALREADY_SIGNED) {
				return Err(SigulError::Failed {
					status: output.status,
					stderr,
				});
			}
			debug!(status = %output.status, "sigul reported an already signed rpm");
		}
		Ok(output)
	}
}

#[async_trait]
impl Signer for Sigul {
	fn key_id(&self) -> &str {
		&self.config.key_id
	}

	async fn check_key(&self) -> Result<()> {
		self.run(&["get-public-key", self.config.key_name.as_str()]).await?;
		Ok(())
	}

	async fn sign_rpm(&self, nvr_arch: &str) -> Result<()> {
		self.run(&[
			"sign-rpm",
			"--koji-only",
			"--store-in-koji",
			"--v3-signature",
			self.config.key_name.as_str(),
			nvr_arch,
		])
		.await?;
		Ok(())
	}
}

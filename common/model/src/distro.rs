//! Naming rules of the distribution: tags, source URLs and git projects.

use serde::{Deserialize, Serialize};

/// Identity of the distribution being built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DistroConfig {
	/// Major version, e.g. `8`.
	pub version: u32,
	/// Prefix of every build hub tag, e.g. `rocky`.
	pub tag_prefix: String,
	/// Host of the git forge storing imported sources.
	pub git_host: String,
	/// Path prefix of the git projects on [`Self::git_host`], e.g. `/staging`.
	#[serde(default = "default_repo_prefix")]
	pub repo_prefix: String,
	#[serde(default = "default_ssh_user")]
	pub ssh_user: String,
	#[serde(default = "default_ssh_port")]
	pub ssh_port: u16,
}

fn default_repo_prefix() -> String {
	"/".to_string()
}

fn default_ssh_user() -> String {
	"git".to_string()
}

fn default_ssh_port() -> u16 {
	22
}

/// Kind of a git project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
	Rpms,
	Modules,
}

impl SourceKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Rpms => "rpms",
			Self::Modules => "modules",
		}
	}
}

/// Converts a package name into a name accepted by GitLab as a project path.
pub fn gitlabify(name: &str) -> String {
	if name == "tree" {
		return "treepkg".to_string();
	}
	name.replace('+', "plus")
}

impl DistroConfig {
	/// Repository prefix without any trailing slash, `""` for the root.
	pub fn prefix(&self) -> &str {
		self.repo_prefix.trim_end_matches('/')
	}

	/// The base tag, e.g. `dist-rocky8`. Regular builds target it.
	pub fn base_tag(&self) -> String {
		format!("dist-{}{}", self.tag_prefix, self.version)
	}

	/// Signed builds are tagged into this tag.
	pub fn compose_tag(&self) -> String {
		format!("{}-compose", self.base_tag())
	}

	/// Builds of modular candidates are tagged into this tag once their module is signed.
	pub fn module_compose_tag(&self) -> String {
		format!("{}-module-compose", self.base_tag())
	}

	pub fn testing_tag(&self) -> String {
		format!("{}-testing", self.base_tag())
	}

	pub fn scratch_tag(&self) -> String {
		format!("{}-scratch", self.base_tag())
	}

	/// Hub build source without the commit fragment.
	pub fn rpm_source_base(&self, package: &str) -> String {
		format!(
			"git+https://{}{}/rpms/{}.git",
			self.git_host,
			self.prefix(),
			gitlabify(package)
		)
	}

	/// Hub build source of `package` at `commit`.
	pub fn rpm_source_url(&self, package: &str, commit: &str) -> String {
		format!("{}#{}", self.rpm_source_base(package), commit)
	}

	/// Module build service SCM URL of `module` at `commit`.
	pub fn module_scm_url(&self, module: &str, commit: &str) -> String {
		format!(
			"https://{}{}/modules/{}?#{}",
			self.git_host,
			self.prefix(),
			gitlabify(module),
			commit
		)
	}

	/// Git forge project path, relative to the forge root.
	pub fn project_path(&self, kind: SourceKind, package: &str) -> String {
		let prefix = self.prefix().trim_start_matches('/');
		if prefix.is_empty() {
			format!("{}/{}", kind.as_str(), gitlabify(package))
		} else {
			format!("{}/{}/{}", prefix, kind.as_str(), gitlabify(package))
		}
	}

	/// Upstream prefix passed to the import tool for pushing over SSH.
	pub fn upstream_ssh_prefix(&self) -> String {
		format!(
			"ssh://{}@{}:{}{}",
			self.ssh_user,
			self.git_host,
			self.ssh_port,
			self.prefix()
		)
	}

	/// Upstream prefix passed to the import tool for reading over HTTPS.
	pub fn upstream_https_prefix(&self) -> String {
		format!("{}{}", self.git_host, self.prefix())
	}
}

/// Strips the commit fragment (and an empty query) off a hub build source.
pub fn strip_source_fragment(source: &str) -> &str {
	let base = source.split('#').next().unwrap_or(source);
	base.strip_suffix('?').unwrap_or(base)
}

//! Scripted in-memory fakes of every client.
//!
//! Each fake keeps its script and its recorded calls in a public state
//! struct, reachable through `state()`.

use std::{
	collections::{HashMap, HashSet},
	sync::{Arc, Mutex, MutexGuard},
};

use async_trait::async_trait;

use crate::{
	ExternalClients,
	gitlab::{self, GitHost},
	hub::{self, BuildHub, BuildOptions, HubBuild, HubError, HubRpm, TaskId, TaskInfo, TaskState},
	mbs::{self, MbsError, MbsSubmission, ModuleBuild, ModuleBuildService},
	sigul::{self, SigulError, Signer},
	srpmproc::{self, BranchCommits, ImportRequest, ImportTool, SrpmprocError},
};

pub const TEST_KEY_ID: &str = "6d745a60";

fn fault(code: i64, message: &str) -> HubError {
	HubError::Fault {
		code,
		message: message.to_string(),
	}
}

#[derive(Debug, Default)]
pub struct HubState {
	pub next_task_id: TaskId,
	/// Fault raised by the next `build` calls.
	pub build_fault: Option<i64>,
	pub submitted: Vec<(String, String, BuildOptions)>,
	pub task_states: HashMap<TaskId, TaskState>,
	/// Fault raised by `getTaskResult`, per task.
	pub task_faults: HashMap<TaskId, i64>,
	pub task_builds: HashMap<TaskId, Vec<HubBuild>>,
	pub build_rpms: HashMap<i64, Vec<HubRpm>>,
	pub package_lists: Vec<(String, String)>,
	pub tag_calls: Vec<(String, String)>,
	pub tagged: HashSet<(String, String)>,
	pub signatures: HashSet<(i64, String)>,
	pub written: Vec<(String, String)>,
	pub merged: Vec<TaskId>,
	/// Fault raised by `packageListAdd`.
	pub package_list_fault: Option<i64>,
	pub merge_fault: Option<i64>,
}

#[derive(Debug, Default)]
pub struct FakeHub {
	state: Mutex<HubState>,
}

impl FakeHub {
	pub fn new() -> Self {
		let hub = Self::default();
		hub.state().next_task_id = 1000;
		hub
	}

	pub fn state(&self) -> MutexGuard<'_, HubState> {
		self.state.lock().unwrap()
	}

	/// Scripts `task_id` to have produced one build with `rpms`.
	pub fn add_task_build(&self, task_id: TaskId, build: HubBuild, rpms: Vec<HubRpm>) {
		let mut state = self.state();
		state.build_rpms.insert(build.build_id, rpms);
		state.task_builds.entry(task_id).or_default().push(build);
	}
}

#[async_trait]
impl BuildHub for FakeHub {
	async fn api_version(&self) -> hub::Result<i64> {
		Ok(crate::HUB_API_VERSION)
	}

	async fn build(&self, source: &str, target: &str, options: &BuildOptions) -> hub::Result<TaskId> {
		let mut state = self.state();
		if let Some(code) = state.build_fault {
			return Err(fault(code, "build refused"));
		}
		state
			.submitted
			.push((source.to_string(), target.to_string(), options.clone()));
		let task_id = state.next_task_id;
		state.next_task_id += 1;
		state.task_states.insert(task_id, TaskState::Open);
		Ok(task_id)
	}

	async fn get_task_info(&self, task_id: TaskId) -> hub::Result<TaskInfo> {
		match self.state().task_states.get(&task_id) {
			Some(state) => Ok(TaskInfo {
				id: task_id,
				state: *state,
			}),
			None => Err(fault(1000, "no such task")),
		}
	}

	async fn get_task_result(&self, task_id: TaskId) -> hub::Result<()> {
		match self.state().task_faults.get(&task_id) {
			Some(code) => Err(fault(*code, "task failed")),
			None => Ok(()),
		}
	}

	async fn list_builds_for_task(&self, task_id: TaskId) -> hub::Result<Vec<HubBuild>> {
		Ok(self
			.state()
			.task_builds
			.get(&task_id)
			.cloned()
			.unwrap_or_default())
	}

	async fn list_build_rpms(&self, build_id: i64) -> hub::Result<Vec<HubRpm>> {
		Ok(self
			.state()
			.build_rpms
			.get(&build_id)
			.cloned()
			.unwrap_or_default())
	}

	async fn package_list_add(&self, tag: &str, package: &str) -> hub::Result<()> {
		let mut state = self.state();
		if let Some(code) = state.package_list_fault {
			return Err(fault(code, "package list locked"));
		}
		state
			.package_lists
			.push((tag.to_string(), package.to_string()));
		Ok(())
	}

	async fn tag_build(&self, tag: &str, nvr: &str) -> hub::Result<()> {
		let mut state = self.state();
		let listing = (tag.to_string(), nvr.to_string());
		if !state.tagged.insert(listing.clone()) {
			return Err(fault(1003, "build already tagged"));
		}
		state.tag_calls.push(listing);
		Ok(())
	}

	async fn is_tagged(&self, tag: &str, nvr: &str) -> hub::Result<bool> {
		Ok(self
			.state()
			.tagged
			.contains(&(tag.to_string(), nvr.to_string())))
	}

	async fn has_signature(&self, rpm_id: i64, key_id: &str) -> hub::Result<bool> {
		Ok(self
			.state()
			.signatures
			.contains(&(rpm_id, key_id.to_string())))
	}

	async fn write_signed_rpm(&self, nvr_arch: &str, key_id: &str) -> hub::Result<()> {
		self.state()
			.written
			.push((nvr_arch.to_string(), key_id.to_string()));
		Ok(())
	}

	async fn merge_scratch(&self, task_id: TaskId) -> hub::Result<()> {
		let mut state = self.state();
		if let Some(code) = state.merge_fault {
			return Err(fault(code, "merge refused"));
		}
		state.merged.push(task_id);
		Ok(())
	}
}

#[derive(Debug, Default)]
pub struct MbsState {
	pub next_id: i64,
	/// Answer the next submissions with 409.
	pub conflict: bool,
	pub submissions: Vec<(String, String, String)>,
	pub builds: HashMap<i64, ModuleBuild>,
}

#[derive(Debug, Default)]
pub struct FakeMbs {
	state: Mutex<MbsState>,
}

impl FakeMbs {
	pub fn new() -> Self {
		let mbs = Self::default();
		mbs.state().next_id = 500;
		mbs
	}

	pub fn state(&self) -> MutexGuard<'_, MbsState> {
		self.state.lock().unwrap()
	}

	/// Scripts a module build without components.
	pub fn set_build_state(&self, id: i64, state_name: &str) {
		self.state().builds.insert(
			id,
			ModuleBuild {
				id,
				state_name: state_name.to_string(),
				koji_tag: None,
				context: None,
				siblings: Vec::new(),
				tasks: Default::default(),
			},
		);
	}
}

#[async_trait]
impl ModuleBuildService for FakeMbs {
	async fn submit(&self, token: &str, scmurl: &str, branch: &str) -> mbs::Result<MbsSubmission> {
		let mut state = self.state();
		state
			.submissions
			.push((token.to_string(), scmurl.to_string(), branch.to_string()));
		if state.conflict {
			return Ok(MbsSubmission::Conflict);
		}
		let id = state.next_id;
		state.next_id += 1;
		Ok(MbsSubmission::Created(id))
	}

	async fn get_build(&self, id: i64) -> mbs::Result<ModuleBuild> {
		self.state()
			.builds
			.get(&id)
			.cloned()
			.ok_or(MbsError::NotFound(id))
	}
}

#[derive(Debug, Default)]
pub struct ImporterState {
	pub results: HashMap<String, BranchCommits>,
	/// Calls as `(import_id, package, module_mode, single_tag)`.
	pub calls: Vec<(i64, String, bool, Option<String>)>,
}

/// Import tool answering from `results`. Packages without a result fail.
#[derive(Debug, Default)]
pub struct FakeImporter {
	state: Mutex<ImporterState>,
}

impl FakeImporter {
	pub fn state(&self) -> MutexGuard<'_, ImporterState> {
		self.state.lock().unwrap()
	}

	pub fn set_result(&self, package: &str, commits: &[(&str, &str)]) {
		self.state().results.insert(
			package.to_string(),
			commits
				.iter()
				.map(|(branch, commit)| (branch.to_string(), commit.to_string()))
				.collect(),
		);
	}
}

#[async_trait]
impl ImportTool for FakeImporter {
	async fn import(&self, request: &ImportRequest<'_>) -> srpmproc::Result<BranchCommits> {
		let mut state = self.state();
		state.calls.push((
			request.import_id,
			request.package.to_string(),
			request.module_mode,
			request.single_tag.map(str::to_string),
		));
		state
			.results
			.get(request.package)
			.cloned()
			.ok_or(SrpmprocError::NoOutput)
	}
}

#[derive(Debug, Default)]
pub struct FakeGitHost {
	pub public: Mutex<Vec<String>>,
}

impl FakeGitHost {
	pub fn public(&self) -> Vec<String> {
		self.public.lock().unwrap().clone()
	}
}

#[async_trait]
impl GitHost for FakeGitHost {
	async fn make_public(&self, path: &str) -> gitlab::Result<()> {
		self.public.lock().unwrap().push(path.to_string());
		Ok(())
	}
}

#[derive(Debug, Default)]
pub struct SignerState {
	pub signed: Vec<String>,
	/// Fail signing of these NVR.arch strings.
	pub failing: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeSigner {
	state: Mutex<SignerState>,
}

impl FakeSigner {
	pub fn state(&self) -> MutexGuard<'_, SignerState> {
		self.state.lock().unwrap()
	}
}

#[async_trait]
impl Signer for FakeSigner {
	fn key_id(&self) -> &str {
		TEST_KEY_ID
	}

	async fn check_key(&self) -> sigul::Result<()> {
		Ok(())
	}

	async fn sign_rpm(&self, nvr_arch: &str) -> sigul::Result<()> {
		let mut state = self.state();
		if state.failing.contains(nvr_arch) {
			return Err(SigulError::Io(std::io::Error::other("signing server unreachable")));
		}
		state.signed.push(nvr_arch.to_string());
		Ok(())
	}
}

/// Every fake, with signing enabled.
#[derive(Debug, Clone)]
pub struct FakeClients {
	pub hub: Arc<FakeHub>,
	pub mbs: Arc<FakeMbs>,
	pub importer: Arc<FakeImporter>,
	pub git: Arc<FakeGitHost>,
	pub signer: Arc<FakeSigner>,
}

impl FakeClients {
	pub fn new() -> Self {
		Self {
			hub: Arc::new(FakeHub::new()),
			mbs: Arc::new(FakeMbs::new()),
			importer: Arc::new(FakeImporter::default()),
			git: Arc::new(FakeGitHost::default()),
			signer: Arc::new(FakeSigner::default()),
		}
	}

	pub fn clients(&self) -> ExternalClients {
		ExternalClients {
			hub: self.hub.clone(),
			mbs: self.mbs.clone(),
			importer: self.importer.clone(),
			git: self.git.clone(),
			signer: Some(self.signer.clone()),
		}
	}
}

impl Default for FakeClients {
	fn default() -> Self {
		Self::new()
	}
}

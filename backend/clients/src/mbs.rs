//! Module build service client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::MbsConfig;

/// Component of a module build, keyed by package name in [`ModuleTasks`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentTask {
	#[serde(default)]
	pub nvr: Option<String>,
	#[serde(default)]
	pub state: Option<i64>,
	#[serde(default)]
	pub task_id: Option<i64>,
}

impl ComponentTask {
	/// Koji build state `COMPLETE`.
	pub const COMPLETE: i64 = 1;

	pub fn is_complete(&self) -> bool {
		self.state == Some(Self::COMPLETE)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleTasks {
	#[serde(default)]
	pub rpms: BTreeMap<String, ComponentTask>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleBuild {
	pub id: i64,
	pub state_name: String,
	#[serde(default)]
	pub koji_tag: Option<String>,
	#[serde(default)]
	pub context: Option<String>,
	/// Other builds of the same module stream, e.g. for other contexts.
	#[serde(default)]
	pub siblings: Vec<i64>,
	#[serde(default)]
	pub tasks: ModuleTasks,
}

impl ModuleBuild {
	/// Name of the component that carries the build macros.
	pub const MACROS_COMPONENT: &'static str = "module-build-macros";

	/// Complete components, excluding the build macros.
	pub fn complete_components(&self) -> impl Iterator<Item = (&str, &ComponentTask)> {
		self.tasks
			.rpms
			.iter()
			.filter(|(name, task)| name.as_str() != Self::MACROS_COMPONENT && task.is_complete())
			.map(|(name, task)| (name.as_str(), task))
	}
}

/// Outcome of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbsSubmission {
	Created(i64),
	/// Another build of the same scmurl is in flight.
	Conflict,
}

#[derive(Debug, Error)]
pub enum MbsError {
	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("module build {0} not found")]
	NotFound(i64),
	#[error("unexpected response {status}: {body}")]
	Status { status: u16, body: String },
	#[error("submission response holds no build")]
	EmptyResponse,
}

pub type Result<T, E = MbsError> = std::result::Result<T, E>;

#[async_trait]
pub trait ModuleBuildService: Send + Sync {
	/// Submits a module build on behalf of the owner of `token`.
	async fn submit(&self, token: &str, scmurl: &str, branch: &str) -> Result<MbsSubmission>;

	async fn get_build(&self, id: i64) -> Result<ModuleBuild>;
}

#[derive(Debug)]
pub struct MbsClient {
	url: String,
	client: Client,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
	scmurl: &'a str,
	branch: &'a str,
}

#[derive(Deserialize)]
struct Submitted {
	id: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubmitResponse {
	One(Submitted),
	Many(Vec<Submitted>),
}

impl MbsClient {
	pub fn new(config: &MbsConfig) -> Self {
		Self {
			url: config.url.trim_end_matches('/').to_string(),
			client: Client::new(),
		}
	}
}

async fn unexpected(response: reqwest::Response) -> MbsError {
	let status = response.status().as_u16();
	let body = response.text().await.unwrap_or_default();
	MbsError::Status { status, body }
}

#[async_trait]
impl ModuleBuildService for MbsClient {
	async fn submit(&self, token: &str, scmurl: &str, branch: &str) -> Result<MbsSubmission> {
		debug!(scmurl, branch, "submitting module build");
		let response = self
			.client
			.post(format!("{}/1/module-builds/", self.url))
			.bearer_auth(token)
			.json(&SubmitRequest { scmurl, branch })
			.send()
			.await?;
		match response.status() {
			StatusCode::CONFLICT => Ok(MbsSubmission::Conflict),
			status if status.is_success() => {
				let id = match response.json::<SubmitResponse>().await? {
					SubmitResponse::One(build) => build.id,
					SubmitResponse::Many(builds) => {
						builds.first().ok_or(MbsError::EmptyResponse)?.id
					}
				};
				Ok(MbsSubmission::Created(id))
			}
			_ => Err(unexpected(response).await),
		}
	}

	async fn get_build(&self, id: i64) -> Result<ModuleBuild> {
		let response = self
			.client
			.get(format!("{}/1/module-builds/{}", self.url, id))
			.query(&[("verbose", "true")])
			.send()
			.await?;
		match response.status() {
			StatusCode::NOT_FOUND => Err(MbsError::NotFound(id)),
			status if status.is_success() => Ok(response.json().await?),
			_ => Err(unexpected(response).await),
		}
	}
}

#[cfg(test)]
mod test {
	use axum::{
		Json, Router,
		extract::Path,
		http::{HeaderMap, StatusCode as HttpStatus, header::AUTHORIZATION},
		response::{IntoResponse, Response},
		routing::{get, post},
	};
	use tokio::net::TcpListener;

	use super::*;

	async fn submit_handler(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
		if headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok()) != Some("Bearer tok") {
			return HttpStatus::UNAUTHORIZED.into_response();
		}
		if body["branch"] == "r8-stream-10" {
			return (HttpStatus::CONFLICT, "already building").into_response();
		}
		Json(serde_json::json!([{"id": 42}, {"id": 43}])).into_response()
	}

	async fn build_handler(Path(id): Path<i64>) -> Response {
		match id {
			9 => HttpStatus::NOT_FOUND.into_response(),
			10 => (HttpStatus::INTERNAL_SERVER_ERROR, "boom").into_response(),
			_ => Json(serde_json::json!({"id": id, "state_name": "build"})).into_response(),
		}
	}

	async fn client() -> MbsClient {
		let router = Router::new()
			.route("/1/module-builds/", post(submit_handler))
			.route("/1/module-builds/{id}", get(build_handler));
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
		MbsClient::new(&MbsConfig {
			url: format!("http://{}/", addr),
		})
	}

	#[tokio::test]
	async fn test_submit_statuses() {
		let mbs = client().await;
		let scmurl = "https://git.example.org/modules/nodejs.git?#f00";
		assert_eq!(
			mbs.submit("tok", scmurl, "r8-stream-14").await.unwrap(),
			MbsSubmission::Created(42)
		);
		assert_eq!(
			mbs.submit("tok", scmurl, "r8-stream-10").await.unwrap(),
			MbsSubmission::Conflict
		);
		assert!(matches!(
			mbs.submit("nope", scmurl, "r8-stream-14").await,
			Err(MbsError::Status { status: 401, .. })
		));
	}

	#[tokio::test]
	async fn test_get_build_statuses() {
		let mbs = client().await;
		assert_eq!(mbs.get_build(12).await.unwrap().state_name, "build");
		assert!(matches!(mbs.get_build(9).await, Err(MbsError::NotFound(9))));
		assert!(matches!(
			mbs.get_build(10).await,
			Err(MbsError::Status { status: 500, ref body }) if body == "boom"
		));
	}

	#[test]
	fn test_module_build_detail() {
		let build: ModuleBuild = serde_json::from_value(serde_json::json!({
			"id": 12,
			"state_name": "ready",
			"koji_tag": "module-nodejs-14-8030020210101-abcd",
			"context": "abcd",
			"siblings": [13],
			"tasks": {
				"rpms": {
					"module-build-macros": {"nvr": "module-build-macros-0.1-1", "state": 1, "task_id": 1},
					"nodejs": {"nvr": "nodejs-14.15.4-2", "state": 1, "task_id": 2},
					"npm": {"nvr": null, "state": 3, "task_id": 3}
				}
			}
		}))
		.unwrap();
		let components: Vec<_> = build.complete_components().map(|(name, _)| name).collect();
		assert_eq!(components, vec!["nodejs"]);
		assert_eq!(build.siblings, vec![13]);
	}

	#[test]
	fn test_module_build_minimal() {
		let build: ModuleBuild =
			serde_json::from_value(serde_json::json!({"id": 1, "state_name": "init"})).unwrap();
		assert!(build.tasks.rpms.is_empty());
		assert!(build.siblings.is_empty());
	}
}

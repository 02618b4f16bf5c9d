use async_trait::async_trait;
use reqwest::{Client, Identity, header::CONTENT_TYPE};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{
	BuildHub, BuildOptions, HubBuild, HubError, HubRpm, Result, TaskId, TaskInfo, TaskState,
	xmlrpc::{self, Value},
};
use crate::config::HubConfig;

/// `AuthError` and `AuthExpired`, raised for a session the hub dropped.
const SESSION_FAULT_CODES: [i64; 2] = [1002, 1007];

#[derive(Debug)]
struct Session {
	id: i64,
	key: String,
	callnum: i64,
}

/// Koji hub spoken to over XML-RPC.
///
/// A logged-in session numbers its calls and the hub rejects any call
/// arriving out of order, so authenticated calls are sent one at a time.
#[derive(Debug)]
pub struct KojiHub {
	url: String,
	owner: String,
	client: Client,
	authenticated: bool,
	session: Mutex<Option<Session>>,
}

impl KojiHub {
	/// Connects to the hub, logging in with the client certificate when one
	/// is configured.
	pub async fn connect(config: &HubConfig) -> Result<Self> {
		let mut builder = Client::builder();
		let authenticated = match (&config.cert, &config.key) {
			(Some(cert), Some(key)) => {
				let cert = tokio::fs::read(cert).await?;
				let key = tokio::fs::read(key).await?;
				builder = builder.identity(Identity::from_pkcs8_pem(&cert, &key)?);
				true
			}
			_ => false,
		};
		let hub = Self {
			url: config.url.clone(),
			owner: config.package_owner.clone(),
			client: builder.build()?,
			authenticated,
			session: Mutex::new(None),
		};
		if authenticated {
			*hub.session.lock().await = Some(hub.ssl_login().await?);
		}
		Ok(hub)
	}

	async fn ssl_login(&self) -> Result<Session> {
		let value = self.send("sslLogin", &[], None).await?;
		let id = value.get("session-id").and_then(Value::as_i64);
		let key = value.get("session-key").and_then(Value::as_str);
		match (id, key) {
			(Some(id), Some(key)) => {
				info!(session = id, "logged in to build hub");
				Ok(Session {
					id,
					key: key.to_string(),
					callnum: 0,
				})
			}
			_ => Err(HubError::Login(format!("unexpected sslLogin response: {:?}", value))),
		}
	}

	async fn call(&self, method: &str, params: &[Value]) -> Result<Value> {
		if !self.authenticated {
			return self.send(method, params, None).await;
		}
		let mut session = self.session.lock().await;
		match self.send(method, params, session.as_mut()).await {
			Err(HubError::Fault { code, message }) if SESSION_FAULT_CODES.contains(&code) => {
				warn!(method, code, %message, "build hub session lost, logging in again");
				*session = None;
				*session = Some(self.ssl_login().await?);
				self.send(method, params, session.as_mut()).await
			}
			result => result,
		}
	}

	async fn send(
		&self,
		method: &str,
		params: &[Value],
		session: Option<&mut Session>,
	) -> Result<Value> {
		debug!(method, "calling build hub");
		let mut request = self
			.client
			.post(&self.url)
			.header(CONTENT_TYPE, "text/xml")
			.body(xmlrpc::encode_call(method, params));
		if let Some(session) = session {
			request = request.query(&[
				("session-id", session.id.to_string()),
				("session-key", session.key.clone()),
				("callnum", session.callnum.to_string()),
			]);
			session.callnum += 1;
		}
		let body = request.send().await?.error_for_status()?.text().await?;
		Ok(xmlrpc::decode_response(&body)?)
	}
}

fn field_i64(value: &Value, key: &str) -> Result<i64> {
	value
		.get(key)
		.and_then(Value::as_i64)
		.ok_or_else(|| HubError::Protocol(format!("missing integer field {}", key)))
}

fn field_str(value: &Value, key: &str) -> Result<String> {
	value
		.get(key)
		.and_then(Value::as_str)
		.map(str::to_string)
		.ok_or_else(|| HubError::Protocol(format!("missing string field {}", key)))
}

fn array(value: &Value) -> Result<&[Value]> {
	value
		.as_array()
		.ok_or_else(|| HubError::Protocol(format!("expected array, found {:?}", value)))
}

#[async_trait]
impl BuildHub for KojiHub {
	async fn api_version(&self) -> Result<i64> {
		let value = self.call("getAPIVersion", &[]).await?;
		value
			.as_i64()
			.ok_or_else(|| HubError::Protocol(format!("unexpected API version {:?}", value)))
	}

	async fn build(&self, source: &str, target: &str, options: &BuildOptions) -> Result<TaskId> {
		let mut opts = vec![("scratch", Value::from(options.scratch))];
		if let Some(arches) = &options.arch_override {
			opts.push(("arch_override", Value::from(arches.as_str())));
		}
		let opts = Value::Struct(
			opts.into_iter()
				.map(|(key, value)| (key.to_string(), value))
				.collect(),
		);
		let value = self
			.call("build", &[source.into(), target.into(), opts])
			.await?;
		value
			.as_i64()
			.ok_or_else(|| HubError::Protocol(format!("unexpected task id {:?}", value)))
	}

	async fn get_task_info(&self, task_id: TaskId) -> Result<TaskInfo> {
		let value = self
			.call(
				"getTaskInfo",
				&[task_id.into(), Value::kwargs([("request", true.into())])],
			)
			.await?;
		let code = field_i64(&value, "state")?;
		let state = TaskState::from_code(code)
			.ok_or_else(|| HubError::Protocol(format!("unknown task state {}", code)))?;
		Ok(TaskInfo { id: task_id, state })
	}

	async fn get_task_result(&self, task_id: TaskId) -> Result<()> {
		self.call("getTaskResult", &[task_id.into()]).await?;
		Ok(())
	}

	async fn list_builds_for_task(&self, task_id: TaskId) -> Result<Vec<HubBuild>> {
		let value = self
			.call("listBuilds", &[Value::kwargs([("taskID", task_id.into())])])
			.await?;
		array(&value)?
			.iter()
			.map(|build| {
				Ok(HubBuild {
					build_id: field_i64(build, "build_id")?,
					nvr: field_str(build, "nvr")?,
					source: build.get("source").and_then(Value::as_str).map(str::to_string),
				})
			})
			.collect()
	}

	async fn list_build_rpms(&self, build_id: i64) -> Result<Vec<HubRpm>> {
		let value = self.call("listBuildRPMs", &[build_id.into()]).await?;
		array(&value)?
			.iter()
			.map(|rpm| {
				Ok(HubRpm {
					id: field_i64(rpm, "id")?,
					nvr: field_str(rpm, "nvr")?,
					arch: field_str(rpm, "arch")?,
				})
			})
			.collect()
	}

	async fn package_list_add(&self, tag: &str, package: &str) -> Result<()> {
		self.call(
			"packageListAdd",
			&[tag.into(), package.into(), self.owner.as_str().into()],
		)
		.await?;
		Ok(())
	}

	async fn tag_build(&self, tag: &str, nvr: &str) -> Result<()> {
		self.call("tagBuild", &[tag.into(), nvr.into()]).await?;
		Ok(())
	}

	async fn is_tagged(&self, tag: &str, nvr: &str) -> Result<bool> {
		let value = self
			.call(
				"queryHistory",
				&[Value::kwargs([
					("tables", Value::Array(vec!["tag_listing".into()])),
					("build", nvr.into()),
					("tag", tag.into()),
				])],
			)
			.await?;
		let listings = match value.get("tag_listing") {
			Some(listings) => array(listings)?,
			None => return Ok(false),
		};
		Ok(listings
			.iter()
			.any(|listing| listing.get("active").and_then(Value::as_bool) == Some(true)))
	}

	async fn has_signature(&self, rpm_id: i64, key_id: &str) -> Result<bool> {
		let value = self
			.call(
				"queryRPMSigs",
				&[Value::kwargs([
					("rpm_id", rpm_id.into()),
					("sigkey", key_id.into()),
				])],
			)
			.await?;
		Ok(!array(&value)?.is_empty())
	}

	async fn write_signed_rpm(&self, nvr_arch: &str, key_id: &str) -> Result<()> {
		self.call("writeSignedRPM", &[nvr_arch.into(), key_id.into()])
			.await?;
		Ok(())
	}

	async fn merge_scratch(&self, task_id: TaskId) -> Result<()> {
		self.call("mergeScratch", &[task_id.into()]).await?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::{
		collections::HashMap,
		sync::{Arc, Mutex as StdMutex},
	};

	use axum::{Router, extract::Query, routing::post};
	use tokio::{net::TcpListener, task::JoinSet};

	use super::*;
	use crate::hub::FaultClass;

	fn int_response(value: i64) -> String {
		format!(
			"<?xml version='1.0'?><methodResponse><params><param><value><int>{}</int></value></param></params></methodResponse>",
			value
		)
	}

	fn fault_response(code: i64) -> String {
		format!(
			"<?xml version='1.0'?><methodResponse><fault><value><struct>\
			<member><name>faultCode</name><value><int>{}</int></value></member>\
			<member><name>faultString</name><value><string>fault {}</string></value></member>\
			</struct></value></fault></methodResponse>",
			code, code
		)
	}

	fn login_response(id: i64, key: &str) -> String {
		format!(
			"<?xml version='1.0'?><methodResponse><params><param><value><struct>\
			<member><name>session-id</name><value><int>{}</int></value></member>\
			<member><name>session-key</name><value><string>{}</string></value></member>\
			</struct></value></param></params></methodResponse>",
			id, key
		)
	}

	async fn serve(router: Router) -> String {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
		format!("http://{}/kojihub", addr)
	}

	fn hub(url: String, session: Option<Session>) -> KojiHub {
		KojiHub {
			url,
			owner: "kiln".to_string(),
			client: Client::new(),
			authenticated: session.is_some(),
			session: Mutex::new(session),
		}
	}

	fn session(id: i64, key: &str) -> Option<Session> {
		Some(Session {
			id,
			key: key.to_string(),
			callnum: 0,
		})
	}

	type Seen = Arc<StdMutex<Vec<HashMap<String, String>>>>;

	/// A hub answering 1 to every call, rejecting calls out of sequence.
	fn sequenced_hub(seen: Seen) -> Router {
		Router::new().route(
			"/kojihub",
			post(move |Query(query): Query<HashMap<String, String>>| {
				let seen = seen.clone();
				async move {
					let mut seen = seen.lock().unwrap();
					let callnum: i64 = query["callnum"].parse().unwrap();
					let last = seen.last().map(|query| query["callnum"].parse::<i64>().unwrap());
					let in_order = last.is_none_or(|last| callnum > last);
					seen.push(query);
					if in_order { int_response(1) } else { fault_response(1008) }
				}
			}),
		)
	}

	#[tokio::test]
	async fn test_session_calls_are_numbered() {
		let seen = Seen::default();
		let url = serve(sequenced_hub(seen.clone())).await;
		let hub = hub(url, session(7, "secret"));

		assert_eq!(hub.api_version().await.unwrap(), 1);
		assert_eq!(hub.api_version().await.unwrap(), 1);

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 2);
		assert_eq!(seen[0]["session-id"], "7");
		assert_eq!(seen[0]["session-key"], "secret");
		assert_eq!(seen[0]["callnum"], "0");
		assert_eq!(seen[1]["callnum"], "1");
	}

	#[tokio::test]
	async fn test_concurrent_calls_stay_in_sequence() {
		let seen = Seen::default();
		let url = serve(sequenced_hub(seen.clone())).await;
		let hub = Arc::new(hub(url, session(7, "secret")));

		let mut calls = JoinSet::new();
		for _ in 0..16 {
			let hub = hub.clone();
			calls.spawn(async move { hub.api_version().await });
		}
		while let Some(result) = calls.join_next().await {
			assert_eq!(result.unwrap().unwrap(), 1);
		}
		assert_eq!(seen.lock().unwrap().len(), 16);
	}

	#[tokio::test]
	async fn test_fault_is_decoded() {
		let url = serve(Router::new().route("/kojihub", post(|| async { fault_response(1005) }))).await;
		let hub = hub(url, None);

		let error = hub.get_task_result(12).await.unwrap_err();
		assert!(matches!(error, HubError::Fault { code: 1005, .. }));
		assert_eq!(error.fault_class(), Some(FaultClass::BuildFailure));
	}

	#[tokio::test]
	async fn test_expired_session_logs_in_again() {
		let seen = Seen::default();
		let router = {
			let seen = seen.clone();
			Router::new().route(
				"/kojihub",
				post(move |Query(query): Query<HashMap<String, String>>, body: String| {
					let seen = seen.clone();
					async move {
						seen.lock().unwrap().push(query.clone());
						if body.contains("<methodName>sslLogin</methodName>") {
							login_response(8, "fresh")
						} else if query.get("session-id").map(String::as_str) == Some("8") {
							int_response(1)
						} else {
							fault_response(1007)
						}
					}
				}),
			)
		};
		let url = serve(router).await;
		let hub = hub(url, session(7, "stale"));

		assert_eq!(hub.api_version().await.unwrap(), 1);

		let seen = seen.lock().unwrap();
		assert_eq!(seen.len(), 3);
		assert_eq!(seen[0]["session-id"], "7");
		assert!(seen[1].is_empty());
		assert_eq!(seen[2]["session-id"], "8");
		assert_eq!(seen[2]["callnum"], "0");
		let session = hub.session.try_lock().unwrap();
		assert_eq!(session.as_ref().map(|session| session.callnum), Some(1));
	}
}

use anyhow::Result;
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tracing::error;

use crate::FurnaceServices;

pub fn make_router(services: FurnaceServices) -> Result<Router> {
	let router = Router::new()
		.route("/", get(handler))
		.route("/status", get(status))
		.with_state(services);

	Ok(router)
}

async fn handler() -> &'static str {
	concat!("Kiln Furnace ", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Serialize)]
struct Status {
	pending_jobs: usize,
	runners: usize,
	signing: bool,
}

async fn status(State(services): State<FurnaceServices>) -> Result<Json<Status>, StatusCode> {
	let pending_jobs = services
		.backend
		.job_queue
		.count_pending(usize::MAX)
		.await
		.map_err(|error| {
			error!(?error, "failed to count pending jobs");
			StatusCode::SERVICE_UNAVAILABLE
		})?;
	Ok(Json(Status {
		pending_jobs,
		runners: services.config.runners,
		signing: services.periodic.signing_enabled(),
	}))
}

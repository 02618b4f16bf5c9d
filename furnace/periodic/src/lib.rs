//! Periodic tasks of the scheduler: build status reconciliation and
//! signing of succeeded builds.
//!
//! Both only act on non-terminal work (BUILDING builds, unsigned builds),
//! and every item of a tick is processed independently of the others.

use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use kiln_backend_clients::ExternalClients;
use kiln_backend_model::bus::LockKey;
use kiln_backend_service::BackendServices;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, info_span};

mod signing;
mod status;

/// Summary of one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
	/// Items looked at.
	pub checked: usize,
	/// Items whose state changed.
	pub updated: usize,
	/// Items that failed and will be retried next tick.
	pub failed: usize,
}

impl TickReport {
	fn record<T>(&mut self, result: Result<bool>, item: T)
	where
		T: std::fmt::Display,
	{
		self.checked += 1;
		match result {
			Ok(true) => self.updated += 1,
			Ok(false) => {}
			Err(error) => {
				self.failed += 1;
				error!(%item, ?error, "periodic task item failed");
			}
		}
	}
}

#[derive(Debug)]
pub struct PeriodicTasks {
	backend: Arc<BackendServices>,
	clients: ExternalClients,
}

impl PeriodicTasks {
	pub fn new(backend: Arc<BackendServices>, clients: ExternalClients) -> Self {
		Self { backend, clients }
	}

	pub fn signing_enabled(&self) -> bool {
		self.clients.signer.is_some()
	}

	/// Polls the backends of BUILDING builds forever.
	pub async fn run_status_loop(self: Arc<Self>) {
		info!("build status loop started");
		self.run_loop("check_build_status", || self.check_build_status())
			.await
	}

	/// Signs succeeded builds forever. Returns at once if signing is disabled.
	pub async fn run_signing_loop(self: Arc<Self>) {
		if !self.signing_enabled() {
			info!("signing is disabled, not starting the signing loop");
			return;
		}
		info!("signing loop started");
		self.run_loop("sign_unsigned_builds", || self.sign_unsigned_builds())
			.await
	}

	async fn run_loop<F, Fut>(&self, name: &'static str, tick: F)
	where
		F: Fn() -> Fut,
		Fut: Future<Output = Result<TickReport>>,
	{
		let period = Duration::from_secs(self.backend.config.scheduler.poll_interval_secs);
		let mut interval = tokio::time::interval(period);
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
		loop {
			interval.tick().await;
			let result = async {
				// one scheduler instance per tick
				let lock = self
					.backend
					.redis
					.try_lock(
						LockKey::Periodic(name),
						time::Duration::try_from(tick_lock_ttl(period))?,
					)
					.await?;
				let Some(_lock) = lock else {
					debug!("another instance is running this tick");
					return Ok(());
				};
				let report = tick().await?;
				debug!(?report, "periodic task finished");
				Ok::<_, anyhow::Error>(())
			}
			.instrument(info_span!("periodic", task = name))
			.await;
			if let Err(error) = result {
				error!(task = name, ?error, "periodic task error");
			}
		}
	}
}

/// Lifetime of the per-tick lock. The guard releases it when the tick ends,
/// so the ttl only bounds how long a crashed holder blocks other instances.
fn tick_lock_ttl(period: Duration) -> Duration {
	(period * 4).max(MIN_TICK_LOCK_TTL)
}

const MIN_TICK_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

//! [BackendBusService] implementation for the furnace.

use std::{
	sync::{Arc, OnceLock},
	time::Duration,
};

use futures::{
	FutureExt, StreamExt,
	future::{BoxFuture, ready},
};
use kiln_backend_model::bus::SchedulerBusMessage;
use kiln_backend_service::{
	Result,
	bus::{BackendBusFactory, BackendBusService, BoxedBusService, SCHEDULER_BUS_CHANNEL},
	redis::RedisService,
};
use tracing::{debug, error, info};

use crate::FurnaceServices;

/// Delivers messages sent from within the furnace straight to its runners.
#[derive(Debug)]
pub struct FurnaceBusService {
	services: Arc<OnceLock<FurnaceServices>>,
}

impl BackendBusService for FurnaceBusService {
	fn send(&self, message: SchedulerBusMessage) -> BoxFuture<'_, Result<()>> {
		if let Some(services) = self.services.get() {
			process_message(message, services);
		}
		ready(Ok(())).boxed()
	}
}

pub struct FurnaceBusFactory(pub Arc<OnceLock<FurnaceServices>>);

impl BackendBusFactory for FurnaceBusFactory {
	fn construct(self, _redis: Arc<RedisService>) -> BoxFuture<'static, Result<BoxedBusService>> {
		ready(Ok(Box::new(FurnaceBusService { services: self.0 }) as BoxedBusService)).boxed()
	}
}

/// Listens to the scheduler bus channel forever, resubscribing after errors.
pub async fn handle_bus_message(services: FurnaceServices) {
	loop {
		if let Err(error) = subscribe(&services).await {
			error!(?error, "scheduler bus subscription failed");
		}
		tokio::time::sleep(Duration::from_secs(5)).await;
	}
}

async fn subscribe(services: &FurnaceServices) -> anyhow::Result<()> {
	let client = services.backend.redis.make_client()?;
	let mut pubsub = client.get_async_pubsub().await?;
	pubsub.subscribe(SCHEDULER_BUS_CHANNEL).await?;
	info!("subscribed to scheduler bus channel");

	let mut messages = pubsub.on_message();
	while let Some(msg) = messages.next().await {
		let payload = match msg.get_payload::<String>() {
			Ok(value) => value,
			Err(error) => {
				error!(%error, "failed to decode bus message");
				continue;
			}
		};
		match serde_json::from_str::<SchedulerBusMessage>(&payload) {
			Ok(message) => process_message(message, services),
			Err(error) => error!(%error, "failed to parse bus message"),
		}
	}
	anyhow::bail!("scheduler bus connection closed")
}

fn process_message(message: SchedulerBusMessage, services: &FurnaceServices) {
	debug!(?message, "processing scheduler bus message");
	match message {
		SchedulerBusMessage::ResumeJobRunner => services.runner.notify_one(),
	}
}

//! Backend bus

use std::{fmt::Debug, sync::Arc};

use futures::future::{BoxFuture, FutureExt};
use kiln_backend_model::bus::SchedulerBusMessage;
use redis::AsyncCommands;

use crate::{Result, redis::RedisService};

pub trait BackendBusService
where
	Self: Send + Sync + Debug,
{
	/// Sends a message to the scheduler.
	fn send(&self, message: SchedulerBusMessage) -> BoxFuture<'_, Result<()>>;
}

pub type BoxedBusService = Box<dyn BackendBusService + 'static>;

pub trait BackendBusFactory {
	fn construct(self, redis: Arc<RedisService>) -> BoxFuture<'static, Result<BoxedBusService>>;
}

pub const SCHEDULER_BUS_CHANNEL: &str = "bus:scheduler";

/// Bus publishing messages on Redis, used outside the scheduler process.
#[derive(Debug)]
pub struct RedisBusService {
	redis: Arc<RedisService>,
}

impl BackendBusService for RedisBusService {
	fn send(&self, message: SchedulerBusMessage) -> BoxFuture<'_, Result<()>> {
		async move {
			let payload = serde_json::to_string(&message)?;
			let mut conn = self.redis.get().await?;
			let _: () = conn
				.publish(SCHEDULER_BUS_CHANNEL, payload)
				.await
				.map_err(crate::redis::RedisError::from)?;
			Ok(())
		}
		.boxed()
	}
}

pub struct RedisBusFactory;

impl BackendBusFactory for RedisBusFactory {
	fn construct(self, redis: Arc<RedisService>) -> BoxFuture<'static, Result<BoxedBusService>> {
		async move { Ok(Box::new(RedisBusService { redis }) as BoxedBusService) }.boxed()
	}
}

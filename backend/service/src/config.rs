use kiln_common_model::distro::DistroConfig;
use serde::{Deserialize, Serialize};

use crate::{database::DatabaseConfig, redis::RedisConfig};

#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
	pub database: DatabaseConfig,
	pub redis: RedisConfig,
	pub distro: DistroConfig,
	pub scheduler: SchedulerConfig,
}

/// Configuration of the scheduler shared by producers and job runners.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
	/// Hex-encoded 256-bit key sealing bearer tokens in job payloads.
	pub message_secret: String,
	/// Seconds between two ticks of each periodic task.
	#[serde(default = "default_poll_interval")]
	pub poll_interval_secs: u64,
	/// Seconds between two scans of the job queue for pending jobs.
	#[serde(default = "default_watch_interval")]
	pub watch_interval_secs: u64,
	/// A job failing this many times is dropped from the queue.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: u16,
	/// Seconds after which a started job is presumed lost with its runner
	/// and returned to the queue. Must exceed the longest import.
	#[serde(default = "default_job_lease")]
	pub job_lease_secs: u64,
}

fn default_poll_interval() -> u64 {
	300
}

fn default_watch_interval() -> u64 {
	180
}

fn default_max_attempts() -> u16 {
	5
}

fn default_job_lease() -> u64 {
	4 * 60 * 60
}

//! Backend bus

use serde::{Deserialize, Serialize};

/// A backend bus message from producers to the scheduler.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
pub enum SchedulerBusMessage {
	/// New jobs are enqueued, wake up an idle job runner.
	ResumeJobRunner,
}

/// Key for distributed locking
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub enum LockKey {
	/// Held while running database migrations.
	Migration,
	/// Held by a scheduler instance while it runs one tick of a periodic task.
	Periodic(&'static str),
	Misc(&'static str),
}

impl LockKey {
	pub fn to_key(&self) -> String {
		match self {
			LockKey::Migration => "lock:migration".to_string(),
			LockKey::Periodic(task) => format!("lock:periodic:{}", task),
			LockKey::Misc(key) => format!("lock:misc:{}", key),
		}
	}
}

impl From<&'static str> for LockKey {
	fn from(value: &'static str) -> Self {
		Self::Misc(value)
	}
}

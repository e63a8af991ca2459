// Copyright 2025 The Crucible Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use crucible_sdk::OrderRejection;

use crate::node::NodeError;
use crate::queue::QueueError;
use crate::snapshot::SnapshotError;

/// Top-level error taxonomy of the engine.
///
/// `Rejected` and `Conflict`-class failures are returned to the caller and
/// never reach the log. `Queue` errors are retried at the log boundary when
/// transient. `FatalStartup` aborts the process.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
	#[error(transparent)]
	Rejected(#[from] OrderRejection),
	#[error("event log error: {0}")]
	Queue(#[from] QueueError),
	#[error("snapshot error: {0}")]
	Snapshot(#[from] SnapshotError),
	#[error("node error: {0}")]
	Node(#[from] NodeError),
	#[error("fatal startup error: {0}")]
	FatalStartup(String),
	#[error("worker for pair {0} is unavailable")]
	WorkerUnavailable(String),
}

/// Bounded exponential backoff with jitter, applied at the log and
/// consumer boundaries for transient infrastructure errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	pub min_backoff: Duration,
	pub max_backoff: Duration,
	pub random_factor: f64,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			min_backoff: Duration::from_millis(100),
			max_backoff: Duration::from_secs(30),
			random_factor: 0.2,
		}
	}
}

impl RetryPolicy {
	/// Delay before retry number `attempt` (0-based).
	pub fn delay(&self, attempt: u32) -> Duration {
		use rand::Rng;

		let base = self
			.min_backoff
			.saturating_mul(2u32.saturating_pow(attempt.min(16)))
			.min(self.max_backoff);
		let jitter = rand::rng().random_range(1.0 - self.random_factor..=1.0 + self.random_factor);
		base.mul_f64(jitter).min(self.max_backoff)
	}
}

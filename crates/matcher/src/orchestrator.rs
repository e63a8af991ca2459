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

//! The matcher orchestrator.
//!
//! Owns the pair-to-worker map behind a narrow interface, restores workers
//! from snapshots at startup, consumes the event log in order and routes
//! each event to its pair's worker, awaiting the acknowledgment before
//! advancing. Service status moves one way through
//! `Starting -> Working -> Stopping`; requests during `Starting` are
//! refused with a dedicated rejection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Sender, bounded};
use crucible_sdk::{AssetPair, MarketStatus, Order, OrderId, OrderRejection, PublicKey};
use tracing::{error, info, warn};

use crate::book::OrderBook;
use crate::config::{ParseError, Settings, parse_pair, parse_public_key};
use crate::error::{MatcherError, RetryPolicy};
use crate::ledger::AddressLedger;
use crate::output::EngineOutput;
use crate::queue::{EventLog, LoggedEvent, Offset, QueueEvent};
use crate::rules::{MatchingRules, RuleSchedule};
use crate::snapshot::SnapshotStore;
use crate::worker::{WorkerContext, WorkerHandle};

const CONSUMER_POLL: Duration = Duration::from_millis(200);

/// Service readiness. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
	Starting,
	Working,
	Stopping,
}

impl ServiceStatus {
	fn from_u8(v: u8) -> Self {
		match v {
			0 => ServiceStatus::Starting,
			1 => ServiceStatus::Working,
			_ => ServiceStatus::Stopping,
		}
	}

	fn as_u8(self) -> u8 {
		match self {
			ServiceStatus::Starting => 0,
			ServiceStatus::Working => 1,
			ServiceStatus::Stopping => 2,
		}
	}
}

/// Orchestrator tuning derived from [`Settings`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
	pub snapshot_interval: u64,
	pub snapshots_loading_timeout: Duration,
	pub start_events_processing_timeout: Duration,
	pub process_consumed_timeout: Duration,
	pub actor_response_timeout: Duration,
	pub graceful_stop_timeout: Duration,
	pub consumer_buffer: usize,
	pub admin: Option<PublicKey>,
	pub allow_admin_cancel: bool,
}

impl OrchestratorConfig {
	pub fn from_settings(settings: &Settings) -> Result<Self, ParseError> {
		let admin = settings
			.admin_public_key
			.as_deref()
			.map(parse_public_key)
			.transpose()?;
		Ok(Self {
			snapshot_interval: settings.snapshots_interval.max(1),
			snapshots_loading_timeout: Duration::from_millis(settings.snapshots_loading_timeout),
			start_events_processing_timeout: Duration::from_millis(
				settings.start_events_processing_timeout,
			),
			process_consumed_timeout: Duration::from_millis(settings.process_consumed_timeout),
			actor_response_timeout: Duration::from_millis(settings.actor_response_timeout),
			graceful_stop_timeout: Duration::from_millis(settings.graceful_stop_timeout),
			consumer_buffer: settings.events_queue.consumer_buffer.max(1),
			admin,
			allow_admin_cancel: settings.allow_admin_cancel,
		})
	}
}

/// Parse the per-pair matching-rule schedules out of the settings.
pub fn rules_from_settings(settings: &Settings) -> Result<MatchingRules, ParseError> {
	let mut schedules = HashMap::new();
	for (pair, rules) in &settings.matching_rules {
		let pair = parse_pair(pair)?;
		let schedule = RuleSchedule::new(rules.iter().map(|r| (*r).into()).collect());
		schedules.insert(pair, schedule);
	}
	Ok(MatchingRules::new(schedules))
}

struct Inner {
	log: Arc<dyn EventLog>,
	snapshots: Arc<dyn SnapshotStore>,
	rules: MatchingRules,
	outputs: Sender<EngineOutput>,
	workers: Mutex<HashMap<AssetPair, WorkerHandle>>,
	status: AtomicU8,
	last_processed: AtomicI64,
	shutdown: AtomicBool,
	cfg: OrchestratorConfig,
}

impl Inner {
	fn status(&self) -> ServiceStatus {
		ServiceStatus::from_u8(self.status.load(Ordering::Acquire))
	}

	fn advance_status(&self, to: ServiceStatus) {
		// one-way: a later state never falls back to an earlier one
		self.status.fetch_max(to.as_u8(), Ordering::AcqRel);
	}

	fn worker_context(&self) -> WorkerContext {
		WorkerContext {
			snapshots: self.snapshots.clone(),
			outputs: self.outputs.clone(),
			snapshot_interval: self.cfg.snapshot_interval,
			admin: self.cfg.admin,
			allow_admin_cancel: self.cfg.allow_admin_cancel,
		}
	}

	/// Route one consumed event to its pair's worker and await the ack.
	fn route(&self, event: LoggedEvent) {
		let pair = event.event.pair();
		let offset = event.offset;
		let is_delete = matches!(event.event, QueueEvent::OrderBookDeleted { .. });

		let mut workers = self.workers.lock().expect("workers lock");
		let worker = workers.entry(pair).or_insert_with(|| {
			info!(target: "orchestrator", pair = %pair, "Creating worker for new pair");
			WorkerHandle::spawn(
				pair,
				OrderBook::new(),
				offset - 1,
				self.rules.schedule(&pair),
				self.worker_context(),
			)
		});

		match worker.apply(event, self.cfg.process_consumed_timeout) {
			Ok(_) => {
				if is_delete
					&& let Some(worker) = workers.remove(&pair)
				{
					worker.stop(false, self.cfg.process_consumed_timeout);
				}
			}
			Err(e) => {
				// the event is already committed to the log; reapplying it
				// would reach the same outcome, so processing continues
				error!(
					target: "orchestrator",
					pair = %pair,
					offset,
					error = %e,
					"Worker failed to process event"
				);
			}
		}
	}

	/// Confirm every worker has drained up to the batch end.
	fn ping_all(&self) {
		let timeout = self.cfg.process_consumed_timeout * 2;
		let workers = self.workers.lock().expect("workers lock");
		for (pair, worker) in workers.iter() {
			if worker.ping(timeout).is_none() {
				warn!(target: "orchestrator", pair = %pair, "Worker missed ping deadline");
			}
		}
	}

	fn run_consumer(&self, catch_up_target: Offset, ready: &Sender<Result<(), String>>) {
		let retry = RetryPolicy::default();
		let mut attempt = 0u32;
		let started = Instant::now();
		let mut ready = Some(ready.clone());

		if self.last_processed.load(Ordering::Acquire) >= catch_up_target {
			self.advance_status(ServiceStatus::Working);
			info!(target: "orchestrator", "No backlog, matcher is working");
			if let Some(tx) = ready.take() {
				let _ = tx.send(Ok(()));
			}
		}

		loop {
			if self.shutdown.load(Ordering::Acquire) {
				break;
			}

			let from = self.last_processed.load(Ordering::Acquire) + 1;
			let batch = match self.log.tail(from, self.cfg.consumer_buffer, CONSUMER_POLL) {
				Ok(batch) => {
					attempt = 0;
					batch
				}
				Err(e) => {
					let delay = retry.delay(attempt);
					warn!(
						target: "orchestrator",
						error = %e,
						delay_ms = delay.as_millis() as u64,
						"Event log tail failed, backing off"
					);
					attempt += 1;
					thread::sleep(delay);
					continue;
				}
			};

			for event in batch.iter() {
				let offset = event.offset;
				self.route(event.clone());
				self.last_processed.store(offset, Ordering::Release);
			}

			if !batch.is_empty() {
				self.ping_all();
				let last = self.last_processed.load(Ordering::Acquire);
				if let Err(e) = self.log.commit(last) {
					warn!(target: "orchestrator", error = %e, "Commit failed");
				}
			}

			if self.status() == ServiceStatus::Starting {
				if self.last_processed.load(Ordering::Acquire) >= catch_up_target {
					self.advance_status(ServiceStatus::Working);
					info!(
						target: "orchestrator",
						offset = self.last_processed.load(Ordering::Acquire),
						"Catch-up complete, matcher is working"
					);
					if let Some(tx) = ready.take() {
						let _ = tx.send(Ok(()));
					}
				} else if started.elapsed() > self.cfg.start_events_processing_timeout {
					error!(target: "orchestrator", "Catch-up deadline exceeded");
					if let Some(tx) = ready.take() {
						let _ = tx.send(Err("start events processing timed out".to_string()));
					}
					break;
				}
			}
		}
	}
}

/// The orchestrator handle owned by the host process.
pub struct MatcherOrchestrator {
	inner: Arc<Inner>,
	consumer: Option<JoinHandle<()>>,
}

impl MatcherOrchestrator {
	/// Start the engine: restore every known pair from its snapshot, seed
	/// the ledger, then consume the log until caught up with its end
	/// offset. Returns once the service is `Working`; a startup deadline
	/// miss aborts with a fatal error.
	pub fn start(
		cfg: OrchestratorConfig,
		rules: MatchingRules,
		log: Arc<dyn EventLog>,
		snapshots: Arc<dyn SnapshotStore>,
		ledger: &AddressLedger,
		outputs: Sender<EngineOutput>,
	) -> Result<Self, MatcherError> {
		let startup = Instant::now();
		let inner = Arc::new(Inner {
			log,
			snapshots,
			rules,
			outputs,
			workers: Mutex::new(HashMap::new()),
			status: AtomicU8::new(ServiceStatus::Starting.as_u8()),
			last_processed: AtomicI64::new(-1),
			shutdown: AtomicBool::new(false),
			cfg,
		});

		// phase 1: restore workers from snapshots
		let pairs = inner.snapshots.list_pairs()?;
		info!(target: "orchestrator", pairs = pairs.len(), "Restoring books from snapshots");
		let mut min_restored = Offset::MAX;
		let mut max_restored: Offset = -1;
		{
			let mut workers = inner.workers.lock().expect("workers lock");
			for pair in pairs {
				if startup.elapsed() > inner.cfg.snapshots_loading_timeout {
					return Err(MatcherError::FatalStartup(
						"snapshot loading timed out".to_string(),
					));
				}
				let Some(snapshot) = inner.snapshots.load(&pair)? else {
					continue;
				};
				let book = snapshot.restore_book();
				for entry in book.iter_entries() {
					ledger.restore_entry(entry, snapshot.offset);
				}
				min_restored = min_restored.min(snapshot.offset);
				max_restored = max_restored.max(snapshot.offset);
				info!(
					target: "orchestrator",
					pair = %pair,
					offset = snapshot.offset,
					orders = book.order_count(),
					"Restored book"
				);
				workers.insert(
					pair,
					WorkerHandle::spawn(
						pair,
						book,
						snapshot.offset,
						inner.rules.schedule(&pair),
						inner.worker_context(),
					),
				);
			}
		}

		// phase 2: determine where consumption resumes
		let end = inner.log.end_offset()?;
		if end < max_restored {
			return Err(MatcherError::FatalStartup(format!(
				"event log rewind detected: end offset {end} is behind snapshot offset \
				 {max_restored}"
			)));
		}
		let consume_from = if min_restored == Offset::MAX {
			0
		} else {
			min_restored + 1
		};
		inner
			.last_processed
			.store(consume_from - 1, Ordering::Release);

		// phase 3: consume until caught up with the end offset
		let (ready_tx, ready_rx) = bounded(1);
		let consumer = {
			let inner = inner.clone();
			thread::Builder::new()
				.name("orchestrator-consumer".to_string())
				.spawn(move || inner.run_consumer(end, &ready_tx))
				.expect("Failed to spawn orchestrator consumer thread")
		};

		let wait = inner.cfg.start_events_processing_timeout + Duration::from_secs(1);
		match ready_rx.recv_timeout(wait) {
			Ok(Ok(())) => Ok(Self {
				inner,
				consumer: Some(consumer),
			}),
			Ok(Err(reason)) => {
				let _ = consumer.join();
				Err(MatcherError::FatalStartup(reason))
			}
			Err(_) => {
				inner.shutdown.store(true, Ordering::Release);
				let _ = consumer.join();
				Err(MatcherError::FatalStartup(
					"start events processing timed out".to_string(),
				))
			}
		}
	}

	pub fn status(&self) -> ServiceStatus {
		self.inner.status()
	}

	/// Offset of the last event routed and acknowledged.
	pub fn last_processed_offset(&self) -> Offset {
		self.inner.last_processed.load(Ordering::Acquire)
	}

	/// Append a validated order placement to the log.
	pub fn place_order(&self, order: Order) -> Result<(Offset, u64), MatcherError> {
		self.store_event(QueueEvent::Placed(order))
	}

	/// Append a cancel request to the log.
	pub fn cancel_order(
		&self,
		pair: AssetPair,
		order_id: OrderId,
		requestor: PublicKey,
	) -> Result<(Offset, u64), MatcherError> {
		self.store_event(QueueEvent::Canceled {
			pair,
			order_id,
			requestor,
		})
	}

	/// Append a whole-book deletion (administrative).
	pub fn delete_order_book(&self, pair: AssetPair) -> Result<(Offset, u64), MatcherError> {
		self.store_event(QueueEvent::OrderBookDeleted { pair })
	}

	fn store_event(&self, event: QueueEvent) -> Result<(Offset, u64), MatcherError> {
		match self.inner.status() {
			ServiceStatus::Starting => Err(OrderRejection::MatcherStarting.into()),
			ServiceStatus::Stopping => Err(OrderRejection::MatcherStopping.into()),
			ServiceStatus::Working => Ok(self.inner.log.append(event)?),
		}
	}

	/// Top-of-book view of a pair, `Default` when the pair has no book.
	pub fn market_status(&self, pair: &AssetPair) -> MarketStatus {
		let workers = self.inner.workers.lock().expect("workers lock");
		workers
			.get(pair)
			.and_then(|w| w.market_status(self.inner.cfg.actor_response_timeout))
			.unwrap_or_default()
	}

	/// Graceful stop: refuse new appends, drain workers and persist final
	/// snapshots within the soft deadline.
	pub fn shutdown(mut self) {
		info!(target: "orchestrator", "Stopping matcher");
		self.inner.advance_status(ServiceStatus::Stopping);
		self.inner.shutdown.store(true, Ordering::Release);
		if let Some(consumer) = self.consumer.take() {
			let _ = consumer.join();
		}

		let deadline = Instant::now() + self.inner.cfg.graceful_stop_timeout;
		let workers: Vec<WorkerHandle> = {
			let mut map = self.inner.workers.lock().expect("workers lock");
			map.drain().map(|(_, w)| w).collect()
		};
		for worker in workers {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				warn!(
					target: "orchestrator",
					pair = %worker.pair(),
					"Graceful stop deadline exceeded, skipping final snapshot"
				);
				continue;
			}
			let pair = worker.pair();
			if !worker.stop(true, remaining) {
				warn!(target: "orchestrator", pair = %pair, "Worker did not stop in time");
			}
		}
		info!(target: "orchestrator", "Matcher stopped");
	}
}

impl Drop for MatcherOrchestrator {
	fn drop(&mut self) {
		// crash-like teardown: stop threads, skip final snapshots
		self.inner.advance_status(ServiceStatus::Stopping);
		self.inner.shutdown.store(true, Ordering::Release);
		if let Some(consumer) = self.consumer.take() {
			let _ = consumer.join();
		}
		let workers: Vec<WorkerHandle> = {
			let mut map = self.inner.workers.lock().expect("workers lock");
			map.drain().map(|(_, w)| w).collect()
		};
		for worker in workers {
			worker.stop(false, Duration::from_secs(1));
		}
	}
}

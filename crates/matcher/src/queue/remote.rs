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

//! Distributed single-partition event log.
//!
//! The transport itself (a Kafka-like broker) is an external collaborator;
//! only its contract lives here as [`LogBroker`]. On top of it this module
//! provides the producer and consumer disciplines the engine requires:
//!
//! - [`RemoteEventLog::append`] goes through a bounded in-process buffer; a
//!   full buffer surfaces as `CapacityExceeded` to the caller, transient
//!   broker errors are retried with bounded exponential backoff before the
//!   append is acknowledged.
//! - [`RemoteEventLog::tail`] groups fetched events into batches of up to
//!   the consumer buffer size within a 10 ms window; the caller commits the
//!   last processed offset only after applying the batch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use tracing::{info, warn};

use super::local::now_millis;
use super::{EventLog, LoggedEvent, Offset, QueueError, QueueEvent};
use crate::error::RetryPolicy;

/// How long fetched events are grouped before a partial batch is released.
const GROUP_WINDOW: Duration = Duration::from_millis(10);

/// Contract of the external single-partition log transport.
///
/// The broker linearizes produces, assigns contiguous offsets starting at
/// zero and retains a per-consumer-group committed position. Produce
/// failures that may succeed on retry are reported as
/// [`QueueError::Transient`].
pub trait LogBroker: Send + Sync {
	/// Durably produce one record. `key` is the sharding key (pair bytes).
	fn produce(&self, key: &[u8], payload: &[u8]) -> Result<(Offset, u64), QueueError>;

	/// Fetch up to `max_events` records from `from`, waiting at most
	/// `max_wait` for the first.
	fn fetch(
		&self,
		from: Offset,
		max_events: usize,
		max_wait: Duration,
	) -> Result<Vec<(Offset, u64, Vec<u8>)>, QueueError>;

	fn end_offset(&self) -> Result<Offset, QueueError>;

	fn commit(&self, offset: Offset) -> Result<(), QueueError>;

	fn committed(&self) -> Result<Offset, QueueError>;
}

/// Tuning for the buffered producer and batching consumer.
#[derive(Debug, Clone)]
pub struct RemoteLogConfig {
	/// Capacity of the in-process producer buffer.
	pub producer_buffer: usize,
	/// Maximum events per consumed batch.
	pub consumer_buffer: usize,
	pub retry: RetryPolicy,
}

impl Default for RemoteLogConfig {
	fn default() -> Self {
		Self {
			producer_buffer: 512,
			consumer_buffer: 128,
			retry: RetryPolicy::default(),
		}
	}
}

struct ProduceRequest {
	event: QueueEvent,
	ack: Sender<Result<(Offset, u64), QueueError>>,
}

/// Event log over an external [`LogBroker`].
pub struct RemoteEventLog {
	broker: Arc<dyn LogBroker>,
	requests: Sender<ProduceRequest>,
	consumer_buffer: usize,
	shutdown: Arc<AtomicBool>,
	producer: Option<JoinHandle<()>>,
}

impl RemoteEventLog {
	pub fn start(broker: Arc<dyn LogBroker>, config: RemoteLogConfig) -> Self {
		let (requests, rx) = bounded::<ProduceRequest>(config.producer_buffer);
		let shutdown = Arc::new(AtomicBool::new(false));

		let producer = {
			let broker = broker.clone();
			let shutdown = shutdown.clone();
			let retry = config.retry.clone();
			thread::Builder::new()
				.name("log-producer".to_string())
				.spawn(move || {
					info!(target: "event_log", "Log producer started");
					Self::run_producer_loop(&rx, broker.as_ref(), &retry, &shutdown);
					info!(target: "event_log", "Log producer stopped");
				})
				.expect("Failed to spawn log producer thread")
		};

		Self {
			broker,
			requests,
			consumer_buffer: config.consumer_buffer,
			shutdown,
			producer: Some(producer),
		}
	}

	fn run_producer_loop(
		rx: &Receiver<ProduceRequest>,
		broker: &dyn LogBroker,
		retry: &RetryPolicy,
		shutdown: &AtomicBool,
	) {
		loop {
			let request = match rx.recv_timeout(Duration::from_millis(100)) {
				Ok(request) => request,
				Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
					if shutdown.load(Ordering::Relaxed) {
						break;
					}
					continue;
				}
				Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
			};

			let key = request.event.pair().key_bytes();
			let payload = request.event.to_bytes();

			// transient errors are retried until the broker accepts the
			// record; the ack is sent only afterwards, so no phantom
			// offsets can be observed
			let mut attempt = 0u32;
			let result = loop {
				match broker.produce(&key, &payload) {
					Ok(assigned) => break Ok(assigned),
					Err(e) if e.is_transient() && !shutdown.load(Ordering::Relaxed) => {
						let delay = retry.delay(attempt);
						warn!(
							target: "event_log",
							attempt,
							delay_ms = delay.as_millis() as u64,
							error = %e,
							"Transient produce failure, retrying"
						);
						thread::sleep(delay);
						attempt += 1;
					}
					Err(e) => break Err(e),
				}
			};

			let _ = request.ack.send(result);
		}
	}
}

impl EventLog for RemoteEventLog {
	fn append(&self, event: QueueEvent) -> Result<(Offset, u64), QueueError> {
		let (ack, done) = bounded(1);
		self.requests
			.try_send(ProduceRequest { event, ack })
			.map_err(|e| match e {
				TrySendError::Full(_) => QueueError::CapacityExceeded,
				TrySendError::Disconnected(_) => QueueError::Closed,
			})?;
		done.recv().map_err(|_| QueueError::Closed)?
	}

	fn tail(
		&self,
		from: Offset,
		max_events: usize,
		max_wait: Duration,
	) -> Result<Vec<LoggedEvent>, QueueError> {
		let limit = max_events.min(self.consumer_buffer).max(1);
		let mut batch = Vec::with_capacity(limit);

		let first = self.broker.fetch(from, limit, max_wait)?;
		for (offset, timestamp, payload) in first {
			batch.push(decode_record(offset, timestamp, &payload)?);
		}
		if batch.is_empty() {
			return Ok(batch);
		}

		// grouped-within: keep topping the batch up until it is full or
		// the grouping window closes
		let window_ends = Instant::now() + GROUP_WINDOW;
		while batch.len() < limit {
			let now = Instant::now();
			if now >= window_ends {
				break;
			}
			let next_from = batch.last().expect("non-empty batch").offset + 1;
			let more = self
				.broker
				.fetch(next_from, limit - batch.len(), window_ends - now)?;
			if more.is_empty() {
				break;
			}
			for (offset, timestamp, payload) in more {
				batch.push(decode_record(offset, timestamp, &payload)?);
			}
		}

		Ok(batch)
	}

	fn end_offset(&self) -> Result<Offset, QueueError> {
		self.broker.end_offset()
	}

	fn commit(&self, offset: Offset) -> Result<(), QueueError> {
		self.broker.commit(offset)
	}

	fn committed(&self) -> Result<Offset, QueueError> {
		self.broker.committed()
	}
}

impl Drop for RemoteEventLog {
	fn drop(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);
		if let Some(handle) = self.producer.take() {
			let _ = handle.join();
		}
	}
}

fn decode_record(offset: Offset, timestamp: u64, payload: &[u8]) -> Result<LoggedEvent, QueueError> {
	let event = QueueEvent::from_bytes(payload)
		.map_err(|e| QueueError::Corrupted(format!("record {offset}: {e}")))?;
	Ok(LoggedEvent {
		offset,
		timestamp,
		event,
	})
}

/// In-memory broker implementing the full [`LogBroker`] contract.
///
/// Stands in for the external transport in tests and embedded setups. Can
/// be told to fail the next N produces with a transient error to exercise
/// the producer's retry path.
pub struct MemoryLogBroker {
	records: std::sync::Mutex<MemoryLogState>,
	arrived: std::sync::Condvar,
	transient_failures: std::sync::atomic::AtomicU32,
}

struct MemoryLogState {
	records: Vec<(Offset, u64, Vec<u8>)>,
	committed: Offset,
	last_timestamp: u64,
}

impl MemoryLogBroker {
	pub fn new() -> Self {
		Self {
			records: std::sync::Mutex::new(MemoryLogState {
				records: Vec::new(),
				committed: -1,
				last_timestamp: 0,
			}),
			arrived: std::sync::Condvar::new(),
			transient_failures: std::sync::atomic::AtomicU32::new(0),
		}
	}

	/// Make the next `n` produce calls fail with a transient error.
	pub fn fail_next_produces(&self, n: u32) {
		self.transient_failures.store(n, Ordering::Relaxed);
	}
}

impl Default for MemoryLogBroker {
	fn default() -> Self {
		Self::new()
	}
}

impl LogBroker for MemoryLogBroker {
	fn produce(&self, _key: &[u8], payload: &[u8]) -> Result<(Offset, u64), QueueError> {
		let pending = self.transient_failures.load(Ordering::Relaxed);
		if pending > 0 {
			self.transient_failures.store(pending - 1, Ordering::Relaxed);
			return Err(QueueError::Transient("injected broker failure".to_string()));
		}

		let mut state = self.records.lock().expect("broker lock");
		let offset = state.records.len() as Offset;
		let timestamp = now_millis().max(state.last_timestamp);
		state.last_timestamp = timestamp;
		state.records.push((offset, timestamp, payload.to_vec()));
		self.arrived.notify_all();
		Ok((offset, timestamp))
	}

	fn fetch(
		&self,
		from: Offset,
		max_events: usize,
		max_wait: Duration,
	) -> Result<Vec<(Offset, u64, Vec<u8>)>, QueueError> {
		let from = from.max(0) as usize;
		let deadline = Instant::now() + max_wait;
		let mut state = self.records.lock().expect("broker lock");

		while state.records.len() <= from {
			let now = Instant::now();
			if now >= deadline {
				return Ok(Vec::new());
			}
			let (next, timeout) = self
				.arrived
				.wait_timeout(state, deadline - now)
				.expect("broker lock");
			state = next;
			if timeout.timed_out() && state.records.len() <= from {
				return Ok(Vec::new());
			}
		}

		let to = (from + max_events).min(state.records.len());
		Ok(state.records[from..to].to_vec())
	}

	fn end_offset(&self) -> Result<Offset, QueueError> {
		let state = self.records.lock().expect("broker lock");
		Ok(state.records.len() as Offset - 1)
	}

	fn commit(&self, offset: Offset) -> Result<(), QueueError> {
		let mut state = self.records.lock().expect("broker lock");
		state.committed = state.committed.max(offset);
		Ok(())
	}

	fn committed(&self) -> Result<Offset, QueueError> {
		let state = self.records.lock().expect("broker lock");
		Ok(state.committed)
	}
}

#[cfg(test)]
mod tests {
	use super::super::tests::test_order;
	use super::*;

	#[test]
	fn test_append_retries_transient_failures() {
		let broker = Arc::new(MemoryLogBroker::new());
		broker.fail_next_produces(2);

		let log = RemoteEventLog::start(
			broker.clone(),
			RemoteLogConfig {
				retry: RetryPolicy {
					min_backoff: Duration::from_millis(1),
					max_backoff: Duration::from_millis(5),
					random_factor: 0.2,
				},
				..RemoteLogConfig::default()
			},
		);

		let (offset, _) = log.append(QueueEvent::Placed(test_order())).unwrap();
		assert_eq!(offset, 0);
		assert_eq!(broker.end_offset().unwrap(), 0);
	}

	#[test]
	fn test_tail_batches_and_commit_tracks_progress() {
		let broker = Arc::new(MemoryLogBroker::new());
		let log = RemoteEventLog::start(broker, RemoteLogConfig::default());

		for _ in 0..4 {
			log.append(QueueEvent::Placed(test_order())).unwrap();
		}

		let batch = log.tail(0, 10, Duration::from_millis(50)).unwrap();
		assert_eq!(batch.len(), 4);
		assert_eq!(
			batch.iter().map(|e| e.offset).collect::<Vec<_>>(),
			vec![0, 1, 2, 3]
		);

		assert_eq!(log.committed().unwrap(), -1);
		log.commit(3).unwrap();
		assert_eq!(log.committed().unwrap(), 3);
	}

	#[test]
	fn test_consumer_buffer_caps_batch_size() {
		let broker = Arc::new(MemoryLogBroker::new());
		let log = RemoteEventLog::start(
			broker,
			RemoteLogConfig {
				consumer_buffer: 2,
				..RemoteLogConfig::default()
			},
		);

		for _ in 0..5 {
			log.append(QueueEvent::Placed(test_order())).unwrap();
		}

		let batch = log.tail(0, 100, Duration::from_millis(50)).unwrap();
		assert_eq!(batch.len(), 2);
	}
}

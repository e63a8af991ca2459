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

//! The per-pair book worker.
//!
//! One named thread owns one book and is its only mutator. Events arrive
//! over a command channel in log order with an ack per event; a redelivered
//! offset is acknowledged without reapplying. Outputs are published after
//! the book mutation, snapshots are taken every N applied events and on
//! stop. No await point ever interleaves with the match loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, bounded};
use crucible_sdk::{AssetPair, ExchangeTrade, MarketStatus, Order, PublicKey};
use tracing::{debug, error, info, warn};

use crate::book::{OrderBook, quantize};
use crate::ledger::{CancelReason, LedgerEvent};
use crate::output::EngineOutput;
use crate::queue::{LoggedEvent, Offset, QueueEvent};
use crate::rules::RuleSchedule;
use crate::snapshot::{BookSnapshot, SnapshotStore};

/// Commands a worker accepts from the orchestrator.
pub enum WorkerCommand {
	Apply {
		event: LoggedEvent,
		ack: Sender<Result<Offset, String>>,
	},
	Ping {
		ack: Sender<Offset>,
	},
	Query {
		ack: Sender<MarketStatus>,
	},
	Stop {
		snapshot: bool,
		ack: Sender<()>,
	},
}

/// Worker wiring shared by every pair.
#[derive(Clone)]
pub struct WorkerContext {
	pub snapshots: Arc<dyn SnapshotStore>,
	pub outputs: Sender<EngineOutput>,
	/// Applied events between snapshots.
	pub snapshot_interval: u64,
	pub admin: Option<PublicKey>,
	pub allow_admin_cancel: bool,
}

/// Handle to a spawned worker thread.
pub struct WorkerHandle {
	pair: AssetPair,
	commands: Sender<WorkerCommand>,
	thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
	/// Spawn a worker owning `book`, which has events up to and including
	/// `last_applied` already applied.
	pub fn spawn(
		pair: AssetPair,
		book: OrderBook,
		last_applied: Offset,
		schedule: RuleSchedule,
		ctx: WorkerContext,
	) -> Self {
		let (commands, rx) = bounded::<WorkerCommand>(64);
		let thread = thread::Builder::new()
			.name(format!("book-{pair}"))
			.spawn(move || {
				let mut worker = BookWorker {
					pair,
					book,
					schedule,
					last_applied,
					events_since_snapshot: 0,
					ctx,
				};
				info!(target: "worker", pair = %pair, last_applied, "Book worker started");
				worker.run(&rx);
				info!(target: "worker", pair = %pair, "Book worker stopped");
			})
			.expect("Failed to spawn book worker thread");

		Self {
			pair,
			commands,
			thread: Some(thread),
		}
	}

	pub fn pair(&self) -> AssetPair {
		self.pair
	}

	/// Forward one event and wait for its acknowledgment.
	pub fn apply(&self, event: LoggedEvent, timeout: Duration) -> Result<Offset, String> {
		let (ack, done) = bounded(1);
		self.commands
			.send(WorkerCommand::Apply { event, ack })
			.map_err(|_| "worker channel closed".to_string())?;
		done.recv_timeout(timeout)
			.map_err(|_| "worker did not acknowledge in time".to_string())?
	}

	/// Confirm the worker has drained its queue; returns its last applied
	/// offset.
	pub fn ping(&self, timeout: Duration) -> Option<Offset> {
		let (ack, done) = bounded(1);
		self.commands.send(WorkerCommand::Ping { ack }).ok()?;
		done.recv_timeout(timeout).ok()
	}

	pub fn market_status(&self, timeout: Duration) -> Option<MarketStatus> {
		let (ack, done) = bounded(1);
		self.commands.send(WorkerCommand::Query { ack }).ok()?;
		done.recv_timeout(timeout).ok()
	}

	/// Stop the worker, optionally persisting a final snapshot.
	pub fn stop(mut self, snapshot: bool, timeout: Duration) -> bool {
		let (ack, done) = bounded(1);
		if self
			.commands
			.send(WorkerCommand::Stop { snapshot, ack })
			.is_err()
		{
			return false;
		}
		let stopped = done.recv_timeout(timeout).is_ok();
		if let Some(thread) = self.thread.take() {
			let _ = thread.join();
		}
		stopped
	}
}

struct BookWorker {
	pair: AssetPair,
	book: OrderBook,
	schedule: RuleSchedule,
	last_applied: Offset,
	events_since_snapshot: u64,
	ctx: WorkerContext,
}

impl BookWorker {
	fn run(&mut self, commands: &Receiver<WorkerCommand>) {
		while let Ok(command) = commands.recv() {
			match command {
				WorkerCommand::Apply { event, ack } => {
					let result = self.apply(event);
					if let Err(e) = &result {
						error!(
							target: "worker",
							pair = %self.pair,
							error = %e,
							"Failed to apply event"
						);
					}
					let _ = ack.send(result);
				}
				WorkerCommand::Ping { ack } => {
					let _ = ack.send(self.last_applied);
				}
				WorkerCommand::Query { ack } => {
					let _ = ack.send(self.book.market_status());
				}
				WorkerCommand::Stop { snapshot, ack } => {
					if snapshot {
						self.save_snapshot();
					}
					let _ = ack.send(());
					break;
				}
			}
		}
	}

	fn apply(&mut self, logged: LoggedEvent) -> Result<Offset, String> {
		let offset = logged.offset;
		if offset <= self.last_applied {
			// at-least-once delivery: already applied, acknowledge only
			debug!(target: "worker", pair = %self.pair, offset, "Skipping replayed event");
			return Ok(self.last_applied);
		}

		self.sweep_expired(offset, logged.timestamp);

		let mut book_deleted = false;
		match logged.event {
			QueueEvent::Placed(order) => self.apply_placed(order, offset, logged.timestamp),
			QueueEvent::Canceled {
				order_id, requestor, ..
			} => {
				let authorized_admin = self.ctx.allow_admin_cancel
					&& self.ctx.admin.as_ref() == Some(&requestor);
				let owner = self.book.get(&order_id).map(|e| e.order.sender);
				match owner {
					Some(owner) if owner == requestor || authorized_admin => {
						let entry = self.book.cancel(&order_id).expect("entry just found");
						self.emit(EngineOutput::Order(LedgerEvent::OrderCanceled {
							offset,
							order_id,
							owner: entry.order.sender,
							reason: CancelReason::Requested,
						}));
					}
					Some(_) => {
						warn!(
							target: "worker",
							pair = %self.pair,
							order_id = %order_id,
							requestor = %requestor,
							"Unauthorized cancel ignored"
						);
					}
					None => {
						debug!(
							target: "worker",
							pair = %self.pair,
							order_id = %order_id,
							"Cancel for unknown order"
						);
					}
				}
			}
			QueueEvent::OrderBookDeleted { .. } => {
				let drained = self.book.drain_all();
				info!(
					target: "worker",
					pair = %self.pair,
					cancelled = drained.len(),
					"Order book deleted"
				);
				for entry in drained {
					self.emit(EngineOutput::Order(LedgerEvent::OrderCanceled {
						offset,
						order_id: entry.id,
						owner: entry.order.sender,
						reason: CancelReason::BookDeleted,
					}));
				}
				if let Err(e) = self.ctx.snapshots.remove(&self.pair) {
					error!(
						target: "worker",
						pair = %self.pair,
						error = %e,
						"Failed to remove snapshot of deleted book"
					);
				}
				book_deleted = true;
			}
		}

		self.last_applied = offset;
		if book_deleted {
			self.events_since_snapshot = 0;
			return Ok(offset);
		}
		self.events_since_snapshot += 1;
		if self.events_since_snapshot >= self.ctx.snapshot_interval {
			self.save_snapshot();
		}
		Ok(offset)
	}

	fn apply_placed(&mut self, order: Order, offset: Offset, timestamp: u64) {
		let tick = self.schedule.active_at(offset).tick_size;
		let Some(price) = quantize(order.price, tick, order.side) else {
			// the validator refuses these before the log; a replayed event
			// from an older configuration is dropped, not retried
			warn!(
				target: "worker",
				pair = %self.pair,
				price = order.price,
				tick,
				"Dropping order with non-positive quantized price"
			);
			return;
		};

		let incoming_id = order.id();
		let incoming_owner = order.sender;
		self.emit(EngineOutput::Order(LedgerEvent::OrderAdded {
			offset,
			order: order.clone(),
		}));

		let outcome = self.book.execute(order, price);
		for exec in &outcome.executions {
			self.emit(EngineOutput::Trade(ExchangeTrade {
				pair: self.pair,
				order_id: incoming_id,
				counter_id: exec.counter.id,
				amount: exec.amount,
				price: exec.price,
				order_fee: exec.order_fee,
				counter_fee: exec.counter_fee,
				timestamp,
				offset: offset.max(0) as u64,
			}));
			self.emit(EngineOutput::Order(LedgerEvent::OrderExecuted {
				offset,
				order_id: incoming_id,
				owner: incoming_owner,
				exec_amount: exec.amount,
				exec_price: exec.price,
				exec_fee: exec.order_fee,
			}));
			self.emit(EngineOutput::Order(LedgerEvent::OrderExecuted {
				offset,
				order_id: exec.counter.id,
				owner: exec.counter.order.sender,
				exec_amount: exec.amount,
				exec_price: exec.price,
				exec_fee: exec.counter_fee,
			}));
		}
	}

	fn sweep_expired(&mut self, offset: Offset, timestamp: u64) {
		// driven by log timestamps, so replay reaches the same verdicts
		for entry in self.book.drain_expired(timestamp) {
			debug!(
				target: "worker",
				pair = %self.pair,
				order_id = %entry.id,
				"Order expired"
			);
			self.emit(EngineOutput::Order(LedgerEvent::OrderCanceled {
				offset,
				order_id: entry.id,
				owner: entry.order.sender,
				reason: CancelReason::Expired,
			}));
		}
	}

	fn emit(&self, output: EngineOutput) {
		if self.ctx.outputs.send(output).is_err() {
			warn!(target: "worker", pair = %self.pair, "Output channel closed");
		}
	}

	fn save_snapshot(&mut self) {
		if self.last_applied < 0 {
			return;
		}
		let snapshot = BookSnapshot::capture(self.pair, self.last_applied, &self.book);
		match self.ctx.snapshots.save(&snapshot) {
			Ok(()) => {
				debug!(
					target: "worker",
					pair = %self.pair,
					offset = self.last_applied,
					orders = self.book.order_count(),
					"Snapshot saved"
				);
				self.events_since_snapshot = 0;
			}
			Err(e) => {
				error!(
					target: "worker",
					pair = %self.pair,
					error = %e,
					"Failed to save snapshot"
				);
			}
		}
	}
}

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

//! Worker output stream.
//!
//! Workers publish everything that leaves a book through one channel, in
//! application order: ledger events for the address projection and
//! settlement instructions for the downstream broadcaster. The dispatcher
//! thread applies the former and forwards the latter; trades are emitted
//! once per successful application and deduplicated downstream by
//! `(order_id, counter_id, offset)`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use crucible_sdk::ExchangeTrade;
use tracing::{debug, info};

use crate::ledger::{AddressLedger, LedgerEvent};

/// One unit of worker output.
#[derive(Debug, Clone)]
pub enum EngineOutput {
	/// A settlement instruction for the downstream broadcaster.
	Trade(ExchangeTrade),
	/// An order lifecycle event for the address ledger.
	Order(LedgerEvent),
}

/// Consumes [`EngineOutput`] and fans it out: ledger events are applied,
/// trades are forwarded to the settlement sink.
pub struct OutputDispatcher {
	thread: Option<JoinHandle<()>>,
}

impl OutputDispatcher {
	pub fn start(
		outputs: Receiver<EngineOutput>,
		ledger: Arc<AddressLedger>,
		trades: Sender<ExchangeTrade>,
	) -> Self {
		let thread = thread::Builder::new()
			.name("output-dispatcher".to_string())
			.spawn(move || {
				info!(target: "output", "Output dispatcher started");
				loop {
					match outputs.recv_timeout(Duration::from_millis(100)) {
						Ok(EngineOutput::Order(event)) => ledger.apply(&event),
						Ok(EngineOutput::Trade(trade)) => {
							if trades.send(trade).is_err() {
								debug!(
									target: "output",
									"Trade sink disconnected, dropping instruction"
								);
							}
						}
						Err(RecvTimeoutError::Timeout) => continue,
						Err(RecvTimeoutError::Disconnected) => break,
					}
				}
				info!(target: "output", "Output dispatcher stopped");
			})
			.expect("Failed to spawn output dispatcher thread");

		Self {
			thread: Some(thread),
		}
	}

	/// Waits for the output channel to drain and close. Callers must have
	/// dropped every producer first or this blocks until they do.
	pub fn join(mut self) {
		if let Some(handle) = self.thread.take() {
			let _ = handle.join();
		}
	}
}

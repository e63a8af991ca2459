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

//! Matcher service entry point.
//!
//! Wires the core together from configuration: event log, snapshot store,
//! address ledger, output dispatcher and the orchestrator. The host's
//! request surface (HTTP, signature backend, blockchain client) plugs in
//! through the library seams; this binary runs the engine on the local
//! event log.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use crossbeam::channel::unbounded;
use crucible_matcher::{
	AddressLedger, FileSnapshotStore, LocalEventLog, MatcherOrchestrator, OrchestratorConfig,
	OutputDispatcher, QueueEvent, QueueKind, Settings, logging, rules_from_settings,
};
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	logging::init_logging()?;

	let settings = match std::env::args().nth(1) {
		Some(path) => Settings::from_file(&path)
			.with_context(|| format!("failed to load configuration from {path}"))?,
		None => Settings::from_env().context("failed to load configuration")?,
	};

	let log = match settings.events_queue.kind {
		QueueKind::Local => {
			let path = Path::new(&settings.events_queue.store_path);
			if let Some(parent) = path.parent() {
				std::fs::create_dir_all(parent)?;
			}
			Arc::new(LocalEventLog::open(path)?)
		}
		QueueKind::Kafka => {
			// the broker transport is supplied by the embedding process;
			// see crucible_matcher::queue::remote::LogBroker
			bail!("events-queue.type = kafka requires an external broker binding");
		}
	};

	let snapshots = Arc::new(FileSnapshotStore::open(
		settings.snapshots_path.clone().into(),
	)?);
	let ledger = Arc::new(AddressLedger::new(settings.address_orders_history_cap));

	// auto-cancels go through the log like every other mutation
	{
		let log = log.clone();
		ledger.set_auto_cancel(move |req| {
			use crucible_matcher::EventLog;
			let _ = log.append(QueueEvent::Canceled {
				pair: req.pair,
				order_id: req.order_id,
				requestor: req.owner,
			});
		});
	}

	let (outputs_tx, outputs_rx) = unbounded();
	let (trades_tx, trades_rx) = unbounded();
	let dispatcher = OutputDispatcher::start(outputs_rx, ledger.clone(), trades_tx);

	// settlement instructions are consumed by the downstream broadcaster;
	// without one attached, drain them to keep the channel bounded in
	// memory
	let drain = std::thread::spawn(move || {
		for trade in trades_rx.iter() {
			info!(
				target: "settlement",
				order = %trade.order_id,
				counter = %trade.counter_id,
				amount = trade.amount,
				price = trade.price,
				offset = trade.offset,
				"Trade ready for settlement"
			);
		}
	});

	let orchestrator = MatcherOrchestrator::start(
		OrchestratorConfig::from_settings(&settings)?,
		rules_from_settings(&settings)?,
		log,
		snapshots,
		&ledger,
		outputs_tx,
	)?;
	info!("Crucible matcher is working");

	signal::ctrl_c().await?;
	info!("Shutdown signal received");

	orchestrator.shutdown();
	dispatcher.join();
	let _ = drain.join();
	Ok(())
}

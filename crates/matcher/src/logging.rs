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

//! Logging initialization for the matcher service.
//!
//! Structured `tracing` output to stderr. `RUST_LOG` selects the filter
//! (default `info`), per-target overrides work as usual, e.g.
//! `RUST_LOG=crucible_matcher=debug,event_log=info`.

use std::env;

use anyhow::Result;
use tracing_subscriber::{
	EnvFilter, fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt,
};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Initialize the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logging() -> Result<()> {
	let log_level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

	let subscriber = Registry::default().with(filter).with(
		fmt::layer()
			.with_writer(std::io::stderr)
			.with_thread_ids(true)
			.with_target(true),
	);

	// a second init (e.g. in tests) keeps the first subscriber
	let _ = subscriber.try_init();
	Ok(())
}

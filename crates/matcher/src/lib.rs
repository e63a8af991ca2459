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

//! Crucible Matcher
//!
//! The authoritative matching core of the Crucible DEX: it admits signed
//! limit orders under configurable policy, sequences every mutating
//! command through an append-only event log, matches orders in per-pair
//! price-time priority books and emits settlement instructions for a
//! downstream broadcaster.
//!
//! Architecture:
//! - Event sourcing: the log is the single source of truth; books are
//!   rebuilt from snapshots plus the log tail
//! - Single-threaded per pair: one worker owns one book
//! - Single-threaded routing: the orchestrator consumes the log in order
//!   and awaits each worker acknowledgment
//! - The address ledger is a projection of worker outputs, never a book
//!   mutator

pub mod book;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod node;
pub mod orchestrator;
pub mod output;
pub mod queue;
pub mod rules;
pub mod snapshot;
pub mod validator;
pub mod worker;

pub use book::{LimitOrder, OrderBook};
pub use config::{QueueKind, Settings};
pub use error::{MatcherError, RetryPolicy};
pub use ledger::{AddressLedger, CancelRequest, CancelReason, LedgerEvent};
pub use node::{AssetDescription, NodeClient, StaticNodeClient};
pub use orchestrator::{
	MatcherOrchestrator, OrchestratorConfig, ServiceStatus, rules_from_settings,
};
pub use output::{EngineOutput, OutputDispatcher};
pub use queue::{EventLog, LoggedEvent, Offset, QueueEvent, local::LocalEventLog,
	remote::{LogBroker, MemoryLogBroker, RemoteEventLog, RemoteLogConfig}};
pub use rules::{MatchingRule, MatchingRules, RuleSchedule};
pub use snapshot::{BookSnapshot, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use validator::{
	AcceptAllVerifier, SignatureVerifier, ValidationContext, Validator, ValidatorConfig,
};
pub use worker::{WorkerContext, WorkerHandle};

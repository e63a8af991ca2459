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

//! Engine configuration.
//!
//! Loaded from a hierarchical file plus `CRUCIBLE_`-prefixed environment
//! overrides. Keys are kebab-case; durations are milliseconds. Assets are
//! written as `NATIVE` or the 64-char hex id; pairs as
//! `<amount-asset>-<price-asset>`.

use std::collections::HashMap;

use crucible_sdk::{Asset, AssetPair, PublicKey};
use serde::{Deserialize, Serialize};

use crate::rules::MatchingRule;

/// Which event-log implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
	/// Single-process log on local durable storage.
	Local,
	/// Distributed single-partition log behind an external broker.
	Kafka,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EventsQueueSettings {
	#[serde(rename = "type")]
	pub kind: QueueKind,
	/// Store path of the local log.
	pub store_path: String,
	/// Capacity of the producer-side buffer.
	pub producer_buffer: usize,
	/// Maximum events per consumed batch.
	pub consumer_buffer: usize,
}

impl Default for EventsQueueSettings {
	fn default() -> Self {
		Self {
			kind: QueueKind::Local,
			store_path: "data/events.log".to_string(),
			producer_buffer: 512,
			consumer_buffer: 128,
		}
	}
}

/// Fee policy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeMode {
	Fixed,
	Percent,
}

/// Which order value a percent fee is measured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeAssetType {
	Amount,
	Price,
	Spending,
	Receiving,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FixedFeeSettings {
	pub asset: String,
	pub min_fee: u64,
}

impl Default for FixedFeeSettings {
	fn default() -> Self {
		Self {
			asset: "NATIVE".to_string(),
			min_fee: 300_000,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PercentFeeSettings {
	pub asset_type: FeeAssetType,
	/// Minimum fee in percent of the order value, e.g. `0.1`.
	pub min_fee: f64,
}

impl Default for PercentFeeSettings {
	fn default() -> Self {
		Self {
			asset_type: FeeAssetType::Spending,
			min_fee: 0.1,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OrderFeeSettings {
	pub mode: FeeMode,
	pub fixed: FixedFeeSettings,
	pub percent: PercentFeeSettings,
}

impl Default for OrderFeeSettings {
	fn default() -> Self {
		Self {
			mode: FeeMode::Fixed,
			fixed: FixedFeeSettings::default(),
			percent: PercentFeeSettings::default(),
		}
	}
}

/// Price and fee deviation policy, in percent of the best bid/ask.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeviationSettings {
	pub enable: bool,
	pub profit: u64,
	pub loss: u64,
	pub fee: u64,
}

impl Default for DeviationSettings {
	fn default() -> Self {
		Self {
			enable: false,
			profit: 1_000_000,
			loss: 1_000_000,
			fee: 1_000_000,
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MatchingRuleSettings {
	pub from_offset: i64,
	pub tick_size: u64,
}

impl From<MatchingRuleSettings> for MatchingRule {
	fn from(s: MatchingRuleSettings) -> Self {
		MatchingRule {
			from_offset: s.from_offset,
			tick_size: s.tick_size,
		}
	}
}

/// Root settings tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
	pub events_queue: EventsQueueSettings,

	/// Events between two snapshots of one pair.
	pub snapshots_interval: u64,
	pub snapshots_path: String,
	/// Startup gate: restoring all snapshots must finish within this, ms.
	pub snapshots_loading_timeout: u64,
	/// Startup gate: catching up with the log end must finish within
	/// this, ms.
	pub start_events_processing_timeout: u64,
	/// Per-batch deadline for a worker acknowledging an event, ms.
	pub process_consumed_timeout: u64,
	/// Per-address request deadline, ms.
	pub actor_response_timeout: u64,
	/// Soft deadline for draining workers at shutdown, ms.
	pub graceful_stop_timeout: u64,

	pub order_fee: OrderFeeSettings,
	pub max_price_deviations: DeviationSettings,

	pub allowed_order_versions: Vec<u8>,
	/// Canonical price-asset ordering overlay, most preferred first.
	pub price_assets: Vec<String>,
	pub blacklisted_assets: Vec<String>,
	pub blacklisted_addresses: Vec<String>,
	/// Asset-name fragments that deny a pair.
	pub blacklisted_names: Vec<String>,
	/// Kill-switch: pairs refusing new orders.
	pub disabled_pairs: Vec<String>,

	pub matcher_public_key: String,
	pub admin_public_key: Option<String>,
	pub allow_admin_cancel: bool,
	pub reject_self_trade: bool,
	/// Accepted client clock skew into the future, ms.
	pub clock_skew_tolerance: u64,
	/// Terminal orders kept per address before FIFO eviction.
	pub address_orders_history_cap: usize,

	/// Tick-size schedules per pair.
	pub matching_rules: HashMap<String, Vec<MatchingRuleSettings>>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			events_queue: EventsQueueSettings::default(),
			snapshots_interval: 1_000,
			snapshots_path: "data/snapshots".to_string(),
			snapshots_loading_timeout: 60_000,
			start_events_processing_timeout: 180_000,
			process_consumed_timeout: 1_000,
			actor_response_timeout: 5_000,
			graceful_stop_timeout: 5 * 60 * 1_000,
			order_fee: OrderFeeSettings::default(),
			max_price_deviations: DeviationSettings::default(),
			allowed_order_versions: vec![1, 2, 3],
			price_assets: Vec::new(),
			blacklisted_assets: Vec::new(),
			blacklisted_addresses: Vec::new(),
			blacklisted_names: Vec::new(),
			disabled_pairs: Vec::new(),
			matcher_public_key: hex::encode([0u8; 32]),
			admin_public_key: None,
			allow_admin_cancel: true,
			reject_self_trade: false,
			clock_skew_tolerance: 60_000,
			address_orders_history_cap: 100,
			matching_rules: HashMap::new(),
		}
	}
}

impl Settings {
	/// Load from environment only.
	pub fn from_env() -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::Environment::with_prefix("CRUCIBLE").separator("__"))
			.build()?;
		cfg.try_deserialize()
	}

	/// Load from a file with environment overrides.
	pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(config::Environment::with_prefix("CRUCIBLE").separator("__"))
			.build()?;
		cfg.try_deserialize()
	}
}

/// Configuration string parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration value `{value}`: {reason}")]
pub struct ParseError {
	pub value: String,
	pub reason: String,
}

fn parse_error(value: &str, reason: &str) -> ParseError {
	ParseError {
		value: value.to_string(),
		reason: reason.to_string(),
	}
}

/// Parse `NATIVE` or a 64-char hex asset id.
pub fn parse_asset(s: &str) -> Result<Asset, ParseError> {
	if s.eq_ignore_ascii_case("NATIVE") {
		return Ok(Asset::Native);
	}
	let bytes = hex::decode(s).map_err(|_| parse_error(s, "not valid hex"))?;
	let id: [u8; 32] = bytes
		.try_into()
		.map_err(|_| parse_error(s, "asset id must be 32 bytes"))?;
	Ok(Asset::Issued(id))
}

/// Parse a 64-char hex public key.
pub fn parse_public_key(s: &str) -> Result<PublicKey, ParseError> {
	let bytes = hex::decode(s).map_err(|_| parse_error(s, "not valid hex"))?;
	let key: [u8; 32] = bytes
		.try_into()
		.map_err(|_| parse_error(s, "public key must be 32 bytes"))?;
	Ok(PublicKey(key))
}

/// Parse `<amount-asset>-<price-asset>`.
pub fn parse_pair(s: &str) -> Result<AssetPair, ParseError> {
	let (amount, price) = s
		.split_once('-')
		.ok_or_else(|| parse_error(s, "expected `<amount>-<price>`"))?;
	let pair = AssetPair::new(parse_asset(amount)?, parse_asset(price)?)
		.map_err(|e| parse_error(s, &e.to_string()))?;
	Ok(pair)
}

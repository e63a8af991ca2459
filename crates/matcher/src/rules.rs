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

//! Matching-rule schedules: which tick size applies at which log offset.
//!
//! Rules are configured per pair and are immutable between restarts. The
//! rule active for an event at offset `k` is the one with the largest
//! `from_offset <= k`.

use std::collections::HashMap;

use crucible_sdk::AssetPair;
use serde::{Deserialize, Serialize};

use crate::queue::Offset;

/// A tick size taking effect at `from_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRule {
	pub from_offset: Offset,
	pub tick_size: u64,
}

impl MatchingRule {
	/// The implicit rule every pair starts with: tick 1 from the origin.
	pub const DEFAULT: MatchingRule = MatchingRule {
		from_offset: 0,
		tick_size: 1,
	};
}

/// The rule schedule of one pair, sorted by `from_offset` ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSchedule {
	rules: Vec<MatchingRule>,
}

impl RuleSchedule {
	pub fn new(mut rules: Vec<MatchingRule>) -> Self {
		rules.retain(|r| r.tick_size > 0);
		rules.sort_by_key(|r| r.from_offset);
		if rules.first().is_none_or(|r| r.from_offset > 0) {
			rules.insert(0, MatchingRule::DEFAULT);
		}
		Self { rules }
	}

	/// The rule active at `offset`: the latest one at-or-before it.
	pub fn active_at(&self, offset: Offset) -> MatchingRule {
		self.rules
			.iter()
			.rev()
			.find(|r| r.from_offset <= offset)
			.copied()
			.unwrap_or(MatchingRule::DEFAULT)
	}
}

impl Default for RuleSchedule {
	fn default() -> Self {
		Self::new(Vec::new())
	}
}

/// Pair-indexed schedules. Pairs without an explicit schedule use the
/// default tick of 1.
#[derive(Debug, Clone, Default)]
pub struct MatchingRules {
	schedules: HashMap<AssetPair, RuleSchedule>,
}

impl MatchingRules {
	pub fn new(schedules: HashMap<AssetPair, RuleSchedule>) -> Self {
		Self { schedules }
	}

	pub fn schedule(&self, pair: &AssetPair) -> RuleSchedule {
		self.schedules.get(pair).cloned().unwrap_or_default()
	}

	pub fn tick_at(&self, pair: &AssetPair, offset: Offset) -> u64 {
		self.schedules
			.get(pair)
			.map(|s| s.active_at(offset))
			.unwrap_or(MatchingRule::DEFAULT)
			.tick_size
	}
}

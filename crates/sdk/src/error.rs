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

//! Public rejection table.
//!
//! Every user-visible refusal carries a stable numeric code so clients can
//! branch without parsing messages. Codes never change once assigned.

use serde::{Deserialize, Serialize};

use crate::types::{Asset, AssetPair, OrderId, PublicKey};

/// Reasons an order or cancel request is refused.
///
/// The `Display` impl renders the human message; [`OrderRejection::code`]
/// yields the stable numeric identifier and [`OrderRejection::params`] the
/// structured parameters, together forming the `(code, message, params)`
/// triple returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum OrderRejection {
	#[error("order signature does not verify against the sender key")]
	InvalidSignature,
	#[error("order is expired or its timestamp is too far in the future")]
	OrderOutdated { timestamp: u64, expiration: u64 },
	#[error("asset pair {pair} is not allowed on this matcher")]
	AssetPairDenied { pair: AssetPair },
	#[error("pair {pair} is reversed; assets must follow the canonical price-asset order")]
	AssetPairReversed { pair: AssetPair },
	#[error("address {address} is blacklisted")]
	AddressBlacklisted { address: PublicKey },
	#[error("order version {version} is not allowed")]
	OrderVersionDenied { version: u8 },
	#[error("fee asset {asset} is not accepted for this pair")]
	UnexpectedFeeAsset { asset: Asset },
	#[error("fee {fee} is less than the required {required}")]
	FeeNotEnough { fee: u64, required: u64 },
	#[error("price {price} is not positive after tick rounding")]
	InvalidPrice { price: u64 },
	#[error("amount {amount} is not positive")]
	InvalidAmount { amount: u64 },
	#[error("price {price} is not aligned to the active tick size {tick}")]
	PriceTickInvalid { price: u64, tick: u64 },
	#[error(
		"price {price} is out of the deviation bounds: it must stay within {low_percent}% and \
		 {high_percent}% of the market price"
	)]
	DeviantOrderPrice {
		price: u64,
		low_percent: u64,
		high_percent: u64,
	},
	#[error("matcher fee {fee} is out of the deviation bounds: at least {required} is required")]
	DeviantOrderMatcherFee { fee: u64, required: u64 },
	#[error("trading on pair {pair} is currently disabled")]
	MarketDisabled { pair: AssetPair },
	#[error("order would match against the sender's own resting order")]
	SelfTrade,
	#[error("asset {asset} is unknown to the settlement layer")]
	AssetNotFound { asset: Asset },
	#[error("the script of asset {asset} denied the order")]
	AssetScriptDenied { asset: Asset },
	#[error("the matcher account script denied the order")]
	MatcherScriptDenied,
	#[error("balance of {asset} is not enough: available {available}, required {required}")]
	BalanceNotEnough {
		asset: Asset,
		available: u128,
		required: u128,
	},
	#[error("order {order_id} has already been placed")]
	DuplicateOrder { order_id: OrderId },
	#[error("order {order_id} was not found")]
	OrderNotFound { order_id: OrderId },
	#[error("order {order_id} is already in a terminal state")]
	OrderFinalized { order_id: OrderId },
	#[error("the matcher is starting and does not accept requests yet")]
	MatcherStarting,
	#[error("the matcher is stopping and no longer accepts requests")]
	MatcherStopping,
}

impl OrderRejection {
	/// Stable numeric identifier of this rejection.
	pub fn code(&self) -> u32 {
		use OrderRejection::*;
		match self {
			InvalidSignature => 9440512,
			OrderOutdated { .. } => 9440515,
			InvalidPrice { .. } => 9440518,
			InvalidAmount { .. } => 9440519,
			PriceTickInvalid { .. } => 9440522,
			AssetPairDenied { .. } => 9440526,
			AssetPairReversed { .. } => 9440554,
			AddressBlacklisted { .. } => 9440530,
			OrderVersionDenied { .. } => 9440534,
			UnexpectedFeeAsset { .. } => 9440538,
			FeeNotEnough { .. } => 9441542,
			DeviantOrderPrice { .. } => 9441295,
			DeviantOrderMatcherFee { .. } => 9441551,
			MarketDisabled { .. } => 9440542,
			SelfTrade => 9440546,
			AssetNotFound { .. } => 11534345,
			AssetScriptDenied { .. } => 11536130,
			MatcherScriptDenied => 11536134,
			BalanceNotEnough { .. } => 3148040,
			DuplicateOrder { .. } => 9440550,
			OrderNotFound { .. } => 9437193,
			OrderFinalized { .. } => 9437197,
			MatcherStarting => 9437185,
			MatcherStopping => 9437189,
		}
	}

	/// Structured message parameters as key/value pairs.
	pub fn params(&self) -> Vec<(&'static str, String)> {
		use OrderRejection::*;
		match self {
			OrderOutdated {
				timestamp,
				expiration,
			} => vec![
				("timestamp", timestamp.to_string()),
				("expiration", expiration.to_string()),
			],
			AssetPairDenied { pair } | AssetPairReversed { pair } | MarketDisabled { pair } => {
				vec![("pair", pair.to_string())]
			}
			AddressBlacklisted { address } => vec![("address", address.to_string())],
			OrderVersionDenied { version } => vec![("version", version.to_string())],
			UnexpectedFeeAsset { asset }
			| AssetNotFound { asset }
			| AssetScriptDenied { asset } => {
				vec![("asset", asset.to_string())]
			}
			FeeNotEnough { fee, required } => vec![
				("fee", fee.to_string()),
				("required", required.to_string()),
			],
			InvalidPrice { price } => vec![("price", price.to_string())],
			InvalidAmount { amount } => vec![("amount", amount.to_string())],
			PriceTickInvalid { price, tick } => {
				vec![("price", price.to_string()), ("tick", tick.to_string())]
			}
			DeviantOrderPrice {
				price,
				low_percent,
				high_percent,
			} => vec![
				("price", price.to_string()),
				("lowPercent", low_percent.to_string()),
				("highPercent", high_percent.to_string()),
			],
			DeviantOrderMatcherFee { fee, required } => vec![
				("fee", fee.to_string()),
				("required", required.to_string()),
			],
			BalanceNotEnough {
				asset,
				available,
				required,
			} => vec![
				("asset", asset.to_string()),
				("available", available.to_string()),
				("required", required.to_string()),
			],
			DuplicateOrder { order_id }
			| OrderNotFound { order_id }
			| OrderFinalized { order_id } => {
				vec![("orderId", order_id.to_string())]
			}
			InvalidSignature
			| SelfTrade
			| MatcherScriptDenied
			| MatcherStarting
			| MatcherStopping => Vec::new(),
		}
	}
}

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

//! Pre-admission order validation.
//!
//! Every order passes the whole table before it may be appended to the
//! log; rejected orders never reach the log. The checks are stateless
//! with respect to the books: market context (best bid/ask, the sender's
//! resting orders and reservations) is passed in by the caller. Node
//! lookups happen here, before the append, never inside the match loop.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crucible_sdk::{
	Asset, AssetPair, MAX_ORDER_LIFETIME_MS, MarketStatus, Order, OrderRejection, PublicKey,
	Side, price_volume,
};

use crate::book::crosses;
use crate::config::{FeeAssetType, FeeMode, ParseError, Settings, parse_asset, parse_pair,
	parse_public_key};
use crate::error::MatcherError;
use crate::node::NodeClient;

/// Signature backend seam. The cryptographic scheme lives with the host;
/// the validator only consumes the verdict.
pub trait SignatureVerifier: Send + Sync {
	fn verify(&self, order: &Order) -> bool;
}

/// Verifier that trusts every signature, for tests and embedded setups
/// where verification happened upstream.
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
	fn verify(&self, _order: &Order) -> bool {
		true
	}
}

/// Fee policy in effect.
#[derive(Debug, Clone)]
pub enum FeePolicy {
	Fixed { asset: Asset, min_fee: u64 },
	Percent { asset_type: FeeAssetType, min_fee: f64 },
}

/// Deviation limits in percent of the best bid/ask.
#[derive(Debug, Clone, Copy)]
pub struct DeviationLimits {
	pub profit: u64,
	pub loss: u64,
	pub fee: u64,
}

/// Parsed validator configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
	pub matcher: PublicKey,
	pub allowed_versions: HashSet<u8>,
	pub blacklisted_assets: HashSet<Asset>,
	pub blacklisted_addresses: HashSet<PublicKey>,
	pub blacklisted_names: Vec<String>,
	pub disabled_pairs: HashSet<AssetPair>,
	/// Canonical price-asset ordering overlay, most preferred first.
	pub price_assets: Vec<Asset>,
	pub fee: FeePolicy,
	pub deviation: Option<DeviationLimits>,
	pub reject_self_trade: bool,
	pub clock_skew_tolerance: u64,
}

impl ValidatorConfig {
	pub fn from_settings(settings: &Settings) -> Result<Self, ParseError> {
		let fee = match settings.order_fee.mode {
			FeeMode::Fixed => FeePolicy::Fixed {
				asset: parse_asset(&settings.order_fee.fixed.asset)?,
				min_fee: settings.order_fee.fixed.min_fee,
			},
			FeeMode::Percent => FeePolicy::Percent {
				asset_type: settings.order_fee.percent.asset_type,
				min_fee: settings.order_fee.percent.min_fee,
			},
		};
		let deviation = settings.max_price_deviations.enable.then(|| DeviationLimits {
			profit: settings.max_price_deviations.profit,
			loss: settings.max_price_deviations.loss,
			fee: settings.max_price_deviations.fee,
		});
		Ok(Self {
			matcher: parse_public_key(&settings.matcher_public_key)?,
			allowed_versions: settings.allowed_order_versions.iter().copied().collect(),
			blacklisted_assets: settings
				.blacklisted_assets
				.iter()
				.map(|s| parse_asset(s))
				.collect::<Result<_, _>>()?,
			blacklisted_addresses: settings
				.blacklisted_addresses
				.iter()
				.map(|s| parse_public_key(s))
				.collect::<Result<_, _>>()?,
			blacklisted_names: settings.blacklisted_names.clone(),
			disabled_pairs: settings
				.disabled_pairs
				.iter()
				.map(|s| parse_pair(s))
				.collect::<Result<_, _>>()?,
			price_assets: settings
				.price_assets
				.iter()
				.map(|s| parse_asset(s))
				.collect::<Result<_, _>>()?,
			fee,
			deviation,
			reject_self_trade: settings.reject_self_trade,
			clock_skew_tolerance: settings.clock_skew_tolerance,
		})
	}
}

/// Caller-supplied context for one validation.
pub struct ValidationContext<'a> {
	pub market: MarketStatus,
	/// Active tick size of the pair at the upcoming offset.
	pub tick: u64,
	/// Wall-clock now, unix milliseconds.
	pub now: u64,
	/// Whether an order with this id is already known to the engine.
	pub order_exists: bool,
	/// The sender's resting orders on this pair as `(side, price)`.
	pub own_orders: &'a [(Side, u64)],
	/// The sender's current per-asset reservations held by the ledger.
	pub reserved: &'a BTreeMap<Asset, u128>,
}

impl Default for ValidationContext<'_> {
	fn default() -> Self {
		static EMPTY_RESERVED: BTreeMap<Asset, u128> = BTreeMap::new();
		ValidationContext {
			market: MarketStatus::default(),
			tick: 1,
			now: 0,
			order_exists: false,
			own_orders: &[],
			reserved: &EMPTY_RESERVED,
		}
	}
}

/// The order validator.
pub struct Validator {
	config: ValidatorConfig,
	node: Arc<dyn NodeClient>,
	verifier: Arc<dyn SignatureVerifier>,
	// per-asset compute-once cache of decimals
	decimals: Mutex<HashMap<Asset, u8>>,
}

impl Validator {
	pub fn new(
		config: ValidatorConfig,
		node: Arc<dyn NodeClient>,
		verifier: Arc<dyn SignatureVerifier>,
	) -> Self {
		Self {
			config,
			node,
			verifier,
			decimals: Mutex::new(HashMap::new()),
		}
	}

	/// Run the full table: the synchronous gate, then the node-backed
	/// checks. Must complete before the order is appended to the log.
	pub fn validate(&self, order: &Order, ctx: &ValidationContext<'_>) -> Result<(), MatcherError> {
		self.validate_sync(order, ctx)?;
		self.validate_with_node(order, ctx)
	}

	/// The synchronous admission gate.
	pub fn validate_sync(
		&self,
		order: &Order,
		ctx: &ValidationContext<'_>,
	) -> Result<(), MatcherError> {
		let cfg = &self.config;

		if !self.verifier.verify(order) {
			return Err(OrderRejection::InvalidSignature.into());
		}

		if ctx.order_exists {
			return Err(OrderRejection::DuplicateOrder {
				order_id: order.id(),
			}
			.into());
		}

		let outdated = order.expiration <= ctx.now
			|| order.timestamp > ctx.now + cfg.clock_skew_tolerance
			|| order.timestamp > order.expiration
			|| order.expiration - order.timestamp > MAX_ORDER_LIFETIME_MS;
		if outdated {
			return Err(OrderRejection::OrderOutdated {
				timestamp: order.timestamp,
				expiration: order.expiration,
			}
			.into());
		}

		if order
			.pair
			.assets()
			.iter()
			.any(|a| cfg.blacklisted_assets.contains(a))
		{
			return Err(OrderRejection::AssetPairDenied { pair: order.pair }.into());
		}

		if !self.pair_correctly_ordered(&order.pair) {
			return Err(OrderRejection::AssetPairReversed { pair: order.pair }.into());
		}

		if cfg.blacklisted_addresses.contains(&order.sender) {
			return Err(OrderRejection::AddressBlacklisted {
				address: order.sender,
			}
			.into());
		}

		if !cfg.allowed_versions.contains(&order.version) {
			return Err(OrderRejection::OrderVersionDenied {
				version: order.version,
			}
			.into());
		}

		if order.amount == 0 {
			return Err(OrderRejection::InvalidAmount {
				amount: order.amount,
			}
			.into());
		}
		if order.price == 0 {
			return Err(OrderRejection::InvalidPrice { price: order.price }.into());
		}

		if !self.expected_fee_assets(order).contains(&order.fee_asset) {
			return Err(OrderRejection::UnexpectedFeeAsset {
				asset: order.fee_asset,
			}
			.into());
		}

		if let FeePolicy::Fixed { min_fee, .. } = cfg.fee
			&& order.fee < min_fee
		{
			return Err(OrderRejection::FeeNotEnough {
				fee: order.fee,
				required: min_fee,
			}
			.into());
		}

		if ctx.tick > 1 && order.price % ctx.tick != 0 {
			return Err(OrderRejection::PriceTickInvalid {
				price: order.price,
				tick: ctx.tick,
			}
			.into());
		}

		if let Some(limits) = cfg.deviation {
			self.check_price_deviation(order, &ctx.market, limits)?;
		}

		if cfg.disabled_pairs.contains(&order.pair) {
			return Err(OrderRejection::MarketDisabled { pair: order.pair }.into());
		}

		if cfg.reject_self_trade {
			let opposite = order.side.opposite();
			let would_self_match = ctx
				.own_orders
				.iter()
				.any(|(side, price)| *side == opposite && crosses(order.price, *price, order.side));
			if would_self_match {
				return Err(OrderRejection::SelfTrade.into());
			}
		}

		Ok(())
	}

	/// Node-backed checks: asset existence and names, scripts, the
	/// percent-mode fee floor and the spendable-balance check.
	pub fn validate_with_node(
		&self,
		order: &Order,
		ctx: &ValidationContext<'_>,
	) -> Result<(), MatcherError> {
		let cfg = &self.config;

		for asset in [
			order.pair.amount_asset,
			order.pair.price_asset,
			order.fee_asset,
		] {
			let Some(description) = self.node.asset_description(&asset)? else {
				return Err(OrderRejection::AssetNotFound { asset }.into());
			};
			self.decimals
				.lock()
				.expect("decimals lock")
				.entry(asset)
				.or_insert(description.decimals);

			let name = description.name.to_lowercase();
			if cfg
				.blacklisted_names
				.iter()
				.any(|fragment| name.contains(&fragment.to_lowercase()))
			{
				return Err(OrderRejection::AssetPairDenied { pair: order.pair }.into());
			}

			if description.has_script && !self.node.asset_script_allows(&asset, order)? {
				return Err(OrderRejection::AssetScriptDenied { asset }.into());
			}
		}

		if self.node.has_account_script(&cfg.matcher)?
			&& !self.node.matcher_script_allows(order)?
		{
			return Err(OrderRejection::MatcherScriptDenied.into());
		}

		if let FeePolicy::Percent {
			asset_type,
			min_fee,
		} = cfg.fee
		{
			let required = self.percent_required_fee(order, asset_type, min_fee)?;
			if order.fee < required {
				return Err(OrderRejection::FeeNotEnough {
					fee: order.fee,
					required,
				}
				.into());
			}

			if let Some(limits) = cfg.deviation {
				self.check_fee_deviation(order, &ctx.market, limits, min_fee)?;
			}
		}

		self.check_balances(order, ctx)
	}

	/// Which price asset wins between two assets: the overlay list first
	/// (earlier index wins), then the canonical byte order (smaller wins).
	fn pair_correctly_ordered(&self, pair: &AssetPair) -> bool {
		let idx = |asset: &Asset| self.config.price_assets.iter().position(|a| a == asset);
		match (idx(&pair.price_asset), idx(&pair.amount_asset)) {
			(Some(p), Some(a)) => p < a,
			(Some(_), None) => true,
			(None, Some(_)) => false,
			(None, None) => pair.price_asset < pair.amount_asset,
		}
	}

	/// Fee assets accepted for this order under the active policy.
	fn expected_fee_assets(&self, order: &Order) -> Vec<Asset> {
		match &self.config.fee {
			FeePolicy::Fixed { asset, .. } => vec![*asset],
			FeePolicy::Percent { asset_type, .. } => {
				vec![percent_value_asset(order, *asset_type)]
			}
		}
	}

	fn check_price_deviation(
		&self,
		order: &Order,
		market: &MarketStatus,
		limits: DeviationLimits,
	) -> Result<(), MatcherError> {
		let (low_factor, high_factor) = match order.side {
			Side::Buy => (100u64.saturating_sub(limits.profit), 100 + limits.loss),
			Side::Sell => (100u64.saturating_sub(limits.loss), 100 + limits.profit),
		};
		let reject = || OrderRejection::DeviantOrderPrice {
			price: order.price,
			low_percent: low_factor,
			high_percent: high_factor,
		};

		if let Some(best_bid) = market.best_bid {
			let lower = best_bid as u128 * low_factor as u128 / 100;
			if (order.price as u128) < lower {
				return Err(reject().into());
			}
		}
		if let Some(best_ask) = market.best_ask {
			let upper = best_ask as u128 * high_factor as u128 / 100;
			if (order.price as u128) > upper {
				return Err(reject().into());
			}
		}
		Ok(())
	}

	fn check_fee_deviation(
		&self,
		order: &Order,
		market: &MarketStatus,
		limits: DeviationLimits,
		min_fee_percent: f64,
	) -> Result<(), MatcherError> {
		let best_ref = match order.side {
			Side::Buy => market.best_ask,
			Side::Sell => market.best_bid,
		};
		let Some(best_ref) = best_ref else {
			return Ok(());
		};

		// fee fraction scaled to millionths: percent * 10^4
		let fee_ppm = (min_fee_percent * 10_000.0).round() as u128;
		let volume = price_volume(order.amount, best_ref);
		let discount = 100u128 - (limits.fee as u128).min(100);
		let required_raw = (volume * fee_ppm * discount).div_ceil(1_000_000 * 100);
		let required = self.convert_units(
			required_raw,
			order.pair.price_asset,
			order.fee_asset,
		)?;

		if (order.fee as u128) < required {
			return Err(OrderRejection::DeviantOrderMatcherFee {
				fee: order.fee,
				required: required.min(u64::MAX as u128) as u64,
			}
			.into());
		}
		Ok(())
	}

	fn percent_required_fee(
		&self,
		order: &Order,
		asset_type: FeeAssetType,
		min_fee_percent: f64,
	) -> Result<u64, MatcherError> {
		let value_asset = percent_value_asset(order, asset_type);
		let value = percent_order_value(order, asset_type);
		let fee_ppm = (min_fee_percent * 10_000.0).round() as u128;
		let raw = (value * fee_ppm).div_ceil(1_000_000);
		let converted = self.convert_units(raw, value_asset, order.fee_asset)?;
		// fractional fees round up to one unit of the fee asset
		Ok(converted.max(1).min(u64::MAX as u128) as u64)
	}

	/// Rescale a value between asset decimal scales, rounding up.
	fn convert_units(
		&self,
		value: u128,
		from: Asset,
		to: Asset,
	) -> Result<u128, MatcherError> {
		if from == to {
			return Ok(value);
		}
		let from_decimals = self.decimals_of(&from)?;
		let to_decimals = self.decimals_of(&to)?;
		if to_decimals >= from_decimals {
			Ok(value * 10u128.pow((to_decimals - from_decimals) as u32))
		} else {
			let scale = 10u128.pow((from_decimals - to_decimals) as u32);
			Ok(value.div_ceil(scale))
		}
	}

	fn decimals_of(&self, asset: &Asset) -> Result<u8, MatcherError> {
		if let Some(decimals) = self.decimals.lock().expect("decimals lock").get(asset) {
			return Ok(*decimals);
		}
		let Some(description) = self.node.asset_description(asset)? else {
			return Err(OrderRejection::AssetNotFound { asset: *asset }.into());
		};
		let mut cache = self.decimals.lock().expect("decimals lock");
		Ok(*cache.entry(*asset).or_insert(description.decimals))
	}

	fn check_balances(
		&self,
		order: &Order,
		ctx: &ValidationContext<'_>,
	) -> Result<(), MatcherError> {
		let mut required: BTreeMap<Asset, u128> = BTreeMap::new();
		*required.entry(order.spend_asset()).or_default() += order.spend_amount();
		*required.entry(order.fee_asset).or_default() += order.fee as u128;

		for (asset, needed) in required {
			let spendable = self.node.spendable_balance(&order.sender, &asset)?;
			let reserved = ctx.reserved.get(&asset).copied().unwrap_or(0);
			let available = spendable.saturating_sub(reserved);
			if available < needed {
				return Err(OrderRejection::BalanceNotEnough {
					asset,
					available,
					required: needed,
				}
				.into());
			}
		}
		Ok(())
	}
}

/// The asset a percent-mode order value is denominated in.
fn percent_value_asset(order: &Order, asset_type: FeeAssetType) -> Asset {
	match asset_type {
		FeeAssetType::Amount => order.pair.amount_asset,
		FeeAssetType::Price => order.pair.price_asset,
		FeeAssetType::Spending => order.spend_asset(),
		FeeAssetType::Receiving => order.receive_asset(),
	}
}

/// The percent-mode order value in `percent_value_asset` units.
fn percent_order_value(order: &Order, asset_type: FeeAssetType) -> u128 {
	let amount_value = order.amount as u128;
	let price_value = price_volume(order.amount, order.price);
	match (asset_type, order.side) {
		(FeeAssetType::Amount, _) => amount_value,
		(FeeAssetType::Price, _) => price_value,
		(FeeAssetType::Spending, Side::Buy) | (FeeAssetType::Receiving, Side::Sell) => price_value,
		(FeeAssetType::Spending, Side::Sell) | (FeeAssetType::Receiving, Side::Buy) => {
			amount_value
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crucible_sdk::{PRICE_SCALE, Signature};

	use crate::node::{AssetDescription, StaticNodeClient};

	const AMOUNT_ASSET: Asset = Asset::Issued([3; 32]);
	const MATCHER: PublicKey = PublicKey([0x4D; 32]);

	fn test_pair() -> AssetPair {
		AssetPair::new(AMOUNT_ASSET, Asset::Native).unwrap()
	}

	fn base_config() -> ValidatorConfig {
		ValidatorConfig {
			matcher: MATCHER,
			allowed_versions: [1, 2, 3].into_iter().collect(),
			blacklisted_assets: HashSet::new(),
			blacklisted_addresses: HashSet::new(),
			blacklisted_names: Vec::new(),
			disabled_pairs: HashSet::new(),
			price_assets: vec![Asset::Native],
			fee: FeePolicy::Fixed {
				asset: Asset::Native,
				min_fee: 300_000,
			},
			deviation: None,
			reject_self_trade: false,
			clock_skew_tolerance: 60_000,
		}
	}

	fn funded_node(owner: PublicKey) -> Arc<StaticNodeClient> {
		let node = StaticNodeClient::new();
		node.put_asset(
			AMOUNT_ASSET,
			AssetDescription {
				name: "token".to_string(),
				decimals: 8,
				has_script: false,
			},
		);
		node.put_balance(owner, Asset::Native, u64::MAX as u128);
		node.put_balance(owner, AMOUNT_ASSET, u64::MAX as u128);
		Arc::new(node)
	}

	fn order(side: Side, price: u64, amount: u64) -> Order {
		Order {
			version: 3,
			sender: PublicKey([1; 32]),
			matcher: MATCHER,
			pair: test_pair(),
			side,
			price,
			amount,
			fee: 300_000,
			fee_asset: Asset::Native,
			timestamp: 10_000,
			expiration: 20_000,
			signature: Signature([1; 64]),
		}
	}

	fn validator(config: ValidatorConfig, node: Arc<StaticNodeClient>) -> Validator {
		Validator::new(config, node, Arc::new(AcceptAllVerifier))
	}

	fn ctx(now: u64) -> ValidationContext<'static> {
		ValidationContext {
			now,
			..ValidationContext::default()
		}
	}

	fn rejection(result: Result<(), MatcherError>) -> OrderRejection {
		match result {
			Err(MatcherError::Rejected(rejection)) => rejection,
			other => panic!("expected rejection, got {other:?}"),
		}
	}

	#[test]
	fn test_valid_order_passes_full_table() {
		// fee asset under the fixed policy is the configured native asset
		let order = order(Side::Buy, 500_000, 1_000);
		let v = validator(base_config(), funded_node(order.sender));
		v.validate(&order, &ctx(15_000)).unwrap();
	}

	#[test]
	fn test_outdated_and_future_orders_rejected() {
		let v = validator(base_config(), funded_node(PublicKey([1; 32])));

		let expired = order(Side::Buy, 500_000, 1_000);
		assert!(matches!(
			rejection(v.validate_sync(&expired, &ctx(20_000))),
			OrderRejection::OrderOutdated { .. }
		));

		let mut from_future = order(Side::Buy, 500_000, 1_000);
		from_future.timestamp = 200_000;
		from_future.expiration = 300_000;
		assert!(matches!(
			rejection(v.validate_sync(&from_future, &ctx(15_000))),
			OrderRejection::OrderOutdated { .. }
		));

		let mut too_long = order(Side::Buy, 500_000, 1_000);
		too_long.expiration = too_long.timestamp + MAX_ORDER_LIFETIME_MS + 1;
		assert!(matches!(
			rejection(v.validate_sync(&too_long, &ctx(15_000))),
			OrderRejection::OrderOutdated { .. }
		));
	}

	#[test]
	fn test_blacklists_and_versions() {
		let mut config = base_config();
		config.blacklisted_assets.insert(AMOUNT_ASSET);
		let v = validator(config, funded_node(PublicKey([1; 32])));
		assert!(matches!(
			rejection(v.validate_sync(&order(Side::Buy, 500_000, 1_000), &ctx(15_000))),
			OrderRejection::AssetPairDenied { .. }
		));

		let mut config = base_config();
		config.blacklisted_addresses.insert(PublicKey([1; 32]));
		let v = validator(config, funded_node(PublicKey([1; 32])));
		assert!(matches!(
			rejection(v.validate_sync(&order(Side::Buy, 500_000, 1_000), &ctx(15_000))),
			OrderRejection::AddressBlacklisted { .. }
		));

		let mut config = base_config();
		config.allowed_versions = [1, 2].into_iter().collect();
		let v = validator(config, funded_node(PublicKey([1; 32])));
		assert!(matches!(
			rejection(v.validate_sync(&order(Side::Buy, 500_000, 1_000), &ctx(15_000))),
			OrderRejection::OrderVersionDenied { version: 3 }
		));
	}

	#[test]
	fn test_reversed_pair_rejected() {
		let v = validator(base_config(), funded_node(PublicKey([1; 32])));
		let mut reversed = order(Side::Buy, 500_000, 1_000);
		reversed.pair = AssetPair {
			amount_asset: Asset::Native,
			price_asset: AMOUNT_ASSET,
		};
		assert!(matches!(
			rejection(v.validate_sync(&reversed, &ctx(15_000))),
			OrderRejection::AssetPairReversed { .. }
		));
	}

	#[test]
	fn test_fixed_fee_floor_and_asset() {
		let v = validator(base_config(), funded_node(PublicKey([1; 32])));

		let mut cheap = order(Side::Buy, 500_000, 1_000);
		cheap.fee = 299_999;
		assert!(matches!(
			rejection(v.validate_sync(&cheap, &ctx(15_000))),
			OrderRejection::FeeNotEnough {
				required: 300_000,
				..
			}
		));

		let mut wrong_asset = order(Side::Buy, 500_000, 1_000);
		wrong_asset.fee_asset = AMOUNT_ASSET;
		assert!(matches!(
			rejection(v.validate_sync(&wrong_asset, &ctx(15_000))),
			OrderRejection::UnexpectedFeeAsset { .. }
		));
	}

	#[test]
	fn test_tick_alignment() {
		let v = validator(base_config(), funded_node(PublicKey([1; 32])));
		let misaligned = order(Side::Buy, 500_050, 1_000);
		let context = ValidationContext {
			now: 15_000,
			tick: 100,
			..ValidationContext::default()
		};
		assert!(matches!(
			rejection(v.validate_sync(&misaligned, &context)),
			OrderRejection::PriceTickInvalid { tick: 100, .. }
		));

		let aligned = order(Side::Buy, 500_000, 1_000);
		v.validate_sync(&aligned, &context).unwrap();
	}

	#[test]
	fn test_buy_price_deviation_scenario() {
		// deviation (profit=70, loss=60), best bid 300000, best ask absent:
		// a buy at 89999 is below 30% of the best bid
		let mut config = base_config();
		config.deviation = Some(DeviationLimits {
			profit: 70,
			loss: 60,
			fee: 40,
		});
		let v = validator(config, funded_node(PublicKey([1; 32])));

		let context = ValidationContext {
			now: 15_000,
			market: MarketStatus {
				best_bid: Some(300_000),
				best_ask: None,
				last_trade: None,
			},
			..ValidationContext::default()
		};

		let too_low = order(Side::Buy, 89_999, 1_000);
		let rejected = rejection(v.validate_sync(&too_low, &context));
		assert_eq!(rejected.code(), 9441295);
		let message = rejected.to_string();
		assert!(message.contains("30%") && message.contains("160%"));

		let at_bound = order(Side::Buy, 90_000, 1_000);
		v.validate_sync(&at_bound, &context).unwrap();
	}

	#[test]
	fn test_fee_deviation_scenario() {
		// fee deviation 40%, percent min-fee 0.1, best ask 600000, amount
		// 1000 whole units: required = 0.001 * 0.6 * 600000 * 1000 = 360000
		let mut config = base_config();
		config.fee = FeePolicy::Percent {
			asset_type: FeeAssetType::Spending,
			min_fee: 0.1,
		};
		config.deviation = Some(DeviationLimits {
			profit: 70,
			loss: 60,
			fee: 40,
		});
		let v = validator(config, funded_node(PublicKey([1; 32])));

		let context = ValidationContext {
			now: 15_000,
			market: MarketStatus {
				best_bid: None,
				best_ask: Some(600_000),
				last_trade: None,
			},
			..ValidationContext::default()
		};

		// the order's own price only drives the plain percent floor
		// (0.001 * 100000 * 1000 = 100000); the deviation floor is taken
		// from the best ask
		let amount = 1_000 * PRICE_SCALE;
		let mut low_fee = order(Side::Buy, 100_000, amount);
		low_fee.fee = 359_999;
		// buy spends the price asset, so the percent fee is quoted in it
		low_fee.fee_asset = Asset::Native;

		let rejected = rejection(v.validate(&low_fee, &context));
		assert_eq!(rejected.code(), 9441551);
		assert!(matches!(
			rejected,
			OrderRejection::DeviantOrderMatcherFee {
				required: 360_000,
				..
			}
		));

		let mut enough = low_fee.clone();
		enough.fee = 360_000;
		v.validate(&enough, &context).unwrap();
	}

	#[test]
	fn test_market_kill_switch() {
		let mut config = base_config();
		config.disabled_pairs.insert(test_pair());
		let v = validator(config, funded_node(PublicKey([1; 32])));
		assert!(matches!(
			rejection(v.validate_sync(&order(Side::Buy, 500_000, 1_000), &ctx(15_000))),
			OrderRejection::MarketDisabled { .. }
		));
	}

	#[test]
	fn test_self_trade_rejected_when_configured() {
		let mut config = base_config();
		config.reject_self_trade = true;
		let v = validator(config, funded_node(PublicKey([1; 32])));

		let own_orders = [(Side::Sell, 400_000u64)];
		let context = ValidationContext {
			now: 15_000,
			own_orders: &own_orders,
			..ValidationContext::default()
		};
		assert!(matches!(
			rejection(v.validate_sync(&order(Side::Buy, 500_000, 1_000), &context)),
			OrderRejection::SelfTrade
		));

		// non-crossing own order is fine
		let own_orders = [(Side::Sell, 600_000u64)];
		let context = ValidationContext {
			now: 15_000,
			own_orders: &own_orders,
			..ValidationContext::default()
		};
		v.validate_sync(&order(Side::Buy, 500_000, 1_000), &context)
			.unwrap();
	}

	#[test]
	fn test_unknown_asset_and_scripts() {
		let node = StaticNodeClient::new();
		let sender = PublicKey([1; 32]);
		node.put_balance(sender, Asset::Native, u64::MAX as u128);
		let v = validator(base_config(), Arc::new(node));
		assert!(matches!(
			rejection(v.validate(&order(Side::Buy, 500_000, 1_000), &ctx(15_000))),
			OrderRejection::AssetNotFound { .. }
		));

		let node = funded_node(sender);
		node.put_asset(
			AMOUNT_ASSET,
			AssetDescription {
				name: "token".to_string(),
				decimals: 8,
				has_script: true,
			},
		);
		node.deny_asset_script(AMOUNT_ASSET);
		let v = validator(base_config(), node);
		let rejected = rejection(v.validate(&order(Side::Buy, 500_000, 1_000), &ctx(15_000)));
		assert_eq!(rejected.code(), 11536130);
	}

	#[test]
	fn test_balance_check_accounts_for_reservations() {
		let sender = PublicKey([1; 32]);
		let node = StaticNodeClient::new();
		node.put_asset(
			AMOUNT_ASSET,
			AssetDescription {
				name: "token".to_string(),
				decimals: 8,
				has_script: false,
			},
		);
		// buy of 1000 units at price 500000 spends 50 native plus the fee
		node.put_balance(sender, Asset::Native, 300_050);
		let v = validator(base_config(), Arc::new(node));

		let affordable = order(Side::Buy, 500_000, 1_000);
		v.validate(&affordable, &ctx(15_000)).unwrap();

		let mut reserved = BTreeMap::new();
		reserved.insert(Asset::Native, 1u128);
		let context = ValidationContext {
			now: 15_000,
			reserved: &reserved,
			..ValidationContext::default()
		};
		assert!(matches!(
			rejection(v.validate(&affordable, &context)),
			OrderRejection::BalanceNotEnough { .. }
		));
	}
}

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

use std::fmt;

use serde::{Deserialize, Serialize};

/// Fixed-point scale used for prices.
///
/// A price quotes price-asset units per whole amount-asset unit, scaled by
/// this constant. The price-asset volume of an execution is
/// `amount * price / PRICE_SCALE`.
pub const PRICE_SCALE: u64 = 100_000_000;

/// Maximum distance between an order's timestamp and its expiration.
pub const MAX_ORDER_LIFETIME_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Price-asset volume of `amount` at `price`, rounded down.
pub fn price_volume(amount: u64, price: u64) -> u128 {
	amount as u128 * price as u128 / PRICE_SCALE as u128
}

/// Price-asset volume of `amount` at `price`, rounded up.
///
/// Used for reservations so the locked amount always covers the trade.
pub fn price_volume_ceil(amount: u64, price: u64) -> u128 {
	let scale = PRICE_SCALE as u128;
	(amount as u128 * price as u128 + scale - 1) / scale
}

/// A tradable asset: the chain's native asset or an issued one identified
/// by the 32-byte hash of its issue transaction.
///
/// The derived ordering is the canonical one: native sorts before every
/// issued asset, issued assets sort by unsigned lexicographic byte
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
	Native,
	Issued([u8; 32]),
}

impl Asset {
	pub fn is_native(&self) -> bool {
		matches!(self, Asset::Native)
	}
}

impl fmt::Display for Asset {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Asset::Native => write!(f, "NATIVE"),
			Asset::Issued(id) => write!(f, "{}", hex::encode(id)),
		}
	}
}

/// An ordered asset pair identifying one order book.
///
/// `amount_asset` is the asset being bought or sold; `price_asset` is the
/// asset prices are quoted in. The two must differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetPair {
	pub amount_asset: Asset,
	pub price_asset: Asset,
}

impl AssetPair {
	pub fn new(amount_asset: Asset, price_asset: Asset) -> Result<Self, InvalidPair> {
		if amount_asset == price_asset {
			return Err(InvalidPair);
		}
		Ok(Self {
			amount_asset,
			price_asset,
		})
	}

	pub fn assets(&self) -> [Asset; 2] {
		[self.amount_asset, self.price_asset]
	}

	pub fn contains(&self, asset: &Asset) -> bool {
		self.amount_asset == *asset || self.price_asset == *asset
	}
}

impl fmt::Display for AssetPair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}-{}", self.amount_asset, self.price_asset)
	}
}

/// Error for a pair whose two assets coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("asset pair must contain two distinct assets")]
pub struct InvalidPair;

/// A 32-byte account public key. Traders are identified by their key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl fmt::Debug for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "PublicKey({})", hex::encode(self.0))
	}
}

impl fmt::Display for PublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

/// A 64-byte order signature. Verification is performed by the host's
/// signature backend; the engine treats it as opaque bytes.
#[derive(Clone, Copy, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "serde_bytes_64")] pub [u8; 64]);

impl PartialEq for Signature {
	fn eq(&self, other: &Self) -> bool {
		self.0[..] == other.0[..]
	}
}

impl Eq for Signature {}

impl fmt::Debug for Signature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
	}
}

// [u8; 64] has no serde impls; encode as a byte sequence.
mod serde_bytes_64 {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8; 64], ser: S) -> Result<S::Ok, S::Error> {
		bytes[..].serialize(ser)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 64], D::Error> {
		let v = Vec::<u8>::deserialize(de)?;
		v.try_into()
			.map_err(|_| serde::de::Error::custom("expected 64 bytes"))
	}
}

/// The blake2b-256 hash of an order's signing bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub [u8; 32]);

impl fmt::Debug for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "OrderId({})", hex::encode(self.0))
	}
}

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
	Buy,
	Sell,
}

impl Side {
	pub fn opposite(&self) -> Side {
		match self {
			Side::Buy => Side::Sell,
			Side::Sell => Side::Buy,
		}
	}
}

/// A signed limit order as submitted by a client.
///
/// The record is immutable; its identity is derived from the signing bytes
/// (see [`Order::id`]). Execution state lives in the book, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Binary format version, 1 through 3. Versions 1 and 2 always pay the
	/// fee in the native asset; version 3 carries an explicit fee asset.
	pub version: u8,
	/// The order owner's public key.
	pub sender: PublicKey,
	/// The matcher this order is addressed to.
	pub matcher: PublicKey,
	pub pair: AssetPair,
	pub side: Side,
	/// Price in price-asset units per whole amount-asset unit, scaled by
	/// [`PRICE_SCALE`].
	pub price: u64,
	/// Amount in amount-asset units. Positive.
	pub amount: u64,
	/// Matcher fee in `fee_asset` units. Positive.
	pub fee: u64,
	pub fee_asset: Asset,
	/// Client-side creation time, unix milliseconds.
	pub timestamp: u64,
	/// Expiration time, unix milliseconds. `timestamp <= expiration`.
	pub expiration: u64,
	pub signature: Signature,
}

impl Order {
	/// The asset this order spends when it executes.
	pub fn spend_asset(&self) -> Asset {
		match self.side {
			Side::Buy => self.pair.price_asset,
			Side::Sell => self.pair.amount_asset,
		}
	}

	/// The asset this order receives when it executes.
	pub fn receive_asset(&self) -> Asset {
		match self.side {
			Side::Buy => self.pair.amount_asset,
			Side::Sell => self.pair.price_asset,
		}
	}

	/// The amount of `spend_asset` locked by this order at its limit price.
	pub fn spend_amount(&self) -> u128 {
		match self.side {
			Side::Buy => price_volume_ceil(self.amount, self.price),
			Side::Sell => self.amount as u128,
		}
	}
}

/// Lifecycle status of an order as seen by the ledger.
///
/// Transitions are monotonic: `Accepted -> PartiallyFilled -> Filled` or
/// `-> Cancelled`; `NotFound` never follows any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status")]
pub enum OrderStatus {
	Accepted,
	PartiallyFilled { filled_amount: u64, filled_fee: u64 },
	Filled { filled_amount: u64, filled_fee: u64 },
	Cancelled { filled_amount: u64, filled_fee: u64 },
	NotFound,
}

impl OrderStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Filled { .. } | OrderStatus::Cancelled { .. }
		)
	}

	pub fn filled_amount(&self) -> u64 {
		match self {
			OrderStatus::Accepted | OrderStatus::NotFound => 0,
			OrderStatus::PartiallyFilled { filled_amount, .. }
			| OrderStatus::Filled { filled_amount, .. }
			| OrderStatus::Cancelled { filled_amount, .. } => *filled_amount,
		}
	}
}

/// The last trade printed on a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastTrade {
	pub price: u64,
	pub amount: u64,
	/// Side of the incoming (aggressing) order.
	pub side: Side,
}

/// Public top-of-book view of a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
	pub last_trade: Option<LastTrade>,
	pub best_bid: Option<u64>,
	pub best_ask: Option<u64>,
}

/// A settlement instruction produced by one match.
///
/// Downstream consumers deduplicate on `(order_id, counter_id, offset)`;
/// the engine emits each instruction once per successful application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeTrade {
	pub pair: AssetPair,
	/// The incoming (aggressing) order.
	pub order_id: OrderId,
	/// The resting counter-order that set the price.
	pub counter_id: OrderId,
	pub amount: u64,
	pub price: u64,
	/// Pro-rata fee charged to the incoming order for this execution.
	pub order_fee: u64,
	/// Pro-rata fee charged to the counter-order for this execution.
	pub counter_fee: u64,
	/// Log-local timestamp of the event that produced this trade.
	pub timestamp: u64,
	/// Log offset of the event that produced this trade.
	pub offset: u64,
}

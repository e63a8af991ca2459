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

//! Price-time priority order book for one pair.
//!
//! The owning worker is the only mutator, so the book itself carries no
//! locks. Bids iterate highest price first,
//! asks lowest price first; within a level orders are FIFO by insertion.
//! A resting order never loses its queue position from a partial fill.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crucible_sdk::{LastTrade, MarketStatus, Order, OrderId, Side};

/// Round `price` to the tick for the given side: buys round down, sells
/// round up. Returns `None` when the rounded price is not positive.
pub fn quantize(price: u64, tick: u64, side: Side) -> Option<u64> {
	let tick = tick.max(1);
	let rounded = match side {
		Side::Buy => price / tick * tick,
		Side::Sell => price.div_ceil(tick) * tick,
	};
	(rounded > 0).then_some(rounded)
}

/// Whether an incoming order at `incoming_price` crosses the opposite top.
pub fn crosses(incoming_price: u64, top_price: u64, side: Side) -> bool {
	match side {
		Side::Buy => incoming_price >= top_price,
		Side::Sell => incoming_price <= top_price,
	}
}

/// Pro-rata fee for an execution of `exec_amount` out of `total_amount`,
/// rounded up. Callers cap the result at the order's remaining fee.
pub fn prorated_fee(fee: u64, exec_amount: u64, total_amount: u64) -> u64 {
	if total_amount == 0 {
		return 0;
	}
	let num = fee as u128 * exec_amount as u128;
	num.div_ceil(total_amount as u128) as u64
}

/// A resting order: the immutable signed order plus its execution state.
///
/// `price` is the tick-quantized price the order rests at, which may
/// differ from the signed `order.price`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitOrder {
	pub id: OrderId,
	pub price: u64,
	pub remaining_amount: u64,
	pub remaining_fee: u64,
	pub order: Order,
}

impl LimitOrder {
	pub fn new(order: Order, price: u64) -> Self {
		Self {
			id: order.id(),
			price,
			remaining_amount: order.amount,
			remaining_fee: order.fee,
			order,
		}
	}

	/// Restore a partially executed entry, e.g. from a snapshot.
	pub fn restored(order: Order, price: u64, remaining_amount: u64, remaining_fee: u64) -> Self {
		Self {
			id: order.id(),
			price,
			remaining_amount,
			remaining_fee,
			order,
		}
	}

	pub fn filled_amount(&self) -> u64 {
		self.order.amount - self.remaining_amount
	}

	pub fn filled_fee(&self) -> u64 {
		self.order.fee - self.remaining_fee
	}

	fn fill(&mut self, amount: u64, fee: u64) {
		self.remaining_amount -= amount;
		self.remaining_fee -= fee;
	}
}

/// One execution between an incoming order and the resting counter-order.
///
/// The counter-order sets the price. `counter` is the state of the resting
/// entry after this execution.
#[derive(Debug, Clone)]
pub struct Execution {
	pub amount: u64,
	pub price: u64,
	/// Pro-rata fee consumed from the incoming order.
	pub order_fee: u64,
	/// Pro-rata fee consumed from the counter-order.
	pub counter_fee: u64,
	pub counter: LimitOrder,
}

/// Outcome of applying one incoming order.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
	pub executions: Vec<Execution>,
	/// The incoming order's entry as it came to rest, `None` if it was
	/// fully filled.
	pub resting: Option<LimitOrder>,
}

/// The per-pair book: two price-ordered sides plus an id index for
/// cancellation.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
	bids: BTreeMap<Reverse<u64>, VecDeque<LimitOrder>>,
	asks: BTreeMap<u64, VecDeque<LimitOrder>>,
	index: HashMap<OrderId, (Side, u64)>,
	last_trade: Option<LastTrade>,
}

impl OrderBook {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn best_bid(&self) -> Option<u64> {
		self.bids.first_key_value().map(|(Reverse(p), _)| *p)
	}

	pub fn best_ask(&self) -> Option<u64> {
		self.asks.first_key_value().map(|(p, _)| *p)
	}

	pub fn last_trade(&self) -> Option<LastTrade> {
		self.last_trade
	}

	pub fn market_status(&self) -> MarketStatus {
		MarketStatus {
			last_trade: self.last_trade,
			best_bid: self.best_bid(),
			best_ask: self.best_ask(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.bids.is_empty() && self.asks.is_empty()
	}

	pub fn order_count(&self) -> usize {
		self.index.len()
	}

	pub fn contains(&self, order_id: &OrderId) -> bool {
		self.index.contains_key(order_id)
	}

	/// Look up a resting entry by id.
	pub fn get(&self, order_id: &OrderId) -> Option<&LimitOrder> {
		let (side, price) = self.index.get(order_id)?;
		let level = match side {
			Side::Buy => self.bids.get(&Reverse(*price))?,
			Side::Sell => self.asks.get(price)?,
		};
		level.iter().find(|e| e.id == *order_id)
	}

	/// Owner key of the top order on the given side, used for the optional
	/// self-trade pre-check.
	pub fn top_owner(&self, side: Side) -> Option<&crucible_sdk::PublicKey> {
		let level = match side {
			Side::Buy => self.bids.first_key_value().map(|(_, l)| l),
			Side::Sell => self.asks.first_key_value().map(|(_, l)| l),
		};
		level.and_then(|l| l.front()).map(|e| &e.order.sender)
	}

	/// Apply an incoming order: match it against the opposite side while it
	/// crosses, then rest any remainder at its quantized price level.
	pub fn execute(&mut self, order: Order, quantized_price: u64) -> MatchOutcome {
		let side = order.side;
		let mut incoming = LimitOrder::new(order, quantized_price);
		let mut executions = Vec::new();

		while incoming.remaining_amount > 0 {
			let Some(top_price) = self.best_price(side.opposite()) else {
				break;
			};
			if !crosses(incoming.price, top_price, side) {
				break;
			}

			let mut counter = self
				.pop_level_head(side.opposite(), top_price)
				.expect("non-empty top level");

			let exec_amount = incoming.remaining_amount.min(counter.remaining_amount);
			let exec_price = counter.price;
			let order_fee = prorated_fee(incoming.order.fee, exec_amount, incoming.order.amount)
				.min(incoming.remaining_fee);
			let counter_fee = prorated_fee(counter.order.fee, exec_amount, counter.order.amount)
				.min(counter.remaining_fee);

			incoming.fill(exec_amount, order_fee);
			counter.fill(exec_amount, counter_fee);

			if counter.remaining_amount > 0 {
				// partial fill keeps head-of-level priority
				self.push_level_head(counter.clone());
			} else {
				self.index.remove(&counter.id);
			}

			self.last_trade = Some(LastTrade {
				price: exec_price,
				amount: exec_amount,
				side,
			});

			executions.push(Execution {
				amount: exec_amount,
				price: exec_price,
				order_fee,
				counter_fee,
				counter,
			});
		}

		let resting = if incoming.remaining_amount > 0 {
			self.insert(incoming.clone());
			Some(incoming)
		} else {
			None
		};

		MatchOutcome {
			executions,
			resting,
		}
	}

	/// Insert a resting entry at the tail of its price level.
	pub fn insert(&mut self, entry: LimitOrder) {
		self.index
			.insert(entry.id, (entry.order.side, entry.price));
		match entry.order.side {
			Side::Buy => self
				.bids
				.entry(Reverse(entry.price))
				.or_default()
				.push_back(entry),
			Side::Sell => self.asks.entry(entry.price).or_default().push_back(entry),
		}
	}

	/// Remove an order by id. Returns `None` when the id is not resting.
	pub fn cancel(&mut self, order_id: &OrderId) -> Option<LimitOrder> {
		let (side, price) = self.index.remove(order_id)?;
		let entry = match side {
			Side::Buy => {
				let level = self.bids.get_mut(&Reverse(price))?;
				let pos = level.iter().position(|e| e.id == *order_id)?;
				let entry = level.remove(pos);
				if level.is_empty() {
					self.bids.remove(&Reverse(price));
				}
				entry
			}
			Side::Sell => {
				let level = self.asks.get_mut(&price)?;
				let pos = level.iter().position(|e| e.id == *order_id)?;
				let entry = level.remove(pos);
				if level.is_empty() {
					self.asks.remove(&price);
				}
				entry
			}
		};
		entry
	}

	/// Remove and return every resting order, best levels first.
	pub fn drain_all(&mut self) -> Vec<LimitOrder> {
		let mut drained = Vec::with_capacity(self.index.len());
		for (_, level) in std::mem::take(&mut self.bids) {
			drained.extend(level);
		}
		for (_, level) in std::mem::take(&mut self.asks) {
			drained.extend(level);
		}
		self.index.clear();
		drained
	}

	/// Remove and return every resting order expired at `timestamp`.
	pub fn drain_expired(&mut self, timestamp: u64) -> Vec<LimitOrder> {
		let expired: Vec<OrderId> = self
			.iter_entries()
			.filter(|e| e.order.expiration <= timestamp)
			.map(|e| e.id)
			.collect();
		expired
			.iter()
			.filter_map(|id| self.cancel(id))
			.collect()
	}

	/// All resting entries, bids (best first) then asks (best first).
	pub fn iter_entries(&self) -> impl Iterator<Item = &LimitOrder> {
		self.bids
			.values()
			.flatten()
			.chain(self.asks.values().flatten())
	}

	/// Price levels of one side in matching order, for snapshots.
	pub fn levels(&self, side: Side) -> Vec<(u64, Vec<LimitOrder>)> {
		match side {
			Side::Buy => self
				.bids
				.iter()
				.map(|(Reverse(p), level)| (*p, level.iter().cloned().collect()))
				.collect(),
			Side::Sell => self
				.asks
				.iter()
				.map(|(p, level)| (*p, level.iter().cloned().collect()))
				.collect(),
		}
	}

	/// Rebuild a book from snapshot levels. The id index is regenerated by
	/// scanning the levels in order.
	pub fn restore(
		bids: Vec<(u64, Vec<LimitOrder>)>,
		asks: Vec<(u64, Vec<LimitOrder>)>,
		last_trade: Option<LastTrade>,
	) -> Self {
		let mut book = OrderBook {
			last_trade,
			..OrderBook::default()
		};
		for (price, level) in bids {
			for mut entry in level {
				entry.price = price;
				book.insert(entry);
			}
		}
		for (price, level) in asks {
			for mut entry in level {
				entry.price = price;
				book.insert(entry);
			}
		}
		book
	}

	fn best_price(&self, side: Side) -> Option<u64> {
		match side {
			Side::Buy => self.best_bid(),
			Side::Sell => self.best_ask(),
		}
	}

	fn pop_level_head(&mut self, side: Side, price: u64) -> Option<LimitOrder> {
		match side {
			Side::Buy => {
				let level = self.bids.get_mut(&Reverse(price))?;
				let entry = level.pop_front();
				if level.is_empty() {
					self.bids.remove(&Reverse(price));
				}
				entry
			}
			Side::Sell => {
				let level = self.asks.get_mut(&price)?;
				let entry = level.pop_front();
				if level.is_empty() {
					self.asks.remove(&price);
				}
				entry
			}
		}
	}

	fn push_level_head(&mut self, entry: LimitOrder) {
		match entry.order.side {
			Side::Buy => self
				.bids
				.entry(Reverse(entry.price))
				.or_default()
				.push_front(entry),
			Side::Sell => self
				.asks
				.entry(entry.price)
				.or_default()
				.push_front(entry),
		}
	}
}

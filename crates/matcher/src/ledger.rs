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

//! Per-trader accounting: reserved balances, active orders, statuses.
//!
//! The ledger is a projection of worker outputs plus external balance
//! notifications; it never mutates a book. Buy orders reserve the
//! price-asset volume at their limit price plus the fee, sells reserve
//! the amount plus the fee; executions consume at the execution price and
//! terminal status releases whatever remains. Application is at-most-once
//! per `(order, offset)`.
//!
//! When an external balance drop leaves an address over-reserved, the
//! ledger auto-cancels that address's youngest orders on the asset until
//! the reservation fits. Cancels are enqueued through an injected callback
//! into the event log, so they travel the normal ordered path; the ledger
//! itself holds no reference to workers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use crucible_sdk::{
	Asset, AssetPair, Order, OrderId, OrderStatus, PublicKey, Side, price_volume,
	price_volume_ceil,
};
use tracing::{debug, info};

use crate::book::LimitOrder;
use crate::queue::Offset;

/// Why an order left the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
	/// Explicit cancel by the owner or the administrator.
	Requested,
	/// The order expired.
	Expired,
	/// The whole book was deleted.
	BookDeleted,
	/// Auto-cancel after an external balance drop.
	InsufficientBalance,
}

/// Order lifecycle events emitted by workers, applied by the ledger.
#[derive(Debug, Clone)]
pub enum LedgerEvent {
	OrderAdded {
		offset: Offset,
		order: Order,
	},
	OrderExecuted {
		offset: Offset,
		order_id: OrderId,
		owner: PublicKey,
		exec_amount: u64,
		exec_price: u64,
		exec_fee: u64,
	},
	OrderCanceled {
		offset: Offset,
		order_id: OrderId,
		owner: PublicKey,
		reason: CancelReason,
	},
}

/// An auto-cancel to be appended to the event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelRequest {
	pub pair: AssetPair,
	pub order_id: OrderId,
	pub owner: PublicKey,
}

type AutoCancelFn = Box<dyn Fn(CancelRequest) + Send>;

#[derive(Debug)]
struct ActiveOrder {
	order: Order,
	remaining_amount: u64,
	remaining_fee: u64,
	/// Outstanding reservation of this order per asset.
	reserved: BTreeMap<Asset, u128>,
	last_offset: Offset,
	cancel_requested: bool,
}

impl ActiveOrder {
	fn reservation_for(order: &Order, remaining_amount: u64, remaining_fee: u64) -> BTreeMap<Asset, u128> {
		let spend = match order.side {
			Side::Buy => price_volume_ceil(remaining_amount, order.price),
			Side::Sell => remaining_amount as u128,
		};
		let mut reserved = BTreeMap::new();
		*reserved.entry(order.spend_asset()).or_default() += spend;
		*reserved.entry(order.fee_asset).or_default() += remaining_fee as u128;
		reserved.retain(|_, v| *v > 0);
		reserved
	}

	fn status(&self) -> OrderStatus {
		if self.remaining_amount == self.order.amount {
			OrderStatus::Accepted
		} else {
			OrderStatus::PartiallyFilled {
				filled_amount: self.order.amount - self.remaining_amount,
				filled_fee: self.order.fee - self.remaining_fee,
			}
		}
	}
}

#[derive(Debug, Default)]
struct AddressState {
	reserved: BTreeMap<Asset, u128>,
	active: HashMap<OrderId, ActiveOrder>,
	/// Terminal order ids, oldest first, bounded by the history cap.
	history: VecDeque<OrderId>,
}

#[derive(Default)]
struct LedgerState {
	addresses: HashMap<PublicKey, AddressState>,
	/// Global status view, also the duplicate-id check.
	statuses: HashMap<OrderId, (PublicKey, OrderStatus)>,
}

/// The address ledger. One mutex guards the whole projection; per-address
/// application is effectively single-threaded and the lock is uncontended
/// in the common case (a single dispatcher thread applies events).
pub struct AddressLedger {
	state: Mutex<LedgerState>,
	history_cap: usize,
	on_auto_cancel: Mutex<Option<AutoCancelFn>>,
}

impl AddressLedger {
	pub fn new(history_cap: usize) -> Self {
		Self {
			state: Mutex::new(LedgerState::default()),
			history_cap: history_cap.max(1),
			on_auto_cancel: Mutex::new(None),
		}
	}

	/// Install the auto-cancel sink. Called once the log exists; the
	/// callback appends a `Canceled` event and must not call back into
	/// the ledger.
	pub fn set_auto_cancel(&self, f: impl Fn(CancelRequest) + Send + 'static) {
		*self.on_auto_cancel.lock().expect("ledger lock") = Some(Box::new(f));
	}

	/// Whether an order id is already known, active or terminal.
	pub fn order_exists(&self, order_id: &OrderId) -> bool {
		self.state
			.lock()
			.expect("ledger lock")
			.statuses
			.contains_key(order_id)
	}

	pub fn status(&self, order_id: &OrderId) -> OrderStatus {
		self.state
			.lock()
			.expect("ledger lock")
			.statuses
			.get(order_id)
			.map(|(_, status)| *status)
			.unwrap_or(OrderStatus::NotFound)
	}

	/// Current per-asset reservations of one address.
	pub fn reserved(&self, address: &PublicKey) -> BTreeMap<Asset, u128> {
		self.state
			.lock()
			.expect("ledger lock")
			.addresses
			.get(address)
			.map(|s| s.reserved.clone())
			.unwrap_or_default()
	}

	/// The address's resting orders on a pair as `(side, price)`, the view
	/// the validator's self-trade check consumes.
	pub fn own_orders(&self, address: &PublicKey, pair: &AssetPair) -> Vec<(Side, u64)> {
		self.state
			.lock()
			.expect("ledger lock")
			.addresses
			.get(address)
			.map(|s| {
				s.active
					.values()
					.filter(|a| a.order.pair == *pair)
					.map(|a| (a.order.side, a.order.price))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Seed an entry from a restored book snapshot.
	pub fn restore_entry(&self, entry: &LimitOrder, offset: Offset) {
		let mut state = self.state.lock().expect("ledger lock");
		let state = &mut *state;
		if state.statuses.contains_key(&entry.id) {
			return;
		}
		let owner = entry.order.sender;
		let reserved =
			ActiveOrder::reservation_for(&entry.order, entry.remaining_amount, entry.remaining_fee);
		let address = state.addresses.entry(owner).or_default();
		for (asset, amount) in &reserved {
			*address.reserved.entry(*asset).or_default() += amount;
		}
		let active = ActiveOrder {
			order: entry.order.clone(),
			remaining_amount: entry.remaining_amount,
			remaining_fee: entry.remaining_fee,
			reserved,
			last_offset: offset,
			cancel_requested: false,
		};
		let status = active.status();
		address.active.insert(entry.id, active);
		state.statuses.insert(entry.id, (owner, status));
	}

	/// Apply one worker-emitted event.
	pub fn apply(&self, event: &LedgerEvent) {
		let mut state = self.state.lock().expect("ledger lock");
		let state = &mut *state;
		match event {
			LedgerEvent::OrderAdded { offset, order } => {
				let order_id = order.id();
				if state.statuses.contains_key(&order_id) {
					return;
				}
				let owner = order.sender;
				let reserved = ActiveOrder::reservation_for(order, order.amount, order.fee);
				let address = state.addresses.entry(owner).or_default();
				for (asset, amount) in &reserved {
					*address.reserved.entry(*asset).or_default() += amount;
				}
				address.active.insert(
					order_id,
					ActiveOrder {
						order: order.clone(),
						remaining_amount: order.amount,
						remaining_fee: order.fee,
						reserved,
						last_offset: *offset,
						cancel_requested: false,
					},
				);
				state.statuses.insert(order_id, (owner, OrderStatus::Accepted));
			}
			LedgerEvent::OrderExecuted {
				offset,
				order_id,
				owner,
				exec_amount,
				exec_price,
				exec_fee,
			} => {
				let terminal_status = {
					let Some(address) = state.addresses.get_mut(owner) else {
						return;
					};
					let Some(active) = address.active.get_mut(order_id) else {
						return;
					};
					if *offset <= active.last_offset {
						// redelivery of an already applied event
						return;
					}
					active.last_offset = *offset;

					let spend_asset = active.order.spend_asset();
					let consumed_spend = match active.order.side {
						Side::Buy => price_volume(*exec_amount, *exec_price),
						Side::Sell => *exec_amount as u128,
					};
					release(
						&mut address.reserved,
						&mut active.reserved,
						spend_asset,
						consumed_spend,
					);
					let fee_asset = active.order.fee_asset;
					release(
						&mut address.reserved,
						&mut active.reserved,
						fee_asset,
						*exec_fee as u128,
					);

					active.remaining_amount =
						active.remaining_amount.saturating_sub(*exec_amount);
					active.remaining_fee = active.remaining_fee.saturating_sub(*exec_fee);

					if active.remaining_amount == 0 {
						Some(OrderStatus::Filled {
							filled_amount: active.order.amount,
							filled_fee: active.order.fee - active.remaining_fee,
						})
					} else {
						let status = active.status();
						state.statuses.insert(*order_id, (*owner, status));
						None
					}
				};
				if let Some(status) = terminal_status {
					Self::finalize(state, self.history_cap, *owner, *order_id, status);
				}
			}
			LedgerEvent::OrderCanceled {
				offset,
				order_id,
				owner,
				reason,
			} => {
				let status = {
					let Some(address) = state.addresses.get_mut(owner) else {
						return;
					};
					let Some(active) = address.active.get_mut(order_id) else {
						return;
					};
					if *offset <= active.last_offset {
						return;
					}
					debug!(
						target: "ledger",
						order_id = %order_id,
						reason = ?reason,
						"Order cancelled"
					);
					OrderStatus::Cancelled {
						filled_amount: active.order.amount - active.remaining_amount,
						filled_fee: active.order.fee - active.remaining_fee,
					}
				};
				Self::finalize(state, self.history_cap, *owner, *order_id, status);
			}
		}
	}

	/// Move an order to terminal history, releasing leftover reservations
	/// and evicting the oldest terminal record past the cap.
	fn finalize(
		state: &mut LedgerState,
		history_cap: usize,
		owner: PublicKey,
		order_id: OrderId,
		status: OrderStatus,
	) {
		let Some(address) = state.addresses.get_mut(&owner) else {
			return;
		};
		let Some(active) = address.active.remove(&order_id) else {
			return;
		};
		for (asset, leftover) in active.reserved {
			let held = address.reserved.entry(asset).or_default();
			*held = held.saturating_sub(leftover);
			if *held == 0 {
				address.reserved.remove(&asset);
			}
		}
		address.history.push_back(order_id);
		state.statuses.insert(order_id, (owner, status));
		if address.history.len() > history_cap {
			if let Some(evicted) = address.history.pop_front() {
				state.statuses.remove(&evicted);
			}
		}
	}

	/// External spendable-balance notification. When the new balance no
	/// longer covers the reservation, the youngest orders locking the
	/// asset are auto-cancelled (enqueued into the log, not applied here)
	/// until the remainder fits.
	pub fn balance_changed(&self, address: &PublicKey, asset: &Asset, spendable: u128) {
		let requests = {
			let mut state = self.state.lock().expect("ledger lock");
			let Some(address_state) = state.addresses.get_mut(address) else {
				return;
			};
			let reserved = address_state
				.reserved
				.get(asset)
				.copied()
				.unwrap_or(0);
			if reserved <= spendable {
				return;
			}

			let mut to_release = reserved - spendable;
			// youngest first, by placement time
			let mut candidates: Vec<&mut ActiveOrder> = address_state
				.active
				.values_mut()
				.filter(|a| !a.cancel_requested && a.reserved.contains_key(asset))
				.collect();
			candidates.sort_by_key(|a| std::cmp::Reverse(a.order.timestamp));

			let mut requests = Vec::new();
			for active in candidates {
				if to_release == 0 {
					break;
				}
				active.cancel_requested = true;
				let releases = active.reserved.get(asset).copied().unwrap_or(0);
				to_release = to_release.saturating_sub(releases);
				requests.push(CancelRequest {
					pair: active.order.pair,
					order_id: active.order.id(),
					owner: active.order.sender,
				});
			}
			requests
		};

		if requests.is_empty() {
			return;
		}
		info!(
			target: "ledger",
			address = %address,
			asset = %asset,
			cancels = requests.len(),
			"Balance dropped below reservation, auto-cancelling"
		);
		let sink = self.on_auto_cancel.lock().expect("ledger lock");
		if let Some(sink) = sink.as_ref() {
			for request in requests {
				sink(request);
			}
		}
	}
}

fn release(
	address_reserved: &mut BTreeMap<Asset, u128>,
	order_reserved: &mut BTreeMap<Asset, u128>,
	asset: Asset,
	amount: u128,
) {
	let per_order = order_reserved.entry(asset).or_default();
	let consumed = amount.min(*per_order);
	*per_order -= consumed;
	if *per_order == 0 {
		order_reserved.remove(&asset);
	}
	let held = address_reserved.entry(asset).or_default();
	*held = held.saturating_sub(consumed);
	if *held == 0 {
		address_reserved.remove(&asset);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crucible_sdk::{AssetPair, PRICE_SCALE, Signature};
	use std::sync::{Arc, Mutex as StdMutex};

	const AMOUNT_ASSET: Asset = Asset::Issued([3; 32]);

	fn test_pair() -> AssetPair {
		AssetPair::new(AMOUNT_ASSET, Asset::Native).unwrap()
	}

	fn order(owner: u8, side: Side, price: u64, amount: u64, ts: u64) -> Order {
		Order {
			version: 3,
			sender: PublicKey([owner; 32]),
			matcher: PublicKey([0x4D; 32]),
			pair: test_pair(),
			side,
			price,
			amount,
			fee: 300_000,
			fee_asset: AMOUNT_ASSET,
			timestamp: ts,
			expiration: ts + 10_000_000,
			signature: Signature([owner; 64]),
		}
	}

	#[test]
	fn test_buy_reservation_consume_and_release() {
		// scenario: B rests buy(2000 units, 300000) and fully fills an
		// incoming buy(1000 units, 800000) at 500000; the filled order's
		// whole reservation is released, the resting one stays locked
		let ledger = AddressLedger::new(10);
		let b = PublicKey([2; 32]);

		let resting = order(2, Side::Buy, 300_000, 2_000 * PRICE_SCALE, 1);
		ledger.apply(&LedgerEvent::OrderAdded {
			offset: 0,
			order: resting.clone(),
		});
		// 2000 units at 300000: 600_000_000 price-asset units
		assert_eq!(
			ledger.reserved(&b).get(&Asset::Native).copied(),
			Some(600_000_000)
		);

		let incoming = order(2, Side::Buy, 800_000, 1_000 * PRICE_SCALE, 2);
		ledger.apply(&LedgerEvent::OrderAdded {
			offset: 1,
			order: incoming.clone(),
		});
		assert_eq!(
			ledger.reserved(&b).get(&Asset::Native).copied(),
			Some(600_000_000 + 800_000_000)
		);

		ledger.apply(&LedgerEvent::OrderExecuted {
			offset: 2,
			order_id: incoming.id(),
			owner: b,
			exec_amount: 1_000 * PRICE_SCALE,
			exec_price: 500_000,
			exec_fee: 300_000,
		});

		// filled: consumed 500M at the execution price, surplus released
		assert_eq!(
			ledger.reserved(&b).get(&Asset::Native).copied(),
			Some(600_000_000)
		);
		assert_eq!(
			ledger.status(&incoming.id()),
			OrderStatus::Filled {
				filled_amount: 1_000 * PRICE_SCALE,
				filled_fee: 300_000
			}
		);
		assert_eq!(ledger.status(&resting.id()), OrderStatus::Accepted);
	}

	#[test]
	fn test_partial_fill_keeps_remainder_reserved() {
		let ledger = AddressLedger::new(10);
		let a = PublicKey([1; 32]);

		let sell = order(1, Side::Sell, 500_000, 2_000, 1);
		ledger.apply(&LedgerEvent::OrderAdded {
			offset: 0,
			order: sell.clone(),
		});
		// sells reserve the amount asset plus the fee in its asset
		assert_eq!(
			ledger.reserved(&a).get(&AMOUNT_ASSET).copied(),
			Some(2_000 + 300_000)
		);

		ledger.apply(&LedgerEvent::OrderExecuted {
			offset: 1,
			order_id: sell.id(),
			owner: a,
			exec_amount: 500,
			exec_price: 500_000,
			exec_fee: 75_000,
		});

		assert_eq!(
			ledger.status(&sell.id()),
			OrderStatus::PartiallyFilled {
				filled_amount: 500,
				filled_fee: 75_000
			}
		);
		assert_eq!(
			ledger.reserved(&a).get(&AMOUNT_ASSET).copied(),
			Some(1_500 + 225_000)
		);
	}

	#[test]
	fn test_cancel_releases_and_is_idempotent() {
		let ledger = AddressLedger::new(10);
		let a = PublicKey([1; 32]);
		let sell = order(1, Side::Sell, 500_000, 2_000, 1);

		ledger.apply(&LedgerEvent::OrderAdded {
			offset: 0,
			order: sell.clone(),
		});
		ledger.apply(&LedgerEvent::OrderCanceled {
			offset: 1,
			order_id: sell.id(),
			owner: a,
			reason: CancelReason::Requested,
		});

		assert!(ledger.reserved(&a).is_empty());
		let terminal = ledger.status(&sell.id());
		assert_eq!(
			terminal,
			OrderStatus::Cancelled {
				filled_amount: 0,
				filled_fee: 0
			}
		);

		// a second cancel changes nothing
		ledger.apply(&LedgerEvent::OrderCanceled {
			offset: 2,
			order_id: sell.id(),
			owner: a,
			reason: CancelReason::Requested,
		});
		assert_eq!(ledger.status(&sell.id()), terminal);
	}

	#[test]
	fn test_duplicate_event_application_is_ignored() {
		let ledger = AddressLedger::new(10);
		let a = PublicKey([1; 32]);
		let sell = order(1, Side::Sell, 500_000, 2_000, 1);

		ledger.apply(&LedgerEvent::OrderAdded {
			offset: 0,
			order: sell.clone(),
		});
		let exec = LedgerEvent::OrderExecuted {
			offset: 1,
			order_id: sell.id(),
			owner: a,
			exec_amount: 500,
			exec_price: 500_000,
			exec_fee: 75_000,
		};
		ledger.apply(&exec);
		let after_once = ledger.reserved(&a);
		// redelivered at the same offset
		ledger.apply(&exec);
		assert_eq!(ledger.reserved(&a), after_once);
	}

	#[test]
	fn test_history_cap_evicts_oldest() {
		let ledger = AddressLedger::new(2);
		let a = PublicKey([1; 32]);
		let mut ids = Vec::new();
		for i in 0..3u64 {
			let sell = order(1, Side::Sell, 500_000 + i, 100, i);
			ids.push(sell.id());
			ledger.apply(&LedgerEvent::OrderAdded {
				offset: 2 * i as Offset,
				order: sell.clone(),
			});
			ledger.apply(&LedgerEvent::OrderCanceled {
				offset: 2 * i as Offset + 1,
				order_id: sell.id(),
				owner: a,
				reason: CancelReason::Requested,
			});
		}

		assert_eq!(ledger.status(&ids[0]), OrderStatus::NotFound);
		assert!(ledger.status(&ids[1]).is_terminal());
		assert!(ledger.status(&ids[2]).is_terminal());
	}

	#[test]
	fn test_auto_cancel_cascade_is_lifo_and_enqueued() {
		let ledger = AddressLedger::new(10);
		let cancelled: Arc<StdMutex<Vec<CancelRequest>>> = Arc::default();
		let sink = cancelled.clone();
		ledger.set_auto_cancel(move |req| sink.lock().unwrap().push(req));

		let a = PublicKey([1; 32]);
		let oldest = order(1, Side::Sell, 500_000, 1_000, 100);
		let middle = order(1, Side::Sell, 500_001, 1_000, 200);
		let youngest = order(1, Side::Sell, 500_002, 1_000, 300);
		for (i, o) in [&oldest, &middle, &youngest].iter().enumerate() {
			ledger.apply(&LedgerEvent::OrderAdded {
				offset: i as Offset,
				order: (*o).clone(),
			});
		}
		// each order reserves 1000 + 300000 fee of the amount asset
		assert_eq!(
			ledger.reserved(&a).get(&AMOUNT_ASSET).copied(),
			Some(3 * 301_000)
		);

		// new spendable covers only one order's reservation
		ledger.balance_changed(&a, &AMOUNT_ASSET, 301_000);

		let requests = cancelled.lock().unwrap();
		assert_eq!(requests.len(), 2);
		assert_eq!(requests[0].order_id, youngest.id());
		assert_eq!(requests[1].order_id, middle.id());

		// nothing is applied locally; the cancels travel through the log
		assert_eq!(ledger.status(&youngest.id()), OrderStatus::Accepted);

		// a second notification does not re-request the same orders
		drop(requests);
		ledger.balance_changed(&a, &AMOUNT_ASSET, 301_000);
		assert_eq!(cancelled.lock().unwrap().len(), 2);
	}

	#[test]
	fn test_restore_entry_rebuilds_reservation() {
		let ledger = AddressLedger::new(10);
		let a = PublicKey([1; 32]);
		let sell = order(1, Side::Sell, 500_000, 2_000, 1);
		let entry = LimitOrder::restored(sell.clone(), 500_000, 1_500, 225_000);

		ledger.restore_entry(&entry, 41);
		assert_eq!(
			ledger.status(&sell.id()),
			OrderStatus::PartiallyFilled {
				filled_amount: 500,
				filled_fee: 75_000
			}
		);
		assert_eq!(
			ledger.reserved(&a).get(&AMOUNT_ASSET).copied(),
			Some(1_500 + 225_000)
		);

		// replayed events at or before the restore offset are skipped
		ledger.apply(&LedgerEvent::OrderExecuted {
			offset: 40,
			order_id: sell.id(),
			owner: a,
			exec_amount: 500,
			exec_price: 500_000,
			exec_fee: 75_000,
		});
		assert_eq!(
			ledger.reserved(&a).get(&AMOUNT_ASSET).copied(),
			Some(1_500 + 225_000)
		);
	}
}

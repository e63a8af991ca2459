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

//! The event log: the totally ordered, replayable command queue.
//!
//! Every mutating operation of the engine is an event appended here. The
//! log assigns monotonic offsets and log-local timestamps; consumers read
//! resumable, gap-free tails in offset order. Two interchangeable
//! implementations exist:
//!
//! - [`local::LocalEventLog`]: one process, one partition, entries
//!   persisted synchronously to a length-framed, checksummed sequential
//!   store before `append` returns.
//! - [`remote::RemoteEventLog`]: a single-partition distributed log behind
//!   the [`remote::LogBroker`] transport contract, with a backpressured
//!   buffered producer and a batching consumer.

pub mod local;
pub mod remote;

use std::time::Duration;

use crucible_sdk::wire::{ByteReader, WireError, read_pair, write_pair};
use crucible_sdk::{AssetPair, Order, OrderId, PublicKey};
use serde::{Deserialize, Serialize};

/// Position of an event in the log. `-1` denotes the empty log.
pub type Offset = i64;

const TAG_PLACED: u8 = 1;
const TAG_CANCELED: u8 = 2;
const TAG_BOOK_DELETED: u8 = 3;

/// Errors of the event-log boundary.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("log i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("log entry decode error: {0}")]
	Wire(#[from] WireError),
	#[error("log corrupted: {0}")]
	Corrupted(String),
	#[error("log offset rewind: expected at least {expected}, found {actual}")]
	OffsetRewind { expected: Offset, actual: Offset },
	#[error("producer buffer is full")]
	CapacityExceeded,
	#[error("transient log failure: {0}")]
	Transient(String),
	#[error("event log is closed")]
	Closed,
}

impl QueueError {
	pub fn is_transient(&self) -> bool {
		matches!(self, QueueError::Transient(_))
	}
}

/// A state-changing command, before the log assigns its position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueEvent {
	/// A validated order enters the book of its pair.
	Placed(Order),
	/// A cancel request for one order; `requestor` must be the owner or the
	/// matcher administrator.
	Canceled {
		pair: AssetPair,
		order_id: OrderId,
		requestor: PublicKey,
	},
	/// The whole book of a pair is removed; resting orders are
	/// auto-cancelled first.
	OrderBookDeleted { pair: AssetPair },
}

impl QueueEvent {
	/// The pair this event is routed by. Pair bytes are the sharding key.
	pub fn pair(&self) -> AssetPair {
		match self {
			QueueEvent::Placed(order) => order.pair,
			QueueEvent::Canceled { pair, .. } => *pair,
			QueueEvent::OrderBookDeleted { pair } => *pair,
		}
	}

	/// Wire encoding: tag byte followed by a type-specific payload.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(128);
		match self {
			QueueEvent::Placed(order) => {
				buf.push(TAG_PLACED);
				order.write_to(&mut buf);
			}
			QueueEvent::Canceled {
				pair,
				order_id,
				requestor,
			} => {
				buf.push(TAG_CANCELED);
				write_pair(&mut buf, pair);
				buf.extend_from_slice(&order_id.0);
				buf.extend_from_slice(&requestor.0);
			}
			QueueEvent::OrderBookDeleted { pair } => {
				buf.push(TAG_BOOK_DELETED);
				write_pair(&mut buf, pair);
			}
		}
		buf
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
		let mut r = ByteReader::new(bytes);
		let tag = r.read_u8()?;
		match tag {
			TAG_PLACED => Ok(QueueEvent::Placed(Order::read_from(&mut r)?)),
			TAG_CANCELED => {
				let pair = read_pair(&mut r)?;
				let order_id = OrderId(r.read_array::<32>()?);
				let requestor = PublicKey(r.read_array::<32>()?);
				Ok(QueueEvent::Canceled {
					pair,
					order_id,
					requestor,
				})
			}
			TAG_BOOK_DELETED => Ok(QueueEvent::OrderBookDeleted {
				pair: read_pair(&mut r)?,
			}),
			other => Err(WireError::InvalidTag(other)),
		}
	}
}

/// An event as stored: the command plus its assigned position and the
/// log-local timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggedEvent {
	pub offset: Offset,
	pub timestamp: u64,
	pub event: QueueEvent,
}

/// The ordered, replayable command queue.
///
/// Appends are linearized across concurrent producers and durable before
/// they return. Tails deliver every event at least once, in offset order,
/// without gaps; consumers must tolerate redelivery (workers skip offsets
/// they have already applied).
pub trait EventLog: Send + Sync {
	/// Append an event. Returns its assigned `(offset, timestamp)` once
	/// durable. A failed append must not leave a phantom offset visible to
	/// consumers.
	fn append(&self, event: QueueEvent) -> Result<(Offset, u64), QueueError>;

	/// Read up to `max_events` events starting at `from`, waiting at most
	/// `max_wait` for the first one. An empty result means the tail is
	/// caught up.
	fn tail(
		&self,
		from: Offset,
		max_events: usize,
		max_wait: Duration,
	) -> Result<Vec<LoggedEvent>, QueueError>;

	/// Offset of the last stored event, `-1` if the log is empty.
	fn end_offset(&self) -> Result<Offset, QueueError>;

	/// Record consumer progress. Only meaningful for implementations with
	/// an external consumer position; the local log keeps progress in the
	/// per-pair snapshots instead.
	fn commit(&self, _offset: Offset) -> Result<(), QueueError> {
		Ok(())
	}

	/// Last committed consumer position, `-1` when unknown.
	fn committed(&self) -> Result<Offset, QueueError> {
		Ok(-1)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crucible_sdk::{Asset, Signature};

	pub(crate) fn test_order() -> Order {
		Order {
			version: 3,
			sender: PublicKey([1; 32]),
			matcher: PublicKey([2; 32]),
			pair: AssetPair::new(Asset::Issued([3; 32]), Asset::Native).unwrap(),
			side: crucible_sdk::Side::Buy,
			price: 500_000,
			amount: 1_000,
			fee: 300_000,
			fee_asset: Asset::Native,
			timestamp: 1_700_000_000_000,
			expiration: 1_700_000_060_000,
			signature: Signature([9; 64]),
		}
	}

	#[test]
	fn test_event_codec_roundtrip() {
		let order = test_order();
		let events = [
			QueueEvent::Placed(order.clone()),
			QueueEvent::Canceled {
				pair: order.pair,
				order_id: order.id(),
				requestor: order.sender,
			},
			QueueEvent::OrderBookDeleted { pair: order.pair },
		];
		for event in events {
			let decoded = QueueEvent::from_bytes(&event.to_bytes()).unwrap();
			assert_eq!(decoded, event);
		}
	}

	#[test]
	fn test_unknown_tag_rejected() {
		assert!(matches!(
			QueueEvent::from_bytes(&[42]),
			Err(WireError::InvalidTag(42))
		));
	}
}

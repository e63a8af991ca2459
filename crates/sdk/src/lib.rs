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

//! Crucible SDK
//!
//! Shared vocabulary between the Crucible matcher and its collaborators:
//! assets, pairs, signed orders, trades and statuses; the stable order wire
//! format and order-id derivation; and the public rejection-code table.
//! The crate carries no engine logic.

pub mod error;
pub mod types;
pub mod wire;

pub use error::OrderRejection;
pub use types::{
	Asset, AssetPair, ExchangeTrade, LastTrade, MAX_ORDER_LIFETIME_MS, MarketStatus, Order,
	OrderId, OrderStatus, PRICE_SCALE, PublicKey, Side, Signature, price_volume,
	price_volume_ceil,
};
pub use wire::{ByteReader, WireError, read_asset, read_pair, write_asset, write_pair};

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

//! Contract of the blockchain-node collaborator.
//!
//! The engine never talks to the chain itself; the host process supplies a
//! [`NodeClient`]. Lookups happen during pre-validation only, never inside
//! the match loop.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crucible_sdk::{Asset, Order, PublicKey};

/// Chain-side metadata of an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescription {
	pub name: String,
	pub decimals: u8,
	/// Whether transfers of this asset are gated by a script.
	pub has_script: bool,
}

impl AssetDescription {
	/// The native asset needs no lookup: eight decimals, no script.
	pub fn native() -> Self {
		Self {
			name: "NATIVE".to_string(),
			decimals: 8,
			has_script: false,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
	#[error("node request failed: {0}")]
	Unavailable(String),
}

/// Blocking view of the settlement chain used by the validator.
pub trait NodeClient: Send + Sync {
	/// Metadata of an asset, `None` when the chain does not know it.
	fn asset_description(&self, asset: &Asset) -> Result<Option<AssetDescription>, NodeError>;

	/// Balance of `asset` the account can still spend (confirmed balance
	/// minus chain-side locks).
	fn spendable_balance(&self, account: &PublicKey, asset: &Asset)
	-> Result<u128, NodeError>;

	/// Whether the account has an account script attached.
	fn has_account_script(&self, account: &PublicKey) -> Result<bool, NodeError>;

	/// Verdict of a scripted asset on the order. Only consulted for assets
	/// whose description reports a script.
	fn asset_script_allows(&self, asset: &Asset, order: &Order) -> Result<bool, NodeError>;

	/// Verdict of the matcher account script on the order. Only consulted
	/// when the matcher account is scripted.
	fn matcher_script_allows(&self, order: &Order) -> Result<bool, NodeError>;
}

/// Deterministic in-memory node used by tests and local setups.
#[derive(Default)]
pub struct StaticNodeClient {
	assets: Mutex<HashMap<Asset, AssetDescription>>,
	balances: Mutex<HashMap<(PublicKey, Asset), u128>>,
	scripted_accounts: Mutex<HashMap<PublicKey, bool>>,
	denying_asset_scripts: Mutex<HashSet<Asset>>,
	matcher_script_denies: AtomicBool,
}

impl StaticNodeClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put_asset(&self, asset: Asset, description: AssetDescription) {
		self.assets.lock().expect("node lock").insert(asset, description);
	}

	pub fn put_balance(&self, account: PublicKey, asset: Asset, balance: u128) {
		self.balances
			.lock()
			.expect("node lock")
			.insert((account, asset), balance);
	}

	pub fn set_account_script(&self, account: PublicKey, scripted: bool) {
		self.scripted_accounts
			.lock()
			.expect("node lock")
			.insert(account, scripted);
	}

	/// Make the given asset's script deny every order.
	pub fn deny_asset_script(&self, asset: Asset) {
		self.denying_asset_scripts
			.lock()
			.expect("node lock")
			.insert(asset);
	}

	/// Make the matcher account script deny every order.
	pub fn deny_matcher_script(&self, deny: bool) {
		self.matcher_script_denies.store(deny, Ordering::Relaxed);
	}
}

impl NodeClient for StaticNodeClient {
	fn asset_description(&self, asset: &Asset) -> Result<Option<AssetDescription>, NodeError> {
		if asset.is_native() {
			return Ok(Some(AssetDescription::native()));
		}
		Ok(self.assets.lock().expect("node lock").get(asset).cloned())
	}

	fn spendable_balance(
		&self,
		account: &PublicKey,
		asset: &Asset,
	) -> Result<u128, NodeError> {
		Ok(self
			.balances
			.lock()
			.expect("node lock")
			.get(&(*account, *asset))
			.copied()
			.unwrap_or(0))
	}

	fn has_account_script(&self, account: &PublicKey) -> Result<bool, NodeError> {
		Ok(self
			.scripted_accounts
			.lock()
			.expect("node lock")
			.get(account)
			.copied()
			.unwrap_or(false))
	}

	fn asset_script_allows(&self, asset: &Asset, _order: &Order) -> Result<bool, NodeError> {
		Ok(!self
			.denying_asset_scripts
			.lock()
			.expect("node lock")
			.contains(asset))
	}

	fn matcher_script_allows(&self, _order: &Order) -> Result<bool, NodeError> {
		Ok(!self.matcher_script_denies.load(Ordering::Relaxed))
	}
}

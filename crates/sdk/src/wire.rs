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

//! Stable binary format for orders.
//!
//! The format is self-delimiting and identical across order versions 1-3
//! except for the version-3 fee asset:
//!
//! ```text
//! [version:    1B]
//! [sender:     32B]
//! [matcher:    32B]
//! [amount asset: 1B flag + 0|32B id]
//! [price asset:  1B flag + 0|32B id]
//! [order type: 1B]  0 = buy, 1 = sell
//! [price:      8B BE]
//! [amount:     8B BE]
//! [timestamp:  8B BE]
//! [expiration: 8B BE]
//! [fee:        8B BE]
//! [fee asset:  1B flag + 0|32B id]  (version 3 only)
//! [signature:  64B]
//! ```
//!
//! The order id is the blake2b-256 hash of everything before the signature.

use blake2::{Blake2b, Digest, digest::consts::U32};

use crate::types::{Asset, AssetPair, Order, OrderId, PublicKey, Side, Signature};

type Blake2b256 = Blake2b<U32>;

const FLAG_NATIVE: u8 = 0;
const FLAG_ISSUED: u8 = 1;

/// Errors produced while decoding wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
	#[error("unexpected end of input at byte {0}")]
	UnexpectedEof(usize),
	#[error("unsupported order version {0}")]
	UnsupportedVersion(u8),
	#[error("invalid asset flag {0}")]
	InvalidAssetFlag(u8),
	#[error("invalid order type {0}")]
	InvalidOrderType(u8),
	#[error("asset pair must contain two distinct assets")]
	InvalidPair,
	#[error("invalid tag {0}")]
	InvalidTag(u8),
}

/// Minimal cursor over a byte slice used by all Crucible binary codecs.
pub struct ByteReader<'a> {
	bytes: &'a [u8],
	pos: usize,
}

impl<'a> ByteReader<'a> {
	pub fn new(bytes: &'a [u8]) -> Self {
		Self { bytes, pos: 0 }
	}

	pub fn position(&self) -> usize {
		self.pos
	}

	pub fn remaining(&self) -> usize {
		self.bytes.len() - self.pos
	}

	pub fn read_u8(&mut self) -> Result<u8, WireError> {
		let b = *self
			.bytes
			.get(self.pos)
			.ok_or(WireError::UnexpectedEof(self.pos))?;
		self.pos += 1;
		Ok(b)
	}

	pub fn read_u32(&mut self) -> Result<u32, WireError> {
		Ok(u32::from_be_bytes(self.read_array::<4>()?))
	}

	pub fn read_u64(&mut self) -> Result<u64, WireError> {
		Ok(u64::from_be_bytes(self.read_array::<8>()?))
	}

	pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
		if self.remaining() < N {
			return Err(WireError::UnexpectedEof(self.pos));
		}
		let mut out = [0u8; N];
		out.copy_from_slice(&self.bytes[self.pos..self.pos + N]);
		self.pos += N;
		Ok(out)
	}
}

/// Append the 1-byte flag + optional 32-byte id encoding of an asset.
pub fn write_asset(buf: &mut Vec<u8>, asset: &Asset) {
	match asset {
		Asset::Native => buf.push(FLAG_NATIVE),
		Asset::Issued(id) => {
			buf.push(FLAG_ISSUED);
			buf.extend_from_slice(id);
		}
	}
}

pub fn read_asset(r: &mut ByteReader<'_>) -> Result<Asset, WireError> {
	match r.read_u8()? {
		FLAG_NATIVE => Ok(Asset::Native),
		FLAG_ISSUED => Ok(Asset::Issued(r.read_array::<32>()?)),
		other => Err(WireError::InvalidAssetFlag(other)),
	}
}

/// Append the pair encoding: amount asset then price asset.
///
/// These bytes are also the sharding key of the pair on the event log.
pub fn write_pair(buf: &mut Vec<u8>, pair: &AssetPair) {
	write_asset(buf, &pair.amount_asset);
	write_asset(buf, &pair.price_asset);
}

pub fn read_pair(r: &mut ByteReader<'_>) -> Result<AssetPair, WireError> {
	let amount_asset = read_asset(r)?;
	let price_asset = read_asset(r)?;
	AssetPair::new(amount_asset, price_asset).map_err(|_| WireError::InvalidPair)
}

impl AssetPair {
	/// The pair's wire bytes, used as its sharding key.
	pub fn key_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(66);
		write_pair(&mut buf, self);
		buf
	}
}

impl Order {
	/// The bytes covered by the order signature.
	pub fn signing_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(256);
		buf.push(self.version);
		buf.extend_from_slice(&self.sender.0);
		buf.extend_from_slice(&self.matcher.0);
		write_pair(&mut buf, &self.pair);
		buf.push(match self.side {
			Side::Buy => 0,
			Side::Sell => 1,
		});
		buf.extend_from_slice(&self.price.to_be_bytes());
		buf.extend_from_slice(&self.amount.to_be_bytes());
		buf.extend_from_slice(&self.timestamp.to_be_bytes());
		buf.extend_from_slice(&self.expiration.to_be_bytes());
		buf.extend_from_slice(&self.fee.to_be_bytes());
		if self.version >= 3 {
			write_asset(&mut buf, &self.fee_asset);
		}
		buf
	}

	/// The order id: blake2b-256 of the signing bytes.
	pub fn id(&self) -> OrderId {
		let digest = Blake2b256::digest(self.signing_bytes());
		OrderId(digest.into())
	}

	/// Full wire bytes: signing bytes followed by the signature.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = self.signing_bytes();
		buf.extend_from_slice(&self.signature.0);
		buf
	}

	pub fn write_to(&self, buf: &mut Vec<u8>) {
		buf.extend_from_slice(&self.to_bytes());
	}

	/// Decode one order from the reader, leaving it positioned after the
	/// signature.
	pub fn read_from(r: &mut ByteReader<'_>) -> Result<Order, WireError> {
		let version = r.read_u8()?;
		if !(1..=3).contains(&version) {
			return Err(WireError::UnsupportedVersion(version));
		}
		let sender = PublicKey(r.read_array::<32>()?);
		let matcher = PublicKey(r.read_array::<32>()?);
		let pair = read_pair(r)?;
		let side = match r.read_u8()? {
			0 => Side::Buy,
			1 => Side::Sell,
			other => return Err(WireError::InvalidOrderType(other)),
		};
		let price = r.read_u64()?;
		let amount = r.read_u64()?;
		let timestamp = r.read_u64()?;
		let expiration = r.read_u64()?;
		let fee = r.read_u64()?;
		let fee_asset = if version >= 3 {
			read_asset(r)?
		} else {
			Asset::Native
		};
		let signature = Signature(r.read_array::<64>()?);
		Ok(Order {
			version,
			sender,
			matcher,
			pair,
			side,
			price,
			amount,
			fee,
			fee_asset,
			timestamp,
			expiration,
			signature,
		})
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Order, WireError> {
		Order::read_from(&mut ByteReader::new(bytes))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_order(version: u8) -> Order {
		Order {
			version,
			sender: PublicKey([11; 32]),
			matcher: PublicKey([22; 32]),
			pair: AssetPair::new(Asset::Issued([33; 32]), Asset::Native).unwrap(),
			side: Side::Sell,
			price: 500_000,
			amount: 2_000,
			fee: 300_000,
			fee_asset: if version >= 3 {
				Asset::Issued([44; 32])
			} else {
				Asset::Native
			},
			timestamp: 1_700_000_000_000,
			expiration: 1_700_000_060_000,
			signature: Signature([7; 64]),
		}
	}

	#[test]
	fn test_order_roundtrip_v1_and_v3() {
		for version in [1, 3] {
			let order = sample_order(version);
			let decoded = Order::from_bytes(&order.to_bytes()).unwrap();
			assert_eq!(decoded, order);
		}
	}

	#[test]
	fn test_order_is_self_delimiting() {
		let order = sample_order(3);
		let mut bytes = order.to_bytes();
		let len = bytes.len();
		bytes.extend_from_slice(&[0xAA; 17]);

		let mut r = ByteReader::new(&bytes);
		let decoded = Order::read_from(&mut r).unwrap();
		assert_eq!(decoded, order);
		assert_eq!(r.position(), len);
	}

	#[test]
	fn test_id_ignores_signature() {
		let order = sample_order(2);
		let mut resigned = order.clone();
		resigned.signature = Signature([99; 64]);
		assert_eq!(order.id(), resigned.id());

		let mut repriced = order;
		repriced.price += 1;
		assert_ne!(repriced.id(), resigned.id());
	}

	#[test]
	fn test_truncated_order_rejected() {
		let order = sample_order(1);
		let bytes = order.to_bytes();
		let err = Order::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
		assert!(matches!(err, WireError::UnexpectedEof(_)));
	}
}

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

//! Book snapshots and the snapshot store.
//!
//! A snapshot freezes one pair's book at a log offset; on restart the
//! worker restores it and replays the log from `offset + 1`. Binary
//! layout:
//!
//! ```text
//! [magic:   4B "CBS1"]
//! [version: u8]
//! [offset:  i64 BE]
//! [pair:    pair wire bytes]
//! per side (bids, then asks):
//!   [level_count: u32 BE]
//!   per level: [price: u64 BE] [entry_count: u32 BE]
//!     per entry: [order wire bytes] [remaining_amount: u64] [remaining_fee: u64]
//! [last trade: u8 flag + (price u64, amount u64, side u8)]
//! ```
//!
//! The file store appends a CRC32C trailer and writes through a temp file
//! plus rename, so a snapshot is either complete or absent.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crucible_sdk::wire::{ByteReader, WireError, read_pair, write_pair};
use crucible_sdk::{AssetPair, LastTrade, Order, Side};
use tracing::warn;

use crate::book::{LimitOrder, OrderBook};
use crate::queue::Offset;

const MAGIC: [u8; 4] = *b"CBS1";
const FORMAT_VERSION: u8 = 1;

/// Errors of the snapshot layer.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
	#[error("snapshot i/o error: {0}")]
	Io(#[from] std::io::Error),
	#[error("snapshot decode error: {0}")]
	Wire(#[from] WireError),
	#[error("snapshot corrupted: {0}")]
	Corrupted(String),
}

/// The serialized state of one book at one offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
	pub pair: AssetPair,
	/// Offset of the last event applied to this book.
	pub offset: Offset,
	pub bids: Vec<(u64, Vec<LimitOrder>)>,
	pub asks: Vec<(u64, Vec<LimitOrder>)>,
	pub last_trade: Option<LastTrade>,
}

impl BookSnapshot {
	pub fn capture(pair: AssetPair, offset: Offset, book: &OrderBook) -> Self {
		Self {
			pair,
			offset,
			bids: book.levels(Side::Buy),
			asks: book.levels(Side::Sell),
			last_trade: book.last_trade(),
		}
	}

	/// Rebuild the book, regenerating the id index from the levels.
	pub fn restore_book(&self) -> OrderBook {
		OrderBook::restore(self.bids.clone(), self.asks.clone(), self.last_trade)
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(256);
		buf.extend_from_slice(&MAGIC);
		buf.push(FORMAT_VERSION);
		buf.extend_from_slice(&self.offset.to_be_bytes());
		write_pair(&mut buf, &self.pair);
		write_side(&mut buf, &self.bids);
		write_side(&mut buf, &self.asks);
		match self.last_trade {
			Some(trade) => {
				buf.push(1);
				buf.extend_from_slice(&trade.price.to_be_bytes());
				buf.extend_from_slice(&trade.amount.to_be_bytes());
				buf.push(match trade.side {
					Side::Buy => 0,
					Side::Sell => 1,
				});
			}
			None => buf.push(0),
		}
		buf
	}

	pub fn from_bytes(bytes: &[u8]) -> Result<Self, SnapshotError> {
		let mut r = ByteReader::new(bytes);
		let magic = r.read_array::<4>()?;
		if magic != MAGIC {
			return Err(SnapshotError::Corrupted("bad magic".to_string()));
		}
		let version = r.read_u8()?;
		if version != FORMAT_VERSION {
			return Err(SnapshotError::Corrupted(format!(
				"unsupported snapshot version {version}"
			)));
		}
		let offset = Offset::from_be_bytes(r.read_array::<8>()?);
		let pair = read_pair(&mut r)?;
		let bids = read_side(&mut r)?;
		let asks = read_side(&mut r)?;
		let last_trade = match r.read_u8()? {
			0 => None,
			1 => {
				let price = r.read_u64()?;
				let amount = r.read_u64()?;
				let side = match r.read_u8()? {
					0 => Side::Buy,
					1 => Side::Sell,
					other => {
						return Err(SnapshotError::Corrupted(format!(
							"invalid trade side {other}"
						)));
					}
				};
				Some(LastTrade {
					price,
					amount,
					side,
				})
			}
			other => {
				return Err(SnapshotError::Corrupted(format!(
					"invalid last-trade flag {other}"
				)));
			}
		};
		Ok(Self {
			pair,
			offset,
			bids,
			asks,
			last_trade,
		})
	}
}

fn write_side(buf: &mut Vec<u8>, levels: &[(u64, Vec<LimitOrder>)]) {
	buf.extend_from_slice(&(levels.len() as u32).to_be_bytes());
	for (price, entries) in levels {
		buf.extend_from_slice(&price.to_be_bytes());
		buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
		for entry in entries {
			entry.order.write_to(buf);
			buf.extend_from_slice(&entry.remaining_amount.to_be_bytes());
			buf.extend_from_slice(&entry.remaining_fee.to_be_bytes());
		}
	}
}

fn read_side(r: &mut ByteReader<'_>) -> Result<Vec<(u64, Vec<LimitOrder>)>, SnapshotError> {
	let level_count = r.read_u32()?;
	let mut levels = Vec::with_capacity(level_count as usize);
	for _ in 0..level_count {
		let price = r.read_u64()?;
		let entry_count = r.read_u32()?;
		let mut entries = Vec::with_capacity(entry_count as usize);
		for _ in 0..entry_count {
			let order = Order::read_from(r)?;
			let remaining_amount = r.read_u64()?;
			let remaining_fee = r.read_u64()?;
			entries.push(LimitOrder::restored(
				order,
				price,
				remaining_amount,
				remaining_fee,
			));
		}
		levels.push((price, entries));
	}
	Ok(levels)
}

/// Opaque persistent map `pair -> (snapshot, offset)`. Single writer per
/// pair (the pair's worker).
pub trait SnapshotStore: Send + Sync {
	fn save(&self, snapshot: &BookSnapshot) -> Result<(), SnapshotError>;

	fn load(&self, pair: &AssetPair) -> Result<Option<BookSnapshot>, SnapshotError>;

	fn remove(&self, pair: &AssetPair) -> Result<(), SnapshotError>;

	/// Pairs with a stored snapshot, i.e. the known pairs at startup.
	fn list_pairs(&self) -> Result<Vec<AssetPair>, SnapshotError>;
}

/// Directory-backed store: one checksummed file per pair.
pub struct FileSnapshotStore {
	dir: PathBuf,
}

impl FileSnapshotStore {
	pub fn open(dir: PathBuf) -> Result<Self, SnapshotError> {
		fs::create_dir_all(&dir)?;
		Ok(Self { dir })
	}

	fn path_for(&self, pair: &AssetPair) -> PathBuf {
		self.dir.join(format!("{}.snap", hex::encode(pair.key_bytes())))
	}
}

impl SnapshotStore for FileSnapshotStore {
	fn save(&self, snapshot: &BookSnapshot) -> Result<(), SnapshotError> {
		let mut bytes = snapshot.to_bytes();
		let checksum = crc32c::crc32c(&bytes);
		bytes.extend_from_slice(&checksum.to_be_bytes());

		let path = self.path_for(&snapshot.pair);
		let tmp = path.with_extension("snap.tmp");
		fs::write(&tmp, &bytes)?;
		fs::rename(&tmp, &path)?;
		Ok(())
	}

	fn load(&self, pair: &AssetPair) -> Result<Option<BookSnapshot>, SnapshotError> {
		let path = self.path_for(pair);
		let bytes = match fs::read(&path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		if bytes.len() < 4 {
			return Err(SnapshotError::Corrupted("truncated snapshot".to_string()));
		}
		let (body, trailer) = bytes.split_at(bytes.len() - 4);
		let stored = u32::from_be_bytes(trailer.try_into().expect("4 bytes"));
		if crc32c::crc32c(body) != stored {
			return Err(SnapshotError::Corrupted(format!(
				"checksum mismatch for pair {pair}"
			)));
		}
		Ok(Some(BookSnapshot::from_bytes(body)?))
	}

	fn remove(&self, pair: &AssetPair) -> Result<(), SnapshotError> {
		match fs::remove_file(self.path_for(pair)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	fn list_pairs(&self) -> Result<Vec<AssetPair>, SnapshotError> {
		let mut pairs = Vec::new();
		for entry in fs::read_dir(&self.dir)? {
			let entry = entry?;
			let name = entry.file_name();
			let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".snap")) else {
				continue;
			};
			let Ok(key) = hex::decode(stem) else {
				warn!(target: "snapshots", file = ?name, "Skipping foreign file in snapshot dir");
				continue;
			};
			match read_pair(&mut ByteReader::new(&key)) {
				Ok(pair) => pairs.push(pair),
				Err(_) => {
					warn!(target: "snapshots", file = ?name, "Skipping undecodable snapshot name");
				}
			}
		}
		pairs.sort();
		Ok(pairs)
	}
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemorySnapshotStore {
	snapshots: Mutex<HashMap<AssetPair, BookSnapshot>>,
}

impl MemorySnapshotStore {
	pub fn new() -> Self {
		Self::default()
	}
}

impl SnapshotStore for MemorySnapshotStore {
	fn save(&self, snapshot: &BookSnapshot) -> Result<(), SnapshotError> {
		self.snapshots
			.lock()
			.expect("snapshot lock")
			.insert(snapshot.pair, snapshot.clone());
		Ok(())
	}

	fn load(&self, pair: &AssetPair) -> Result<Option<BookSnapshot>, SnapshotError> {
		Ok(self
			.snapshots
			.lock()
			.expect("snapshot lock")
			.get(pair)
			.cloned())
	}

	fn remove(&self, pair: &AssetPair) -> Result<(), SnapshotError> {
		self.snapshots.lock().expect("snapshot lock").remove(pair);
		Ok(())
	}

	fn list_pairs(&self) -> Result<Vec<AssetPair>, SnapshotError> {
		let mut pairs: Vec<_> = self
			.snapshots
			.lock()
			.expect("snapshot lock")
			.keys()
			.copied()
			.collect();
		pairs.sort();
		Ok(pairs)
	}
}

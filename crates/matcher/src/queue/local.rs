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

//! Single-process event log backed by a sequential store.
//!
//! Entry format on disk:
//!
//! ```text
//! [body_len:  u32 BE]
//! [offset:    u64 BE]
//! [timestamp: u64 BE]
//! [payload:   event wire bytes]
//! [checksum:  u32 BE]  CRC32C over offset ++ timestamp ++ payload
//! ```
//!
//! Appends are persisted and fsynced before they return, so an
//! acknowledged offset is never lost and a torn write can only affect the
//! unacknowledged tail, which is truncated on the next open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tracing::{info, warn};

use super::{EventLog, LoggedEvent, Offset, QueueError, QueueEvent};

pub(crate) fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as u64
}

fn entry_checksum(offset: Offset, timestamp: u64, payload: &[u8]) -> u32 {
	let mut buf = Vec::with_capacity(16 + payload.len());
	buf.extend_from_slice(&offset.to_be_bytes());
	buf.extend_from_slice(&timestamp.to_be_bytes());
	buf.extend_from_slice(payload);
	crc32c::crc32c(&buf)
}

struct LogState {
	events: Vec<LoggedEvent>,
	file: Option<File>,
	last_timestamp: u64,
}

/// Durable single-partition log for one-process deployments.
///
/// All stored events are kept in memory for tail reads; the backing file
/// is the source of truth across restarts.
pub struct LocalEventLog {
	state: Mutex<LogState>,
	arrived: Condvar,
}

impl LocalEventLog {
	/// Open (or create) a log at `path`, replaying existing entries.
	///
	/// A torn or checksum-failing entry at the end of the file is dropped
	/// and the file truncated to the last good entry; corruption anywhere
	/// else is fatal.
	pub fn open(path: &Path) -> Result<Self, QueueError> {
		let mut file = OpenOptions::new()
			.read(true)
			.create(true)
			.append(true)
			.open(path)?;

		let mut bytes = Vec::new();
		file.seek(SeekFrom::Start(0))?;
		file.read_to_end(&mut bytes)?;

		let (events, good_len) = Self::decode_entries(&bytes)?;
		if good_len < bytes.len() as u64 {
			warn!(
				target: "event_log",
				dropped_bytes = bytes.len() as u64 - good_len,
				"Dropping torn tail entry from event log"
			);
			file.set_len(good_len)?;
			file.seek(SeekFrom::End(0))?;
		}

		info!(
			target: "event_log",
			path = %path.display(),
			events = events.len(),
			"Opened local event log"
		);

		let last_timestamp = events.last().map(|e| e.timestamp).unwrap_or(0);
		Ok(Self {
			state: Mutex::new(LogState {
				events,
				file: Some(file),
				last_timestamp,
			}),
			arrived: Condvar::new(),
		})
	}

	/// A log with no backing store, for tests and embedded use.
	pub fn in_memory() -> Self {
		Self {
			state: Mutex::new(LogState {
				events: Vec::new(),
				file: None,
				last_timestamp: 0,
			}),
			arrived: Condvar::new(),
		}
	}

	fn decode_entries(bytes: &[u8]) -> Result<(Vec<LoggedEvent>, u64), QueueError> {
		let mut events = Vec::new();
		let mut pos = 0usize;

		while pos < bytes.len() {
			let entry_start = pos;
			if bytes.len() - pos < 4 {
				return Ok((events, entry_start as u64));
			}
			let body_len =
				u32::from_be_bytes(bytes[pos..pos + 4].try_into().expect("4 bytes")) as usize;
			pos += 4;
			if body_len < 20 || bytes.len() - pos < body_len {
				return Ok((events, entry_start as u64));
			}
			let body = &bytes[pos..pos + body_len];
			pos += body_len;

			let offset = Offset::from_be_bytes(body[0..8].try_into().expect("8 bytes"));
			let timestamp = u64::from_be_bytes(body[8..16].try_into().expect("8 bytes"));
			let payload = &body[16..body_len - 4];
			let stored_crc =
				u32::from_be_bytes(body[body_len - 4..].try_into().expect("4 bytes"));

			if entry_checksum(offset, timestamp, payload) != stored_crc {
				if pos >= bytes.len() {
					// torn tail, recoverable
					return Ok((events, entry_start as u64));
				}
				return Err(QueueError::Corrupted(format!(
					"checksum mismatch at offset {offset}"
				)));
			}

			let expected = events.len() as Offset;
			if offset != expected {
				return Err(QueueError::Corrupted(format!(
					"non-sequential entry: expected offset {expected}, found {offset}"
				)));
			}

			let event = QueueEvent::from_bytes(payload)
				.map_err(|e| QueueError::Corrupted(format!("entry {offset}: {e}")))?;
			events.push(LoggedEvent {
				offset,
				timestamp,
				event,
			});
		}

		Ok((events, pos as u64))
	}

	fn encode_entry(offset: Offset, timestamp: u64, payload: &[u8]) -> Vec<u8> {
		let body_len = 8 + 8 + payload.len() + 4;
		let mut buf = Vec::with_capacity(4 + body_len);
		buf.extend_from_slice(&(body_len as u32).to_be_bytes());
		buf.extend_from_slice(&offset.to_be_bytes());
		buf.extend_from_slice(&timestamp.to_be_bytes());
		buf.extend_from_slice(payload);
		buf.extend_from_slice(&entry_checksum(offset, timestamp, payload).to_be_bytes());
		buf
	}
}

impl EventLog for LocalEventLog {
	fn append(&self, event: QueueEvent) -> Result<(Offset, u64), QueueError> {
		let mut state = self.state.lock().expect("log lock");

		let offset = state.events.len() as Offset;
		// log-local clock, kept monotonic across entries
		let timestamp = now_millis().max(state.last_timestamp);
		let payload = event.to_bytes();

		if let Some(file) = state.file.as_mut() {
			let entry = Self::encode_entry(offset, timestamp, &payload);
			file.write_all(&entry)?;
			file.sync_data()?;
		}

		state.last_timestamp = timestamp;
		state.events.push(LoggedEvent {
			offset,
			timestamp,
			event,
		});
		self.arrived.notify_all();
		Ok((offset, timestamp))
	}

	fn tail(
		&self,
		from: Offset,
		max_events: usize,
		max_wait: Duration,
	) -> Result<Vec<LoggedEvent>, QueueError> {
		let from = from.max(0) as usize;
		let deadline = Instant::now() + max_wait;
		let mut state = self.state.lock().expect("log lock");

		while state.events.len() <= from {
			let now = Instant::now();
			if now >= deadline {
				return Ok(Vec::new());
			}
			let (next, timeout) = self
				.arrived
				.wait_timeout(state, deadline - now)
				.expect("log lock");
			state = next;
			if timeout.timed_out() && state.events.len() <= from {
				return Ok(Vec::new());
			}
		}

		let to = (from + max_events).min(state.events.len());
		Ok(state.events[from..to].to_vec())
	}

	fn end_offset(&self) -> Result<Offset, QueueError> {
		let state = self.state.lock().expect("log lock");
		Ok(state.events.len() as Offset - 1)
	}
}

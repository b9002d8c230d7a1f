use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::protocol::ServerMessage;

pub const CLIENT_QUEUE: usize = 256;
const SNAPSHOT_ATTEMPTS: usize = 3;

/// Connected subscribers, each with its own bounded outbound queue.
pub struct Hub {
	clients: RwLock<HashMap<u64, mpsc::Sender<String>>>,
	next_id: AtomicU64,
	/// Bumped before every broadcast is fanned out.
	generation: AtomicU64,
	capacity: usize,
}

impl Hub {
	pub fn new(capacity: usize) -> Self {
		Self {
			clients: RwLock::new(HashMap::new()),
			next_id: AtomicU64::new(1),
			generation: AtomicU64::new(0),
			capacity,
		}
	}

	/// Registers a client and queues its snapshot before any later broadcast
	/// can reach it.
	///
	/// The snapshot is built without holding the client lock. If a broadcast
	/// went out meanwhile it is rebuilt, and after `SNAPSHOT_ATTEMPTS`
	/// tries the last build happens under the lock so nothing is missed.
	pub fn connect<F>(&self, mut snapshot: F) -> (u64, mpsc::Receiver<String>)
	where
		F: FnMut() -> Vec<ServerMessage>,
	{
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::channel(self.capacity);
		let mut built = None;
		for _ in 0..SNAPSHOT_ATTEMPTS {
			let seen = self.generation.load(Ordering::Acquire);
			let messages = snapshot();
			if self.generation.load(Ordering::Acquire) == seen {
				built = Some((seen, messages));
				break;
			}
		}
		let mut clients = self.clients.write();
		let messages = match built {
			Some((seen, messages)) if self.generation.load(Ordering::Acquire) == seen => messages,
			_ => {
				debug!(event = "snapshot_rebuilt", conn_id = id);
				snapshot()
			}
		};
		for msg in messages {
			if let Some(raw) = encode(&msg) {
				if tx.try_send(raw).is_err() {
					warn!(event = "snapshot_truncated", conn_id = id, kind = msg.kind());
				}
			}
		}
		clients.insert(id, tx);
		info!(event = "client_connected", conn_id = id, clients = clients.len());
		(id, rx)
	}

	pub fn disconnect(&self, id: u64) {
		if self.clients.write().remove(&id).is_some() {
			info!(event = "client_disconnected", conn_id = id);
		}
	}

	/// A full queue skips this message for that client; a closed one drops
	/// the client.
	pub fn broadcast(&self, msg: &ServerMessage) {
		let Some(raw) = encode(msg) else {
			return;
		};
		self.generation.fetch_add(1, Ordering::AcqRel);
		let mut closed = Vec::new();
		{
			let clients = self.clients.read();
			for (id, sender) in clients.iter() {
				match sender.try_send(raw.clone()) {
					Ok(()) => {}
					Err(mpsc::error::TrySendError::Full(_)) => {
						warn!(event = "slow_consumer", conn_id = *id, kind = msg.kind());
					}
					Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
				}
			}
		}
		for id in closed {
			self.disconnect(id);
		}
		debug!(event = "broadcast", kind = msg.kind());
	}

	pub fn client_count(&self) -> usize {
		self.clients.read().len()
	}

	/// Drops every sender; each client's writer sees its queue end.
	pub fn close_all(&self) {
		let mut clients = self.clients.write();
		let count = clients.len();
		clients.clear();
		info!(event = "clients_closed", count);
	}
}

fn encode(msg: &ServerMessage) -> Option<String> {
	match serde_json::to_string(msg) {
		Ok(raw) => Some(raw),
		Err(err) => {
			warn!(event = "encode_failed", kind = msg.kind(), error = %err);
			None
		}
	}
}

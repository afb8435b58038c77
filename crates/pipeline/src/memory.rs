//! The two shared-state planes a node's work function can reach for:
//! [`LocalMemory`], private to the worker that allocated it, and
//! [`SharedMemory`], visible to every node in the pipeline regardless of
//! isolation.

use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use ipc_channel::ipc::{self, IpcReceiver, IpcSender};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A key-value store scoped to a single worker.
///
/// Backed by a `DashMap` so concurrent readers inside one `TASK`-isolated
/// worker never contend on a single lock. Never shared across a process
/// boundary; a `PROCESS`-isolated node gets its own empty one.
#[derive(Default)]
pub struct LocalMemory {
	entries: DashMap<String, Value>,
}

impl LocalMemory {
	/// An empty local memory
	pub fn new() -> Self {
		Self::default()
	}

	/// Fetch a clone of the value stored under `key`, if any
	pub fn get(&self, key: &str) -> Option<Value> {
		self.entries.get(key).map(|v| v.clone())
	}

	/// Store `value` under `key`, returning whatever was there before
	pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
		self.entries.insert(key.into(), value)
	}

	/// Remove the value under `key`, if any
	pub fn remove(&self, key: &str) -> Option<Value> {
		self.entries.remove(key).map(|(_, v)| v)
	}

	/// Does this memory hold a value under `key`?
	pub fn contains(&self, key: &str) -> bool {
		self.entries.contains_key(key)
	}

	/// A snapshot of every key currently stored
	pub fn keys(&self) -> Vec<String> {
		self.entries.iter().map(|e| e.key().clone()).collect()
	}
}

/// A request sent to the shared-memory manager thread
#[derive(Debug, Serialize, Deserialize)]
pub enum SharedMemoryRequest {
	Get(String),
	Set(String, Value),
	Remove(String),
	Contains(String),
	Keys,
}

/// A reply from the shared-memory manager thread
#[derive(Debug, Serialize, Deserialize)]
pub enum SharedMemoryReply {
	Value(Option<Value>),
	Bool(bool),
	Keys(Vec<String>),
}

/// A handle to the manager channel a [`SharedMemory::remote`] bootstraps
/// from
pub type SharedMemoryBootstrap = IpcSender<(IpcSender<SharedMemoryReply>, SharedMemoryRequest)>;

/// A handle to the process-wide shared state plane.
///
/// Every `TASK`-isolated node talks to the same in-process [`DashMap`]
/// directly. Every `PROCESS`-isolated node instead holds an IPC channel
/// pair to a manager thread running in the root process, since a
/// `DashMap` cannot itself cross a process boundary.
pub enum SharedMemory {
	/// Direct access, for callers living in the root process
	Local(Arc<DashMap<String, Value>>),

	/// Request/response access over IPC, for a `PROCESS`-isolated node.
	///
	/// `send` and `recv` are locked together as one step: the manager
	/// thread replies to whichever `reply_tx` a request carried, so two
	/// callers racing a send ahead of each other's recv would otherwise
	/// risk reading back the other's reply.
	Remote(Mutex<RemoteChannel>),
}

/// One caller's request/response pair onto the shared-memory manager thread
pub struct RemoteChannel {
	bootstrap_tx: SharedMemoryBootstrap,
	reply_tx: IpcSender<SharedMemoryReply>,
	reply_rx: IpcReceiver<SharedMemoryReply>,
}

impl RemoteChannel {
	fn call(&self, request: SharedMemoryRequest) -> Option<SharedMemoryReply> {
		self.bootstrap_tx.send((self.reply_tx.clone(), request)).ok()?;
		self.reply_rx.recv().ok()
	}
}

static ROOT_STORE: OnceLock<Arc<DashMap<String, Value>>> = OnceLock::new();

fn root_store() -> Arc<DashMap<String, Value>> {
	ROOT_STORE.get_or_init(|| Arc::new(DashMap::new())).clone()
}

impl SharedMemory {
	/// A handle for a node living in the root process
	pub fn local() -> Self {
		Self::Local(root_store())
	}

	/// Spawn the manager thread that backs remote handles, returning a
	/// channel-pair source that [`SharedMemory::remote`] bootstraps from.
	///
	/// Called once by the root process before any `PROCESS`-isolated
	/// worker is spawned.
	pub fn spawn_manager() -> IpcSender<(IpcSender<SharedMemoryReply>, SharedMemoryRequest)> {
		let (bootstrap_tx, bootstrap_rx) =
			ipc::channel::<(IpcSender<SharedMemoryReply>, SharedMemoryRequest)>()
				.expect("failed to create shared-memory manager channel");

		std::thread::Builder::new()
			.name("conduit-shared-memory".into())
			.spawn(move || {
				let store = root_store();
				while let Ok((reply_tx, request)) = bootstrap_rx.recv() {
					let reply = match request {
						SharedMemoryRequest::Get(key) => {
							SharedMemoryReply::Value(store.get(&key).map(|v| v.clone()))
						}
						SharedMemoryRequest::Set(key, value) => {
							SharedMemoryReply::Value(store.insert(key, value))
						}
						SharedMemoryRequest::Remove(key) => {
							SharedMemoryReply::Value(store.remove(&key).map(|(_, v)| v))
						}
						SharedMemoryRequest::Contains(key) => {
							SharedMemoryReply::Bool(store.contains_key(&key))
						}
						SharedMemoryRequest::Keys => {
							SharedMemoryReply::Keys(store.iter().map(|e| e.key().clone()).collect())
						}
					};
					let _ = reply_tx.send(reply);
				}
			})
			.expect("failed to spawn shared-memory manager thread");

		bootstrap_tx
	}

	/// Build a remote handle out of a manager's bootstrap sender. Called
	/// once inside a `PROCESS`-isolated worker after it starts.
	pub fn remote(bootstrap_tx: SharedMemoryBootstrap) -> Self {
		let (reply_tx, reply_rx) = ipc::channel().expect("failed to create shared-memory reply channel");
		Self::Remote(Mutex::new(RemoteChannel {
			bootstrap_tx,
			reply_tx,
			reply_rx,
		}))
	}

	/// Fetch a clone of the value stored under `key`, if any
	pub fn get(&self, key: &str) -> Option<Value> {
		match self {
			Self::Local(store) => store.get(key).map(|v| v.clone()),
			Self::Remote(chan) => match chan.lock().unwrap().call(SharedMemoryRequest::Get(key.to_string()))? {
				SharedMemoryReply::Value(v) => v,
				_ => None,
			},
		}
	}

	/// Store `value` under `key`, returning whatever was there before
	pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
		let key = key.into();
		match self {
			Self::Local(store) => store.insert(key, value),
			Self::Remote(chan) => match chan.lock().unwrap().call(SharedMemoryRequest::Set(key, value))? {
				SharedMemoryReply::Value(v) => v,
				_ => None,
			},
		}
	}

	/// Remove the value under `key`, if any
	pub fn remove(&self, key: &str) -> Option<Value> {
		match self {
			Self::Local(store) => store.remove(key).map(|(_, v)| v),
			Self::Remote(chan) => {
				match chan.lock().unwrap().call(SharedMemoryRequest::Remove(key.to_string()))? {
					SharedMemoryReply::Value(v) => v,
					_ => None,
				}
			}
		}
	}

	/// Does the shared memory hold a value under `key`?
	pub fn contains(&self, key: &str) -> bool {
		match self {
			Self::Local(store) => store.contains_key(key),
			Self::Remote(chan) => matches!(
				chan.lock().unwrap().call(SharedMemoryRequest::Contains(key.to_string())),
				Some(SharedMemoryReply::Bool(true))
			),
		}
	}

	/// A snapshot of every key currently stored
	pub fn keys(&self) -> Vec<String> {
		match self {
			Self::Local(store) => store.iter().map(|e| e.key().clone()).collect(),
			Self::Remote(chan) => match chan.lock().unwrap().call(SharedMemoryRequest::Keys) {
				Some(SharedMemoryReply::Keys(keys)) => keys,
				_ => Vec::new(),
			},
		}
	}
}

static LOCAL_SINGLETON: OnceLock<LocalMemory> = OnceLock::new();
static SHARED_SINGLETON: OnceLock<SharedMemory> = OnceLock::new();

/// This worker's process-singleton [`LocalMemory`]. Lazily initialized;
/// the `OnceLock` is the single mutual-exclusion primitive that
/// resolves any initialization race between concurrent first callers.
pub fn local() -> &'static LocalMemory {
	LOCAL_SINGLETON.get_or_init(LocalMemory::new)
}

/// This process's handle onto the pipeline-wide [`SharedMemory`] plane.
///
/// Panics if neither [`init_shared_local`] nor [`init_shared_remote`]
/// has run yet — one of them must be called once at worker startup,
/// before any node's work function can reach for shared state.
pub fn shared() -> &'static SharedMemory {
	SHARED_SINGLETON
		.get()
		.expect("shared memory accessed before init_shared_local/init_shared_remote")
}

/// Initialize the shared-memory plane for a worker living in the root
/// process. A no-op if already initialized.
pub fn init_shared_local() {
	let _ = SHARED_SINGLETON.set(SharedMemory::local());
}

/// Initialize the shared-memory plane for a `PROCESS`-isolated worker,
/// out of the manager bootstrap sender it received at spawn time. A
/// no-op if already initialized.
pub fn init_shared_remote(bootstrap_tx: SharedMemoryBootstrap) {
	let _ = SHARED_SINGLETON.set(SharedMemory::remote(bootstrap_tx));
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn local_memory_roundtrips() {
		let mem = LocalMemory::new();
		assert!(mem.get("k").is_none());
		mem.set("k", Value::from(1));
		assert_eq!(mem.get("k"), Some(Value::from(1)));
		assert!(mem.contains("k"));
		mem.remove("k");
		assert!(!mem.contains("k"));
	}

	#[test]
	fn local_shared_memory_roundtrips() {
		let mem = SharedMemory::Local(Arc::new(DashMap::new()));
		mem.set("heartbeat", Value::from(42));
		assert_eq!(mem.get("heartbeat"), Some(Value::from(42)));
		assert!(mem.contains("heartbeat"));
		assert_eq!(mem.keys(), vec!["heartbeat".to_string()]);
	}

	#[test]
	fn remote_shared_memory_roundtrips_through_manager_thread() {
		let bootstrap = SharedMemory::spawn_manager();
		let mem = SharedMemory::remote(bootstrap);
		assert!(mem.get("k").is_none());
		mem.set("k", Value::from("v"));
		assert_eq!(mem.get("k"), Some(Value::from("v")));
		assert!(mem.contains("k"));
		assert!(mem.keys().contains(&"k".to_string()));
		mem.remove("k");
		assert!(!mem.contains("k"));
	}
}

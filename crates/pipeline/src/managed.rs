//! A uniform handle onto a running node, regardless of isolation — what
//! the supervisor, the liveness monitor, and the metrics endpoint
//! actually need to see.

use std::sync::Arc;

use conduit_util::NodeName;

use crate::{metrics::MetricsSnapshot, node::NodeHandle, node::NodeStatus, remote_node::RemoteNode};

/// Either a `TASK`-isolated node running as a thread in this process, or
/// a `PROCESS`-isolated node running in a child spawned by
/// [`crate::worker::ProcessWorker`].
///
/// `Local` shares the same `Arc<NodeHandle>` the node's own thread runs
/// against, so `status()`/`drain()` read and write the real thing
/// directly. `Remote` goes through shared memory, since the handle
/// itself lives in another process's address space.
#[derive(Clone)]
pub enum ManagedNode {
	/// A node running as a thread in this process
	Local(Arc<NodeHandle>),
	/// A node running in its own OS process
	Remote(RemoteNode),
}

impl ManagedNode {
	/// This node's name
	pub fn name(&self) -> &NodeName {
		match self {
			Self::Local(handle) => handle.name(),
			Self::Remote(remote) => remote.name(),
		}
	}

	/// This node's current status
	pub fn status(&self) -> NodeStatus {
		match self {
			Self::Local(handle) => handle.status().get(),
			Self::Remote(remote) => remote.status(),
		}
	}

	/// Request this node's termination. Idempotent either way: a local
	/// handle's `drain` is guarded by an atomic swap, and a remote
	/// node's drain request is just setting a flag that's harmless to
	/// set twice.
	pub fn drain(&self) {
		match self {
			Self::Local(handle) => handle.drain(),
			Self::Remote(remote) => remote.drain(),
		}
	}

	/// A snapshot of this node's metrics
	pub fn metrics_snapshot(&self) -> MetricsSnapshot {
		match self {
			Self::Local(handle) => handle.metrics().snapshot(),
			Self::Remote(remote) => remote.metrics_snapshot(),
		}
	}
}

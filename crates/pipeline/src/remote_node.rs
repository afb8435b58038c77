//! The root process's view onto a `PROCESS`-isolated node.
//!
//! A node spawned by [`crate::worker::ProcessWorker`] builds its own
//! [`crate::node::NodeHandle`] inside the child; the root never sees it.
//! Instead the supervisor, liveness monitor, and metrics endpoint watch
//! the status and metrics the child mirrors into shared memory (see
//! `NodeHandle::set_status` and the metrics mirror in `node::run`), and
//! request termination the same way.

use conduit_util::NodeName;

use crate::{
	memory,
	metrics::MetricsSnapshot,
	node::{self, NodeStatus},
};

/// A handle onto a `PROCESS`-isolated node, from the root process's side.
#[derive(Debug, Clone)]
pub struct RemoteNode {
	name: NodeName,
}

impl RemoteNode {
	/// Build a remote handle for the node named `name`. Valid only once
	/// the shared-memory plane has been initialized (the builder always
	/// does this before spawning any `PROCESS` worker).
	pub fn new(name: NodeName) -> Self {
		Self { name }
	}

	/// This node's name
	pub fn name(&self) -> &NodeName {
		&self.name
	}

	/// The node's last-mirrored status. `PENDING` if the child hasn't
	/// written one yet (it hasn't started, or shared memory hasn't
	/// propagated the write).
	pub fn status(&self) -> NodeStatus {
		match memory::shared().get(&node::status_key(&self.name)) {
			Some(serde_json::Value::String(s)) => node::parse_status_label(&s),
			_ => NodeStatus::Pending,
		}
	}

	/// Ask the node to terminate. Cooperative: the child notices this
	/// flag at the top of its next iteration and drains itself.
	pub fn drain(&self) {
		memory::shared().set(node::terminate_key(&self.name), serde_json::Value::Bool(true));
	}

	/// The node's last-mirrored metrics snapshot, if it has run at least
	/// one iteration.
	pub fn metrics_snapshot(&self) -> MetricsSnapshot {
		memory::shared()
			.get(&node::metrics_key(&self.name))
			.and_then(|v| serde_json::from_value(v).ok())
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_node_defaults_to_pending_with_no_mirrored_status() {
		memory::init_shared_local();
		let node = RemoteNode::new(NodeName::new("ghost"));
		assert_eq!(node.status(), NodeStatus::Pending);
		assert_eq!(node.metrics_snapshot().iterations, 0);
	}

	#[test]
	fn remote_node_reflects_mirrored_status_and_drain_request() {
		memory::init_shared_local();
		let name = NodeName::new("mirrored");
		memory::shared().set(node::status_key(&name), serde_json::Value::from("alive"));
		let remote = RemoteNode::new(name.clone());
		assert_eq!(remote.status(), NodeStatus::Alive);

		remote.drain();
		assert!(memory::shared().contains(&node::terminate_key(&name)));
	}
}

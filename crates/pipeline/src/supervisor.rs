//! The watchdog: a node like any other, whose work function watches
//! every other node's status instead of processing batches.
//!
//! Grounded directly on `original_source/pipez/core/watchdog.py`'s
//! `WatchDog(Node)`: no input or output ports, a periodic `processing`
//! call (driven by the ordinary node timeout) that writes a heartbeat,
//! checks whether the pipeline finished on its own, and drains every
//! node the moment any one of them is found `TERMINATED`.

use serde_json::Value;

use crate::{
	batch::Batch,
	errors::NodeError,
	managed::ManagedNode,
	memory,
	node::{NodeLogic, NodeStatus},
};

/// Shared-memory key the watchdog writes its heartbeat timestamp under.
/// The liveness monitor (4.H) watches this same key from outside the
/// pipeline's own process tree.
pub const HEARTBEAT_KEY: &str = "conduit:watchdog:heartbeat";

/// The supervisor's work function: polls every managed node's status on
/// each iteration, and decides whether the pipeline is done.
pub struct Watchdog {
	nodes: Vec<ManagedNode>,
}

impl Watchdog {
	/// Watch `nodes` (every node the builder started, not including the
	/// watchdog itself)
	pub fn new(nodes: Vec<ManagedNode>) -> Self {
		Self { nodes }
	}

	fn write_heartbeat(&self) {
		let now = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs_f64();
		memory::shared().set(HEARTBEAT_KEY, Value::from(now));
	}
}

impl NodeLogic for Watchdog {
	fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		self.write_heartbeat();

		if self.nodes.iter().all(|n| n.status() == NodeStatus::Completed) {
			tracing::info!("watchdog: every node completed, shutting down");
			return Ok(Some(Batch::last()));
		}

		if let Some(failed) = self.nodes.iter().find(|n| n.status() == NodeStatus::Terminated) {
			tracing::error!(node = %failed.name(), "watchdog: node terminated, draining pipeline");
			for node in &self.nodes {
				node.drain();
			}
			return Ok(Some(Batch::last()));
		}

		Ok(None)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::NodeHandle;
	use conduit_util::NodeName;
	use std::sync::Arc;

	/// A bare handle, optionally pre-drained to `TERMINATED`. `Pending`
	/// is the only other status reachable without running the node's
	/// loop, which is exactly what the watchdog sees for a node that
	/// hasn't started iterating yet.
	fn node_with_status(name: &str, status: NodeStatus) -> ManagedNode {
		let handle = NodeHandle::new(
			NodeName::new(name),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			std::time::Duration::ZERO,
			0,
			0,
			None,
			false,
		);
		if status == NodeStatus::Terminated {
			handle.drain();
		}
		ManagedNode::Local(Arc::new(handle))
	}

	#[test]
	fn continues_while_any_node_is_still_alive() {
		memory::init_shared_local();
		let nodes = vec![node_with_status("a", NodeStatus::Pending)];
		let mut watchdog = Watchdog::new(nodes);
		assert!(watchdog.processing(None).unwrap().is_none());
	}

	struct FinishImmediately;
	impl NodeLogic for FinishImmediately {
		fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
			Ok(Some(Batch::last()))
		}
	}

	#[test]
	fn completes_once_every_node_has_completed() {
		memory::init_shared_local();
		let handle = Arc::new(NodeHandle::new(
			NodeName::new("done"),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			std::time::Duration::ZERO,
			0,
			0,
			None,
			false,
		));
		let status = handle.status();
		crate::node::run(handle.clone(), Box::new(FinishImmediately));
		assert_eq!(status.get(), NodeStatus::Completed);

		let nodes = vec![ManagedNode::Local(handle)];
		let mut watchdog = Watchdog::new(nodes);
		let out = watchdog.processing(None).unwrap();
		assert!(out.unwrap().is_last());
	}

	#[test]
	fn drains_every_node_when_one_terminates() {
		memory::init_shared_local();
		let a = node_with_status("a", NodeStatus::Pending);
		let b = node_with_status("b", NodeStatus::Terminated);
		let nodes = vec![a.clone(), b];
		let mut watchdog = Watchdog::new(nodes);
		let out = watchdog.processing(None).unwrap();
		assert!(out.unwrap().is_last());
		assert_eq!(a.status(), NodeStatus::Terminated);
	}
}

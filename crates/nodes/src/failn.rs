//! A fault-injecting node: raises on its first `fail_count` invocations of
//! a given input, then forwards that input successfully.
//!
//! Exists to exercise `conduit-pipeline`'s retry/restart policy (spec.md
//! 4.E.5) against a real registered node rather than only the policy's own
//! unit tests; used by the daemon's example pipeline and by integration
//! tests that need a deterministic, configurable failure.

use std::sync::atomic::{AtomicU32, Ordering};

use conduit_pipeline::{batch::Batch, errors::NodeError, node::NodeLogic};

/// Fails the first `fail_count` times `processing` is called, then
/// forwards its input unchanged.
pub struct FailN {
	fail_count: u32,
	attempts: AtomicU32,
}

impl FailN {
	/// A node that raises on its first `fail_count` invocations, then
	/// passes its input through
	pub fn new(fail_count: u32) -> Self {
		Self {
			fail_count,
			attempts: AtomicU32::new(0),
		}
	}
}

impl NodeLogic for FailN {
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
		if attempt < self.fail_count {
			return Err(NodeError::WorkFunction(format!(
				"FailN: simulated failure {} of {}",
				attempt + 1,
				self.fail_count
			)));
		}
		Ok(input)
	}

	fn close(&mut self) {
		self.attempts.store(0, Ordering::SeqCst);
	}
}

pub(crate) fn register() {
	conduit_pipeline::registry::register(
		"conduit.FailN",
		Box::new(|args| {
			let fail_count = args.get("fail_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
			Ok(Box::new(FailN::new(fail_count)) as Box<dyn NodeLogic>)
		}),
	);
}

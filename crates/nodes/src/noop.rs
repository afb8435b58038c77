//! The simplest possible node: forwards its input unchanged.
//!
//! Grounded on `original_source/pipez/nodes/dummy.py`'s `DummyNode` in
//! spirit (a minimal `Registry`-backed node with no real work to do), but
//! without the random early-termination behavior — that's `FailN`'s job.

use conduit_pipeline::{batch::Batch, errors::NodeError, node::NodeLogic};

/// Passes its input straight through to its output, unchanged.
pub struct Noop;

impl NodeLogic for Noop {
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		Ok(input)
	}
}

pub(crate) fn register() {
	conduit_pipeline::registry::register(
		"conduit.Noop",
		Box::new(|_args| Ok(Box::new(Noop) as Box<dyn NodeLogic>)),
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use conduit_pipeline::batch::Record;

	#[test]
	fn forwards_ok_batches_unchanged() {
		let mut noop = Noop;
		let input = Batch::ok_records(vec![Record::new()]);
		let output = noop.processing(Some(input)).unwrap().unwrap();
		assert!(output.is_ok());
		assert_eq!(output.len(), 1);
	}

	#[test]
	fn forwards_last_unchanged() {
		let mut noop = Noop;
		let output = noop.processing(Some(Batch::last())).unwrap().unwrap();
		assert!(output.is_last());
	}
}

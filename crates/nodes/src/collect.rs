//! A sink node that appends every record it sees into a `LocalMemory` list,
//! under a configured key.
//!
//! Grounded on the "Linear OK→LAST" scenario in spec.md section 8 ("Sink
//! appends all received records"), and on `conduit_pipeline::memory`'s
//! local plane (4.C): since a sink has no output ports, the only way to
//! observe what it received from outside its own worker is through shared
//! state.

use conduit_pipeline::{batch::Batch, errors::NodeError, memory, node::NodeLogic};
use serde_json::Value;

/// Appends every record it receives to a list under `key` in this worker's
/// `LocalMemory`. Has no outputs.
pub struct Collect {
	key: String,
}

impl Collect {
	/// A sink that accumulates records under `key` in local memory
	pub fn new(key: impl Into<String>) -> Self {
		Self { key: key.into() }
	}
}

impl NodeLogic for Collect {
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		let Some(batch) = input else {
			return Ok(None);
		};
		if !batch.is_ok() {
			return Ok(None);
		}

		let mut collected = memory::local()
			.get(&self.key)
			.and_then(|v| v.as_array().cloned())
			.unwrap_or_default();
		collected.extend(batch.iter().map(|r| Value::Object(r.clone())));
		memory::local().set(self.key.clone(), Value::Array(collected));

		Ok(None)
	}
}

pub(crate) fn register() {
	conduit_pipeline::registry::register(
		"conduit.Collect",
		Box::new(|args| {
			let key = args
				.get("key")
				.and_then(|v| v.as_str())
				.ok_or_else(|| "conduit.Collect requires a `key` string argument".to_string())?
				.to_string();
			Ok(Box::new(Collect::new(key)) as Box<dyn NodeLogic>)
		}),
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use conduit_pipeline::batch::Record;

	#[test]
	fn accumulates_records_across_iterations() {
		let mut sink = Collect::new("collect::test::accumulates");
		let mut r1 = Record::new();
		r1.insert("x".into(), Value::from(1));
		sink.processing(Some(Batch::ok_records(vec![r1]))).unwrap();

		let mut r2 = Record::new();
		r2.insert("x".into(), Value::from(2));
		sink.processing(Some(Batch::ok_records(vec![r2]))).unwrap();

		let collected = memory::local().get("collect::test::accumulates").unwrap();
		assert_eq!(collected.as_array().unwrap().len(), 2);
	}

	#[test]
	fn has_no_output() {
		let mut sink = Collect::new("collect::test::no_output");
		let out = sink
			.processing(Some(Batch::ok_records(vec![Record::new()])))
			.unwrap();
		assert!(out.is_none());
	}
}

//! End-to-end scenario: two independent sources feed a single consumer
//! with ports `["a", "b"]`. The consumer should see each pair
//! zip-synchronized into one record keyed by port name, in order, then
//! LAST.

use std::sync::{Arc, Mutex};

use conduit_pipeline::{
	batch::{Batch, Record},
	errors::NodeError,
	isolation::Isolation,
	node::NodeLogic,
	registry::ConfigRecord,
	PipelineBuilder,
};
use conduit_util::{NodeName, PortName};
use serde_json::Value;

struct FixedSource {
	batches: Vec<Vec<i64>>,
	field: &'static str,
	position: usize,
}

impl NodeLogic for FixedSource {
	fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		if self.position >= self.batches.len() {
			return Ok(Some(Batch::last()));
		}
		let values = &self.batches[self.position];
		self.position += 1;
		let records = values
			.iter()
			.map(|v| {
				let mut r = Record::new();
				r.insert(self.field.to_string(), Value::from(*v));
				r
			})
			.collect();
		Ok(Some(Batch::ok_records(records)))
	}
}

struct RecordingZipConsumer {
	seen: Arc<Mutex<Vec<Record>>>,
}
impl NodeLogic for RecordingZipConsumer {
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		if let Some(batch) = &input {
			if batch.is_ok() {
				self.seen.lock().unwrap().extend(batch.iter().cloned());
			}
		}
		Ok(None)
	}
}

fn record(name: &str, input: &[&str], output: &[&str]) -> ConfigRecord {
	ConfigRecord {
		cls: "test".to_string(),
		name: NodeName::new(name),
		isolation: Isolation::Task,
		input: input.iter().map(|p| PortName::new(p)).collect(),
		output: output.iter().map(|p| PortName::new(p)).collect(),
		timeout_ms: 0,
		max_retries: 0,
		max_restarts: 0,
		collector_flag: None,
		args: serde_json::Map::new(),
	}
}

#[test]
fn zip_synchronized_records_are_keyed_by_port_name_in_order() {
	let seen = Arc::new(Mutex::new(Vec::new()));

	let built = PipelineBuilder::new()
		.queue_capacity(8)
		.add_node(conduit_pipeline::builder::NodeSpec::new(
			record("source_a", &[], &["a"]),
			Box::new(FixedSource {
				batches: vec![vec![1, 2]],
				field: "x",
				position: 0,
			}),
		))
		.add_node(conduit_pipeline::builder::NodeSpec::new(
			record("source_b", &[], &["b"]),
			Box::new(FixedSource {
				batches: vec![vec![10, 20]],
				field: "y",
				position: 0,
			}),
		))
		.add_node(conduit_pipeline::builder::NodeSpec::new(
			record("consumer", &["a", "b"], &[]),
			Box::new(RecordingZipConsumer { seen: seen.clone() }),
		))
		.build()
		.unwrap();

	let supervisor = built.start();
	supervisor.join();

	let seen = seen.lock().unwrap();
	assert_eq!(seen.len(), 2);

	let first_a = seen[0].get("a").unwrap().as_object().unwrap();
	let first_b = seen[0].get("b").unwrap().as_object().unwrap();
	assert_eq!(first_a.get("x"), Some(&Value::from(1)));
	assert_eq!(first_b.get("y"), Some(&Value::from(10)));

	let second_a = seen[1].get("a").unwrap().as_object().unwrap();
	let second_b = seen[1].get("b").unwrap().as_object().unwrap();
	assert_eq!(second_a.get("x"), Some(&Value::from(2)));
	assert_eq!(second_b.get("y"), Some(&Value::from(20)));
}

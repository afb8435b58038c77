//! End-to-end scenario: a source emits 3 OK batches of 2 records each,
//! then LAST; a middle node identity-copies; a sink appends everything it
//! receives. Every downstream node, and the supervisor, ends COMPLETED.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc, Mutex,
};

use conduit_pipeline::{
	batch::{Batch, Record},
	errors::NodeError,
	isolation::Isolation,
	node::{NodeLogic, NodeStatus},
	registry::ConfigRecord,
	PipelineBuilder,
};
use conduit_util::{NodeName, PortName};
use serde_json::Value;

struct CountingSource {
	batches_remaining: usize,
	next_id: usize,
}

impl NodeLogic for CountingSource {
	fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		if self.batches_remaining == 0 {
			return Ok(Some(Batch::last()));
		}
		self.batches_remaining -= 1;

		let mut records = Vec::new();
		for _ in 0..2 {
			let mut r = Record::new();
			r.insert("id".to_string(), Value::from(self.next_id));
			self.next_id += 1;
			records.push(r);
		}
		Ok(Some(Batch::ok_records(records)))
	}
}

struct Identity;
impl NodeLogic for Identity {
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		Ok(input)
	}
}

struct AppendingSink {
	collected: Arc<Mutex<Vec<i64>>>,
	count: Arc<AtomicUsize>,
}
impl NodeLogic for AppendingSink {
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		if let Some(batch) = &input {
			if batch.is_ok() {
				let mut collected = self.collected.lock().unwrap();
				for record in batch.iter() {
					collected.push(record.get("id").and_then(Value::as_i64).unwrap_or(-1));
					self.count.fetch_add(1, Ordering::SeqCst);
				}
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
fn linear_pipeline_delivers_every_record_in_order_and_completes() {
	let collected = Arc::new(Mutex::new(Vec::new()));
	let count = Arc::new(AtomicUsize::new(0));

	let built = PipelineBuilder::new()
		.queue_capacity(8)
		.add_node(conduit_pipeline::builder::NodeSpec::new(
			record("source", &[], &["raw"]),
			Box::new(CountingSource {
				batches_remaining: 3,
				next_id: 0,
			}),
		))
		.add_node(conduit_pipeline::builder::NodeSpec::new(
			record("middle", &["raw"], &["copied"]),
			Box::new(Identity),
		))
		.add_node(conduit_pipeline::builder::NodeSpec::new(
			record("sink", &["copied"], &[]),
			Box::new(AppendingSink {
				collected: collected.clone(),
				count: count.clone(),
			}),
		))
		.build()
		.unwrap();

	let supervisor = built.start();
	supervisor.join();

	assert_eq!(count.load(Ordering::SeqCst), 6);
	assert_eq!(*collected.lock().unwrap(), (0..6).collect::<Vec<_>>());

	for node in supervisor.nodes() {
		if node.name().to_string() == "middle" || node.name().to_string() == "sink" {
			assert_eq!(node.status(), NodeStatus::Completed, "{} should complete", node.name());
		}
	}
}

//! Turning a list of hydrated nodes into a runnable pipeline: work out
//! one queue per port, wire each node's declared ports to it, and hand
//! back something `start()`-able.
//!
//! Grounded on `original_source/pipez/build.py`'s `validate_pipeline` +
//! `build_pipeline`: resolve each node's ports against a `queues` map
//! keyed by port name, pick `INTER` vs `INTRA` per node isolation,
//! attach, then start everything in declared order followed by the
//! watchdog.

use std::{collections::HashMap, sync::Arc, time::Duration};

use conduit_util::{NodeName, PortName};

use crate::{
	errors::BuilderError,
	isolation::Isolation,
	managed::ManagedNode,
	memory::{self, SharedMemory},
	node::{NodeHandle, NodeLogic},
	queue::{inter_pair, IntraQueue, InterQueueConsumer, InterQueueProducer, Queue},
	registry::ConfigRecord,
	remote_node::RemoteNode,
	supervisor::Watchdog,
	worker::{NodeBootstrap, ProcessWorker, SerializableRecord, TaskWorker, Worker},
};

/// Default queue capacity, used when a pipeline spec doesn't override it.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default interval between watchdog heartbeats.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// One node, ready to be wired into a pipeline: its configuration record
/// (ports, isolation, retry policy) plus its already-hydrated logic.
pub struct NodeSpec {
	pub record: ConfigRecord,
	pub logic: Box<dyn NodeLogic>,
}

impl NodeSpec {
	/// Pair a configuration record with the logic `registry::hydrate`
	/// built from it (or any other `NodeLogic`, for callers that build
	/// nodes without the registry).
	pub fn new(record: ConfigRecord, logic: Box<dyn NodeLogic>) -> Self {
		Self { record, logic }
	}
}

/// Collects node specs in declaration order and builds the queues and
/// handles that connect them.
#[derive(Default)]
pub struct PipelineBuilder {
	specs: Vec<NodeSpec>,
	queue_capacity: usize,
	watchdog_interval: Duration,
	liveness_threshold: Option<Duration>,
}

/// A built, not-yet-started pipeline: every queue allocated, every
/// `TASK`-isolated node's handle constructed, every `PROCESS`-isolated
/// node's bootstrap payload assembled. Call [`BuiltPipeline::start`] to
/// actually spawn workers.
pub struct BuiltPipeline {
	task_nodes: Vec<(Arc<NodeHandle>, Box<dyn NodeLogic>)>,
	process_nodes: Vec<(NodeName, NodeBootstrap)>,
	liveness_bootstrap: Option<(NodeName, NodeBootstrap)>,
	watchdog_interval: Duration,
}

/// The running pipeline: every node's status/metrics reachable from the
/// outside, and something to block on until it's done.
///
/// The liveness monitor, if enabled, is deliberately not one of
/// [`Self::nodes`]: it never reaches a terminal status on its own (its
/// whole job is to watch forever), so folding it into the watchdog's
/// "has everything completed" check would mean a clean pipeline never
/// finishes. [`Self::shutdown`] still reaches it.
pub struct SupervisorHandle {
	nodes: Vec<ManagedNode>,
	workers: std::sync::Mutex<Option<Vec<Box<dyn Worker>>>>,
	liveness: Option<RemoteNode>,
	liveness_worker: std::sync::Mutex<Option<Box<dyn Worker>>>,
}

impl SupervisorHandle {
	/// Every node the supervisor watches, in the order they were declared
	/// (the watchdog and the liveness monitor are not included).
	pub fn nodes(&self) -> &[ManagedNode] {
		&self.nodes
	}

	/// Look up one node by name
	pub fn node(&self, name: &NodeName) -> Option<&ManagedNode> {
		self.nodes.iter().find(|n| n.name() == name)
	}

	/// Block until every node (and the watchdog) has reached a terminal
	/// status. Safe to call at most once; a second call is a no-op. Does
	/// not wait on the liveness monitor, which never exits on its own —
	/// call [`Self::shutdown`] afterward to also stop it.
	pub fn join(&self) {
		if let Some(workers) = self.workers.lock().unwrap().take() {
			for worker in workers {
				worker.join();
			}
		}
	}

	/// Force every node to terminate, as if the watchdog had detected a
	/// fault, and stop the liveness monitor. Idempotent. Blocks until the
	/// liveness monitor's process has actually exited.
	pub fn shutdown(&self) {
		for node in &self.nodes {
			node.drain();
		}
		if let Some(liveness) = &self.liveness {
			liveness.drain();
		}
		if let Some(worker) = self.liveness_worker.lock().unwrap().take() {
			worker.join();
		}
	}
}

impl PipelineBuilder {
	/// An empty builder with default queue capacity and watchdog interval
	pub fn new() -> Self {
		Self {
			specs: Vec::new(),
			queue_capacity: DEFAULT_QUEUE_CAPACITY,
			watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
			liveness_threshold: None,
		}
	}

	/// Add a `PROCESS`-isolated liveness monitor (4.H) that sends
	/// `SIGTERM` to pid 1 if the watchdog's heartbeat goes stale for
	/// longer than `stall_threshold`. Off by default — only meaningful
	/// when this pipeline is itself pid 1 in its container.
	pub fn liveness_monitor(mut self, stall_threshold: Duration) -> Self {
		self.liveness_threshold = Some(stall_threshold);
		self
	}

	/// Override the default capacity for every queue this builder allocates
	pub fn queue_capacity(mut self, capacity: usize) -> Self {
		self.queue_capacity = capacity;
		self
	}

	/// Override how often the watchdog polls node status
	pub fn watchdog_interval(mut self, interval: Duration) -> Self {
		self.watchdog_interval = interval;
		self
	}

	/// Append a node, in the order it should be started
	pub fn add_node(mut self, spec: NodeSpec) -> Self {
		self.specs.push(spec);
		self
	}

	/// Validate the port graph, allocate queues, and construct every
	/// node's handle (or bootstrap payload, for `PROCESS`-isolated
	/// nodes). Does not start anything; call [`BuiltPipeline::start`] on
	/// the result for that.
	pub fn build(self) -> Result<BuiltPipeline, BuilderError> {
		if self.specs.is_empty() {
			return Err(BuilderError::EmptyPipeline);
		}

		let mut producers: HashMap<PortName, NodeName> = HashMap::new();
		let mut consumers: HashMap<PortName, NodeName> = HashMap::new();
		for spec in &self.specs {
			for port in &spec.record.output {
				if producers.insert(port.clone(), spec.record.name.clone()).is_some() {
					return Err(BuilderError::PortWithMultipleProducers { port: port.clone() });
				}
			}
			for port in &spec.record.input {
				if consumers.insert(port.clone(), spec.record.name.clone()).is_some() {
					return Err(BuilderError::PortWithMultipleConsumers { port: port.clone() });
				}
			}
		}
		for port in consumers.keys() {
			if !producers.contains_key(port) {
				return Err(BuilderError::PortWithoutProducer { port: port.clone() });
			}
		}

		let isolation_of: HashMap<NodeName, Isolation> = self
			.specs
			.iter()
			.map(|s| (s.record.name.clone(), s.record.isolation))
			.collect();

		let has_process_node = self.specs.iter().any(|s| s.record.isolation == Isolation::Process)
			|| self.liveness_threshold.is_some();
		let shared_bootstrap = if has_process_node {
			let bootstrap = SharedMemory::spawn_manager();
			memory::init_shared_local();
			Some(bootstrap)
		} else {
			memory::init_shared_local();
			None
		};

		// Per-port queue allocation: TASK-side handles attach directly as
		// `Arc<dyn Queue>`; PROCESS-side handles keep the raw wire, since
		// it has to travel inside that node's bootstrap payload instead.
		let mut task_output: HashMap<(NodeName, PortName), Arc<dyn Queue>> = HashMap::new();
		let mut task_input: HashMap<(NodeName, PortName), Arc<dyn Queue>> = HashMap::new();
		let mut process_output: HashMap<(NodeName, PortName), crate::queue::InterProducerWire> = HashMap::new();
		let mut process_input: HashMap<(NodeName, PortName), crate::queue::InterConsumerWire> = HashMap::new();

		let all_ports: std::collections::HashSet<PortName> =
			producers.keys().chain(consumers.keys()).cloned().collect();

		for port in all_ports {
			let producer = producers.get(&port).expect("every port has a producer by now").clone();
			let consumer = consumers.get(&port).cloned();
			let producer_isolation = isolation_of[&producer];
			let consumer_isolation = consumer.as_ref().map(|c| isolation_of[c]);

			let inter = producer_isolation == Isolation::Process
				|| consumer_isolation == Some(Isolation::Process);

			if !inter {
				let q = IntraQueue::new(port.clone(), self.queue_capacity);
				task_output.insert((producer.clone(), port.clone()), q.clone());
				if let Some(consumer) = &consumer {
					task_input.insert((consumer.clone(), port.clone()), q);
				}
				continue;
			}

			let (producer_wire, consumer_wire) = inter_pair(port.clone(), self.queue_capacity);
			match producer_isolation {
				Isolation::Task => {
					task_output.insert((producer.clone(), port.clone()), InterQueueProducer::from_wire(producer_wire));
				}
				Isolation::Process => {
					process_output.insert((producer.clone(), port.clone()), producer_wire);
				}
			}
			if let Some(consumer) = consumer {
				match consumer_isolation.expect("consumer isolation looked up alongside consumer") {
					Isolation::Task => {
						task_input.insert((consumer.clone(), port.clone()), InterQueueConsumer::from_wire(consumer_wire));
					}
					Isolation::Process => {
						process_input.insert((consumer.clone(), port.clone()), consumer_wire);
					}
				}
			}
		}

		let mut task_nodes = Vec::new();
		let mut process_nodes = Vec::new();

		for spec in self.specs {
			let record = spec.record;
			match record.isolation {
				Isolation::Task => {
					let input_queues = record
						.input
						.iter()
						.map(|p| {
							task_input
								.remove(&(record.name.clone(), p.clone()))
								.expect("input queue allocated for every declared port")
						})
						.collect();
					let output_queues = record
						.output
						.iter()
						.map(|p| {
							task_output
								.remove(&(record.name.clone(), p.clone()))
								.expect("output queue allocated for every declared port")
						})
						.collect();

					let handle = NodeHandle::new(
						record.name,
						record.input,
						record.output,
						input_queues,
						output_queues,
						Duration::from_millis(record.timeout_ms),
						record.max_retries,
						record.max_restarts,
						record.collector_flag,
						false,
					);
					task_nodes.push((Arc::new(handle), spec.logic));
				}
				Isolation::Process => {
					let input_queues = record
						.input
						.iter()
						.map(|p| {
							process_input
								.remove(&(record.name.clone(), p.clone()))
								.expect("input wire allocated for every declared port")
						})
						.collect();
					let output_queues = record
						.output
						.iter()
						.map(|p| {
							process_output
								.remove(&(record.name.clone(), p.clone()))
								.expect("output wire allocated for every declared port")
						})
						.collect();

					let bootstrap = NodeBootstrap {
						name: record.name.clone(),
						record: SerializableRecord::from(&ConfigRecord {
							cls: record.cls,
							name: record.name.clone(),
							isolation: Isolation::Process,
							input: record.input.clone(),
							output: record.output.clone(),
							timeout_ms: record.timeout_ms,
							max_retries: record.max_retries,
							max_restarts: record.max_restarts,
							collector_flag: record.collector_flag.clone(),
							args: record.args,
						}),
						input_ports: record.input,
						output_ports: record.output,
						input_queues,
						output_queues,
						timeout_ms: record.timeout_ms,
						max_retries: record.max_retries,
						max_restarts: record.max_restarts,
						collector_flag: record.collector_flag,
						shared_memory_bootstrap: shared_bootstrap
							.clone()
							.expect("a PROCESS-isolated node always implies a shared-memory manager"),
					};
					process_nodes.push((record.name, bootstrap));
				}
			}
		}

		let liveness_bootstrap = self.liveness_threshold.map(|threshold| {
			crate::liveness::register();
			let name = NodeName::new("liveness-monitor");
			let mut args = serde_json::Map::new();
			args.insert("stall_threshold_secs".to_string(), serde_json::Value::from(threshold.as_secs_f64()));
			let bootstrap = NodeBootstrap {
				name: name.clone(),
				record: SerializableRecord {
					cls: "conduit.internal.LivenessMonitor".to_string(),
					args,
				},
				input_ports: Vec::new(),
				output_ports: Vec::new(),
				input_queues: Vec::new(),
				output_queues: Vec::new(),
				timeout_ms: 5_000,
				max_retries: 0,
				max_restarts: 0,
				collector_flag: None,
				shared_memory_bootstrap: shared_bootstrap
					.clone()
					.expect("liveness monitor always implies a shared-memory manager"),
			};
			(name, bootstrap)
		});

		Ok(BuiltPipeline {
			task_nodes,
			process_nodes,
			liveness_bootstrap,
			watchdog_interval: self.watchdog_interval,
		})
	}
}

impl BuiltPipeline {
	/// Start every node (in declaration order), then the watchdog.
	/// Consumes the built pipeline, since starting is a one-way trip.
	pub fn start(self) -> SupervisorHandle {
		let mut nodes = Vec::with_capacity(self.task_nodes.len() + self.process_nodes.len());
		let mut workers: Vec<Box<dyn Worker>> = Vec::with_capacity(nodes.capacity() + 1);

		for (handle, logic) in self.task_nodes {
			nodes.push(ManagedNode::Local(handle.clone()));
			workers.push(Box::new(TaskWorker::spawn(handle, logic)));
		}
		for (name, bootstrap) in self.process_nodes {
			nodes.push(ManagedNode::Remote(RemoteNode::new(name)));
			workers.push(Box::new(ProcessWorker::spawn(bootstrap)));
		}

		let watchdog_logic: Box<dyn NodeLogic> = Box::new(Watchdog::new(nodes.clone()));
		let watchdog_handle = NodeHandle::new(
			NodeName::new("watchdog"),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			self.watchdog_interval,
			0,
			0,
			None,
			false,
		);
		workers.push(Box::new(TaskWorker::spawn(Arc::new(watchdog_handle), watchdog_logic)));

		let (liveness, liveness_worker) = match self.liveness_bootstrap {
			Some((name, bootstrap)) => {
				let remote = RemoteNode::new(name);
				let worker: Box<dyn Worker> = Box::new(ProcessWorker::spawn(bootstrap));
				(Some(remote), Some(worker))
			}
			None => (None, None),
		};

		SupervisorHandle {
			nodes,
			workers: std::sync::Mutex::new(Some(workers)),
			liveness,
			liveness_worker: std::sync::Mutex::new(liveness_worker),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::batch::Batch;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct CountingSource {
		remaining: usize,
		emitted: Arc<AtomicUsize>,
	}
	impl NodeLogic for CountingSource {
		fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, crate::errors::NodeError> {
			if self.remaining == 0 {
				return Ok(Some(Batch::last()));
			}
			self.remaining -= 1;
			self.emitted.fetch_add(1, Ordering::SeqCst);
			Ok(Some(Batch::ok_records(vec![crate::batch::Record::new()])))
		}
	}

	struct Sink {
		received: Arc<AtomicUsize>,
	}
	impl NodeLogic for Sink {
		fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, crate::errors::NodeError> {
			if let Some(batch) = &input {
				self.received.fetch_add(batch.len(), Ordering::SeqCst);
			}
			Ok(None)
		}
	}

	fn record(cls: &str, name: &str, input: &[&str], output: &[&str]) -> ConfigRecord {
		ConfigRecord {
			cls: cls.to_string(),
			name: NodeName::new(name),
			isolation: Isolation::Task,
			input: input.iter().map(|p| PortName::new(*p)).collect(),
			output: output.iter().map(|p| PortName::new(*p)).collect(),
			timeout_ms: 0,
			max_retries: 0,
			max_restarts: 0,
			collector_flag: None,
			args: serde_json::Map::new(),
		}
	}

	#[test]
	fn linear_two_node_pipeline_runs_to_completion() {
		let emitted = Arc::new(AtomicUsize::new(0));
		let received = Arc::new(AtomicUsize::new(0));

		let built = PipelineBuilder::new()
			.queue_capacity(4)
			.add_node(NodeSpec::new(
				record("source", "source", &[], &["out"]),
				Box::new(CountingSource {
					remaining: 3,
					emitted: emitted.clone(),
				}),
			))
			.add_node(NodeSpec::new(
				record("sink", "sink", &["out"], &[]),
				Box::new(Sink {
					received: received.clone(),
				}),
			))
			.build()
			.unwrap();

		let supervisor = built.start();
		supervisor.join();

		assert_eq!(emitted.load(Ordering::SeqCst), 3);
		assert_eq!(received.load(Ordering::SeqCst), 3);
		assert!(supervisor
			.nodes()
			.iter()
			.all(|n| n.status() == crate::node::NodeStatus::Completed));
	}

	#[test]
	fn empty_pipeline_is_rejected() {
		let err = PipelineBuilder::new().build().unwrap_err();
		assert!(matches!(err, BuilderError::EmptyPipeline));
	}

	#[test]
	fn port_with_two_producers_is_rejected() {
		let err = PipelineBuilder::new()
			.add_node(NodeSpec::new(record("a", "a", &[], &["x"]), Box::new(DummyLogic)))
			.add_node(NodeSpec::new(record("b", "b", &[], &["x"]), Box::new(DummyLogic)))
			.build()
			.unwrap_err();
		assert!(matches!(err, BuilderError::PortWithMultipleProducers { .. }));
	}

	#[test]
	fn port_without_a_producer_is_rejected() {
		let err = PipelineBuilder::new()
			.add_node(NodeSpec::new(record("a", "a", &["x"], &[]), Box::new(DummyLogic)))
			.build()
			.unwrap_err();
		assert!(matches!(err, BuilderError::PortWithoutProducer { .. }));
	}

	struct DummyLogic;
	impl NodeLogic for DummyLogic {
		fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, crate::errors::NodeError> {
			Ok(input)
		}
	}
}

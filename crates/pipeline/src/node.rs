//! The node lifecycle: construction, the per-iteration loop, multi-input
//! zip synchronization, retry/restart policy, collector mode, and
//! termination.
//!
//! This module is isolation-agnostic: [`run`] executes the same loop
//! whether its queues happen to be `INTRA` or `INTER` and whether its
//! caller is a thread in this process or the entry point of a spawned
//! child. `worker.rs` decides how to get a thread of execution running
//! this function; `builder.rs` decides which queues to hand it.

use std::{
	fmt::Display,
	sync::{
		atomic::{AtomicBool, AtomicU8, Ordering},
		Arc,
	},
	time::{Duration, Instant},
};

use serde_json::Value;

use conduit_util::{NodeName, PortName};

use crate::{
	batch::{Batch, Metadata, Record},
	errors::NodeError,
	metrics::Metrics,
	queue::Queue,
};

/// Where a node is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeStatus {
	/// Constructed, not yet started
	Pending = 0,
	/// Running its iteration loop
	Alive = 1,
	/// Finished on its own after a `Last` batch
	Completed = 2,
	/// Stopped by a failure or by the supervisor
	Terminated = 3,
}

impl NodeStatus {
	fn from_u8(v: u8) -> Self {
		match v {
			0 => Self::Pending,
			1 => Self::Alive,
			2 => Self::Completed,
			_ => Self::Terminated,
		}
	}
}

/// A shared, thread-safe handle to a node's current [`NodeStatus`].
///
/// The node's own worker writes it; the supervisor and the liveness
/// monitor only ever read it.
#[derive(Clone)]
pub struct StatusHandle(Arc<AtomicU8>);

impl StatusHandle {
	fn new(initial: NodeStatus) -> Self {
		Self(Arc::new(AtomicU8::new(initial as u8)))
	}

	/// The node's current status
	pub fn get(&self) -> NodeStatus {
		NodeStatus::from_u8(self.0.load(Ordering::Acquire))
	}

	fn set(&self, status: NodeStatus) {
		self.0.store(status as u8, Ordering::Release);
	}
}

/// Shared-memory key a `PROCESS`-isolated node mirrors its status under,
/// so the root process's supervisor can see it without a `NodeHandle` of
/// its own.
pub fn status_key(name: &NodeName) -> String {
	format!("conduit:status:{name}")
}

/// Shared-memory key the root process sets to ask a `PROCESS`-isolated
/// node to terminate. The node checks this itself at the top of every
/// iteration; there's no way to reach into another process's queues.
pub fn terminate_key(name: &NodeName) -> String {
	format!("conduit:terminate:{name}")
}

/// Shared-memory key a `PROCESS`-isolated node mirrors its metrics
/// snapshot under.
pub fn metrics_key(name: &NodeName) -> String {
	format!("conduit:metrics:{name}")
}

fn status_label(status: NodeStatus) -> &'static str {
	match status {
		NodeStatus::Pending => "pending",
		NodeStatus::Alive => "alive",
		NodeStatus::Completed => "completed",
		NodeStatus::Terminated => "terminated",
	}
}

/// Parse a status label mirrored via [`status_key`]. Defaults to
/// `PENDING` for anything unrecognized or absent, since that's the
/// state before a `PROCESS`-isolated node's first write.
pub fn parse_status_label(label: &str) -> NodeStatus {
	match label {
		"alive" => NodeStatus::Alive,
		"completed" => NodeStatus::Completed,
		"terminated" => NodeStatus::Terminated,
		_ => NodeStatus::Pending,
	}
}

/// The work function a node runs every iteration.
///
/// `processing` receives `None` when the node has no input ports, and
/// `Some(batch)` otherwise (a single batch, or the zip-synchronized
/// batch assembled from multiple input ports, or the flushed
/// accumulator in collector mode). Returning `Ok(None)` is only valid
/// for a node with no output ports.
pub trait NodeLogic: Send {
	/// Run one iteration of this node's work
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError>;

	/// Called once before the first iteration, and again after every
	/// `close()` during a restart
	fn post_init(&mut self) {}

	/// Called once before a restart attempt, to release resources
	/// `post_init` will reacquire
	fn close(&mut self) {}

	/// Called exactly once on any terminal transition (graceful or forced)
	fn release(&mut self) {}
}

/// Everything about a node except its work function: ports, queues,
/// timing, retry policy, and the shared bits the supervisor and
/// liveness monitor need to see from outside.
pub struct NodeHandle {
	name: NodeName,
	input_ports: Vec<PortName>,
	output_ports: Vec<PortName>,
	input_queues: Vec<Arc<dyn Queue>>,
	output_queues: Vec<Arc<dyn Queue>>,
	timeout: Duration,
	max_retries: u32,
	max_restarts: u32,
	collector_flag: Option<String>,
	status: StatusHandle,
	metrics: Arc<Metrics>,
	drained: AtomicBool,
	/// Whether this handle lives inside a `PROCESS`-isolated child, and so
	/// must mirror its status/metrics into shared memory for the root
	/// process's supervisor and liveness monitor to observe.
	remote: bool,
}

impl NodeHandle {
	/// Build a new handle. The node starts `PENDING`; call [`run`] to
	/// transition it to `ALIVE` and begin its iteration loop.
	///
	/// `remote` is `true` only for a handle constructed inside a
	/// `PROCESS`-isolated child: `run` then mirrors its status and
	/// metrics into [`crate::memory::shared`] so the root process can see
	/// them despite having no handle of its own.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		name: NodeName,
		input_ports: Vec<PortName>,
		output_ports: Vec<PortName>,
		input_queues: Vec<Arc<dyn Queue>>,
		output_queues: Vec<Arc<dyn Queue>>,
		timeout: Duration,
		max_retries: u32,
		max_restarts: u32,
		collector_flag: Option<String>,
		remote: bool,
	) -> Self {
		assert_eq!(input_ports.len(), input_queues.len());
		assert_eq!(output_ports.len(), output_queues.len());

		Self {
			name,
			input_ports,
			output_ports,
			input_queues,
			output_queues,
			timeout,
			max_retries,
			max_restarts,
			collector_flag,
			status: StatusHandle::new(NodeStatus::Pending),
			metrics: Arc::new(Metrics::new()),
			drained: AtomicBool::new(false),
			remote,
		}
	}

	/// This node's name
	pub fn name(&self) -> &NodeName {
		&self.name
	}

	/// A cloneable handle onto this node's current status
	pub fn status(&self) -> StatusHandle {
		self.status.clone()
	}

	/// A shared handle onto this node's metrics
	pub fn metrics(&self) -> Arc<Metrics> {
		self.metrics.clone()
	}

	/// Forced termination: idempotent. Sets status to `TERMINATED` and
	/// empties every attached queue without blocking. Called by the
	/// supervisor; the node's own loop notices the status change (or the
	/// resulting queue errors) at the top of its next iteration and calls
	/// `release()` itself.
	pub fn drain(&self) {
		if self.drained.swap(true, Ordering::AcqRel) {
			return;
		}
		self.set_status(NodeStatus::Terminated);
		for q in self.input_queues.iter().chain(self.output_queues.iter()) {
			q.drain();
		}
	}

	/// Graceful termination after a `LAST` batch: sets status to
	/// `COMPLETED`, mirroring to shared memory if this handle is remote.
	fn complete(&self) {
		self.set_status(NodeStatus::Completed);
	}

	fn set_status(&self, status: NodeStatus) {
		self.status.set(status);
		if self.remote {
			crate::memory::shared().set(status_key(&self.name), Value::from(status_label(status)));
		}
	}

	/// Has the root process asked this (necessarily `PROCESS`-isolated)
	/// node to terminate, via [`terminate_key`] in shared memory?
	fn remote_terminate_requested(&self) -> bool {
		self.remote && crate::memory::shared().contains(&terminate_key(&self.name))
	}

	fn publish(&self, batch: &Batch) -> Result<(), NodeError> {
		for q in &self.output_queues {
			q.put(batch.clone())?;
		}
		Ok(())
	}

	fn pull_input(&self) -> Result<Option<Batch>, NodeError> {
		match self.input_queues.len() {
			0 => Ok(None),
			1 => Ok(Some(self.input_queues[0].get()?)),
			_ => Ok(Some(self.zip_inputs()?)),
		}
	}

	/// Multi-input synchronization: read one batch per port, check that
	/// their lengths and statuses agree, then assemble a single batch
	/// whose `j`-th record is the keyed union of each input's `j`-th
	/// record, keyed by port name.
	fn zip_inputs(&self) -> Result<Batch, NodeError> {
		let batches = self
			.input_queues
			.iter()
			.map(|q| q.get())
			.collect::<Result<Vec<_>, _>>()?;

		let len = batches[0].len();
		if batches.iter().any(|b| b.len() != len) {
			return Ok(Batch::error("Length batches cannot be different"));
		}

		let all_ok = batches.iter().all(Batch::is_ok);
		let all_last = batches.iter().all(Batch::is_last);
		if !all_ok && !all_last {
			return Ok(Batch::error("batch statuses disagree"));
		}
		if all_last {
			return Ok(Batch::last());
		}

		let mut metadata = Metadata::new();
		for b in &batches {
			for (k, v) in b.metadata() {
				metadata.insert(k.clone(), v.clone());
			}
		}

		let mut records = Vec::with_capacity(len);
		for j in 0..len {
			let mut record = Record::new();
			for (i, b) in batches.iter().enumerate() {
				record.insert(
					self.input_ports[i].to_string(),
					Value::Object(b.records()[j].clone()),
				);
			}
			records.push(record);
		}

		Ok(Batch::ok(records, metadata))
	}

	fn check_shape(&self, input: Option<&Batch>, output: Option<&Batch>) -> Result<(), NodeError> {
		// A LAST or ERROR output carries no data semantics (spec.md 3): a
		// portless node (the watchdog, a liveness-style monitor) ending its
		// own stream this way isn't a shape violation, only an OK batch
		// published with nowhere to go is.
		let output_is_data = output.map(Batch::is_ok).unwrap_or(false);
		match (output.is_some(), self.output_ports.is_empty()) {
			(false, false) => return Err(NodeError::NodeOutputMismatch),
			(true, true) if output_is_data => return Err(NodeError::NodeOutputMismatch),
			_ => {}
		}

		if let (Some(i), Some(o)) = (input, output) {
			if (i.is_ok() && o.is_last()) || (i.is_last() && o.is_ok()) {
				return Err(NodeError::BatchStatusMismatch);
			}
		}

		Ok(())
	}
}

/// JSON truthiness, used to evaluate a collector flush flag the way the
/// source's dynamically-typed metadata map does.
fn is_truthy(value: &Value) -> bool {
	match value {
		Value::Null => false,
		Value::Bool(b) => *b,
		Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
		Value::String(s) => !s.is_empty(),
		Value::Array(a) => !a.is_empty(),
		Value::Object(o) => !o.is_empty(),
	}
}

fn fail(handle: &NodeHandle, logic: &mut dyn NodeLogic, context: impl Display) {
	tracing::error!(node = %handle.name, error = %context, "node terminating");
	handle.drain();
	logic.release();
}

/// Run a node's iteration loop to completion. Blocks the calling thread
/// (or process, for a `PROCESS`-isolated node) until the node reaches
/// `COMPLETED` or `TERMINATED`.
pub fn run(handle: Arc<NodeHandle>, mut logic: Box<dyn NodeLogic>) {
	handle.set_status(NodeStatus::Alive);
	logic.post_init();

	let mut collector_acc: Option<Batch> = handle.collector_flag.as_ref().map(|_| Batch::empty());
	let mut num_retries: u32 = 0;
	let mut num_restarts: u32 = 0;

	'outer: loop {
		if handle.timeout.is_zero() {
			std::thread::yield_now();
		} else {
			std::thread::sleep(handle.timeout);
		}

		if handle.status.get() != NodeStatus::Alive {
			logic.release();
			break;
		}

		if handle.remote_terminate_requested() {
			handle.drain();
			logic.release();
			break;
		}

		let input = match handle.pull_input() {
			Ok(i) => i,
			Err(e) => {
				fail(&handle, logic.as_mut(), e);
				break;
			}
		};

		if let Some(batch) = &input {
			if batch.is_last() {
				if let Err(e) = handle.publish(&Batch::last()) {
					fail(&handle, logic.as_mut(), e);
					break;
				}
				handle.complete();
				logic.release();
				break;
			}
			if batch.is_error() {
				fail(&handle, logic.as_mut(), "received an ERROR batch on input");
				break;
			}
		}

		let processing_input = if let Some(flag) = handle.collector_flag.clone() {
			match &input {
				Some(batch) => match batch.metadata().get(&flag) {
					None => {
						fail(
							&handle,
							logic.as_mut(),
							NodeError::MissingCollectorKey { key: flag.clone() },
						);
						break;
					}
					Some(v) if is_truthy(v) => Some(collector_acc.take().unwrap_or_else(Batch::empty)),
					Some(_) => {
						let acc = collector_acc.get_or_insert_with(Batch::empty);
						acc.extend_from(batch.clone());
						continue 'outer;
					}
				},
				None => input.clone(),
			}
		} else {
			input.clone()
		};

		'retry: loop {
			let start = Instant::now();
			let result = logic.processing(processing_input.clone());
			let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

			let output = match result {
				Ok(o) => o,
				Err(e) => Some(Batch::error(e.to_string())),
			};

			let in_len = processing_input.as_ref().map(Batch::len).unwrap_or(0);
			let out_len = output.as_ref().map(Batch::len).unwrap_or(0);
			handle.metrics.record_iteration(in_len, out_len, elapsed_ms);
			if handle.remote {
				let snapshot = serde_json::to_value(handle.metrics.snapshot())
					.expect("MetricsSnapshot always serializes");
				crate::memory::shared().set(metrics_key(&handle.name), snapshot);
			}

			if let Err(e) = handle.check_shape(processing_input.as_ref(), output.as_ref()) {
				handle.metrics.record_error();
				fail(&handle, logic.as_mut(), e);
				break 'outer;
			}

			if let Some(out) = &output {
				if let Err(e) = handle.publish(out) {
					fail(&handle, logic.as_mut(), e);
					break 'outer;
				}
			}

			let terminal = processing_input.as_ref().map(Batch::is_last).unwrap_or(false)
				|| output.as_ref().map(Batch::is_last).unwrap_or(false);
			if terminal {
				handle.complete();
				logic.release();
				break 'outer;
			}

			if output.as_ref().map(Batch::is_error).unwrap_or(false) {
				handle.metrics.record_error();
				num_retries += 1;
				if num_retries <= handle.max_retries {
					continue 'retry;
				}
				num_restarts += 1;
				if num_restarts <= handle.max_restarts {
					logic.close();
					logic.post_init();
					num_retries = 0;
					continue 'retry;
				}
				fail(
					&handle,
					logic.as_mut(),
					output.as_ref().and_then(Batch::error_message).unwrap_or("unknown error"),
				);
				break 'outer;
			}

			break 'retry;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::queue::IntraQueue;

	struct Echo;
	impl NodeLogic for Echo {
		fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
			Ok(input)
		}
	}

	struct FailN {
		remaining: u32,
		attempts: Arc<std::sync::atomic::AtomicU32>,
	}
	impl NodeLogic for FailN {
		fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			if self.remaining > 0 {
				self.remaining -= 1;
				Ok(Some(Batch::error("boom")))
			} else {
				Ok(Some(Batch::last()))
			}
		}
	}

	fn linear_handle(
		in_q: Arc<IntraQueue>,
		out_q: Arc<IntraQueue>,
		max_retries: u32,
		max_restarts: u32,
	) -> NodeHandle {
		NodeHandle::new(
			NodeName::new("n"),
			vec![PortName::new("in")],
			vec![PortName::new("out")],
			vec![in_q],
			vec![out_q],
			Duration::ZERO,
			max_retries,
			max_restarts,
			None,
			false,
		)
	}

	#[test]
	fn linear_ok_then_last_completes_and_forwards() {
		let in_q = IntraQueue::new(PortName::new("in"), 4);
		let out_q = IntraQueue::new(PortName::new("out"), 4);
		in_q.put(Batch::ok_records(vec![Record::new()])).unwrap();
		in_q.put(Batch::last()).unwrap();

		let handle = linear_handle(in_q, out_q.clone(), 0, 0);
		let status = handle.status();
		run(Arc::new(handle), Box::new(Echo));

		assert_eq!(status.get(), NodeStatus::Completed);
		assert!(out_q.get().unwrap().is_ok());
		assert!(out_q.get().unwrap().is_last());
	}

	#[test]
	fn error_batches_never_reach_the_output_queue() {
		let in_q = IntraQueue::new(PortName::new("in"), 4);
		let out_q = IntraQueue::new(PortName::new("out"), 4);
		in_q.put(Batch::ok_records(vec![Record::new()])).unwrap();

		let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
		let handle = linear_handle(in_q, out_q.clone(), 0, 0);
		let status = handle.status();
		run(
			Arc::new(handle),
			Box::new(FailN {
				remaining: 1,
				attempts: attempts.clone(),
			}),
		);

		assert_eq!(status.get(), NodeStatus::Terminated);
		assert!(out_q.is_empty());
	}

	#[test]
	fn retry_then_restart_then_terminate_counts_match_policy() {
		let in_q = IntraQueue::new(PortName::new("in"), 4);
		let out_q = IntraQueue::new(PortName::new("out"), 4);
		in_q.put(Batch::ok_records(vec![Record::new()])).unwrap();

		let max_retries = 2;
		let max_restarts = 1;
		let attempts = Arc::new(std::sync::atomic::AtomicU32::new(0));
		let handle = linear_handle(in_q, out_q, max_retries, max_restarts);
		let status = handle.status();
		run(
			Arc::new(handle),
			Box::new(FailN {
				remaining: u32::MAX,
				attempts: attempts.clone(),
			}),
		);

		assert_eq!(status.get(), NodeStatus::Terminated);
		// one initial attempt + max_retries retries, repeated across
		// (max_restarts + 1) restart cycles
		let expected = (max_retries + 1) * (max_restarts + 1);
		assert_eq!(attempts.load(Ordering::SeqCst), expected);
	}

	#[test]
	fn zip_rejects_mismatched_lengths() {
		let a = IntraQueue::new(PortName::new("a"), 4);
		let b = IntraQueue::new(PortName::new("b"), 4);
		let out = IntraQueue::new(PortName::new("out"), 4);
		a.put(Batch::ok_records(vec![Record::new(), Record::new()])).unwrap();
		b.put(Batch::ok_records(vec![Record::new()])).unwrap();

		let handle = NodeHandle::new(
			NodeName::new("zip"),
			vec![PortName::new("a"), PortName::new("b")],
			vec![PortName::new("out")],
			vec![a, b],
			vec![out.clone()],
			Duration::ZERO,
			0,
			0,
			None,
			false,
		);
		let status = handle.status();
		run(Arc::new(handle), Box::new(Echo));

		assert_eq!(status.get(), NodeStatus::Terminated);
		assert!(out.is_empty());
	}

	#[test]
	fn collector_flush_signal_is_not_folded_into_accumulator() {
		let in_q = IntraQueue::new(PortName::new("in"), 8);
		let out_q = IntraQueue::new(PortName::new("out"), 8);

		let mut r1 = Record::new();
		r1.insert("v".into(), Value::from(1));
		let mut no_flush_meta = Metadata::new();
		no_flush_meta.insert("flush".into(), Value::from(false));
		in_q.put(Batch::ok(vec![r1], no_flush_meta)).unwrap();

		let mut flush_meta = Metadata::new();
		flush_meta.insert("flush".into(), Value::from(true));
		let mut flush_record = Record::new();
		flush_record.insert("v".into(), Value::from(999));
		in_q.put(Batch::ok(vec![flush_record], flush_meta)).unwrap();
		in_q.put(Batch::last()).unwrap();

		let handle = NodeHandle::new(
			NodeName::new("collect"),
			vec![PortName::new("in")],
			vec![PortName::new("out")],
			vec![in_q],
			vec![out_q.clone()],
			Duration::ZERO,
			0,
			0,
			Some("flush".to_string()),
			false,
		);
		run(Arc::new(handle), Box::new(Echo));

		let flushed = out_q.get().unwrap();
		assert_eq!(flushed.len(), 1);
		assert_eq!(flushed.records()[0].get("v"), Some(&Value::from(1)));
	}

	struct ReturnsLastOnce;
	impl NodeLogic for ReturnsLastOnce {
		fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
			Ok(Some(Batch::last()))
		}
	}

	#[test]
	fn portless_node_self_completing_with_last_is_not_a_shape_mismatch() {
		let handle = NodeHandle::new(
			NodeName::new("watchdog-like"),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			Duration::ZERO,
			0,
			0,
			None,
			false,
		);
		let status = handle.status();
		run(Arc::new(handle), Box::new(ReturnsLastOnce));

		assert_eq!(status.get(), NodeStatus::Completed);
	}

	struct ReturnsDataWithNoOutputPorts;
	impl NodeLogic for ReturnsDataWithNoOutputPorts {
		fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
			Ok(Some(Batch::ok_records(vec![Record::new()])))
		}
	}

	#[test]
	fn portless_node_publishing_an_ok_batch_is_still_a_shape_mismatch() {
		let handle = NodeHandle::new(
			NodeName::new("misbehaving"),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			Vec::new(),
			Duration::ZERO,
			0,
			0,
			None,
			false,
		);
		let status = handle.status();
		run(Arc::new(handle), Box::new(ReturnsDataWithNoOutputPorts));

		assert_eq!(status.get(), NodeStatus::Terminated);
	}
}

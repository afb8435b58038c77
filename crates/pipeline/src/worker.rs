//! Getting a node's iteration loop (`node::run`) onto a thread of
//! execution: a cooperative task sharing this process, or an isolated
//! OS process bootstrapped over `ipc_channel`.

use std::{process::Command, sync::Arc, thread::JoinHandle, time::Duration};

use ipc_channel::ipc::{IpcOneShotServer, IpcSender};
use serde::{Deserialize, Serialize};

use conduit_util::{NodeName, PortName};

use crate::{
	memory::SharedMemoryRequest,
	memory::SharedMemoryReply,
	node::{self, NodeHandle, NodeLogic},
	queue::{InterConsumerWire, InterProducerWire, InterQueueConsumer, InterQueueProducer, Queue},
	registry::{self, ConfigRecord},
};

/// A worker gives a node's `run` loop somewhere to execute.
pub trait Worker {
	/// Block until the node this worker is running reaches a terminal status
	fn join(self: Box<Self>);
}

/// Runs a node's loop as a plain OS thread in this process.
pub struct TaskWorker {
	handle: JoinHandle<()>,
}

impl TaskWorker {
	/// Spawn `handle`'s iteration loop on a new thread. `handle` is an
	/// `Arc` so the caller can keep a clone to supervise the node (check
	/// its status, force a drain) after it starts running.
	pub fn spawn(handle: Arc<NodeHandle>, logic: Box<dyn NodeLogic>) -> Self {
		let name = handle.name().to_string();
		let thread = std::thread::Builder::new()
			.name(format!("conduit-node-{name}"))
			.spawn(move || node::run(handle, logic))
			.expect("failed to spawn node worker thread");

		Self { handle: thread }
	}
}

impl Worker for TaskWorker {
	fn join(self: Box<Self>) {
		let _ = self.handle.join();
	}
}

/// Everything a spawned child process needs to reconstruct its node and
/// run it: the same configuration record the root hydrated from, plus
/// the raw IPC endpoints for this node's input and output queues (every
/// port on a `PROCESS`-isolated node is `INTER` by construction, so
/// these are always the cross-process wire forms) and a handle onto the
/// shared-memory manager thread.
#[derive(Serialize, Deserialize)]
pub struct NodeBootstrap {
	pub name: NodeName,
	pub record: SerializableRecord,
	pub input_ports: Vec<PortName>,
	pub output_ports: Vec<PortName>,
	pub input_queues: Vec<InterConsumerWire>,
	pub output_queues: Vec<InterProducerWire>,
	pub timeout_ms: u64,
	pub max_retries: u32,
	pub max_restarts: u32,
	pub collector_flag: Option<String>,
	pub shared_memory_bootstrap: IpcSender<(IpcSender<SharedMemoryReply>, SharedMemoryRequest)>,
}

/// [`ConfigRecord`]'s `args` map, carried across the process boundary so
/// the child can call the same `registry::hydrate` the root would have.
#[derive(Serialize, Deserialize)]
pub struct SerializableRecord {
	pub cls: String,
	pub args: serde_json::Map<String, serde_json::Value>,
}

impl From<&ConfigRecord> for SerializableRecord {
	fn from(record: &ConfigRecord) -> Self {
		Self {
			cls: record.cls.clone(),
			args: record.args.clone(),
		}
	}
}

/// Runs a node's loop inside its own freshly-spawned OS process.
///
/// Spawning re-execs the current binary with a one-shot IPC server name
/// on its command line; the child is expected to call
/// [`run_child_if_requested`] at the top of its own `main`, which blocks
/// forever running the node if this process was launched as a worker
/// child, and returns immediately otherwise.
pub struct ProcessWorker {
	child: std::process::Child,
}

const BOOTSTRAP_ARG: &str = "--conduit-worker-bootstrap";

impl ProcessWorker {
	/// Spawn `bootstrap` as a child process running the re-exec'd current
	/// binary.
	///
	/// Follows the standard `ipc_channel` bootstrap handshake: we create a
	/// one-shot server whose name we pass on the child's command line; the
	/// child connects and hands back a fresh sender of its own, which we
	/// then use to deliver the real payload. This avoids ever needing the
	/// child's address before it exists.
	pub fn spawn(bootstrap: NodeBootstrap) -> Self {
		let (server, server_name) = IpcOneShotServer::<IpcSender<NodeBootstrap>>::new()
			.expect("failed to create IPC one-shot server");

		let exe = std::env::current_exe().expect("failed to resolve current executable for re-exec");
		let child = Command::new(exe)
			.arg(BOOTSTRAP_ARG)
			.arg(&server_name)
			.spawn()
			.expect("failed to spawn child process for PROCESS-isolated node");

		let (_, child_tx) = server.accept().expect("child did not connect to bootstrap server");
		child_tx.send(bootstrap).expect("failed to send node bootstrap to child");

		Self { child }
	}
}

impl Worker for ProcessWorker {
	fn join(mut self: Box<Self>) {
		let _ = self.child.wait();
	}
}

/// Called at the top of `conduitd`'s `main`. If this process was
/// launched by [`ProcessWorker::spawn`], connects to the one-shot
/// server named on the command line, receives its [`NodeBootstrap`],
/// hydrates the node's logic via the registry, and runs its loop —
/// never returning. Otherwise returns immediately so the normal daemon
/// startup path continues.
pub fn run_child_if_requested() {
	let mut args = std::env::args();
	let Some(marker) = args.find(|a| a == BOOTSTRAP_ARG) else {
		return;
	};
	let _ = marker;
	let server_name = std::env::args()
		.skip_while(|a| a != BOOTSTRAP_ARG)
		.nth(1)
		.expect("--conduit-worker-bootstrap requires a server name argument");

	let (bootstrap_tx, bootstrap_rx) =
		ipc_channel::ipc::channel::<NodeBootstrap>().expect("failed to create child bootstrap channel");
	let connector = IpcSender::<IpcSender<NodeBootstrap>>::connect(server_name)
		.expect("failed to connect to parent's bootstrap server");
	connector
		.send(bootstrap_tx)
		.expect("failed to hand bootstrap sender back to parent");
	let bootstrap: NodeBootstrap = bootstrap_rx.recv().expect("failed to receive node bootstrap");

	crate::memory::init_shared_remote(bootstrap.shared_memory_bootstrap.clone());

	let record = ConfigRecord {
		cls: bootstrap.record.cls,
		name: bootstrap.name.clone(),
		isolation: crate::isolation::Isolation::Process,
		input: bootstrap.input_ports.clone(),
		output: bootstrap.output_ports.clone(),
		timeout_ms: bootstrap.timeout_ms,
		max_retries: bootstrap.max_retries,
		max_restarts: bootstrap.max_restarts,
		collector_flag: bootstrap.collector_flag.clone(),
		args: bootstrap.record.args,
	};

	let logic = registry::hydrate(&record).unwrap_or_else(|e| {
		panic!("child process failed to hydrate node `{}`: {e}", bootstrap.name)
	});

	let input_queues: Vec<std::sync::Arc<dyn Queue>> = bootstrap
		.input_queues
		.into_iter()
		.map(|wire| InterQueueConsumer::from_wire(wire) as std::sync::Arc<dyn Queue>)
		.collect();
	let output_queues: Vec<std::sync::Arc<dyn Queue>> = bootstrap
		.output_queues
		.into_iter()
		.map(|wire| InterQueueProducer::from_wire(wire) as std::sync::Arc<dyn Queue>)
		.collect();

	let handle = NodeHandle::new(
		bootstrap.name,
		bootstrap.input_ports,
		bootstrap.output_ports,
		input_queues,
		output_queues,
		Duration::from_millis(bootstrap.timeout_ms),
		bootstrap.max_retries,
		bootstrap.max_restarts,
		bootstrap.collector_flag,
		true,
	);

	node::run(Arc::new(handle), logic);
	std::process::exit(0);
}

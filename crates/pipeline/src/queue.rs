//! The queue abstraction: a bounded FIFO of [`Batch`]es with a known port
//! name, a flavor ([`QueueFlavor::Intra`] or [`QueueFlavor::Inter`]), and a
//! capacity.
//!
//! `INTRA` queues are a plain bounded [`crossbeam::channel`] — both ends
//! live in this process, so one struct can hand out a sender and a
//! receiver clone to whichever node needs them.
//!
//! `INTER` queues cross a process boundary. Unlike a crossbeam channel, an
//! [`ipc_channel`] pair genuinely only has one meaningful direction per
//! side: the producer process holds a sender, the consumer process holds
//! a receiver. We pair a data channel with a permit channel pre-loaded
//! with `capacity` tokens so that `put` still blocks once the queue is
//! full, matching `INTRA`'s backpressure behavior across the process
//! boundary.

use crossbeam::channel::{bounded, Receiver, Sender};
use ipc_channel::ipc::{self, IpcReceiver, IpcSender};
use serde::{Deserialize, Serialize};
use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc, Mutex,
};

use conduit_util::PortName;

use crate::{batch::Batch, errors::NodeError};

/// A bounded FIFO of [`Batch`]es, attached to exactly one producer node
/// and one consumer node.
pub trait Queue: Send + Sync {
	/// The port name this queue is attached to
	fn name(&self) -> &PortName;

	/// Block until there is room, then push `batch`
	fn put(&self, batch: Batch) -> Result<(), NodeError>;

	/// Block until a batch is available, then pop it
	fn get(&self) -> Result<Batch, NodeError>;

	/// Is this queue empty right now? Best-effort, never blocks.
	fn is_empty(&self) -> bool;

	/// Empty this queue without blocking. Idempotent.
	fn drain(&self);
}

/// A concurrent-task-safe FIFO living in this process's address space
pub struct IntraQueue {
	name: PortName,
	tx: Sender<Batch>,
	rx: Receiver<Batch>,
}

impl IntraQueue {
	/// Make a new intra-process queue with the given capacity
	pub fn new(name: PortName, capacity: usize) -> Arc<Self> {
		let (tx, rx) = bounded(capacity);
		Arc::new(Self { name, tx, rx })
	}
}

impl Queue for IntraQueue {
	fn name(&self) -> &PortName {
		&self.name
	}

	fn put(&self, batch: Batch) -> Result<(), NodeError> {
		self.tx.send(batch).map_err(|_| NodeError::QueueClosed {
			port: self.name.clone(),
		})
	}

	fn get(&self) -> Result<Batch, NodeError> {
		self.rx.recv().map_err(|_| NodeError::QueueClosed {
			port: self.name.clone(),
		})
	}

	fn is_empty(&self) -> bool {
		self.rx.is_empty()
	}

	fn drain(&self) {
		while self.rx.try_recv().is_ok() {}
	}
}

/// The raw, serializable channel endpoints for the producer side of a
/// cross-process queue. Used only in transit: either wrapped locally
/// into an [`InterQueueProducer`] when both queue ends stay in the root
/// process, or shipped whole inside a [`crate::worker::NodeBootstrap`]
/// when the producer lives in a spawned child.
#[derive(Serialize, Deserialize)]
pub struct InterProducerWire {
	pub(crate) name: PortName,
	pub(crate) data_tx: IpcSender<Batch>,
	pub(crate) permits: IpcReceiver<()>,
}

/// The raw, serializable channel endpoints for the consumer side of a
/// cross-process queue. See [`InterProducerWire`].
#[derive(Serialize, Deserialize)]
pub struct InterConsumerWire {
	pub(crate) name: PortName,
	pub(crate) data_rx: IpcReceiver<Batch>,
	pub(crate) permits: IpcSender<()>,
}

/// The producer-side handle of a cross-process queue
pub struct InterQueueProducer {
	name: PortName,
	data_tx: IpcSender<Batch>,
	permits: Mutex<IpcReceiver<()>>,
	closed: AtomicBool,
}

impl InterQueueProducer {
	/// Wrap a deserialized wire endpoint for local use
	pub fn from_wire(wire: InterProducerWire) -> Arc<Self> {
		Arc::new(Self {
			name: wire.name,
			data_tx: wire.data_tx,
			permits: Mutex::new(wire.permits),
			closed: AtomicBool::new(false),
		})
	}
}

/// The consumer-side handle of a cross-process queue
pub struct InterQueueConsumer {
	name: PortName,
	data_rx: Mutex<IpcReceiver<Batch>>,
	permits: IpcSender<()>,
}

impl InterQueueConsumer {
	/// Wrap a deserialized wire endpoint for local use
	pub fn from_wire(wire: InterConsumerWire) -> Arc<Self> {
		Arc::new(Self {
			name: wire.name,
			data_rx: Mutex::new(wire.data_rx),
			permits: wire.permits,
		})
	}
}

/// Build a linked pair of cross-process queue endpoints.
///
/// `capacity` permits are seeded into the permit channel up front; a
/// producer must acquire one before every `put`, and a consumer returns
/// one after every `get`. The caller decides whether each end stays in
/// this process (wrap with [`InterQueueProducer::from_wire`] /
/// [`InterQueueConsumer::from_wire`]) or travels to a spawned child
/// inside a `NodeBootstrap`.
pub fn inter_pair(name: PortName, capacity: usize) -> (InterProducerWire, InterConsumerWire) {
	let (data_tx, data_rx) = ipc::channel().expect("failed to create IPC data channel");
	let (permit_tx, permit_rx) = ipc::channel().expect("failed to create IPC permit channel");

	for _ in 0..capacity {
		permit_tx.send(()).expect("failed to seed IPC permit channel");
	}

	(
		InterProducerWire {
			name: name.clone(),
			data_tx,
			permits: permit_rx,
		},
		InterConsumerWire {
			name,
			data_rx,
			permits: permit_tx,
		},
	)
}

impl Queue for InterQueueProducer {
	fn name(&self) -> &PortName {
		&self.name
	}

	fn put(&self, batch: Batch) -> Result<(), NodeError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(NodeError::QueueClosed {
				port: self.name.clone(),
			});
		}

		self.permits
			.lock()
			.unwrap()
			.recv()
			.map_err(|_| NodeError::QueueClosed {
				port: self.name.clone(),
			})?;

		self.data_tx.send(batch).map_err(|_| NodeError::QueueClosed {
			port: self.name.clone(),
		})
	}

	fn get(&self) -> Result<Batch, NodeError> {
		unreachable!("get() called on a producer-only queue handle for `{}`", self.name)
	}

	fn is_empty(&self) -> bool {
		false
	}

	fn drain(&self) {
		// We hold no receiving end; best we can do is stop admitting new
		// puts. The terminated node won't call put() again in practice
		// (the worker loop exits on the same transition that triggers drain).
		self.closed.store(true, Ordering::Release);
	}
}

impl Queue for InterQueueConsumer {
	fn name(&self) -> &PortName {
		&self.name
	}

	fn put(&self, _batch: Batch) -> Result<(), NodeError> {
		unreachable!("put() called on a consumer-only queue handle for `{}`", self.name)
	}

	fn get(&self) -> Result<Batch, NodeError> {
		let batch = self
			.data_rx
			.lock()
			.unwrap()
			.recv()
			.map_err(|_| NodeError::QueueClosed {
				port: self.name.clone(),
			})?;

		// Best-effort: if the producer side is gone this just leaks a permit.
		let _ = self.permits.send(());

		Ok(batch)
	}

	fn is_empty(&self) -> bool {
		false
	}

	fn drain(&self) {
		let rx = self.data_rx.lock().unwrap();
		while rx.try_recv().is_ok() {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn intra_queue_put_get_is_fifo() {
		let q = IntraQueue::new(PortName::new("p"), 4);
		q.put(Batch::ok_records(vec![])).unwrap();
		q.put(Batch::last()).unwrap();
		assert!(q.get().unwrap().is_ok());
		assert!(q.get().unwrap().is_last());
	}

	#[test]
	fn intra_queue_drain_is_idempotent() {
		let q = IntraQueue::new(PortName::new("p"), 4);
		q.put(Batch::ok_records(vec![])).unwrap();
		q.drain();
		assert!(q.is_empty());
		q.drain();
		assert!(q.is_empty());
	}

	#[test]
	fn inter_pair_put_get_roundtrips() {
		let (producer_wire, consumer_wire) = inter_pair(PortName::new("p"), 2);
		let producer = InterQueueProducer::from_wire(producer_wire);
		let consumer = InterQueueConsumer::from_wire(consumer_wire);
		producer.put(Batch::ok_records(vec![])).unwrap();
		let got = consumer.get().unwrap();
		assert!(got.is_ok());
	}
}

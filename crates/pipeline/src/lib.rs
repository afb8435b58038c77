//! The execution engine for a staged data-flow pipeline: nodes connected
//! by named bounded queues, pumping batches of records through a worker
//! per node, synchronizing multi-input fan-in, and orchestrating orderly
//! or fault-induced shutdown through a supervisor.
//!
//! Concrete node implementations (what a node's `processing` function
//! actually does) live outside this crate; `conduit-pipeline` only
//! specifies and runs the machinery around them.

pub mod batch;
pub mod builder;
pub mod errors;
pub mod isolation;
pub mod liveness;
pub mod managed;
pub mod memory;
pub mod metrics;
pub mod node;
pub mod queue;
pub mod registry;
pub mod remote_node;
pub mod supervisor;
pub mod worker;

pub use batch::{Batch, BatchStatus, Metadata, Record};
pub use builder::{BuiltPipeline, PipelineBuilder};
pub use errors::{BuilderError, NodeError, RegistryError};
pub use isolation::{Isolation, QueueFlavor};
pub use managed::ManagedNode;
pub use node::{NodeHandle, NodeLogic, NodeStatus, StatusHandle};
pub use registry::ConfigRecord;
pub use remote_node::RemoteNode;

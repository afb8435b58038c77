//! Errors we may encounter while building and running a pipeline

use std::{error::Error, fmt::Display};

use conduit_util::PortName;

/// An error raised while a node is running.
///
/// Nodes never let these escape their worker loop: every variant here is
/// either absorbed into an ERROR [`crate::batch::Batch`] (and subject to
/// retry/restart policy) or converted directly into a `Terminated` status
/// transition. This type exists so internal plumbing has something typed
/// to pass around before that conversion happens.
#[derive(Debug)]
pub enum NodeError {
	/// The work function raised or returned an error
	WorkFunction(String),

	/// Multi-input zip: inputs did not all have the same length
	BatchLengthMismatch,

	/// Multi-input zip, or input/output disagreement: statuses didn't agree
	BatchStatusMismatch,

	/// A node produced output without declared output ports, or vice versa
	NodeOutputMismatch,

	/// Collector mode is configured, but the flush key is missing from a batch's metadata
	MissingCollectorKey {
		/// The metadata key we expected to find
		key: String,
	},

	/// A queue's channel was disconnected from the other side
	QueueClosed {
		/// The port this queue is attached to
		port: PortName,
	},
}

impl Error for NodeError {}
impl Display for NodeError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::WorkFunction(msg) => write!(f, "work function raised: {msg}"),
			Self::BatchLengthMismatch => write!(f, "Length batches cannot be different"),
			Self::BatchStatusMismatch => write!(f, "batch statuses disagree"),
			Self::NodeOutputMismatch => write!(f, "output batch shape does not match output ports"),
			Self::MissingCollectorKey { key } => {
				write!(f, "collector flag `{key}` is missing from batch metadata")
			}
			Self::QueueClosed { port } => write!(f, "queue `{port}` is closed"),
		}
	}
}

/// An error encountered while hydrating a node from configuration
#[derive(Debug)]
pub enum RegistryError {
	/// No constructor is registered under this class name
	UnknownClass {
		/// The class name we looked up
		cls: String,
	},

	/// The constructor itself rejected its arguments
	ConstructorFailed {
		/// The class name whose constructor failed
		cls: String,
		/// What the constructor said went wrong
		message: String,
	},
}

impl Error for RegistryError {}
impl Display for RegistryError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::UnknownClass { cls } => {
				writeln!(f, "RegistryError: no constructor registered for class `{cls}`")
			}
			Self::ConstructorFailed { cls, message } => {
				writeln!(f, "RegistryError: constructor for class `{cls}` failed: {message}")
			}
		}
	}
}

/// An error encountered while building a pipeline out of nodes
#[derive(Debug)]
pub enum BuilderError {
	/// A configuration record had no `cls` field
	MissingClassName,

	/// Hydration failed: the class name wasn't in the registry
	UnknownClass(RegistryError),

	/// A port was declared by some node, but no node produces it
	PortWithoutProducer {
		/// The port in question
		port: PortName,
	},

	/// More than one node declared the same port as an output
	PortWithMultipleProducers {
		/// The port in question
		port: PortName,
	},

	/// More than one node declared the same port as an input
	PortWithMultipleConsumers {
		/// The port in question
		port: PortName,
	},

	/// The pipeline has no nodes at all
	EmptyPipeline,
}

impl Error for BuilderError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			Self::UnknownClass(e) => Some(e),
			_ => None,
		}
	}
}

impl Display for BuilderError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::MissingClassName => {
				writeln!(f, "InvalidPipelineSpec: configuration record has no `cls` field")
			}
			Self::UnknownClass(e) => writeln!(f, "InvalidPipelineSpec: {e}"),
			Self::PortWithoutProducer { port } => {
				writeln!(f, "InvalidPipelineSpec: port `{port}` has no producer")
			}
			Self::PortWithMultipleProducers { port } => {
				writeln!(
					f,
					"InvalidPipelineSpec: port `{port}` is produced by more than one node"
				)
			}
			Self::PortWithMultipleConsumers { port } => {
				writeln!(
					f,
					"InvalidPipelineSpec: port `{port}` is consumed by more than one node"
				)
			}
			Self::EmptyPipeline => {
				writeln!(f, "InvalidPipelineSpec: pipeline has no nodes")
			}
		}
	}
}

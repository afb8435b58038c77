//! Isolation and queue-flavor types shared across the node and queue modules

use std::fmt::Display;
use std::str::FromStr;

/// How a node's worker is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
	/// A lightweight concurrent task sharing this process's address space
	#[default]
	Task,

	/// An isolated OS-level process
	Process,
}

impl FromStr for Isolation {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"thread" | "task" => Ok(Self::Task),
			"process" => Ok(Self::Process),
			other => Err(format!("unknown node type `{other}`, expected `thread` or `process`")),
		}
	}
}

impl Display for Isolation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Task => write!(f, "thread"),
			Self::Process => write!(f, "process"),
		}
	}
}

/// The transport a queue uses. Chosen by the builder, never by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFlavor {
	/// A concurrent-task-safe FIFO living in this process's address space
	Intra,

	/// A FIFO that crosses a process boundary
	Inter,
}

//! Helpful types

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use std::fmt::Display;

/// The display name of a pipeline node
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct NodeName {
	x: SmartString<LazyCompact>,
}

impl NodeName {
	/// Make a new node name
	pub fn new(name: &str) -> Self {
		Self { x: name.into() }
	}

	/// Get the name
	pub fn name(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for NodeName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<String> for NodeName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for NodeName {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// The name of a queue, as attached to one or more node ports
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct PortName {
	x: SmartString<LazyCompact>,
}

impl PortName {
	/// Make a new port name
	pub fn new(name: &str) -> Self {
		Self { x: name.into() }
	}

	/// Get the name
	pub fn name(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for PortName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<String> for PortName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

impl From<&str> for PortName {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// A pipeline's name
#[derive(Debug, Hash, PartialEq, Eq, Clone, Serialize, Deserialize, PartialOrd, Ord)]
pub struct PipelineName {
	x: SmartString<LazyCompact>,
}

impl PipelineName {
	/// Make a new pipeline name
	pub fn new(name: &str) -> Self {
		Self { x: name.into() }
	}

	/// Get the name
	pub fn name(&self) -> &SmartString<LazyCompact> {
		&self.x
	}
}

impl Display for PipelineName {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.x.fmt(f)
	}
}

impl From<String> for PipelineName {
	fn from(value: String) -> Self {
		Self::new(&value)
	}
}

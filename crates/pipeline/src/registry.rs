//! A process-wide map from class name to node constructor, used to turn
//! configuration records into running nodes without the builder needing
//! to know any concrete node type.

use std::{
	collections::HashMap,
	sync::{Mutex, OnceLock},
};

use serde_json::{Map, Value};

use conduit_util::{NodeName, PortName};

use crate::{errors::RegistryError, isolation::Isolation, node::NodeLogic};

/// A configuration record: the hydration input for one node.
///
/// `cls` names the registered constructor; `name` is this node's
/// identity in the pipeline; `type` (optional, default `"task"`) selects
/// isolation; `input`/`output` name its ports; `timeout`, `max_retries`,
/// `max_restarts`, and `collector` configure the iteration loop itself
/// rather than the work function, so the builder reads them directly
/// instead of forwarding them through `args`. Everything else is passed
/// through to the constructor unchanged.
#[derive(Debug, Clone)]
pub struct ConfigRecord {
	pub cls: String,
	pub name: NodeName,
	pub isolation: Isolation,
	pub input: Vec<PortName>,
	pub output: Vec<PortName>,
	/// Minimum delay between iterations. Zero means yield instead of sleep.
	pub timeout_ms: u64,
	/// Extra attempts allowed after an ERROR batch before a restart
	pub max_retries: u32,
	/// Extra `close`/`post_init` cycles allowed after retries are exhausted
	pub max_restarts: u32,
	/// The metadata key a collector-mode node watches for its flush signal
	pub collector_flag: Option<String>,
	pub args: Map<String, Value>,
}

impl ConfigRecord {
	/// Parse a configuration record out of a raw JSON object.
	///
	/// `cls` and `name` are required. `type` defaults to `task`.
	/// `input`/`output` each accept either a single string or a list of
	/// strings, and default to an empty list. `timeout`, `max_retries`,
	/// `max_restarts`, and `collector` default to `0`/`0`/`0`/`None`.
	/// Every other key is kept verbatim in `args` for the constructor to
	/// interpret.
	pub fn from_json(mut raw: Map<String, Value>) -> Result<Self, crate::errors::BuilderError> {
		let cls = raw
			.remove("cls")
			.and_then(|v| v.as_str().map(str::to_string))
			.ok_or(crate::errors::BuilderError::MissingClassName)?;

		let name = raw
			.remove("name")
			.and_then(|v| v.as_str().map(NodeName::new))
			.unwrap_or_else(|| NodeName::new(&cls));

		let isolation = match raw.remove("type") {
			Some(Value::String(s)) => s.parse().unwrap_or_default(),
			_ => Isolation::default(),
		};

		let input = parse_ports(raw.remove("input"));
		let output = parse_ports(raw.remove("output"));

		let timeout_ms = raw.remove("timeout").and_then(|v| v.as_f64()).map(|s| (s * 1000.0) as u64).unwrap_or(0);
		let max_retries = raw.remove("max_retries").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
		let max_restarts = raw.remove("max_restarts").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
		let collector_flag = raw.remove("collector").and_then(|v| v.as_str().map(str::to_string));

		Ok(Self {
			cls,
			name,
			isolation,
			input,
			output,
			timeout_ms,
			max_retries,
			max_restarts,
			collector_flag,
			args: raw,
		})
	}
}

fn parse_ports(value: Option<Value>) -> Vec<PortName> {
	match value {
		Some(Value::String(s)) => vec![PortName::new(&s)],
		Some(Value::Array(items)) => items
			.into_iter()
			.filter_map(|v| v.as_str().map(PortName::new))
			.collect(),
		_ => Vec::new(),
	}
}

/// A constructor: turns a configuration record's `args` into a boxed
/// [`NodeLogic`], or fails with whatever the node's own setup raised.
pub type Constructor = Box<dyn Fn(&Map<String, Value>) -> Result<Box<dyn NodeLogic>, String> + Send + Sync>;

static REGISTRY: OnceLock<Mutex<HashMap<String, Constructor>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Constructor>> {
	REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Register a constructor under `cls`. Call this once per node type,
/// typically at daemon startup, before any pipeline is built.
pub fn register(cls: impl Into<String>, constructor: Constructor) {
	registry().lock().unwrap().insert(cls.into(), constructor);
}

/// Register a constructor under `cls` out of a plain closure.
#[macro_export]
macro_rules! register_node {
	($cls:expr, $ctor:expr) => {
		$crate::registry::register($cls, Box::new($ctor))
	};
}

/// Build a node's work-function logic out of its configuration record.
pub fn hydrate(record: &ConfigRecord) -> Result<Box<dyn NodeLogic>, RegistryError> {
	let registry = registry().lock().unwrap();
	let constructor = registry
		.get(&record.cls)
		.ok_or_else(|| RegistryError::UnknownClass {
			cls: record.cls.clone(),
		})?;
	constructor(&record.args).map_err(|message| RegistryError::ConstructorFailed {
		cls: record.cls.clone(),
		message,
	})
}

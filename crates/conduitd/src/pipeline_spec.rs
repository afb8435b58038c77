//! Loading a pipeline out of a TOML file: a `[[node]]` array of tables,
//! one per node, parsed into [`ConfigRecord`]s the same way
//! `conduit_pipeline::registry::ConfigRecord::from_json` parses any other
//! configuration record.
//!
//! Grounded on `original_source/pipez/build.py`, which reads its pipeline
//! description out of a plain dict and hands each entry to
//! `ConfigRecord`/`Node` construction; TOML is this workspace's config
//! format (see `conduitd::config`), so a pipeline spec is just another
//! TOML document with the same shape.

use std::path::Path;

use anyhow::{anyhow, Context};
use conduit_pipeline::{builder::NodeSpec, registry, BuilderError, ConfigRecord};
use serde_json::{Map, Value};

/// A pipeline spec file: an array of node configuration records under
/// `[[node]]`.
#[derive(serde::Deserialize)]
struct PipelineSpecFile {
	#[serde(default)]
	node: Vec<toml::Value>,
}

/// Read a pipeline spec from `path`, hydrate every node through the
/// registry, and return the specs ready for [`conduit_pipeline::PipelineBuilder::add_node`].
///
/// Every node class named in the spec must already be registered (see
/// `conduit_nodes::register_all`) before this is called.
pub fn load(path: &Path) -> anyhow::Result<Vec<NodeSpec>> {
	let raw = std::fs::read_to_string(path)
		.with_context(|| format!("could not read pipeline spec `{}`", path.display()))?;
	let file: PipelineSpecFile = toml::from_str(&raw)
		.with_context(|| format!("could not parse pipeline spec `{}`", path.display()))?;

	if file.node.is_empty() {
		return Err(BuilderError::EmptyPipeline.into());
	}

	file.node
		.into_iter()
		.map(|entry| {
			let json = toml_to_json(entry);
			let object = json
				.as_object()
				.cloned()
				.ok_or_else(|| anyhow!("each [[node]] entry must be a table"))?;
			let record = ConfigRecord::from_json(object)?;
			let logic = registry::hydrate(&record)?;
			Ok(NodeSpec::new(record, logic))
		})
		.collect()
}

/// Convert a parsed TOML value into the `serde_json::Value` shape every
/// other part of this crate speaks (node `args`, batch records and
/// metadata).
fn toml_to_json(value: toml::Value) -> Value {
	match value {
		toml::Value::String(s) => Value::String(s),
		toml::Value::Integer(i) => Value::from(i),
		toml::Value::Float(f) => Value::from(f),
		toml::Value::Boolean(b) => Value::Bool(b),
		toml::Value::Datetime(dt) => Value::String(dt.to_string()),
		toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
		toml::Value::Table(table) => {
			let mut map = Map::new();
			for (k, v) in table {
				map.insert(k, toml_to_json(v));
			}
			Value::Object(map)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use conduit_pipeline::{errors::NodeError, node::NodeLogic, Batch};

	struct Noop;
	impl NodeLogic for Noop {
		fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
			Ok(input)
		}
	}

	fn ensure_test_class_registered() {
		registry::register(
			"test.pipeline_spec.Noop",
			Box::new(|_args| Ok(Box::new(Noop) as Box<dyn NodeLogic>)),
		);
	}

	#[test]
	fn loads_nodes_from_a_toml_file() {
		ensure_test_class_registered();

		let dir = std::env::temp_dir();
		let path = dir.join(format!("conduitd-pipeline-spec-test-{}.toml", std::process::id()));
		std::fs::write(
			&path,
			r#"
[[node]]
cls = "test.pipeline_spec.Noop"
name = "source"
output = "out"

[[node]]
cls = "test.pipeline_spec.Noop"
name = "sink"
input = "out"
"#,
		)
		.unwrap();

		let specs = load(&path).unwrap();
		assert_eq!(specs.len(), 2);
		assert_eq!(specs[0].record.name.to_string(), "source");
		assert_eq!(specs[1].record.name.to_string(), "sink");

		std::fs::remove_file(&path).unwrap();
	}

	#[test]
	fn empty_node_list_is_rejected() {
		let dir = std::env::temp_dir();
		let path = dir.join(format!("conduitd-pipeline-spec-test-empty-{}.toml", std::process::id()));
		std::fs::write(&path, "").unwrap();

		let err = load(&path).unwrap_err();
		assert!(err.to_string().contains("no nodes"));

		std::fs::remove_file(&path).unwrap();
	}
}

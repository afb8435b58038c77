//! Projects a fixed set of keys out of every record in a batch.
//!
//! Grounded directly on `original_source/pipez/nodes/common/get.py`'s
//! `Get(Node)`: `work_func` rebuilds each row keeping only `self._key`.

use conduit_pipeline::{
	batch::{Batch, Record},
	errors::NodeError,
	node::NodeLogic,
};

/// Keeps only the configured keys of each record, dropping everything else.
pub struct Get {
	keys: Vec<String>,
}

impl Get {
	/// A `Get` node that keeps `keys` from every record it sees
	pub fn new(keys: Vec<String>) -> Self {
		Self { keys }
	}
}

impl NodeLogic for Get {
	fn processing(&mut self, input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		let Some(batch) = input else {
			return Ok(None);
		};
		if !batch.is_ok() {
			return Ok(Some(batch));
		}

		let records = batch
			.iter()
			.map(|record| {
				let mut projected = Record::new();
				for key in &self.keys {
					if let Some(value) = record.get(key) {
						projected.insert(key.clone(), value.clone());
					}
				}
				projected
			})
			.collect();

		Ok(Some(Batch::ok(records, batch.metadata().clone())))
	}
}

pub(crate) fn register() {
	conduit_pipeline::registry::register(
		"conduit.Get",
		Box::new(|args| {
			let keys = args
				.get("keys")
				.and_then(|v| v.as_array())
				.ok_or_else(|| "conduit.Get requires a `keys` array argument".to_string())?
				.iter()
				.map(|v| {
					v.as_str()
						.map(str::to_string)
						.ok_or_else(|| "conduit.Get `keys` entries must be strings".to_string())
				})
				.collect::<Result<Vec<_>, _>>()?;
			Ok(Box::new(Get::new(keys)) as Box<dyn NodeLogic>)
		}),
	);
}

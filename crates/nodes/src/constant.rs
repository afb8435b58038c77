//! A source node that replays a fixed list of records, chunked into
//! batches, then signals `LAST`.
//!
//! Has no input ports. Grounded on the "Linear OK→LAST" scenario in
//! spec.md section 8 (a source that emits several OK batches of fixed
//! size, then one final `LAST`), generalized into a reusable node instead
//! of a one-off test fixture.

use conduit_pipeline::{batch::Batch, errors::NodeError, node::NodeLogic};

/// Replays `records` in chunks of `batch_size`, then emits `LAST`.
pub struct Constant {
	records: Vec<conduit_pipeline::batch::Record>,
	batch_size: usize,
	position: usize,
	exhausted: bool,
}

impl Constant {
	/// A source that emits `records` in chunks of `batch_size` (minimum 1),
	/// then completes
	pub fn new(records: Vec<conduit_pipeline::batch::Record>, batch_size: usize) -> Self {
		Self {
			records,
			batch_size: batch_size.max(1),
			position: 0,
			exhausted: false,
		}
	}
}

impl NodeLogic for Constant {
	fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		if self.exhausted {
			return Ok(Some(Batch::last()));
		}

		if self.position >= self.records.len() {
			self.exhausted = true;
			return Ok(Some(Batch::last()));
		}

		let end = (self.position + self.batch_size).min(self.records.len());
		let chunk = self.records[self.position..end].to_vec();
		self.position = end;

		if self.position >= self.records.len() {
			self.exhausted = true;
		}

		Ok(Some(Batch::ok_records(chunk)))
	}
}

pub(crate) fn register() {
	conduit_pipeline::registry::register(
		"conduit.Constant",
		Box::new(|args| {
			let records = args
				.get("records")
				.and_then(|v| v.as_array())
				.ok_or_else(|| "conduit.Constant requires a `records` array argument".to_string())?
				.iter()
				.map(|v| {
					v.as_object()
						.cloned()
						.ok_or_else(|| "conduit.Constant `records` entries must be objects".to_string())
				})
				.collect::<Result<Vec<_>, _>>()?;
			let batch_size = args.get("batch_size").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
			Ok(Box::new(Constant::new(records, batch_size)) as Box<dyn NodeLogic>)
		}),
	);
}

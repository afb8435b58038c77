//! The envelope that travels between nodes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::slice::Iter;

/// A single record: a small keyed map of arbitrary values.
pub type Record = Map<String, Value>;

/// A batch's metadata: a string-keyed map of arbitrary values.
pub type Metadata = Map<String, Value>;

/// A batch's status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
	/// Ordinary data, more may follow
	Ok,
	/// This is the last batch this stream will ever produce
	Last,
	/// Something went wrong; `Batch::error_message` carries the reason
	Error,
}

/// An immutable-by-convention envelope carrying a data list, a metadata
/// map, a status tag, and an optional error string.
///
/// A `Batch`'s status never changes after construction. `Last` and `Error`
/// batches normally carry no records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
	records: Vec<Record>,
	metadata: Metadata,
	status: BatchStatus,
	error: Option<String>,
}

impl Batch {
	/// Build an OK batch out of the given records and metadata
	pub fn ok(records: Vec<Record>, metadata: Metadata) -> Self {
		Self {
			records,
			metadata,
			status: BatchStatus::Ok,
			error: None,
		}
	}

	/// Build an OK batch with empty metadata
	pub fn ok_records(records: Vec<Record>) -> Self {
		Self::ok(records, Metadata::new())
	}

	/// Build an empty OK batch, useful as a collector accumulator seed
	pub fn empty() -> Self {
		Self::ok(Vec::new(), Metadata::new())
	}

	/// Build the batch that signals the end of a stream
	pub fn last() -> Self {
		Self {
			records: Vec::new(),
			metadata: Metadata::new(),
			status: BatchStatus::Last,
			error: None,
		}
	}

	/// Build an ERROR batch carrying `message`
	pub fn error(message: impl Into<String>) -> Self {
		Self {
			records: Vec::new(),
			metadata: Metadata::new(),
			status: BatchStatus::Error,
			error: Some(message.into()),
		}
	}

	/// This batch's status
	pub fn status(&self) -> BatchStatus {
		self.status
	}

	/// Is this batch `Ok`?
	pub fn is_ok(&self) -> bool {
		self.status == BatchStatus::Ok
	}

	/// Is this batch `Last`?
	pub fn is_last(&self) -> bool {
		self.status == BatchStatus::Last
	}

	/// Is this batch `Error`?
	pub fn is_error(&self) -> bool {
		self.status == BatchStatus::Error
	}

	/// The error message, if this is an ERROR batch
	pub fn error_message(&self) -> Option<&str> {
		self.error.as_deref()
	}

	/// This batch's records
	pub fn records(&self) -> &[Record] {
		&self.records
	}

	/// Consume this batch, returning its records
	pub fn into_records(self) -> Vec<Record> {
		self.records
	}

	/// This batch's metadata
	pub fn metadata(&self) -> &Metadata {
		&self.metadata
	}

	/// A mutable handle to this batch's metadata, for use during construction
	pub fn metadata_mut(&mut self) -> &mut Metadata {
		&mut self.metadata
	}

	/// How many records this batch carries
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Is this batch's record list empty?
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Append a record. Only meaningful during construction, before this
	/// batch is published to a queue.
	pub fn push(&mut self, record: Record) {
		self.records.push(record);
	}

	/// Extend this batch's records with another batch's records.
	/// Used by collector-mode accumulation.
	pub fn extend_from(&mut self, other: Batch) {
		self.records.extend(other.records);
	}

	/// Iterate over this batch's records
	pub fn iter(&self) -> Iter<'_, Record> {
		self.records.iter()
	}
}

impl<'a> IntoIterator for &'a Batch {
	type Item = &'a Record;
	type IntoIter = Iter<'a, Record>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_predicates_agree_with_status() {
		assert!(Batch::ok_records(vec![]).is_ok());
		assert!(Batch::last().is_last());
		assert!(Batch::error("boom").is_error());
		assert_eq!(Batch::error("boom").error_message(), Some("boom"));
	}

	#[test]
	fn last_and_error_batches_carry_no_records() {
		assert_eq!(Batch::last().len(), 0);
		assert_eq!(Batch::error("x").len(), 0);
	}

	#[test]
	fn collector_accumulation_extends_records() {
		let mut acc = Batch::empty();
		let mut r1 = Record::new();
		r1.insert("a".into(), Value::from(1));
		acc.extend_from(Batch::ok_records(vec![r1]));
		assert_eq!(acc.len(), 1);
	}
}

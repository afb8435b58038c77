//! Per-node counters and timing, exposed to the metrics HTTP endpoint

use std::{
	collections::VecDeque,
	sync::atomic::{AtomicU64, Ordering},
	sync::Mutex,
};

/// How many recent iteration durations we keep per node before the
/// oldest sample is evicted
const DURATION_WINDOW: usize = 1000;

/// Running counters and a bounded window of recent iteration durations
/// for a single node.
///
/// Durations are recorded in milliseconds (`unit_ms` reflects this in
/// serialized output); `mean`/`std`/`sum` are computed over whatever is
/// currently in the window, not the node's whole lifetime.
pub struct Metrics {
	input_records: AtomicU64,
	output_records: AtomicU64,
	iterations: AtomicU64,
	errors: AtomicU64,
	durations_ms: Mutex<VecDeque<f64>>,
}

impl Default for Metrics {
	fn default() -> Self {
		Self {
			input_records: AtomicU64::new(0),
			output_records: AtomicU64::new(0),
			iterations: AtomicU64::new(0),
			errors: AtomicU64::new(0),
			durations_ms: Mutex::new(VecDeque::with_capacity(DURATION_WINDOW)),
		}
	}
}

impl Metrics {
	/// A fresh, zeroed metrics record
	pub fn new() -> Self {
		Self::default()
	}

	/// Record one completed iteration: how many records came in, how
	/// many went out, and how long the work function took
	pub fn record_iteration(&self, input_len: usize, output_len: usize, duration_ms: f64) {
		self.input_records.fetch_add(input_len as u64, Ordering::Relaxed);
		self.output_records.fetch_add(output_len as u64, Ordering::Relaxed);
		self.iterations.fetch_add(1, Ordering::Relaxed);
		self.push_duration(duration_ms);
	}

	/// Record a failed iteration (the work function or shape check failed)
	pub fn record_error(&self) {
		self.errors.fetch_add(1, Ordering::Relaxed);
	}

	fn push_duration(&self, duration_ms: f64) {
		let mut durations = self.durations_ms.lock().unwrap();
		if durations.len() == DURATION_WINDOW {
			durations.pop_front();
		}
		durations.push_back(duration_ms);
	}

	/// Total records ever pulled in
	pub fn input_records(&self) -> u64 {
		self.input_records.load(Ordering::Relaxed)
	}

	/// Total records ever pushed out
	pub fn output_records(&self) -> u64 {
		self.output_records.load(Ordering::Relaxed)
	}

	/// Total completed iterations
	pub fn iterations(&self) -> u64 {
		self.iterations.load(Ordering::Relaxed)
	}

	/// Total failed iterations
	pub fn errors(&self) -> u64 {
		self.errors.load(Ordering::Relaxed)
	}

	/// Mean iteration duration over the current window, in milliseconds
	pub fn mean(&self) -> f64 {
		let durations = self.durations_ms.lock().unwrap();
		if durations.is_empty() {
			return 0.0;
		}
		durations.iter().sum::<f64>() / durations.len() as f64
	}

	/// Population standard deviation of iteration duration over the
	/// current window
	pub fn std(&self) -> f64 {
		let durations = self.durations_ms.lock().unwrap();
		if durations.is_empty() {
			return 0.0;
		}
		let mean = durations.iter().sum::<f64>() / durations.len() as f64;
		let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / durations.len() as f64;
		variance.sqrt()
	}

	/// Sum of iteration durations over the current window, in milliseconds
	pub fn sum(&self) -> f64 {
		self.durations_ms.lock().unwrap().iter().sum()
	}

	/// A JSON-serializable snapshot, for the metrics HTTP endpoint
	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			input_records: self.input_records(),
			output_records: self.output_records(),
			iterations: self.iterations(),
			errors: self.errors(),
			duration_mean_ms: self.mean(),
			duration_std_ms: self.std(),
			duration_sum_ms: self.sum(),
			unit_ms: true,
		}
	}
}

/// A point-in-time copy of a node's [`Metrics`], suitable for `serde_json`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
	pub input_records: u64,
	pub output_records: u64,
	pub iterations: u64,
	pub errors: u64,
	pub duration_mean_ms: f64,
	pub duration_std_ms: f64,
	pub duration_sum_ms: f64,
	pub unit_ms: bool,
}

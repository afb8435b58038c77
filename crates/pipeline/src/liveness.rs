//! The liveness monitor: a `PROCESS`-isolated node whose only job is to
//! watch the watchdog's heartbeat from outside the pipeline's own
//! process tree, and kill the whole daemon if it ever goes stale.
//!
//! Grounded directly on `original_source/pipez/core/monitoring.py`'s
//! `Monitoring(Node)`: `type=NodeType.PROCESS`, a fixed timeout, and
//! `os.kill(1, signal.SIGTERM)` once `time.time() - shared['time'] >= threshold`.
//! Running this as its own OS process (rather than a thread) means a
//! wedged root process — a deadlock, a runaway allocation — can't take
//! the monitor down with it; only losing the whole container can.

use std::time::Duration;

use crate::{batch::Batch, errors::NodeError, memory, node::NodeLogic, supervisor::HEARTBEAT_KEY};

/// Default stall threshold, matching the source's `Monitoring` default
const DEFAULT_STALL_THRESHOLD_SECS: f64 = 120.0;

/// Watches [`crate::supervisor::HEARTBEAT_KEY`]; sends `SIGTERM` to pid 1
/// if it hasn't moved in `stall_threshold`.
pub struct LivenessMonitor {
	stall_threshold: Duration,
}

impl LivenessMonitor {
	/// A monitor that kills the daemon if the watchdog heartbeat is older
	/// than `stall_threshold`
	pub fn new(stall_threshold: Duration) -> Self {
		Self { stall_threshold }
	}
}

impl Default for LivenessMonitor {
	fn default() -> Self {
		Self::new(Duration::from_secs_f64(DEFAULT_STALL_THRESHOLD_SECS))
	}
}

impl NodeLogic for LivenessMonitor {
	fn processing(&mut self, _input: Option<Batch>) -> Result<Option<Batch>, NodeError> {
		let now = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs_f64();

		let heartbeat = memory::shared().get(HEARTBEAT_KEY).and_then(|v| v.as_f64());

		let stalled = match heartbeat {
			Some(last) => now - last >= self.stall_threshold.as_secs_f64(),
			// No heartbeat written yet: the watchdog hasn't run its first
			// iteration. Not a stall by itself.
			None => false,
		};

		if stalled {
			tracing::error!(
				stall_threshold_secs = self.stall_threshold.as_secs_f64(),
				"liveness monitor: watchdog heartbeat stalled, sending SIGTERM to pid 1"
			);
			unsafe {
				libc::kill(1, libc::SIGTERM);
			}
		}

		Ok(None)
	}
}

/// Register this node type under the class name the builder's optional
/// liveness monitor bootstraps with. Safe to call more than once.
pub(crate) fn register() {
	crate::registry::register(
		"conduit.internal.LivenessMonitor",
		Box::new(|args| {
			let threshold_secs = args
				.get("stall_threshold_secs")
				.and_then(|v| v.as_f64())
				.unwrap_or(DEFAULT_STALL_THRESHOLD_SECS);
			Ok(Box::new(LivenessMonitor::new(Duration::from_secs_f64(threshold_secs))) as Box<dyn NodeLogic>)
		}),
	);
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::Value;

	#[test]
	fn no_heartbeat_yet_is_not_a_stall() {
		memory::init_shared_local();
		let mut monitor = LivenessMonitor::new(Duration::from_millis(1));
		// doesn't panic or kill anything observable from in-process;
		// we only assert it returns cleanly with no output
		assert!(monitor.processing(None).unwrap().is_none());
	}

	#[test]
	fn recent_heartbeat_is_not_a_stall() {
		memory::init_shared_local();
		let now = std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.unwrap()
			.as_secs_f64();
		memory::shared().set(HEARTBEAT_KEY, Value::from(now));
		let mut monitor = LivenessMonitor::new(Duration::from_secs(120));
		assert!(monitor.processing(None).unwrap().is_none());
	}

	#[test]
	fn registered_constructor_reads_threshold_from_args() {
		register();
		let mut args = serde_json::Map::new();
		args.insert("stall_threshold_secs".to_string(), Value::from(30.0));
		let record = crate::registry::ConfigRecord::from_json(
			[
				("cls".to_string(), Value::from("conduit.internal.LivenessMonitor")),
				("stall_threshold_secs".to_string(), Value::from(30.0)),
			]
			.into_iter()
			.collect(),
		)
		.unwrap();
		assert!(crate::registry::hydrate(&record).is_ok());
		let _ = args;
	}
}

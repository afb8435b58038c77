//! Generic, domain-free node implementations for `conduit-pipeline`.
//!
//! `conduit-pipeline` only specifies the execution engine; concrete worker
//! behavior (image decoding, inference, video capture, ...) is deliberately
//! out of its scope. This crate fills that gap with the handful of
//! domain-free nodes the daemon's example pipelines and the workspace's
//! integration tests actually hydrate through the registry: a pass-through,
//! a key-projection, a constant source, an accumulating sink, and a
//! fault-injecting node used to exercise the retry/restart policy.
//!
//! None of these are registered automatically — per `conduit-pipeline`'s
//! registry design, registration is an explicit call the daemon makes at
//! startup, not a ctor-style side effect of linking this crate in.

pub mod collect;
pub mod constant;
pub mod failn;
pub mod get;
pub mod noop;

pub use collect::Collect;
pub use constant::Constant;
pub use failn::FailN;
pub use get::Get;
pub use noop::Noop;

/// Register every node type in this crate under its class name. Call once
/// at startup, before any pipeline is built from configuration.
pub fn register_all() {
	noop::register();
	get::register();
	constant::register();
	collect::register();
	failn::register();
}

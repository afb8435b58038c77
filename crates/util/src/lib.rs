//! Shared label types used across the conduit workspace

pub mod labels;

pub use labels::{NodeName, PipelineName, PortName};

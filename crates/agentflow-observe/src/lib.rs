//! Observability setup for agentflow.

pub mod tracing_setup;

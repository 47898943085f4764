//! Service layer module.
//!
//! This module provides the service container that wires the report
//! pipeline together.

pub mod container;

pub use container::{PipelineDeps, ServiceContainer};

//! Value objects for the domain layer.

pub mod retry_policy;

pub use retry_policy::RetryPolicy;

//! retinonet-manager: Model lifecycle management
//!
//! This crate owns the loaded classifier for the lifetime of the service:
//! - Background loading at startup, with an inline fallback on request
//! - Single-flight loading from the snapshot cache or the weights file
//! - Retry backoff and a time bound on loader calls

pub mod manager;
pub mod retry;

pub use manager::{ManagerBuilder, ModelManager};
pub use retry::RetryPolicy;

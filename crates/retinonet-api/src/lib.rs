//! retinonet-api: REST API server for RetinoNet
//!
//! This crate provides the HTTP surface of the service:
//! - Screening predictions
//! - Model status and readiness probes

pub mod rest;

pub use rest::{create_router, AppState};

//! retinonet-core: Core types for the RetinoNet service
//!
//! This crate provides the fundamental types shared by every other crate:
//! - Service configuration
//! - Error handling
//! - Image tensors, predictions and class labels
//! - Model lifecycle status types

pub mod config;
pub mod error;
pub mod model;

pub use config::*;
pub use error::*;
pub use model::*;

//! retinonet-store: Model storage
//!
//! This crate provides model storage functionality:
//! - A versioned, single-slot snapshot cache of the loaded model
//! - Downloading weights over HTTP

pub mod cache;
pub mod fetch;

pub use cache::{decode_snapshot, encode_snapshot, SnapshotCache, SNAPSHOT_FORMAT, SNAPSHOT_VERSION};
pub use fetch::HttpWeightsSource;

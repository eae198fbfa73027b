//! Berth engine library
//!
//! Streams image build events into per-service logs and manages the local
//! multi-node development cluster.

// Core modules
pub mod config;
pub mod logging;

// Build log aggregation
pub mod build;

// Cluster lifecycle
pub mod cluster;

pub use berth_common::{Error, ErrorCategory, Result};
pub use config::BerthConfig;

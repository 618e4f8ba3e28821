//! Shared types and utilities for Beacon
//!
//! This crate contains the domain records, message contract, error taxonomy
//! and small utilities used across the ingest and rollup services.

pub mod error;
pub mod messages;
pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use messages::*;
pub use types::{device::*, notification::*, sample::*, stream::*, window::*};

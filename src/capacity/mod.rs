//! Capacity Module
//!
//! Splits requested node-group capacity across on-demand and spot
//! partitions before provisioning.

pub mod allocator;

pub use allocator::*;

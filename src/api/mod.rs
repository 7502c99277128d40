//! API Module
//!
//! REST entry points for lifecycle events, manual passes and capacity
//! splitting.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;

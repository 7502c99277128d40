//! Provider Adapters
//!
//! AWS implementations of the cloud ports, in-memory implementations for
//! standalone runs and tests, and the YAML inventory format used to seed them.

pub mod aws;
pub mod inventory;
pub mod memory;

pub use aws::{AwsCloud, AwsConfig, AwsConnector, AwsCredentials};
pub use inventory::InventoryFile;
pub use memory::{InMemoryCloud, InMemoryNodes};

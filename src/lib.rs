//! CartScout library
//!
//! Drives one headless browser context per storefront, searches them in parallel and streams the
//! normalized results to a WebSocket client. Modules are public for integration testing.

pub mod cli;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod metrics;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod orchestrator;
pub mod pool;
pub mod pricing;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod targets;

pub use cartscout_core_types::{CartOutcome, LocationResult, ProductRecord, SearchStatus, Target};
pub use errors::{ScoutError, ScoutResult};
pub use gateway::{Connection, Gateway};

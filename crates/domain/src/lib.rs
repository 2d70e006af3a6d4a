//! Domain-level building blocks shared by the storage and monitor crates:
//! the scan data model, environment configuration, the chain registry and
//! telemetry wiring.

pub mod config;
pub mod model;
pub mod services;
pub mod storage;

pub use model::*;
pub use storage::*;

//! Shared service helpers: chain registry, timestamp caching and telemetry
//! wiring.

pub mod cache;
pub mod chains;
pub mod telemetry;

pub use cache::*;
pub use chains::*;
pub use telemetry::*;

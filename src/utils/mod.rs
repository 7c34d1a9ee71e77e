//! Utils Module - Shared Infrastructure
//!
//! Constants, versioned artifact storage, the model registry and telemetry.

pub mod constants;
pub mod registry;
pub mod store;
pub mod telemetry;

pub use constants::*;
pub use registry::*;
pub use store::*;
pub use telemetry::*;

//! Shared utilities.

pub mod ids;
pub mod panic;
pub mod telemetry;

pub use ids::*;
pub use panic::*;
pub use telemetry::*;

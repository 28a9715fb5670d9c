//! Farm Economics Module
//!
//! Implements the arithmetic half of the farm ledger:
//! - Fixed-point reward-per-share accumulation that always rounds down
//! - An emission schedule whose per-block rate is re-derived whenever
//!   funding or the horizon changes, never promising more than is held
//! - Validated construction parameters

pub mod emission;
pub mod errors;
pub mod fixed_point;
pub mod parameters;

pub use emission::*;
pub use errors::*;
pub use fixed_point::*;
pub use parameters::*;

/// Module version for API introspection
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

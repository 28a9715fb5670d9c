//! Farm ledger shared types
//!
//! Identifiers, scalar units and the persisted state of pools, stakes and the
//! emission schedule. Behaviour lives in `farm-economics` and `farm-core`;
//! this crate only carries data so that storage can depend on it alone.

pub mod address;
pub mod asset;
pub mod asset_book;
pub mod farm_state;
pub mod units;

pub use address::*;
pub use asset::*;
pub use asset_book::*;
pub use farm_state::*;
pub use units::*;

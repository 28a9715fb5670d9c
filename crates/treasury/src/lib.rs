//! Farm Treasury Module
//!
//! Boundary to the fungible asset service: the staked assets flow into and
//! out of the farm's custody account through it, and rewards are paid from
//! the same custody.

pub mod asset_ledger;

pub use asset_ledger::{AssetCall, AssetError, AssetLedger, InMemoryAssetLedger, MockAssetLedger};

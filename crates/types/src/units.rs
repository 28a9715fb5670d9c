//! Scalar units used across the ledger.

/// Quantity of any fungible asset, in its smallest indivisible unit.
pub type Amount = u128;

/// Block (or slot) height as observed by the host chain.
pub type BlockNumber = u64;

/// Index of a pool in registration order.
pub type PoolId = u32;

/// Relative allocation weight of a pool.
pub type Weight = u64;

/// Fixed-point scale applied to `acc_reward_per_share`.
pub const PRECISION: u128 = 1_000_000_000_000;

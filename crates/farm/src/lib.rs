//! Farm Core
//!
//! The reward-accrual engine: a registry of weighted pools, per-user stakes
//! with reward-debt checkpoints, and the [`Farm`] aggregate that sequences
//! every entry point as settle -> compute pending -> move assets -> commit.

pub mod auth;
pub mod errors;
pub mod farm;
pub mod pool;
pub mod transfers;
pub mod user;

pub use auth::OperatorCap;
pub use errors::FarmError;
pub use farm::{Farm, FarmState};
pub use pool::PoolRegistry;
pub use transfers::{PlannedTransfer, TransferBatch};
pub use user::{StakeChange, StakeReceipt, UserLedger};

pub use farm_types::{
    AccountId, Amount, AssetId, BlockNumber, EmissionState, FarmSnapshot, FundingPolicy, Pool,
    PoolId, UserStake, Weight, PRECISION,
};

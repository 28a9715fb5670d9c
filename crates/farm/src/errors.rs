use farm_economics::EconomicsError;
use farm_treasury::AssetError;
use farm_types::{Amount, BlockNumber, PoolId};
use thiserror::Error;

/// Errors surfaced by farm entry points. A failed call commits nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FarmError {
    #[error("caller is not the farm operator")]
    Unauthorized,

    #[error("pool {0} does not exist")]
    PoolNotFound(PoolId),

    #[error("withdrawal of {requested} exceeds staked amount {staked}")]
    InsufficientStake { requested: Amount, staked: Amount },

    #[error("invalid horizon extension of {0} blocks")]
    InvalidHorizon(BlockNumber),

    #[error("{0}")]
    InsufficientBalance(AssetError),

    #[error("{0}")]
    InsufficientAllowance(AssetError),

    #[error("asset service error: {0}")]
    Asset(AssetError),

    #[error("arithmetic overflow: {0}")]
    ArithmeticOverflow(&'static str),

    #[error("block {requested} precedes last processed block {last}")]
    BlockRegression {
        last: BlockNumber,
        requested: BlockNumber,
    },

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

impl From<EconomicsError> for FarmError {
    fn from(err: EconomicsError) -> Self {
        match err {
            EconomicsError::InvalidHorizon(blocks) => FarmError::InvalidHorizon(blocks),
            EconomicsError::CalculationOverflow(what) => FarmError::ArithmeticOverflow(what),
            EconomicsError::InvalidParameter(what) => FarmError::InvalidParameter(what),
        }
    }
}

impl From<AssetError> for FarmError {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::InsufficientBalance { .. } => FarmError::InsufficientBalance(err),
            AssetError::InsufficientAllowance { .. } => FarmError::InsufficientAllowance(err),
            other => FarmError::Asset(other),
        }
    }
}

use farm_types::BlockNumber;
use thiserror::Error;

/// Errors raised by reward arithmetic and emission scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EconomicsError {
    #[error("invalid economics parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("invalid horizon extension of {0} blocks")]
    InvalidHorizon(BlockNumber),

    #[error("arithmetic overflow while performing economics calculation: {0}")]
    CalculationOverflow(&'static str),
}

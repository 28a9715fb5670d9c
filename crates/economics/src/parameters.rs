//! Construction parameters for the emission schedule

use crate::errors::EconomicsError;
use farm_types::{AssetId, BlockNumber, EmissionState, FundingPolicy};
use serde::{Deserialize, Serialize};

/// Initial horizon length used when none is configured (~1 week of 12s blocks).
pub const DEFAULT_DURATION_BLOCKS: BlockNumber = 50_400;

/// Parameters fixed when a farm is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionParams {
    /// Asset paid out as reward.
    pub reward_asset: AssetId,
    /// First block that emits reward.
    pub start_block: BlockNumber,
    /// Initial horizon length; `end_block = start_block + duration_blocks`.
    pub duration_blocks: BlockNumber,
    /// How mid-stream funding changes the schedule.
    pub policy: FundingPolicy,
}

impl EmissionParams {
    pub fn new(reward_asset: AssetId, start_block: BlockNumber) -> Self {
        Self {
            reward_asset,
            start_block,
            duration_blocks: DEFAULT_DURATION_BLOCKS,
            policy: FundingPolicy::default(),
        }
    }

    pub fn with_duration(mut self, duration_blocks: BlockNumber) -> Self {
        self.duration_blocks = duration_blocks;
        self
    }

    pub fn with_policy(mut self, policy: FundingPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn end_block(&self) -> Result<BlockNumber, EconomicsError> {
        self.start_block
            .checked_add(self.duration_blocks)
            .ok_or(EconomicsError::CalculationOverflow("end_block"))
    }

    pub fn validate(&self) -> Result<(), EconomicsError> {
        if self.duration_blocks == 0 {
            return Err(EconomicsError::InvalidParameter(
                "duration_blocks must be positive",
            ));
        }
        self.end_block()?;
        Ok(())
    }

    /// Build the initial, unfunded emission state.
    pub fn into_state(self) -> Result<EmissionState, EconomicsError> {
        self.validate()?;
        let end_block = self.end_block()?;
        Ok(EmissionState::new(
            self.reward_asset,
            self.start_block,
            end_block,
            self.policy,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = EmissionParams::new(AssetId::new("USDT").unwrap(), 0);
        assert!(params.validate().is_ok());
        assert_eq!(params.end_block().unwrap(), DEFAULT_DURATION_BLOCKS);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let params = EmissionParams::new(AssetId::new("USDT").unwrap(), 5).with_duration(0);
        assert_eq!(
            params.validate(),
            Err(EconomicsError::InvalidParameter(
                "duration_blocks must be positive"
            ))
        );
    }

    #[test]
    fn overflowing_horizon_is_rejected() {
        let params =
            EmissionParams::new(AssetId::new("USDT").unwrap(), u64::MAX).with_duration(1);
        assert!(matches!(
            params.into_state(),
            Err(EconomicsError::CalculationOverflow(_))
        ));
    }

    #[test]
    fn state_carries_policy_and_horizon() {
        let state = EmissionParams::new(AssetId::new("USDT").unwrap(), 10)
            .with_duration(90)
            .with_policy(FundingPolicy::Extend)
            .into_state()
            .unwrap();
        assert_eq!(state.start_block, 10);
        assert_eq!(state.end_block, 100);
        assert_eq!(state.policy, FundingPolicy::Extend);
    }
}

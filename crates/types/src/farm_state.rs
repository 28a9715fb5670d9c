//! Persisted state of the farm ledger

use crate::{AccountId, Amount, AssetId, BlockNumber, PoolId, Weight};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A staking pool accepting one asset and earning a weighted share of emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    /// Asset accepted by this pool. The same asset may back several pools.
    pub staked_asset: AssetId,
    pub weight: Weight,
    /// Block up to which `acc_reward_per_share` is current.
    pub last_settled_block: BlockNumber,
    /// Cumulative reward per staked unit, scaled by [`crate::PRECISION`].
    pub acc_reward_per_share: u128,
    /// Sum of all user stake amounts in this pool.
    pub total_staked: Amount,
}

impl Pool {
    pub fn new(id: PoolId, staked_asset: AssetId, weight: Weight, created_at: BlockNumber) -> Self {
        Self {
            id,
            staked_asset,
            weight,
            last_settled_block: created_at,
            acc_reward_per_share: 0,
            total_staked: 0,
        }
    }
}

/// Stake of one user in one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStake {
    pub pool: PoolId,
    pub user: AccountId,
    pub amount: Amount,
    /// `amount * acc_reward_per_share / PRECISION` at the last checkpoint.
    pub reward_debt: Amount,
}

impl UserStake {
    pub fn empty(pool: PoolId, user: AccountId) -> Self {
        Self {
            pool,
            user,
            amount: 0,
            reward_debt: 0,
        }
    }
}

/// What a mid-stream funding does to the schedule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingPolicy {
    /// Keep the deadline and raise the rate so the balance runs out at `end_block`.
    #[default]
    Accelerate,
    /// Keep the rate and push `end_block` out as far as the balance reaches.
    Extend,
}

impl fmt::Display for FundingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            FundingPolicy::Accelerate => "accelerate",
            FundingPolicy::Extend => "extend",
        };
        f.write_str(value)
    }
}

impl FromStr for FundingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accelerate" => Ok(FundingPolicy::Accelerate),
            "extend" => Ok(FundingPolicy::Extend),
            other => Err(format!("unknown funding policy '{other}'")),
        }
    }
}

/// Global emission schedule and reward balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionState {
    pub reward_asset: AssetId,
    /// Spendable reward balance in custody: funded minus paid out.
    pub total_funded: Amount,
    /// Emitted but not yet paid (owed to stakers or forgone by empty pools).
    pub reserved: Amount,
    pub reward_per_block: Amount,
    pub start_block: BlockNumber,
    pub end_block: BlockNumber,
    /// Block up to which `reserved` includes emitted reward.
    pub emission_checkpoint: BlockNumber,
    pub cumulative_funded: Amount,
    pub total_paid: Amount,
    pub policy: FundingPolicy,
}

impl EmissionState {
    pub fn new(
        reward_asset: AssetId,
        start_block: BlockNumber,
        end_block: BlockNumber,
        policy: FundingPolicy,
    ) -> Self {
        Self {
            reward_asset,
            total_funded: 0,
            reserved: 0,
            reward_per_block: 0,
            start_block,
            end_block,
            emission_checkpoint: start_block,
            cumulative_funded: 0,
            total_paid: 0,
            policy,
        }
    }
}

/// Durable form of the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmSnapshot {
    pub farm_id: String,
    pub operator: AccountId,
    pub custody: AccountId,
    pub last_block: BlockNumber,
    pub emission: EmissionState,
    pub pools: Vec<Pool>,
    pub stakes: Vec<UserStake>,
}

/// Farm-wide metadata stored next to the pool and stake tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmMeta {
    pub farm_id: String,
    pub operator: AccountId,
    pub custody: AccountId,
    pub last_block: BlockNumber,
}

impl FarmSnapshot {
    pub fn meta(&self) -> FarmMeta {
        FarmMeta {
            farm_id: self.farm_id.clone(),
            operator: self.operator,
            custody: self.custody,
            last_block: self.last_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funding_policy_parses_and_prints() {
        assert_eq!("Extend".parse::<FundingPolicy>().unwrap(), FundingPolicy::Extend);
        assert_eq!(FundingPolicy::Accelerate.to_string(), "accelerate");
        assert!("faster".parse::<FundingPolicy>().is_err());
    }

    #[test]
    fn emission_state_starts_empty() {
        let state = EmissionState::new(
            AssetId::new("USDT").unwrap(),
            10,
            110,
            FundingPolicy::default(),
        );
        assert_eq!(state.total_funded, 0);
        assert_eq!(state.reserved, 0);
        assert_eq!(state.emission_checkpoint, 10);
        assert_eq!(state.policy, FundingPolicy::Accelerate);
    }

    #[test]
    fn snapshot_serialises_with_string_keys() {
        let alice = AccountId::from_label("alice");
        let snapshot = FarmSnapshot {
            farm_id: "abc".into(),
            operator: alice,
            custody: AccountId::derive("custody", b"abc"),
            last_block: 5,
            emission: EmissionState::new(
                AssetId::new("USDT").unwrap(),
                0,
                100,
                FundingPolicy::Extend,
            ),
            pools: vec![Pool::new(0, AssetId::new("LP1").unwrap(), 2000, 0)],
            stakes: vec![UserStake::empty(0, alice)],
        };
        let json = serde_json::to_vec(&snapshot).unwrap();
        let back: FarmSnapshot = serde_json::from_slice(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}

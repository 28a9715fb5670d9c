//! Weighted pool registry and per-pool settlement.

use crate::errors::FarmError;
use farm_economics::{accumulate, weighted_share, EmissionScheduler};
use farm_types::{Amount, AssetId, BlockNumber, EmissionState, Pool, PoolId, Weight};
use tracing::{debug, warn};

/// Pools in registration order; a pool's id is its index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolRegistry {
    pools: Vec<Pool>,
    total_weight: Weight,
}

/// Accumulator value `pool` would hold if settled at `now`.
fn settled_accumulator(
    pool: &Pool,
    total_weight: Weight,
    now: BlockNumber,
    emission: &EmissionState,
) -> Result<u128, FarmError> {
    if now <= pool.last_settled_block || pool.total_staked == 0 {
        return Ok(pool.acc_reward_per_share);
    }
    let emitted = emission.reward_emitted_between(pool.last_settled_block, now)?;
    let pool_reward = weighted_share(emitted, pool.weight, total_weight)?;
    Ok(accumulate(
        pool.acc_reward_per_share,
        pool_reward,
        pool.total_staked,
    )?)
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted pools. Ids must match positions.
    pub fn from_pools(pools: Vec<Pool>) -> Result<Self, FarmError> {
        let mut total_weight: Weight = 0;
        for (index, pool) in pools.iter().enumerate() {
            if pool.id as usize != index {
                return Err(FarmError::InvalidParameter("pool ids are not contiguous"));
            }
            total_weight = total_weight
                .checked_add(pool.weight)
                .ok_or(FarmError::ArithmeticOverflow("total_weight"))?;
        }
        Ok(Self {
            pools,
            total_weight,
        })
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn total_weight(&self) -> Weight {
        self.total_weight
    }

    pub fn get(&self, id: PoolId) -> Result<&Pool, FarmError> {
        self.pools
            .get(id as usize)
            .ok_or(FarmError::PoolNotFound(id))
    }

    fn get_mut(&mut self, id: PoolId) -> Result<&mut Pool, FarmError> {
        self.pools
            .get_mut(id as usize)
            .ok_or(FarmError::PoolNotFound(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter()
    }

    pub fn into_pools(self) -> Vec<Pool> {
        self.pools
    }

    /// Append a pool. Every existing pool is settled first so that the
    /// weight it adds only dilutes the others from `now` on.
    pub fn add_pool(
        &mut self,
        staked_asset: AssetId,
        weight: Weight,
        now: BlockNumber,
        emission: &EmissionState,
    ) -> Result<PoolId, FarmError> {
        self.settle_all(now, emission)?;

        let id = PoolId::try_from(self.pools.len())
            .map_err(|_| FarmError::ArithmeticOverflow("pool id"))?;
        self.total_weight = self
            .total_weight
            .checked_add(weight)
            .ok_or(FarmError::ArithmeticOverflow("total_weight"))?;
        self.pools.push(Pool::new(id, staked_asset, weight, now));
        Ok(id)
    }

    /// Change a pool's weight from `now` on. Past accrual is untouched.
    pub fn set_weight(
        &mut self,
        id: PoolId,
        weight: Weight,
        now: BlockNumber,
        emission: &EmissionState,
    ) -> Result<Weight, FarmError> {
        self.get(id)?;
        self.settle_all(now, emission)?;

        let pool = self.get_mut(id)?;
        let previous = pool.weight;
        pool.weight = weight;
        self.total_weight = (self.total_weight - previous)
            .checked_add(weight)
            .ok_or(FarmError::ArithmeticOverflow("total_weight"))?;
        Ok(previous)
    }

    /// Bring one pool's accumulator up to `now`.
    pub fn settle(
        &mut self,
        id: PoolId,
        now: BlockNumber,
        emission: &EmissionState,
    ) -> Result<(), FarmError> {
        let total_weight = self.total_weight;
        let pool = self.get_mut(id)?;
        if now <= pool.last_settled_block {
            return Ok(());
        }

        if pool.total_staked == 0 {
            let forgone = weighted_share(
                emission.reward_emitted_between(pool.last_settled_block, now)?,
                pool.weight,
                total_weight,
            )?;
            if forgone > 0 {
                warn!(
                    target: "farm",
                    "Pool {} has no stake: {} reward over blocks {}..{} is forgone",
                    pool.id, forgone, pool.last_settled_block, now
                );
            }
            pool.last_settled_block = now;
            return Ok(());
        }

        let acc = settled_accumulator(pool, total_weight, now, emission)?;
        debug!(
            target: "farm",
            "Settled pool {} over blocks {}..{}: acc {} -> {}",
            pool.id, pool.last_settled_block, now, pool.acc_reward_per_share, acc
        );
        pool.acc_reward_per_share = acc;
        pool.last_settled_block = now;
        Ok(())
    }

    /// Settle every pool at `now`.
    pub fn settle_all(&mut self, now: BlockNumber, emission: &EmissionState) -> Result<(), FarmError> {
        for id in 0..self.pools.len() as PoolId {
            self.settle(id, now, emission)?;
        }
        Ok(())
    }

    /// Accumulator the pool would hold if settled at `now`, without settling it.
    pub fn preview_acc(
        &self,
        id: PoolId,
        now: BlockNumber,
        emission: &EmissionState,
    ) -> Result<u128, FarmError> {
        settled_accumulator(self.get(id)?, self.total_weight, now, emission)
    }

    /// Apply a stake inflow and outflow to the pool's supply.
    pub fn record_stake_change(
        &mut self,
        id: PoolId,
        staked_in: Amount,
        staked_out: Amount,
    ) -> Result<(), FarmError> {
        let pool = self.get_mut(id)?;
        pool.total_staked = pool
            .total_staked
            .checked_add(staked_in)
            .and_then(|total| total.checked_sub(staked_out))
            .ok_or(FarmError::ArithmeticOverflow("pool total_staked"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_types::{FundingPolicy, PRECISION};

    fn usdt() -> AssetId {
        AssetId::new("USDT").unwrap()
    }

    fn funded(amount: Amount, start: BlockNumber, end: BlockNumber) -> EmissionState {
        let mut emission = EmissionState::new(usdt(), start, end, FundingPolicy::Accelerate);
        emission.fund(amount, start).unwrap();
        emission
    }

    #[test]
    fn add_pool_assigns_sequential_ids() {
        let emission = funded(1_000, 0, 100);
        let mut registry = PoolRegistry::new();
        assert_eq!(registry.add_pool(usdt(), 10, 0, &emission).unwrap(), 0);
        assert_eq!(registry.add_pool(usdt(), 30, 0, &emission).unwrap(), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.total_weight(), 40);
        assert_eq!(registry.get(2), Err(FarmError::PoolNotFound(2)));
    }

    #[test]
    fn pool_created_before_start_accrues_from_start() {
        let emission = funded(1_000, 50, 150);
        let mut registry = PoolRegistry::new();
        registry.add_pool(usdt(), 1, 10, &emission).unwrap();
        assert_eq!(registry.get(0).unwrap().last_settled_block, 10);

        registry.record_stake_change(0, 10, 0).unwrap();
        registry.settle(0, 40, &emission).unwrap();
        let pool = registry.get(0).unwrap();
        assert_eq!(pool.last_settled_block, 40);
        assert_eq!(pool.acc_reward_per_share, 0);

        // Blocks 50..60 emit 100 over 10 staked units.
        registry.settle(0, 60, &emission).unwrap();
        assert_eq!(registry.get(0).unwrap().acc_reward_per_share, 10 * PRECISION);
    }

    #[test]
    fn settle_accrues_weighted_share() {
        let emission = funded(1_000, 0, 100);
        let mut registry = PoolRegistry::new();
        registry.add_pool(usdt(), 1, 0, &emission).unwrap();
        registry.add_pool(usdt(), 3, 0, &emission).unwrap();
        registry.record_stake_change(0, 10, 0).unwrap();
        registry.record_stake_change(1, 10, 0).unwrap();

        registry.settle_all(20, &emission).unwrap();
        // 200 emitted: 50 to pool 0 and 150 to pool 1, over 10 staked units each.
        assert_eq!(registry.get(0).unwrap().acc_reward_per_share, 5 * PRECISION);
        assert_eq!(registry.get(1).unwrap().acc_reward_per_share, 15 * PRECISION);
    }

    #[test]
    fn settle_is_idempotent_within_a_block() {
        let emission = funded(1_000, 0, 100);
        let mut registry = PoolRegistry::new();
        registry.add_pool(usdt(), 1, 0, &emission).unwrap();
        registry.record_stake_change(0, 10, 0).unwrap();

        registry.settle(0, 7, &emission).unwrap();
        let once = registry.clone();
        registry.settle(0, 7, &emission).unwrap();
        assert_eq!(registry, once);
    }

    #[test]
    fn empty_pool_forgoes_reward() {
        let emission = funded(1_000, 0, 100);
        let mut registry = PoolRegistry::new();
        registry.add_pool(usdt(), 1, 0, &emission).unwrap();

        registry.settle(0, 30, &emission).unwrap();
        let pool = registry.get(0).unwrap();
        assert_eq!(pool.acc_reward_per_share, 0);
        assert_eq!(pool.last_settled_block, 30);

        registry.record_stake_change(0, 10, 0).unwrap();
        registry.settle(0, 31, &emission).unwrap();
        assert_eq!(registry.get(0).unwrap().acc_reward_per_share, PRECISION);
    }

    #[test]
    fn preview_matches_settle_without_mutating() {
        let emission = funded(1_000, 0, 100);
        let mut registry = PoolRegistry::new();
        registry.add_pool(usdt(), 1, 0, &emission).unwrap();
        registry.record_stake_change(0, 20, 0).unwrap();

        let preview = registry.preview_acc(0, 13, &emission).unwrap();
        assert_eq!(registry.get(0).unwrap().acc_reward_per_share, 0);
        registry.settle(0, 13, &emission).unwrap();
        assert_eq!(registry.get(0).unwrap().acc_reward_per_share, preview);
    }

    #[test]
    fn set_weight_is_not_retroactive() {
        let emission = funded(1_000, 0, 100);
        let mut registry = PoolRegistry::new();
        registry.add_pool(usdt(), 1, 0, &emission).unwrap();
        registry.add_pool(usdt(), 1, 0, &emission).unwrap();
        registry.record_stake_change(0, 10, 0).unwrap();
        registry.record_stake_change(1, 10, 0).unwrap();

        assert_eq!(registry.set_weight(0, 3, 10, &emission).unwrap(), 1);
        assert_eq!(registry.total_weight(), 4);
        // The first 10 blocks were split evenly before the change.
        assert_eq!(registry.get(0).unwrap().acc_reward_per_share, 5 * PRECISION);
        assert_eq!(registry.get(1).unwrap().acc_reward_per_share, 5 * PRECISION);
    }

    #[test]
    fn stake_change_rejects_underflow() {
        let emission = funded(1_000, 0, 100);
        let mut registry = PoolRegistry::new();
        registry.add_pool(usdt(), 1, 0, &emission).unwrap();
        assert!(matches!(
            registry.record_stake_change(0, 0, 1),
            Err(FarmError::ArithmeticOverflow(_))
        ));
    }

    #[test]
    fn from_pools_restores_total_weight() {
        let pools = vec![Pool::new(0, usdt(), 5, 0), Pool::new(1, usdt(), 7, 0)];
        let registry = PoolRegistry::from_pools(pools).unwrap();
        assert_eq!(registry.total_weight(), 12);

        let shuffled = vec![Pool::new(1, usdt(), 5, 0)];
        assert!(PoolRegistry::from_pools(shuffled).is_err());
    }
}

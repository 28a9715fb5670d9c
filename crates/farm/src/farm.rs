//! The farm ledger aggregate.
//!
//! Every mutating entry point reads `now` once, stages its changes on a copy
//! of [`FarmState`], validates the asset movements as one batch and only then
//! executes them and swaps the staged state in. A failed call leaves pools,
//! stakes, the emission schedule and asset balances exactly as they were.

use crate::auth::OperatorCap;
use crate::errors::FarmError;
use crate::pool::PoolRegistry;
use crate::transfers::TransferBatch;
use crate::user::{StakeChange, StakeReceipt, UserLedger};
use farm_economics::{EmissionParams, EmissionScheduler};
use farm_treasury::{AssetError, AssetLedger};
use farm_types::{
    AccountId, Amount, AssetId, BlockNumber, EmissionState, FarmSnapshot, Pool, PoolId,
    UserStake, Weight,
};
use tracing::{debug, info, warn};

/// Domain used to derive the custody account from the farm id.
const CUSTODY_DOMAIN: &str = "farm-custody";

/// Everything the farm owns apart from the asset service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FarmState {
    pub farm_id: String,
    pub operator: AccountId,
    /// Account holding staked assets and the reward balance.
    pub custody: AccountId,
    /// Highest block any operation has been executed at.
    pub last_block: BlockNumber,
    pub emission: EmissionState,
    pub pools: PoolRegistry,
    pub stakes: UserLedger,
}

impl FarmState {
    fn snapshot(&self) -> FarmSnapshot {
        FarmSnapshot {
            farm_id: self.farm_id.clone(),
            operator: self.operator,
            custody: self.custody,
            last_block: self.last_block,
            emission: self.emission.clone(),
            pools: self.pools.iter().cloned().collect(),
            stakes: self.stakes.iter().cloned().collect(),
        }
    }
}

fn derive_farm_id(params: &EmissionParams, operator: &AccountId) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"farm");
    hasher.update(operator.as_bytes());
    hasher.update(params.reward_asset.as_str().as_bytes());
    hasher.update(&params.start_block.to_le_bytes());
    hasher.update(&params.duration_blocks.to_le_bytes());
    hasher.update(params.policy.to_string().as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}

/// Staking farm over an asset service `A`.
#[derive(Debug)]
pub struct Farm<A: AssetLedger> {
    state: FarmState,
    assets: A,
}

impl<A: AssetLedger> Farm<A> {
    /// Create an unfunded farm and the operator's capability.
    pub fn new(
        params: EmissionParams,
        operator: AccountId,
        assets: A,
    ) -> Result<(Self, OperatorCap), FarmError> {
        if !assets.is_registered(&params.reward_asset) {
            return Err(AssetError::UnknownAsset(params.reward_asset).into());
        }
        let farm_id = derive_farm_id(&params, &operator);
        let custody = AccountId::derive(CUSTODY_DOMAIN, farm_id.as_bytes());
        let emission = params.into_state()?;

        info!(
            target: "farm",
            "Created farm {} rewarding {} over blocks {}..{}",
            farm_id, emission.reward_asset, emission.start_block, emission.end_block
        );

        let cap = OperatorCap::issue(&farm_id, operator);
        let farm = Self {
            state: FarmState {
                farm_id,
                operator,
                custody,
                last_block: 0,
                emission,
                pools: PoolRegistry::new(),
                stakes: UserLedger::new(),
            },
            assets,
        };
        Ok((farm, cap))
    }

    /// Restore a farm from its durable form, checking that it is consistent.
    pub fn from_snapshot(snapshot: FarmSnapshot, assets: A) -> Result<Self, FarmError> {
        let pools = PoolRegistry::from_pools(snapshot.pools)?;
        let stakes = UserLedger::from_stakes(snapshot.stakes);

        for stake in stakes.iter() {
            pools.get(stake.pool)?;
        }
        for pool in pools.iter() {
            let staked = stakes
                .in_pool(pool.id)
                .try_fold(0u128, |total, stake| total.checked_add(stake.amount))
                .ok_or(FarmError::ArithmeticOverflow("restored stake total"))?;
            if staked != pool.total_staked {
                return Err(FarmError::InvalidParameter(
                    "stake amounts disagree with pool supply",
                ));
            }
        }
        snapshot.emission.check_invariants()?;
        if !assets.is_registered(&snapshot.emission.reward_asset) {
            return Err(AssetError::UnknownAsset(snapshot.emission.reward_asset).into());
        }

        debug!(
            target: "farm",
            "Restored farm {} at block {} with {} pools",
            snapshot.farm_id,
            snapshot.last_block,
            pools.len()
        );

        Ok(Self {
            state: FarmState {
                farm_id: snapshot.farm_id,
                operator: snapshot.operator,
                custody: snapshot.custody,
                last_block: snapshot.last_block,
                emission: snapshot.emission,
                pools,
                stakes,
            },
            assets,
        })
    }

    pub fn snapshot(&self) -> FarmSnapshot {
        self.state.snapshot()
    }

    /// Capability for operator-only calls. Fails for anyone but the operator.
    pub fn operator_cap(&self, caller: &AccountId) -> Result<OperatorCap, FarmError> {
        if *caller != self.state.operator {
            warn!(target: "farm", "Refused operator capability to {}", caller);
            return Err(FarmError::Unauthorized);
        }
        Ok(OperatorCap::issue(&self.state.farm_id, *caller))
    }

    fn authorize(&self, cap: &OperatorCap) -> Result<(), FarmError> {
        cap.verify(&self.state.farm_id, &self.state.operator)
    }

    fn begin(&self, now: BlockNumber) -> Result<FarmState, FarmError> {
        if now < self.state.last_block {
            return Err(FarmError::BlockRegression {
                last: self.state.last_block,
                requested: now,
            });
        }
        let mut staged = self.state.clone();
        staged.last_block = now;
        staged.emission.advance_checkpoint(now)?;
        Ok(staged)
    }

    fn commit(&mut self, staged: FarmState, batch: TransferBatch) -> Result<(), FarmError> {
        staged.emission.check_invariants()?;
        batch.validate(&self.assets)?;
        batch.execute(&mut self.assets)?;
        self.state = staged;
        Ok(())
    }

    fn ensure_registered(&self, asset: &AssetId) -> Result<(), FarmError> {
        if !self.assets.is_registered(asset) {
            return Err(AssetError::UnknownAsset(asset.clone()).into());
        }
        Ok(())
    }

    // Operator surface

    pub fn add_pool(
        &mut self,
        cap: &OperatorCap,
        weight: Weight,
        staked_asset: AssetId,
        now: BlockNumber,
    ) -> Result<PoolId, FarmError> {
        self.authorize(cap)?;
        self.ensure_registered(&staked_asset)?;

        let mut staged = self.begin(now)?;
        let id = staged
            .pools
            .add_pool(staked_asset.clone(), weight, now, &staged.emission)?;
        self.commit(staged, TransferBatch::new())?;

        info!(
            target: "farm",
            "Added pool {} for {} with weight {} at block {}",
            id, staked_asset, weight, now
        );
        Ok(id)
    }

    /// Returns the previous weight.
    pub fn set_weight(
        &mut self,
        cap: &OperatorCap,
        pool: PoolId,
        weight: Weight,
        now: BlockNumber,
    ) -> Result<Weight, FarmError> {
        self.authorize(cap)?;

        let mut staged = self.begin(now)?;
        let previous = staged.pools.set_weight(pool, weight, now, &staged.emission)?;
        self.commit(staged, TransferBatch::new())?;

        info!(
            target: "farm",
            "Pool {} weight {} -> {} at block {}",
            pool, previous, weight, now
        );
        Ok(previous)
    }

    /// Pull `amount` of the reward asset from the operator into custody.
    ///
    /// The operator must have approved the custody account beforehand.
    pub fn fund_rewards(
        &mut self,
        cap: &OperatorCap,
        amount: Amount,
        now: BlockNumber,
    ) -> Result<(), FarmError> {
        self.authorize(cap)?;

        let mut staged = self.begin(now)?;
        staged.pools.settle_all(now, &staged.emission)?;
        staged.emission.fund(amount, now)?;

        let mut batch = TransferBatch::new();
        batch.pull(
            &staged.emission.reward_asset,
            &staged.custody,
            &staged.operator,
            &staged.custody,
            amount,
        );
        let (rate, end) = (staged.emission.reward_per_block, staged.emission.end_block);
        self.commit(staged, batch)?;

        info!(
            target: "farm",
            "Funded {} at block {}: {} per block until block {}",
            amount, now, rate, end
        );
        Ok(())
    }

    pub fn extend_horizon(
        &mut self,
        cap: &OperatorCap,
        blocks_from_now: BlockNumber,
        now: BlockNumber,
    ) -> Result<(), FarmError> {
        self.authorize(cap)?;

        let mut staged = self.begin(now)?;
        staged.pools.settle_all(now, &staged.emission)?;
        staged.emission.extend_horizon(blocks_from_now, now)?;
        self.commit(staged, TransferBatch::new())
    }

    /// Settle every pool at `now`. Anyone may call this.
    pub fn mass_update_pools(&mut self, now: BlockNumber) -> Result<(), FarmError> {
        let mut staged = self.begin(now)?;
        staged.pools.settle_all(now, &staged.emission)?;
        self.commit(staged, TransferBatch::new())
    }

    pub fn settle_pool(&mut self, pool: PoolId, now: BlockNumber) -> Result<(), FarmError> {
        let mut staged = self.begin(now)?;
        staged.pools.settle(pool, now, &staged.emission)?;
        self.commit(staged, TransferBatch::new())
    }

    // User surface

    /// Stake `amount` (0 only harvests). Pulls against the allowance `user`
    /// granted to the custody account.
    pub fn deposit(
        &mut self,
        user: &AccountId,
        pool: PoolId,
        amount: Amount,
        now: BlockNumber,
    ) -> Result<StakeReceipt, FarmError> {
        self.change_stake(user, pool, StakeChange::Deposit(amount), now)
    }

    pub fn withdraw(
        &mut self,
        user: &AccountId,
        pool: PoolId,
        amount: Amount,
        now: BlockNumber,
    ) -> Result<StakeReceipt, FarmError> {
        self.change_stake(user, pool, StakeChange::Withdraw(amount), now)
    }

    pub fn harvest(
        &mut self,
        user: &AccountId,
        pool: PoolId,
        now: BlockNumber,
    ) -> Result<StakeReceipt, FarmError> {
        self.change_stake(user, pool, StakeChange::Harvest, now)
    }

    /// Return the whole stake without paying reward. The forfeited reward
    /// stays reserved and is never promised again.
    pub fn emergency_withdraw(
        &mut self,
        user: &AccountId,
        pool: PoolId,
        now: BlockNumber,
    ) -> Result<StakeReceipt, FarmError> {
        self.change_stake(user, pool, StakeChange::Exit, now)
    }

    fn change_stake(
        &mut self,
        user: &AccountId,
        pool: PoolId,
        change: StakeChange,
        now: BlockNumber,
    ) -> Result<StakeReceipt, FarmError> {
        let mut staged = self.begin(now)?;

        staged.pools.settle(pool, now, &staged.emission)?;
        let (acc, staked_asset) = {
            let settled = staged.pools.get(pool)?;
            (settled.acc_reward_per_share, settled.staked_asset.clone())
        };

        let receipt = staged.stakes.apply(pool, user, acc, change)?;
        staged.emission.record_payout(receipt.reward)?;
        staged
            .pools
            .record_stake_change(pool, receipt.staked_in, receipt.staked_out)?;

        let mut batch = TransferBatch::new();
        batch.pay(
            &staged.emission.reward_asset,
            &staged.custody,
            user,
            receipt.reward,
        );
        batch.pull(
            &staked_asset,
            &staged.custody,
            user,
            &staged.custody,
            receipt.staked_in,
        );
        batch.pay(&staked_asset, &staged.custody, user, receipt.staked_out);
        self.commit(staged, batch)?;

        if receipt.forfeited > 0 {
            warn!(
                target: "farm",
                "{} exited pool {} at block {} forfeiting {} reward",
                user, pool, now, receipt.forfeited
            );
        }
        info!(
            target: "farm",
            "{:?} by {} in pool {} at block {}: paid {}, stake now {}",
            change, user, pool, now, receipt.reward, receipt.amount_after
        );
        Ok(receipt)
    }

    // Reads

    /// Reward `user` could harvest from `pool` at `now`. Changes nothing.
    pub fn pending_reward(
        &self,
        pool: PoolId,
        user: &AccountId,
        now: BlockNumber,
    ) -> Result<Amount, FarmError> {
        if now < self.state.last_block {
            return Err(FarmError::BlockRegression {
                last: self.state.last_block,
                requested: now,
            });
        }
        let acc = self.state.pools.preview_acc(pool, now, &self.state.emission)?;
        self.state.stakes.pending_at(pool, user, acc)
    }

    pub fn user_info(&self, pool: PoolId, user: &AccountId) -> Result<UserStake, FarmError> {
        self.state.pools.get(pool)?;
        Ok(self.state.stakes.get(pool, user))
    }

    pub fn pool_info(&self, pool: PoolId) -> Result<&Pool, FarmError> {
        self.state.pools.get(pool)
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.state.pools.iter()
    }

    pub fn pool_length(&self) -> usize {
        self.state.pools.len()
    }

    pub fn total_weight(&self) -> Weight {
        self.state.pools.total_weight()
    }

    pub fn emission(&self) -> &EmissionState {
        &self.state.emission
    }

    pub fn state(&self) -> &FarmState {
        &self.state
    }

    pub fn farm_id(&self) -> &str {
        &self.state.farm_id
    }

    pub fn operator(&self) -> &AccountId {
        &self.state.operator
    }

    pub fn custody(&self) -> &AccountId {
        &self.state.custody
    }

    pub fn last_block(&self) -> BlockNumber {
        self.state.last_block
    }

    pub fn assets(&self) -> &A {
        &self.assets
    }

    /// Direct access to the asset service for approvals and minting that
    /// happen outside the farm.
    pub fn assets_mut(&mut self) -> &mut A {
        &mut self.assets
    }

    pub fn into_parts(self) -> (FarmSnapshot, A) {
        (self.state.snapshot(), self.assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_treasury::InMemoryAssetLedger;
    use farm_types::FundingPolicy;

    struct Setup {
        farm: Farm<InMemoryAssetLedger>,
        cap: OperatorCap,
        operator: AccountId,
        alice: AccountId,
        reward: AssetId,
        lp: AssetId,
    }

    fn setup() -> Setup {
        let operator = AccountId::from_label("minter");
        let alice = AccountId::from_label("alice");
        let reward = AssetId::new("RWD").unwrap();
        let lp = AssetId::new("LP").unwrap();

        let mut assets = InMemoryAssetLedger::new();
        assets.register_asset(&reward, &operator).unwrap();
        assets.register_asset(&lp, &operator).unwrap();
        assets.mint(&reward, &operator, &operator, 10_000).unwrap();
        assets.mint(&lp, &operator, &alice, 1_000).unwrap();

        let params = EmissionParams::new(reward.clone(), 0)
            .with_duration(100)
            .with_policy(FundingPolicy::Accelerate);
        let (mut farm, cap) = Farm::new(params, operator, assets).unwrap();
        let custody = *farm.custody();
        farm.assets_mut()
            .approve(&reward, &operator, &custody, Amount::MAX)
            .unwrap();
        farm.assets_mut()
            .approve(&lp, &alice, &custody, Amount::MAX)
            .unwrap();

        Setup {
            farm,
            cap,
            operator,
            alice,
            reward,
            lp,
        }
    }

    #[test]
    fn new_requires_registered_reward_asset() {
        let params = EmissionParams::new(AssetId::new("NOPE").unwrap(), 0);
        let result = Farm::new(
            params,
            AccountId::from_label("minter"),
            InMemoryAssetLedger::new(),
        );
        assert!(matches!(
            result,
            Err(FarmError::Asset(AssetError::UnknownAsset(_)))
        ));
    }

    #[test]
    fn only_operator_gets_a_capability() {
        let s = setup();
        assert!(s.farm.operator_cap(&s.operator).is_ok());
        assert_eq!(
            s.farm.operator_cap(&s.alice).unwrap_err(),
            FarmError::Unauthorized
        );
    }

    #[test]
    fn capability_of_another_farm_is_rejected() {
        let mut s = setup();
        let foreign = OperatorCap::issue("someone-else", s.operator);
        assert_eq!(
            s.farm.add_pool(&foreign, 1, s.lp.clone(), 0),
            Err(FarmError::Unauthorized)
        );
        assert_eq!(s.farm.pool_length(), 0);
    }

    #[test]
    fn fund_pulls_reward_into_custody() {
        let mut s = setup();
        s.farm.fund_rewards(&s.cap, 1_000, 0).unwrap();
        let custody = *s.farm.custody();
        assert_eq!(s.farm.assets().balance_of(&s.reward, &custody).unwrap(), 1_000);
        assert_eq!(s.farm.emission().reward_per_block, 10);
    }

    #[test]
    fn deposit_and_harvest_single_staker() {
        let mut s = setup();
        s.farm.fund_rewards(&s.cap, 1_000, 0).unwrap();
        let pool = s.farm.add_pool(&s.cap, 1, s.lp.clone(), 0).unwrap();

        s.farm.deposit(&s.alice, pool, 10, 0).unwrap();
        assert_eq!(s.farm.pending_reward(pool, &s.alice, 5).unwrap(), 50);

        let receipt = s.farm.harvest(&s.alice, pool, 5).unwrap();
        assert_eq!(receipt.reward, 50);
        assert_eq!(s.farm.assets().balance_of(&s.reward, &s.alice).unwrap(), 50);
        assert_eq!(s.farm.pending_reward(pool, &s.alice, 5).unwrap(), 0);
        assert_eq!(s.farm.emission().total_paid, 50);
    }

    #[test]
    fn pending_reward_does_not_mutate() {
        let mut s = setup();
        s.farm.fund_rewards(&s.cap, 1_000, 0).unwrap();
        let pool = s.farm.add_pool(&s.cap, 1, s.lp.clone(), 0).unwrap();
        s.farm.deposit(&s.alice, pool, 10, 0).unwrap();

        let before = s.farm.snapshot();
        s.farm.pending_reward(pool, &s.alice, 40).unwrap();
        assert_eq!(s.farm.snapshot(), before);
    }

    #[test]
    fn earlier_block_is_rejected() {
        let mut s = setup();
        s.farm.mass_update_pools(10).unwrap();
        assert_eq!(
            s.farm.mass_update_pools(9),
            Err(FarmError::BlockRegression {
                last: 10,
                requested: 9
            })
        );
    }

    #[test]
    fn failed_deposit_commits_nothing() {
        let mut s = setup();
        s.farm.fund_rewards(&s.cap, 1_000, 0).unwrap();
        let pool = s.farm.add_pool(&s.cap, 1, s.lp.clone(), 0).unwrap();

        let before = s.farm.snapshot();
        let result = s.farm.deposit(&s.alice, pool, 5_000, 3);
        assert!(matches!(result, Err(FarmError::InsufficientBalance(_))));
        assert_eq!(s.farm.snapshot(), before);
        assert_eq!(s.farm.assets().balance_of(&s.lp, &s.alice).unwrap(), 1_000);
    }

    #[test]
    fn unknown_pool_is_reported() {
        let mut s = setup();
        assert_eq!(
            s.farm.deposit(&s.alice, 7, 1, 0),
            Err(FarmError::PoolNotFound(7))
        );
        assert_eq!(s.farm.pending_reward(7, &s.alice, 0), Err(FarmError::PoolNotFound(7)));
        assert_eq!(s.farm.user_info(7, &s.alice), Err(FarmError::PoolNotFound(7)));
    }

    #[test]
    fn snapshot_round_trips() {
        let mut s = setup();
        s.farm.fund_rewards(&s.cap, 1_000, 0).unwrap();
        let pool = s.farm.add_pool(&s.cap, 1, s.lp.clone(), 0).unwrap();
        s.farm.deposit(&s.alice, pool, 10, 2).unwrap();

        let (snapshot, assets) = s.farm.into_parts();
        let restored = Farm::from_snapshot(snapshot.clone(), assets).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
        assert_eq!(restored.pending_reward(pool, &s.alice, 4).unwrap(), 20);
    }

    #[test]
    fn inconsistent_snapshot_is_rejected() {
        let mut s = setup();
        let pool = s.farm.add_pool(&s.cap, 1, s.lp.clone(), 0).unwrap();
        s.farm.deposit(&s.alice, pool, 10, 0).unwrap();

        let (mut snapshot, assets) = s.farm.into_parts();
        snapshot.pools[0].total_staked = 11;
        assert!(matches!(
            Farm::from_snapshot(snapshot, assets),
            Err(FarmError::InvalidParameter(_))
        ));
    }
}

//! Per (pool, user) stakes and reward-debt checkpoints.

use crate::errors::FarmError;
use farm_economics::{pending, share_of};
use farm_types::{AccountId, Amount, PoolId, UserStake};
use std::collections::BTreeMap;

/// Change requested against one stake. Pending reward is settled for every
/// variant except [`StakeChange::Exit`], which forfeits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StakeChange {
    Deposit(Amount),
    Withdraw(Amount),
    Harvest,
    /// Emergency exit: return the whole stake, forfeit pending reward.
    Exit,
}

/// Effect of one [`StakeChange`]; the caller moves the assets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakeReceipt {
    /// Reward to pay out of custody.
    pub reward: Amount,
    /// Reward given up by an emergency exit.
    pub forfeited: Amount,
    pub staked_in: Amount,
    pub staked_out: Amount,
    pub amount_after: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserLedger {
    stakes: BTreeMap<(PoolId, AccountId), UserStake>,
}

impl UserLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stakes(stakes: Vec<UserStake>) -> Self {
        Self {
            stakes: stakes
                .into_iter()
                .map(|stake| ((stake.pool, stake.user), stake))
                .collect(),
        }
    }

    /// Stake of `user` in `pool`; an empty stake if none was ever recorded.
    pub fn get(&self, pool: PoolId, user: &AccountId) -> UserStake {
        self.stakes
            .get(&(pool, *user))
            .cloned()
            .unwrap_or_else(|| UserStake::empty(pool, *user))
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserStake> {
        self.stakes.values()
    }

    pub fn in_pool(&self, pool: PoolId) -> impl Iterator<Item = &UserStake> {
        self.stakes
            .range((pool, AccountId::default())..)
            .take_while(move |((id, _), _)| *id == pool)
            .map(|(_, stake)| stake)
    }

    pub fn into_stakes(self) -> Vec<UserStake> {
        self.stakes.into_values().collect()
    }

    /// Reward owed to `user` at accumulator value `acc`.
    pub fn pending_at(&self, pool: PoolId, user: &AccountId, acc: u128) -> Result<Amount, FarmError> {
        match self.stakes.get(&(pool, *user)) {
            Some(stake) => Ok(pending(stake.amount, acc, stake.reward_debt)?),
            None => Ok(0),
        }
    }

    /// Apply `change` at accumulator value `acc`, which must be the pool's
    /// freshly settled accumulator. Resets the reward debt afterwards.
    pub fn apply(
        &mut self,
        pool: PoolId,
        user: &AccountId,
        acc: u128,
        change: StakeChange,
    ) -> Result<StakeReceipt, FarmError> {
        let key = (pool, *user);
        let mut stake = self
            .stakes
            .get(&key)
            .cloned()
            .unwrap_or_else(|| UserStake::empty(pool, *user));

        let owed = pending(stake.amount, acc, stake.reward_debt)?;
        let mut receipt = StakeReceipt {
            reward: owed,
            ..StakeReceipt::default()
        };

        match change {
            StakeChange::Deposit(amount) => {
                stake.amount = stake
                    .amount
                    .checked_add(amount)
                    .ok_or(FarmError::ArithmeticOverflow("stake amount"))?;
                receipt.staked_in = amount;
            }
            StakeChange::Withdraw(amount) => {
                if amount > stake.amount {
                    return Err(FarmError::InsufficientStake {
                        requested: amount,
                        staked: stake.amount,
                    });
                }
                stake.amount -= amount;
                receipt.staked_out = amount;
            }
            StakeChange::Harvest => {}
            StakeChange::Exit => {
                receipt.forfeited = owed;
                receipt.reward = 0;
                receipt.staked_out = stake.amount;
                stake.amount = 0;
            }
        }

        stake.reward_debt = share_of(stake.amount, acc)?;
        receipt.amount_after = stake.amount;

        // Never-touched stakes stay absent; emptied ones are kept for reuse.
        if self.stakes.contains_key(&key) || stake.amount > 0 {
            self.stakes.insert(key, stake);
        }
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_types::PRECISION;

    fn alice() -> AccountId {
        AccountId::from_label("alice")
    }

    #[test]
    fn deposit_then_harvest_pays_accrued_share() {
        let mut ledger = UserLedger::new();
        let receipt = ledger
            .apply(0, &alice(), 0, StakeChange::Deposit(30))
            .unwrap();
        assert_eq!(receipt.reward, 0);
        assert_eq!(receipt.staked_in, 30);

        let acc = 2 * PRECISION;
        assert_eq!(ledger.pending_at(0, &alice(), acc).unwrap(), 60);
        let receipt = ledger.apply(0, &alice(), acc, StakeChange::Harvest).unwrap();
        assert_eq!(receipt.reward, 60);
        assert_eq!(ledger.pending_at(0, &alice(), acc).unwrap(), 0);
        assert_eq!(ledger.get(0, &alice()).reward_debt, 60);
    }

    #[test]
    fn deposit_on_top_settles_previous_reward() {
        let mut ledger = UserLedger::new();
        ledger.apply(0, &alice(), 0, StakeChange::Deposit(10)).unwrap();
        let receipt = ledger
            .apply(0, &alice(), PRECISION, StakeChange::Deposit(10))
            .unwrap();
        assert_eq!(receipt.reward, 10);
        assert_eq!(receipt.amount_after, 20);
        assert_eq!(ledger.get(0, &alice()).reward_debt, 20);
    }

    #[test]
    fn withdraw_more_than_staked_fails_without_change() {
        let mut ledger = UserLedger::new();
        ledger.apply(0, &alice(), 0, StakeChange::Deposit(10)).unwrap();
        let before = ledger.clone();
        assert_eq!(
            ledger.apply(0, &alice(), PRECISION, StakeChange::Withdraw(11)),
            Err(FarmError::InsufficientStake {
                requested: 11,
                staked: 10
            })
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn emptied_stake_is_kept_and_zero_flows_create_nothing() {
        let mut ledger = UserLedger::new();
        ledger.apply(0, &alice(), 0, StakeChange::Harvest).unwrap();
        ledger.apply(0, &alice(), 0, StakeChange::Deposit(0)).unwrap();
        assert_eq!(ledger.iter().count(), 0);

        ledger.apply(0, &alice(), 0, StakeChange::Deposit(5)).unwrap();
        ledger.apply(0, &alice(), 0, StakeChange::Withdraw(5)).unwrap();
        assert_eq!(ledger.iter().count(), 1);
        assert_eq!(ledger.get(0, &alice()).amount, 0);
    }

    #[test]
    fn exit_forfeits_reward() {
        let mut ledger = UserLedger::new();
        ledger.apply(1, &alice(), 0, StakeChange::Deposit(10)).unwrap();
        let receipt = ledger
            .apply(1, &alice(), 3 * PRECISION, StakeChange::Exit)
            .unwrap();
        assert_eq!(receipt.reward, 0);
        assert_eq!(receipt.forfeited, 30);
        assert_eq!(receipt.staked_out, 10);
        let stake = ledger.get(1, &alice());
        assert_eq!((stake.amount, stake.reward_debt), (0, 0));
    }

    #[test]
    fn in_pool_lists_only_that_pool() {
        let bob = AccountId::from_label("bob");
        let mut ledger = UserLedger::new();
        ledger.apply(0, &alice(), 0, StakeChange::Deposit(1)).unwrap();
        ledger.apply(1, &alice(), 0, StakeChange::Deposit(2)).unwrap();
        ledger.apply(1, &bob, 0, StakeChange::Deposit(3)).unwrap();
        let total: Amount = ledger.in_pool(1).map(|stake| stake.amount).sum();
        assert_eq!(total, 5);
        assert_eq!(ledger.in_pool(0).count(), 1);
    }
}

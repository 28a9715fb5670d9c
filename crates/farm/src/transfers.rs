//! Asset movements of one entry point, checked as a whole before any of them runs.
//!
//! Debits are aggregated per (asset, account) and allowance use per
//! (asset, owner, spender), so a batch that validates cannot fail halfway
//! against a conforming [`AssetLedger`].

use crate::errors::FarmError;
use farm_treasury::{AssetError, AssetLedger};
use farm_types::{AccountId, Amount, AssetId};
use std::collections::BTreeMap;

/// One asset movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub asset: AssetId,
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    /// Set when the movement pulls from `from` using `spender`'s allowance.
    pub spender: Option<AccountId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferBatch {
    transfers: Vec<PlannedTransfer>,
}

impl TransferBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain transfer out of an account the farm controls.
    pub fn pay(&mut self, asset: &AssetId, from: &AccountId, to: &AccountId, amount: Amount) {
        if amount == 0 {
            return;
        }
        self.transfers.push(PlannedTransfer {
            asset: asset.clone(),
            from: *from,
            to: *to,
            amount,
            spender: None,
        });
    }

    /// Pull from `owner` against the allowance granted to `spender`.
    pub fn pull(
        &mut self,
        asset: &AssetId,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) {
        if amount == 0 {
            return;
        }
        self.transfers.push(PlannedTransfer {
            asset: asset.clone(),
            from: *owner,
            to: *to,
            amount,
            spender: Some(*spender),
        });
    }

    pub fn transfers(&self) -> &[PlannedTransfer] {
        &self.transfers
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Check allowances, then balances, for the whole batch. Never mutates.
    pub fn validate<A: AssetLedger + ?Sized>(&self, assets: &A) -> Result<(), FarmError> {
        let mut allowance_use: BTreeMap<(&AssetId, &AccountId, &AccountId), Amount> =
            BTreeMap::new();
        let mut debits: BTreeMap<(&AssetId, &AccountId), Amount> = BTreeMap::new();

        for transfer in &self.transfers {
            if let Some(spender) = &transfer.spender {
                let used = allowance_use
                    .entry((&transfer.asset, &transfer.from, spender))
                    .or_insert(0);
                *used = used
                    .checked_add(transfer.amount)
                    .ok_or(FarmError::ArithmeticOverflow("allowance use"))?;
            }
            let debit = debits
                .entry((&transfer.asset, &transfer.from))
                .or_insert(0);
            *debit = debit
                .checked_add(transfer.amount)
                .ok_or(FarmError::ArithmeticOverflow("batch debit"))?;
        }

        for ((asset, owner, spender), needed) in allowance_use {
            assets.ensure_allowance(asset, owner, spender, needed)?;
        }
        for ((asset, account), needed) in debits {
            assets.ensure_balance(asset, account, needed)?;
        }
        Ok(())
    }

    /// Run the batch in order. Call [`TransferBatch::validate`] first.
    pub fn execute<A: AssetLedger + ?Sized>(self, assets: &mut A) -> Result<(), FarmError> {
        for transfer in self.transfers {
            let result: Result<(), AssetError> = match transfer.spender {
                Some(spender) => assets.transfer_from(
                    &transfer.asset,
                    &spender,
                    &transfer.from,
                    &transfer.to,
                    transfer.amount,
                ),
                None => assets.transfer(
                    &transfer.asset,
                    &transfer.from,
                    &transfer.to,
                    transfer.amount,
                ),
            };
            result?;
        }
        Ok(())
    }
}

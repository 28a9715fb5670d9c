//! Serializable balances of the in-memory asset service.

use crate::{AccountId, Amount, AssetId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Balances and allowances of a single asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAccounts {
    /// Account allowed to mint this asset.
    pub minter: AccountId,
    pub total_supply: Amount,
    pub balances: BTreeMap<AccountId, Amount>,
    /// owner -> spender -> remaining allowance
    pub allowances: BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
}

impl AssetAccounts {
    pub fn new(minter: AccountId) -> Self {
        Self {
            minter,
            ..Default::default()
        }
    }

    pub fn balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.allowances
            .get(owner)
            .and_then(|spenders| spenders.get(spender))
            .copied()
            .unwrap_or(0)
    }
}

/// Every asset tracked by the in-memory asset service, keyed by ticker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBook {
    pub assets: BTreeMap<AssetId, AssetAccounts>,
}

impl AssetBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, asset: &AssetId) -> Option<&AssetAccounts> {
        self.assets.get(asset)
    }

    pub fn get_mut(&mut self, asset: &AssetId) -> Option<&mut AssetAccounts> {
        self.assets.get_mut(asset)
    }
}

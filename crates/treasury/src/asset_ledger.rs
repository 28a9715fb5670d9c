//! Fungible asset service interface
//!
//! The farm treats every asset (the reward asset and each staked asset)
//! through this boundary: balances, allowances, transfers and minting.
//! Transfers are atomic: they either move the full amount or fail without
//! touching any balance.

use farm_types::{AccountId, Amount, AssetAccounts, AssetBook, AssetId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors surfaced by the asset service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("unknown asset {0}")]
    UnknownAsset(AssetId),

    #[error("asset {0} is already registered")]
    AlreadyRegistered(AssetId),

    #[error("insufficient {asset} balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        asset: AssetId,
        account: AccountId,
        needed: Amount,
        available: Amount,
    },

    #[error("insufficient {asset} allowance from {owner} to {spender}: need {needed}, have {available}")]
    InsufficientAllowance {
        asset: AssetId,
        owner: AccountId,
        spender: AccountId,
        needed: Amount,
        available: Amount,
    },

    #[error("{caller} is not allowed to mint {asset}")]
    NotMinter { asset: AssetId, caller: AccountId },

    #[error("arithmetic overflow in {0} accounting")]
    Overflow(AssetId),
}

/// Interface for fungible asset operations.
pub trait AssetLedger: Send + Sync {
    /// Create an asset whose supply only `minter` may grow.
    fn register_asset(&mut self, asset: &AssetId, minter: &AccountId) -> Result<(), AssetError>;

    fn is_registered(&self, asset: &AssetId) -> bool;

    fn balance_of(&self, asset: &AssetId, account: &AccountId) -> Result<Amount, AssetError>;

    fn allowance(
        &self,
        asset: &AssetId,
        owner: &AccountId,
        spender: &AccountId,
    ) -> Result<Amount, AssetError>;

    fn total_supply(&self, asset: &AssetId) -> Result<Amount, AssetError>;

    /// Set (not add to) the amount `spender` may pull from `owner`.
    fn approve(
        &mut self,
        asset: &AssetId,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError>;

    fn transfer(
        &mut self,
        asset: &AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError>;

    /// Move `amount` from `owner` to `to`, consuming `spender`'s allowance.
    fn transfer_from(
        &mut self,
        asset: &AssetId,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError>;

    fn mint(
        &mut self,
        asset: &AssetId,
        minter: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError>;

    /// Fail the way `transfer` would, without moving anything.
    fn ensure_balance(
        &self,
        asset: &AssetId,
        account: &AccountId,
        needed: Amount,
    ) -> Result<(), AssetError> {
        let available = self.balance_of(asset, account)?;
        if available < needed {
            return Err(AssetError::InsufficientBalance {
                asset: asset.clone(),
                account: *account,
                needed,
                available,
            });
        }
        Ok(())
    }

    /// Fail the way the allowance check of `transfer_from` would.
    fn ensure_allowance(
        &self,
        asset: &AssetId,
        owner: &AccountId,
        spender: &AccountId,
        needed: Amount,
    ) -> Result<(), AssetError> {
        let available = self.allowance(asset, owner, spender)?;
        if available < needed {
            return Err(AssetError::InsufficientAllowance {
                asset: asset.clone(),
                owner: *owner,
                spender: *spender,
                needed,
                available,
            });
        }
        Ok(())
    }
}

fn move_balance(
    asset: &AssetId,
    accounts: &mut AssetAccounts,
    from: &AccountId,
    to: &AccountId,
    amount: Amount,
) -> Result<(), AssetError> {
    let available = accounts.balance(from);
    if available < amount {
        return Err(AssetError::InsufficientBalance {
            asset: asset.clone(),
            account: *from,
            needed: amount,
            available,
        });
    }
    if from == to || amount == 0 {
        return Ok(());
    }
    let credited = accounts
        .balance(to)
        .checked_add(amount)
        .ok_or_else(|| AssetError::Overflow(asset.clone()))?;
    accounts.balances.insert(*from, available - amount);
    accounts.balances.insert(*to, credited);
    Ok(())
}

// -----------------------------------------------------------------------------
// In-memory implementation (host process and tests)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InMemoryAssetLedger {
    book: AssetBook,
}

impl InMemoryAssetLedger {
    pub fn new() -> Self {
        Self {
            book: AssetBook::new(),
        }
    }

    /// Resume from a persisted book.
    pub fn from_book(book: AssetBook) -> Self {
        Self { book }
    }

    pub fn book(&self) -> &AssetBook {
        &self.book
    }

    pub fn into_book(self) -> AssetBook {
        self.book
    }

    fn accounts(&self, asset: &AssetId) -> Result<&AssetAccounts, AssetError> {
        self.book
            .get(asset)
            .ok_or_else(|| AssetError::UnknownAsset(asset.clone()))
    }

    fn accounts_mut(&mut self, asset: &AssetId) -> Result<&mut AssetAccounts, AssetError> {
        self.book
            .get_mut(asset)
            .ok_or_else(|| AssetError::UnknownAsset(asset.clone()))
    }
}

impl AssetLedger for InMemoryAssetLedger {
    fn register_asset(&mut self, asset: &AssetId, minter: &AccountId) -> Result<(), AssetError> {
        if self.book.assets.contains_key(asset) {
            return Err(AssetError::AlreadyRegistered(asset.clone()));
        }
        self.book
            .assets
            .insert(asset.clone(), AssetAccounts::new(*minter));
        debug!(target: "assets", "Registered asset {} (minter {})", asset, minter);
        Ok(())
    }

    fn is_registered(&self, asset: &AssetId) -> bool {
        self.book.assets.contains_key(asset)
    }

    fn balance_of(&self, asset: &AssetId, account: &AccountId) -> Result<Amount, AssetError> {
        Ok(self.accounts(asset)?.balance(account))
    }

    fn allowance(
        &self,
        asset: &AssetId,
        owner: &AccountId,
        spender: &AccountId,
    ) -> Result<Amount, AssetError> {
        Ok(self.accounts(asset)?.allowance(owner, spender))
    }

    fn total_supply(&self, asset: &AssetId) -> Result<Amount, AssetError> {
        Ok(self.accounts(asset)?.total_supply)
    }

    fn approve(
        &mut self,
        asset: &AssetId,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        self.accounts_mut(asset)?
            .allowances
            .entry(*owner)
            .or_default()
            .insert(*spender, amount);
        Ok(())
    }

    fn transfer(
        &mut self,
        asset: &AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let accounts = self.accounts_mut(asset)?;
        move_balance(asset, accounts, from, to, amount)
    }

    fn transfer_from(
        &mut self,
        asset: &AssetId,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let accounts = self.accounts_mut(asset)?;
        let available = accounts.allowance(owner, spender);
        if available < amount {
            return Err(AssetError::InsufficientAllowance {
                asset: asset.clone(),
                owner: *owner,
                spender: *spender,
                needed: amount,
                available,
            });
        }
        move_balance(asset, accounts, owner, to, amount)?;
        accounts
            .allowances
            .entry(*owner)
            .or_default()
            .insert(*spender, available - amount);
        Ok(())
    }

    fn mint(
        &mut self,
        asset: &AssetId,
        minter: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        let accounts = self.accounts_mut(asset)?;
        if accounts.minter != *minter {
            return Err(AssetError::NotMinter {
                asset: asset.clone(),
                caller: *minter,
            });
        }
        let supply = accounts
            .total_supply
            .checked_add(amount)
            .ok_or_else(|| AssetError::Overflow(asset.clone()))?;
        let balance = accounts
            .balance(to)
            .checked_add(amount)
            .ok_or_else(|| AssetError::Overflow(asset.clone()))?;
        accounts.total_supply = supply;
        accounts.balances.insert(*to, balance);
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Mock ledger (records every mutating call for ordering assertions)
// -----------------------------------------------------------------------------

/// A mutating call observed by [`MockAssetLedger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetCall {
    Transfer {
        asset: AssetId,
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
    TransferFrom {
        asset: AssetId,
        owner: AccountId,
        to: AccountId,
        amount: Amount,
    },
    Mint {
        asset: AssetId,
        to: AccountId,
        amount: Amount,
    },
}

#[derive(Debug, Clone, Default)]
pub struct MockAssetLedger {
    inner: InMemoryAssetLedger,
    calls: Vec<AssetCall>,
}

impl MockAssetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_calls(&self) -> &[AssetCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl AssetLedger for MockAssetLedger {
    fn register_asset(&mut self, asset: &AssetId, minter: &AccountId) -> Result<(), AssetError> {
        self.inner.register_asset(asset, minter)
    }

    fn is_registered(&self, asset: &AssetId) -> bool {
        self.inner.is_registered(asset)
    }

    fn balance_of(&self, asset: &AssetId, account: &AccountId) -> Result<Amount, AssetError> {
        self.inner.balance_of(asset, account)
    }

    fn allowance(
        &self,
        asset: &AssetId,
        owner: &AccountId,
        spender: &AccountId,
    ) -> Result<Amount, AssetError> {
        self.inner.allowance(asset, owner, spender)
    }

    fn total_supply(&self, asset: &AssetId) -> Result<Amount, AssetError> {
        self.inner.total_supply(asset)
    }

    fn approve(
        &mut self,
        asset: &AssetId,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        self.inner.approve(asset, owner, spender, amount)
    }

    fn transfer(
        &mut self,
        asset: &AssetId,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        self.inner.transfer(asset, from, to, amount)?;
        self.calls.push(AssetCall::Transfer {
            asset: asset.clone(),
            from: *from,
            to: *to,
            amount,
        });
        Ok(())
    }

    fn transfer_from(
        &mut self,
        asset: &AssetId,
        spender: &AccountId,
        owner: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        self.inner.transfer_from(asset, spender, owner, to, amount)?;
        self.calls.push(AssetCall::TransferFrom {
            asset: asset.clone(),
            owner: *owner,
            to: *to,
            amount,
        });
        Ok(())
    }

    fn mint(
        &mut self,
        asset: &AssetId,
        minter: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), AssetError> {
        self.inner.mint(asset, minter, to, amount)?;
        self.calls.push(AssetCall::Mint {
            asset: asset.clone(),
            to: *to,
            amount,
        });
        Ok(())
    }
}

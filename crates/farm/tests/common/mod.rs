#![allow(dead_code)]

use farm_core::{AccountId, Amount, AssetId, Farm, FundingPolicy, OperatorCap};
use farm_economics::EmissionParams;
use farm_treasury::{AssetLedger, InMemoryAssetLedger};

pub struct Harness {
    pub farm: Farm<InMemoryAssetLedger>,
    pub cap: OperatorCap,
    pub minter: AccountId,
    pub usdt: AssetId,
}

pub fn account(label: &str) -> AccountId {
    AccountId::from_label(label)
}

pub fn asset(ticker: &str) -> AssetId {
    AssetId::new(ticker).unwrap()
}

impl Harness {
    /// USDT-rewarding farm over `[start, start + duration)`, operated by
    /// `minter`, with `stake_assets` registered and nothing funded.
    pub fn new(start: u64, duration: u64, policy: FundingPolicy, stake_assets: &[&str]) -> Self {
        let minter = account("minter");
        let usdt = asset("USDT");
        let mut assets = InMemoryAssetLedger::new();
        assets.register_asset(&usdt, &minter).unwrap();
        assets
            .mint(&usdt, &minter, &minter, 100_000_000_000)
            .unwrap();
        for ticker in stake_assets {
            assets.register_asset(&asset(ticker), &minter).unwrap();
        }

        let params = EmissionParams::new(usdt.clone(), start)
            .with_duration(duration)
            .with_policy(policy);
        let (mut farm, cap) = Farm::new(params, minter, assets).unwrap();
        let custody = *farm.custody();
        farm.assets_mut()
            .approve(&usdt, &minter, &custody, Amount::MAX)
            .unwrap();

        Self {
            farm,
            cap,
            minter,
            usdt,
        }
    }

    /// Give `user` some of `ticker` and let the farm pull all of it.
    pub fn give(&mut self, user: &AccountId, ticker: &str, amount: Amount) {
        let custody = *self.farm.custody();
        let minter = self.minter;
        let assets = self.farm.assets_mut();
        assets.mint(&asset(ticker), &minter, user, amount).unwrap();
        assets
            .approve(&asset(ticker), user, &custody, Amount::MAX)
            .unwrap();
    }

    pub fn reward_balance(&self, user: &AccountId) -> Amount {
        self.farm.assets().balance_of(&self.usdt, user).unwrap()
    }

    pub fn balance(&self, user: &AccountId, ticker: &str) -> Amount {
        self.farm.assets().balance_of(&asset(ticker), user).unwrap()
    }

    pub fn custody_reward(&self) -> Amount {
        let custody = *self.farm.custody();
        self.reward_balance(&custody)
    }
}

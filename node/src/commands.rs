//! Farm commands executed against persisted state.
//!
//! Each command loads the ledger, runs one farm operation and commits the
//! result, so a failed command leaves the database as it was.

use crate::config::AppConfig;
use anyhow::{anyhow, Result};
use farm_core::{Farm, OperatorCap, StakeReceipt};
use farm_storage::Storage;
use farm_treasury::{AssetLedger, InMemoryAssetLedger};
use farm_types::{AccountId, Amount, AssetId, BlockNumber, EmissionState, PoolId, Weight};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FarmCommand {
    Init {
        operator: Option<String>,
        reward_asset: Option<String>,
        start_block: Option<BlockNumber>,
        duration_blocks: Option<BlockNumber>,
        funding_policy: Option<String>,
    },
    RegisterAsset {
        ticker: String,
        minter: Option<String>,
    },
    Mint {
        ticker: String,
        to: String,
        amount: Amount,
        minter: Option<String>,
    },
    Approve {
        ticker: String,
        owner: String,
        amount: Amount,
        spender: Option<String>,
    },
    Balance {
        ticker: String,
        account: String,
    },
    AddPool {
        ticker: String,
        weight: Weight,
        caller: Option<String>,
        block: Option<BlockNumber>,
    },
    SetWeight {
        pool: PoolId,
        weight: Weight,
        caller: Option<String>,
        block: Option<BlockNumber>,
    },
    Fund {
        amount: Amount,
        caller: Option<String>,
        block: Option<BlockNumber>,
    },
    ExtendHorizon {
        blocks: BlockNumber,
        caller: Option<String>,
        block: Option<BlockNumber>,
    },
    Deposit {
        user: String,
        pool: PoolId,
        amount: Amount,
        block: Option<BlockNumber>,
    },
    Withdraw {
        user: String,
        pool: PoolId,
        amount: Amount,
        block: Option<BlockNumber>,
    },
    Harvest {
        user: String,
        pool: PoolId,
        block: Option<BlockNumber>,
    },
    EmergencyWithdraw {
        user: String,
        pool: PoolId,
        block: Option<BlockNumber>,
    },
    Pending {
        user: String,
        pool: PoolId,
        block: Option<BlockNumber>,
    },
    Pool {
        pool: PoolId,
    },
    User {
        user: String,
        pool: PoolId,
    },
    Status,
    Advance {
        block: BlockNumber,
    },
}

impl FarmCommand {
    /// Whether the command changes persisted state.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            FarmCommand::Balance { .. }
                | FarmCommand::Pending { .. }
                | FarmCommand::Pool { .. }
                | FarmCommand::User { .. }
                | FarmCommand::Status
        )
    }
}

/// Outcome of a command: a line for humans and a JSON document for tools.
#[derive(Debug, Clone)]
pub struct Report {
    pub message: String,
    pub json: String,
}

impl Report {
    fn new<T: Serialize>(message: impl Into<String>, data: &T) -> Result<Self> {
        Ok(Self {
            message: message.into(),
            json: serde_json::to_string_pretty(data)?,
        })
    }
}

#[derive(Serialize)]
struct InitView<'a> {
    farm_id: &'a str,
    operator: AccountId,
    custody: AccountId,
    emission: &'a EmissionState,
}

#[derive(Serialize)]
struct BalanceView<'a> {
    asset: &'a AssetId,
    account: AccountId,
    balance: Amount,
}

#[derive(Serialize)]
struct ReceiptView {
    pool: PoolId,
    user: AccountId,
    block: BlockNumber,
    reward: Amount,
    forfeited: Amount,
    staked_in: Amount,
    staked_out: Amount,
    amount_after: Amount,
}

#[derive(Serialize)]
struct PendingView {
    pool: PoolId,
    user: AccountId,
    block: BlockNumber,
    pending: Amount,
}

#[derive(Serialize)]
struct StatusView<'a> {
    farm_id: &'a str,
    operator: AccountId,
    custody: AccountId,
    last_block: BlockNumber,
    pool_count: usize,
    total_weight: Weight,
    emission: &'a EmissionState,
}

fn account(value: &str) -> Result<AccountId> {
    AccountId::parse_or_label(value).map_err(|err| anyhow!("invalid account '{value}': {err}"))
}

fn asset(value: &str) -> Result<AssetId> {
    AssetId::new(value).map_err(|err| anyhow!("invalid asset '{value}': {err}"))
}

fn load_farm<S: Storage>(storage: &S) -> Result<Farm<InMemoryAssetLedger>> {
    let snapshot = storage
        .load_snapshot()?
        .ok_or_else(|| anyhow!("farm is not initialized; run `farm-node init` first"))?;
    let assets = InMemoryAssetLedger::from_book(storage.load_asset_book()?);
    Ok(Farm::from_snapshot(snapshot, assets)?)
}

fn save<S: Storage>(storage: &S, farm: &Farm<InMemoryAssetLedger>) -> Result<()> {
    storage.commit(&farm.snapshot(), farm.assets().book())
}

fn operator_cap(
    farm: &Farm<InMemoryAssetLedger>,
    caller: Option<&str>,
    config: &AppConfig,
) -> Result<OperatorCap> {
    let caller = account(caller.unwrap_or(&config.operator))?;
    Ok(farm.operator_cap(&caller)?)
}

fn receipt_report(
    verb: &str,
    pool: PoolId,
    user: AccountId,
    block: BlockNumber,
    receipt: StakeReceipt,
) -> Result<Report> {
    Report::new(
        format!(
            "{verb} in pool {pool} at block {block}: paid {} reward, stake now {}",
            receipt.reward, receipt.amount_after
        ),
        &ReceiptView {
            pool,
            user,
            block,
            reward: receipt.reward,
            forfeited: receipt.forfeited,
            staked_in: receipt.staked_in,
            staked_out: receipt.staked_out,
            amount_after: receipt.amount_after,
        },
    )
}

pub fn execute<S: Storage>(storage: &S, config: &AppConfig, command: FarmCommand) -> Result<Report> {
    match command {
        FarmCommand::Init {
            operator,
            reward_asset,
            start_block,
            duration_blocks,
            funding_policy,
        } => {
            let mut effective = config.clone();
            if let Some(operator) = operator {
                effective.operator = operator;
            }
            if let Some(reward_asset) = reward_asset {
                effective.reward_asset = reward_asset;
            }
            if let Some(start_block) = start_block {
                effective.start_block = start_block;
            }
            if let Some(duration_blocks) = duration_blocks {
                effective.duration_blocks = duration_blocks;
            }
            if let Some(funding_policy) = funding_policy {
                effective.funding_policy = funding_policy;
            }
            init(storage, &effective)
        }
        command => {
            let farm = load_farm(storage)?;
            run(storage, config, farm, command)
        }
    }
}

fn run<S: Storage>(
    storage: &S,
    config: &AppConfig,
    mut farm: Farm<InMemoryAssetLedger>,
    command: FarmCommand,
) -> Result<Report> {
    let report = match command {
        FarmCommand::Init { .. } => anyhow::bail!("farm {} is already initialized", farm.farm_id()),
        FarmCommand::RegisterAsset { ticker, minter } => {
            let asset = asset(&ticker)?;
            let minter = account(minter.as_deref().unwrap_or(&config.operator))?;
            farm.assets_mut().register_asset(&asset, &minter)?;
            save(storage, &farm)?;
            Report::new(
                format!("Registered {asset} (minter {minter})"),
                &BalanceView {
                    asset: &asset,
                    account: minter,
                    balance: 0,
                },
            )?
        }
        FarmCommand::Mint {
            ticker,
            to,
            amount,
            minter,
        } => {
            let asset = asset(&ticker)?;
            let to = account(&to)?;
            let minter = account(minter.as_deref().unwrap_or(&config.operator))?;
            farm.assets_mut().mint(&asset, &minter, &to, amount)?;
            save(storage, &farm)?;
            let balance = farm.assets().balance_of(&asset, &to)?;
            Report::new(
                format!("Minted {amount} {asset} to {to}"),
                &BalanceView {
                    asset: &asset,
                    account: to,
                    balance,
                },
            )?
        }
        FarmCommand::Approve {
            ticker,
            owner,
            amount,
            spender,
        } => {
            let asset = asset(&ticker)?;
            let owner = account(&owner)?;
            let spender = match spender {
                Some(spender) => account(&spender)?,
                None => *farm.custody(),
            };
            farm.assets_mut().approve(&asset, &owner, &spender, amount)?;
            save(storage, &farm)?;
            Report::new(
                format!("{owner} allows {spender} to pull {amount} {asset}"),
                &BalanceView {
                    asset: &asset,
                    account: owner,
                    balance: farm.assets().allowance(&asset, &owner, &spender)?,
                },
            )?
        }
        FarmCommand::Balance { ticker, account: holder } => {
            let asset = asset(&ticker)?;
            let holder = account(&holder)?;
            let balance = farm.assets().balance_of(&asset, &holder)?;
            Report::new(
                format!("{holder} holds {balance} {asset}"),
                &BalanceView {
                    asset: &asset,
                    account: holder,
                    balance,
                },
            )?
        }
        FarmCommand::AddPool {
            ticker,
            weight,
            caller,
            block,
        } => {
            let cap = operator_cap(&farm, caller.as_deref(), config)?;
            let now = block.unwrap_or(farm.last_block());
            let id = farm.add_pool(&cap, weight, asset(&ticker)?, now)?;
            save(storage, &farm)?;
            Report::new(
                format!("Added pool {id} for {ticker} with weight {weight}"),
                farm.pool_info(id)?,
            )?
        }
        FarmCommand::SetWeight {
            pool,
            weight,
            caller,
            block,
        } => {
            let cap = operator_cap(&farm, caller.as_deref(), config)?;
            let now = block.unwrap_or(farm.last_block());
            let previous = farm.set_weight(&cap, pool, weight, now)?;
            save(storage, &farm)?;
            Report::new(
                format!("Pool {pool} weight {previous} -> {weight}"),
                farm.pool_info(pool)?,
            )?
        }
        FarmCommand::Fund {
            amount,
            caller,
            block,
        } => {
            let cap = operator_cap(&farm, caller.as_deref(), config)?;
            let now = block.unwrap_or(farm.last_block());
            farm.fund_rewards(&cap, amount, now)?;
            save(storage, &farm)?;
            let emission = farm.emission();
            Report::new(
                format!(
                    "Funded {amount}: {} per block until block {}",
                    emission.reward_per_block, emission.end_block
                ),
                emission,
            )?
        }
        FarmCommand::ExtendHorizon {
            blocks,
            caller,
            block,
        } => {
            let cap = operator_cap(&farm, caller.as_deref(), config)?;
            let now = block.unwrap_or(farm.last_block());
            farm.extend_horizon(&cap, blocks, now)?;
            save(storage, &farm)?;
            let emission = farm.emission();
            Report::new(
                format!(
                    "Horizon ends at block {}: {} per block",
                    emission.end_block, emission.reward_per_block
                ),
                emission,
            )?
        }
        FarmCommand::Deposit {
            user,
            pool,
            amount,
            block,
        } => {
            let user = account(&user)?;
            let now = block.unwrap_or(farm.last_block());
            let receipt = farm.deposit(&user, pool, amount, now)?;
            save(storage, &farm)?;
            receipt_report("Deposit", pool, user, now, receipt)?
        }
        FarmCommand::Withdraw {
            user,
            pool,
            amount,
            block,
        } => {
            let user = account(&user)?;
            let now = block.unwrap_or(farm.last_block());
            let receipt = farm.withdraw(&user, pool, amount, now)?;
            save(storage, &farm)?;
            receipt_report("Withdraw", pool, user, now, receipt)?
        }
        FarmCommand::Harvest { user, pool, block } => {
            let user = account(&user)?;
            let now = block.unwrap_or(farm.last_block());
            let receipt = farm.harvest(&user, pool, now)?;
            save(storage, &farm)?;
            receipt_report("Harvest", pool, user, now, receipt)?
        }
        FarmCommand::EmergencyWithdraw { user, pool, block } => {
            let user = account(&user)?;
            let now = block.unwrap_or(farm.last_block());
            let receipt = farm.emergency_withdraw(&user, pool, now)?;
            save(storage, &farm)?;
            receipt_report("Emergency withdraw", pool, user, now, receipt)?
        }
        FarmCommand::Pending { user, pool, block } => {
            let user = account(&user)?;
            let now = block.unwrap_or(farm.last_block());
            let pending = farm.pending_reward(pool, &user, now)?;
            Report::new(
                format!("{user} has {pending} pending in pool {pool} at block {now}"),
                &PendingView {
                    pool,
                    user,
                    block: now,
                    pending,
                },
            )?
        }
        FarmCommand::Pool { pool } => {
            let info = farm.pool_info(pool)?;
            Report::new(
                format!(
                    "Pool {} ({}): weight {}, staked {}, settled at block {}",
                    info.id, info.staked_asset, info.weight, info.total_staked, info.last_settled_block
                ),
                info,
            )?
        }
        FarmCommand::User { user, pool } => {
            let user = account(&user)?;
            let stake = farm.user_info(pool, &user)?;
            Report::new(
                format!(
                    "{user} in pool {pool}: staked {}, reward debt {}",
                    stake.amount, stake.reward_debt
                ),
                &stake,
            )?
        }
        FarmCommand::Status => {
            let emission = farm.emission();
            Report::new(
                format!(
                    "Farm {} at block {}: {} pools, {} {} funded, {} per block until block {}",
                    farm.farm_id(),
                    farm.last_block(),
                    farm.pool_length(),
                    emission.total_funded,
                    emission.reward_asset,
                    emission.reward_per_block,
                    emission.end_block
                ),
                &StatusView {
                    farm_id: farm.farm_id(),
                    operator: *farm.operator(),
                    custody: *farm.custody(),
                    last_block: farm.last_block(),
                    pool_count: farm.pool_length(),
                    total_weight: farm.total_weight(),
                    emission,
                },
            )?
        }
        FarmCommand::Advance { block } => {
            farm.mass_update_pools(block)?;
            save(storage, &farm)?;
            Report::new(
                format!("Settled {} pools at block {block}", farm.pool_length()),
                &farm.pools().collect::<Vec<_>>(),
            )?
        }
    };
    Ok(report)
}

fn init<S: Storage>(storage: &S, config: &AppConfig) -> Result<Report> {
    if storage.is_initialized()? {
        anyhow::bail!("farm is already initialized in {}", config.data_dir);
    }
    config.validate()?;
    let operator = config.operator_account()?;
    let params = config.emission_params()?;

    let mut assets = InMemoryAssetLedger::from_book(storage.load_asset_book()?);
    if !assets.is_registered(&params.reward_asset) {
        assets.register_asset(&params.reward_asset, &operator)?;
    }

    let (farm, _cap) = Farm::new(params, operator, assets)?;
    save(storage, &farm)?;
    info!(
        "Initialized farm {} (operator {}, custody {})",
        farm.farm_id(),
        farm.operator(),
        farm.custody()
    );

    Report::new(
        format!(
            "Initialized farm {} rewarding {} (custody {})",
            farm.farm_id(),
            farm.emission().reward_asset,
            farm.custody()
        ),
        &InitView {
            farm_id: farm.farm_id(),
            operator: *farm.operator(),
            custody: *farm.custody(),
            emission: farm.emission(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use farm_storage::SledStorage;
    use tempfile::TempDir;

    fn config() -> AppConfig {
        AppConfig {
            operator: "minter".to_string(),
            duration_blocks: 100,
            ..AppConfig::default()
        }
    }

    fn run(storage: &SledStorage, command: FarmCommand) -> Report {
        execute(storage, &config(), command).unwrap()
    }

    fn init_command() -> FarmCommand {
        FarmCommand::Init {
            operator: None,
            reward_asset: None,
            start_block: None,
            duration_blocks: None,
            funding_policy: None,
        }
    }

    fn seed(storage: &SledStorage) {
        run(storage, init_command());
        run(
            storage,
            FarmCommand::RegisterAsset {
                ticker: "LP1".into(),
                minter: None,
            },
        );
        for (ticker, to, amount) in [("USDT", "minter", 10_000), ("LP1", "alice", 100)] {
            run(
                storage,
                FarmCommand::Mint {
                    ticker: ticker.into(),
                    to: to.into(),
                    amount,
                    minter: None,
                },
            );
        }
        for (ticker, owner) in [("USDT", "minter"), ("LP1", "alice")] {
            run(
                storage,
                FarmCommand::Approve {
                    ticker: ticker.into(),
                    owner: owner.into(),
                    amount: Amount::MAX,
                    spender: None,
                },
            );
        }
        run(
            storage,
            FarmCommand::Fund {
                amount: 1_000,
                caller: None,
                block: Some(0),
            },
        );
        run(
            storage,
            FarmCommand::AddPool {
                ticker: "LP1".into(),
                weight: 2_000,
                caller: None,
                block: Some(0),
            },
        );
    }

    #[test]
    fn commands_require_initialization() {
        let dir = TempDir::new().unwrap();
        let storage = SledStorage::new(dir.path().join("db")).unwrap();
        assert!(execute(&storage, &config(), FarmCommand::Status).is_err());
    }

    #[test]
    fn init_twice_is_refused() {
        let dir = TempDir::new().unwrap();
        let storage = SledStorage::new(dir.path().join("db")).unwrap();
        run(&storage, init_command());
        assert!(execute(&storage, &config(), init_command()).is_err());
    }

    #[test]
    fn stake_and_harvest_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db");
        {
            let storage = SledStorage::new(&path).unwrap();
            seed(&storage);
            run(
                &storage,
                FarmCommand::Deposit {
                    user: "alice".into(),
                    pool: 0,
                    amount: 10,
                    block: Some(0),
                },
            );
        }

        let storage = SledStorage::new(&path).unwrap();
        let pending = run(
            &storage,
            FarmCommand::Pending {
                user: "alice".into(),
                pool: 0,
                block: Some(10),
            },
        );
        assert!(pending.message.contains("has 100 pending"));

        let harvest = run(
            &storage,
            FarmCommand::Harvest {
                user: "alice".into(),
                pool: 0,
                block: Some(10),
            },
        );
        assert!(harvest.json.contains("\"reward\": 100"));

        let balance = run(
            &storage,
            FarmCommand::Balance {
                ticker: "USDT".into(),
                account: "alice".into(),
            },
        );
        assert!(balance.message.contains("holds 100 USDT"));
    }

    #[test]
    fn non_operator_caller_is_refused() {
        let dir = TempDir::new().unwrap();
        let storage = SledStorage::new(dir.path().join("db")).unwrap();
        seed(&storage);
        let result = execute(
            &storage,
            &config(),
            FarmCommand::SetWeight {
                pool: 0,
                weight: 1,
                caller: Some("alice".into()),
                block: None,
            },
        );
        assert!(result.is_err());
        let pool = run(&storage, FarmCommand::Pool { pool: 0 });
        assert!(pool.message.contains("weight 2000"));
    }

    #[test]
    fn failed_command_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let storage = SledStorage::new(dir.path().join("db")).unwrap();
        seed(&storage);
        let before = storage.load_snapshot().unwrap();

        let result = execute(
            &storage,
            &config(),
            FarmCommand::Withdraw {
                user: "alice".into(),
                pool: 0,
                amount: 1,
                block: Some(5),
            },
        );
        assert!(result.is_err());
        assert_eq!(storage.load_snapshot().unwrap(), before);
    }

    #[test]
    fn read_commands_are_not_mutating() {
        assert!(!FarmCommand::Status.is_mutating());
        assert!(FarmCommand::Advance { block: 1 }.is_mutating());
    }
}

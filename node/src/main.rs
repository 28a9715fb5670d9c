use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use farm_storage::{SledStorage, Storage};
use farm_types::{Amount, BlockNumber, PoolId, Weight};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod config;
mod lock;
mod version;

use commands::{execute, FarmCommand};
use config::{default_data_dir, AppConfig, CONFIG_FILENAME};
use lock::DataDirLock;
use version::{git_commit_hash, FARM_VERSION};

fn block_arg() -> Arg {
    Arg::new("block")
        .long("block")
        .value_name("HEIGHT")
        .help("Block height of the operation (defaults to the last processed block)")
        .value_parser(value_parser!(BlockNumber))
}

fn caller_arg() -> Arg {
    Arg::new("caller")
        .long("caller")
        .value_name("ACCOUNT")
        .help("Account presenting the operator capability (defaults to the configured operator)")
}

fn pool_arg() -> Arg {
    Arg::new("pool")
        .long("pool")
        .value_name("ID")
        .required(true)
        .value_parser(value_parser!(PoolId))
}

fn user_arg() -> Arg {
    Arg::new("user")
        .long("user")
        .value_name("ACCOUNT")
        .required(true)
}

fn asset_arg() -> Arg {
    Arg::new("asset")
        .long("asset")
        .value_name("TICKER")
        .required(true)
}

fn amount_arg() -> Arg {
    Arg::new("amount")
        .long("amount")
        .value_name("UNITS")
        .required(true)
        .value_parser(value_parser!(Amount))
}

fn weight_arg() -> Arg {
    Arg::new("weight")
        .long("weight")
        .value_name("WEIGHT")
        .required(true)
        .value_parser(value_parser!(Weight))
}

fn staking_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .about(about)
        .arg(user_arg())
        .arg(pool_arg())
        .arg(block_arg())
}

fn cli() -> Command {
    Command::new("farm-node")
        .version(FARM_VERSION)
        .about("Staking reward farm ledger")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .global(true),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Data directory")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("Log output format")
                .value_parser(["pretty", "json"])
                .global(true),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print command results as JSON")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("init")
                .about("Create the farm and register its reward asset")
                .arg(Arg::new("operator").long("operator").value_name("ACCOUNT"))
                .arg(Arg::new("reward-asset").long("reward-asset").value_name("TICKER"))
                .arg(
                    Arg::new("start-block")
                        .long("start-block")
                        .value_name("HEIGHT")
                        .value_parser(value_parser!(BlockNumber)),
                )
                .arg(
                    Arg::new("duration-blocks")
                        .long("duration-blocks")
                        .value_name("BLOCKS")
                        .value_parser(value_parser!(BlockNumber)),
                )
                .arg(
                    Arg::new("funding-policy")
                        .long("funding-policy")
                        .value_name("POLICY")
                        .value_parser(["accelerate", "extend"]),
                ),
        )
        .subcommand(
            Command::new("register-asset")
                .about("Register a fungible asset in the local asset book")
                .arg(asset_arg())
                .arg(Arg::new("minter").long("minter").value_name("ACCOUNT")),
        )
        .subcommand(
            Command::new("mint")
                .about("Mint units of a registered asset")
                .arg(asset_arg())
                .arg(Arg::new("to").long("to").value_name("ACCOUNT").required(true))
                .arg(amount_arg())
                .arg(Arg::new("minter").long("minter").value_name("ACCOUNT")),
        )
        .subcommand(
            Command::new("approve")
                .about("Allow a spender (the farm custody by default) to pull an owner's asset")
                .arg(asset_arg())
                .arg(Arg::new("owner").long("owner").value_name("ACCOUNT").required(true))
                .arg(amount_arg())
                .arg(Arg::new("spender").long("spender").value_name("ACCOUNT")),
        )
        .subcommand(
            Command::new("balance")
                .about("Show an account's balance of an asset")
                .arg(asset_arg())
                .arg(
                    Arg::new("account")
                        .long("account")
                        .value_name("ACCOUNT")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("add-pool")
                .about("Add a staking pool (operator)")
                .arg(asset_arg())
                .arg(weight_arg())
                .arg(caller_arg())
                .arg(block_arg()),
        )
        .subcommand(
            Command::new("set-weight")
                .about("Change a pool's allocation weight (operator)")
                .arg(pool_arg())
                .arg(weight_arg())
                .arg(caller_arg())
                .arg(block_arg()),
        )
        .subcommand(
            Command::new("fund")
                .about("Deposit reward tokens into the farm (operator)")
                .arg(amount_arg())
                .arg(caller_arg())
                .arg(block_arg()),
        )
        .subcommand(
            Command::new("extend-horizon")
                .about("Push the emission end block further out (operator)")
                .arg(
                    Arg::new("blocks")
                        .long("blocks")
                        .value_name("BLOCKS")
                        .required(true)
                        .value_parser(value_parser!(BlockNumber)),
                )
                .arg(caller_arg())
                .arg(block_arg()),
        )
        .subcommand(staking_command("deposit", "Stake into a pool").arg(amount_arg()))
        .subcommand(staking_command("withdraw", "Unstake from a pool").arg(amount_arg()))
        .subcommand(staking_command("harvest", "Claim pending reward"))
        .subcommand(staking_command(
            "emergency-withdraw",
            "Withdraw the whole stake and forfeit pending reward",
        ))
        .subcommand(staking_command("pending", "Show pending reward without changing state"))
        .subcommand(
            Command::new("pool")
                .about("Show a pool")
                .arg(pool_arg()),
        )
        .subcommand(
            Command::new("user")
                .about("Show a user's stake in a pool")
                .arg(user_arg())
                .arg(pool_arg()),
        )
        .subcommand(Command::new("status").about("Show farm and emission status"))
        .subcommand(
            Command::new("advance")
                .about("Settle every pool up to a block")
                .arg(
                    Arg::new("block")
                        .long("block")
                        .value_name("HEIGHT")
                        .required(true)
                        .value_parser(value_parser!(BlockNumber)),
                ),
        )
        .subcommand(Command::new("version").about("Show version information"))
}

fn string(matches: &ArgMatches, id: &str) -> Option<String> {
    matches.get_one::<String>(id).cloned()
}

fn required_string(matches: &ArgMatches, id: &str) -> Result<String> {
    string(matches, id).ok_or_else(|| anyhow::anyhow!("missing --{id}"))
}

fn required<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("missing --{id}"))
}

fn block(matches: &ArgMatches) -> Option<BlockNumber> {
    matches.get_one::<BlockNumber>("block").copied()
}

fn parse_command(name: &str, matches: &ArgMatches) -> Result<FarmCommand> {
    let command = match name {
        "init" => FarmCommand::Init {
            operator: string(matches, "operator"),
            reward_asset: string(matches, "reward-asset"),
            start_block: matches.get_one::<BlockNumber>("start-block").copied(),
            duration_blocks: matches.get_one::<BlockNumber>("duration-blocks").copied(),
            funding_policy: string(matches, "funding-policy"),
        },
        "register-asset" => FarmCommand::RegisterAsset {
            ticker: required_string(matches, "asset")?,
            minter: string(matches, "minter"),
        },
        "mint" => FarmCommand::Mint {
            ticker: required_string(matches, "asset")?,
            to: required_string(matches, "to")?,
            amount: required(matches, "amount")?,
            minter: string(matches, "minter"),
        },
        "approve" => FarmCommand::Approve {
            ticker: required_string(matches, "asset")?,
            owner: required_string(matches, "owner")?,
            amount: required(matches, "amount")?,
            spender: string(matches, "spender"),
        },
        "balance" => FarmCommand::Balance {
            ticker: required_string(matches, "asset")?,
            account: required_string(matches, "account")?,
        },
        "add-pool" => FarmCommand::AddPool {
            ticker: required_string(matches, "asset")?,
            weight: required(matches, "weight")?,
            caller: string(matches, "caller"),
            block: block(matches),
        },
        "set-weight" => FarmCommand::SetWeight {
            pool: required(matches, "pool")?,
            weight: required(matches, "weight")?,
            caller: string(matches, "caller"),
            block: block(matches),
        },
        "fund" => FarmCommand::Fund {
            amount: required(matches, "amount")?,
            caller: string(matches, "caller"),
            block: block(matches),
        },
        "extend-horizon" => FarmCommand::ExtendHorizon {
            blocks: required(matches, "blocks")?,
            caller: string(matches, "caller"),
            block: block(matches),
        },
        "deposit" => FarmCommand::Deposit {
            user: required_string(matches, "user")?,
            pool: required(matches, "pool")?,
            amount: required(matches, "amount")?,
            block: block(matches),
        },
        "withdraw" => FarmCommand::Withdraw {
            user: required_string(matches, "user")?,
            pool: required(matches, "pool")?,
            amount: required(matches, "amount")?,
            block: block(matches),
        },
        "harvest" => FarmCommand::Harvest {
            user: required_string(matches, "user")?,
            pool: required(matches, "pool")?,
            block: block(matches),
        },
        "emergency-withdraw" => FarmCommand::EmergencyWithdraw {
            user: required_string(matches, "user")?,
            pool: required(matches, "pool")?,
            block: block(matches),
        },
        "pending" => FarmCommand::Pending {
            user: required_string(matches, "user")?,
            pool: required(matches, "pool")?,
            block: block(matches),
        },
        "pool" => FarmCommand::Pool {
            pool: required(matches, "pool")?,
        },
        "user" => FarmCommand::User {
            user: required_string(matches, "user")?,
            pool: required(matches, "pool")?,
        },
        "status" => FarmCommand::Status,
        "advance" => FarmCommand::Advance {
            block: required(matches, "block")?,
        },
        other => anyhow::bail!("unknown command '{other}'"),
    };
    Ok(command)
}

fn load_config_with_overrides(matches: &ArgMatches) -> Result<AppConfig> {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let fallback = matches
        .get_one::<String>("data-dir")
        .map(PathBuf::from)
        .unwrap_or_else(default_data_dir)
        .join(CONFIG_FILENAME);
    let mut config = AppConfig::load(config_path.as_deref(), Some(&fallback))?;
    apply_overrides(matches, &mut config);
    Ok(config)
}

fn apply_overrides(matches: &ArgMatches, config: &mut AppConfig) {
    if let Some(data_dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = data_dir.clone();
    }

    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .init();
    }

    Ok(())
}

/// Persist the effective configuration next to the database on first init.
fn write_default_config(config: &AppConfig) -> Result<()> {
    if config.config_path.is_some() {
        return Ok(());
    }
    let path = Path::new(&config.data_dir).join(CONFIG_FILENAME);
    if path.exists() {
        return Ok(());
    }
    fs::write(&path, config.to_toml()?)?;
    info!("Wrote configuration to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let Some((name, sub_matches)) = matches.subcommand() else {
        anyhow::bail!("no command given");
    };

    if name == "version" {
        println!("farm-node {FARM_VERSION} ({})", git_commit_hash());
        return Ok(());
    }

    let config = load_config_with_overrides(sub_matches)?;
    config.validate()?;
    init_logging(&config)?;

    let command = parse_command(name, sub_matches)?;
    let is_init = matches!(command, FarmCommand::Init { .. });

    fs::create_dir_all(&config.data_dir)?;
    let _data_dir_lock = DataDirLock::acquire(&config.data_dir, name)?;
    let storage = SledStorage::new(config.db_path())?;
    debug!("Storage opened at {}", config.db_path().display());

    let report = execute(&storage, &config, command)?;
    if is_init {
        write_default_config(&config)?;
    }
    storage.flush()?;

    if sub_matches.get_flag("json") {
        println!("{}", report.json);
    } else {
        println!("{}", report.message);
    }
    Ok(())
}

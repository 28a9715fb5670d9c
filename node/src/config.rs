use anyhow::{Context, Result};
use config::{Config, File as ConfigFile};
use farm_economics::{EmissionParams, DEFAULT_DURATION_BLOCKS};
use farm_types::{AccountId, AssetId, BlockNumber, FundingPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILENAME: &str = "farm.toml";
pub const ENV_PREFIX: &str = "FARM";

/// Default data directory: the platform data dir, or `./farm-data`.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("farm"))
        .unwrap_or_else(|| PathBuf::from("farm-data"))
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    // Storage
    pub data_dir: String,

    // Logging
    pub log_level: String,
    pub log_format: String,

    // Farm parameters used by `init`
    pub reward_asset: String,
    pub operator: String,
    pub start_block: BlockNumber,
    pub duration_blocks: BlockNumber,
    pub funding_policy: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_path: None,
            data_dir: default_data_dir().display().to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            reward_asset: "USDT".to_string(),
            operator: "operator".to_string(),
            start_block: 0,
            duration_blocks: DEFAULT_DURATION_BLOCKS,
            funding_policy: FundingPolicy::default().to_string(),
        }
    }
}

fn get_string_value(config: &Config, key: &str) -> Option<String> {
    config
        .get_string(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn get_block_value(config: &Config, key: &str, default: BlockNumber) -> Result<BlockNumber> {
    match config.get_int(key) {
        Ok(value) => BlockNumber::try_from(value)
            .with_context(|| format!("{key} must be a non-negative block count")),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("invalid value for {key}")),
    }
}

impl AppConfig {
    /// Layer the optional TOML file under `FARM_*` environment variables.
    ///
    /// An explicit `config_path_override` must exist; otherwise `fallback`
    /// is used only if present.
    pub fn load(config_path_override: Option<&Path>, fallback: Option<&Path>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path.to_path_buf())
        } else {
            fallback.filter(|path| path.exists()).map(Path::to_path_buf)
        };

        let mut builder = Config::builder();
        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX));
        let config = builder.build()?;

        let defaults = Self::default();
        let loaded = Self {
            config_path: resolved_path,
            data_dir: get_string_value(&config, "data_dir").unwrap_or(defaults.data_dir),
            log_level: get_string_value(&config, "log_level").unwrap_or(defaults.log_level),
            log_format: get_string_value(&config, "log_format").unwrap_or(defaults.log_format),
            reward_asset: get_string_value(&config, "reward_asset")
                .unwrap_or(defaults.reward_asset),
            operator: get_string_value(&config, "operator").unwrap_or(defaults.operator),
            start_block: get_block_value(&config, "start_block", defaults.start_block)?,
            duration_blocks: get_block_value(
                &config,
                "duration_blocks",
                defaults.duration_blocks,
            )?,
            funding_policy: get_string_value(&config, "funding_policy")
                .unwrap_or(defaults.funding_policy),
        };
        Ok(loaded)
    }

    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("db")
    }

    pub fn validate(&self) -> Result<()> {
        if self.data_dir.trim().is_empty() {
            anyhow::bail!("DATA_DIR must not be empty");
        }
        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json'");
        }
        if self.duration_blocks == 0 {
            anyhow::bail!("DURATION_BLOCKS must be greater than zero");
        }
        self.reward_asset()?;
        self.operator_account()?;
        self.funding_policy()?;
        Ok(())
    }

    pub fn reward_asset(&self) -> Result<AssetId> {
        AssetId::new(&self.reward_asset)
            .with_context(|| format!("invalid reward asset '{}'", self.reward_asset))
    }

    pub fn operator_account(&self) -> Result<AccountId> {
        AccountId::parse_or_label(&self.operator)
            .with_context(|| format!("invalid operator '{}'", self.operator))
    }

    pub fn funding_policy(&self) -> Result<FundingPolicy> {
        self.funding_policy
            .parse::<FundingPolicy>()
            .map_err(anyhow::Error::msg)
    }

    pub fn emission_params(&self) -> Result<EmissionParams> {
        Ok(EmissionParams::new(self.reward_asset()?, self.start_block)
            .with_duration(self.duration_blocks)
            .with_policy(self.funding_policy()?))
    }

    /// Effective configuration as a TOML document.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

//! Environment-driven configuration for the watcher binary.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{NetworkTarget, TargetError};
use crate::services::chains::{ChainRegistry, ContractBook};

pub const DEFAULT_CHAINS_FILE: &str = "config/chains.json";
pub const DEFAULT_CONTRACTS_FILE: &str = "config/contracts.json";
pub const DEFAULT_STATE_FILE: &str = "state/checkpoints.json";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// Slack bot credentials; both halves are required together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackConfig {
    token: String,
    channel: String,
}

impl SlackConfig {
    pub fn new(token: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            channel: channel.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

/// Process-wide settings derived from `.env`/process variables. Per-network
/// settings are resolved separately through [`WatchConfig::resolve_networks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    chains_file: PathBuf,
    contracts_file: PathBuf,
    state_file: PathBuf,
    database_url: Option<String>,
    poll_interval: Duration,
    default_batch_size: u64,
    slack: Option<SlackConfig>,
}

impl WatchConfig {
    /// Hydrates `.env` (if present) and reads the process variables.
    /// Malformed entries surface as `ConfigError`.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path_or = |key: &str, default: &str| {
            PathBuf::from(trimmed(&lookup, key).unwrap_or_else(|| default.to_string()))
        };

        let poll_secs = parse_u64(&lookup, "WATCH_POLL_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_POLL_INTERVAL.as_secs());
        if poll_secs == 0 {
            return Err(ConfigError::ZeroValue {
                key: "WATCH_POLL_INTERVAL_SECS".into(),
            });
        }
        let default_batch_size =
            parse_u64(&lookup, "WATCH_BATCH_SIZE")?.unwrap_or(DEFAULT_BATCH_SIZE);
        if default_batch_size == 0 {
            return Err(ConfigError::ZeroValue {
                key: "WATCH_BATCH_SIZE".into(),
            });
        }

        let slack = match (
            trimmed(&lookup, "SLACK_TOKEN"),
            trimmed(&lookup, "SLACK_CHANNEL"),
        ) {
            (Some(token), Some(channel)) => Some(SlackConfig::new(token, channel)),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingVar { key: "SLACK_CHANNEL" }),
            (None, Some(_)) => return Err(ConfigError::MissingVar { key: "SLACK_TOKEN" }),
        };

        Ok(Self {
            chains_file: path_or("WATCH_CHAINS_FILE", DEFAULT_CHAINS_FILE),
            contracts_file: path_or("WATCH_CONTRACTS_FILE", DEFAULT_CONTRACTS_FILE),
            state_file: path_or("WATCH_STATE_FILE", DEFAULT_STATE_FILE),
            database_url: trimmed(&lookup, "DATABASE_URL"),
            poll_interval: Duration::from_secs(poll_secs),
            default_batch_size,
            slack,
        })
    }

    pub fn chains_file(&self) -> &Path {
        &self.chains_file
    }

    pub fn contracts_file(&self) -> &Path {
        &self.contracts_file
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn default_batch_size(&self) -> u64 {
        self.default_batch_size
    }

    pub fn slack(&self) -> Option<&SlackConfig> {
        self.slack.as_ref()
    }

    /// Builds one target per registry chain that has an RPC endpoint in the
    /// environment and a deployed contract in the address book.
    pub fn networks_from_env(
        &self,
        registry: &ChainRegistry,
        contracts: &ContractBook,
    ) -> Result<Vec<NetworkTarget>, ConfigError> {
        self.resolve_networks(registry, contracts, env_lookup)
    }

    pub fn resolve_networks<F>(
        &self,
        registry: &ChainRegistry,
        contracts: &ContractBook,
        lookup: F,
    ) -> Result<Vec<NetworkTarget>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut targets = Vec::new();
        for chain in registry.chains() {
            let prefix = chain.env_prefix.trim().to_ascii_uppercase();
            let Some(rpc_endpoint) = trimmed(&lookup, &format!("{prefix}_NODE_URL")) else {
                debug!(network = %chain.name, "no rpc endpoint configured, skipping");
                continue;
            };
            let Some(contract_address) = contracts.deployed_address(&chain.name) else {
                warn!(
                    network = %chain.name,
                    "no deployed contract address configured, skipping"
                );
                continue;
            };

            let batch_size = match parse_u64(&lookup, &format!("{prefix}_BATCH_SIZE"))? {
                Some(size) => size,
                None if chain.default_batch_size > 0 => chain.default_batch_size,
                None => self.default_batch_size,
            };
            let poll_interval = parse_u64(&lookup, &format!("{prefix}_POLL_INTERVAL_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(self.poll_interval);
            let start_block = parse_u64(&lookup, &format!("{prefix}_START_BLOCK"))?;

            let target = NetworkTarget::new(
                chain.name.clone(),
                chain.chain_id,
                rpc_endpoint,
                contract_address,
                batch_size,
                poll_interval,
            )?
            .with_start_block(start_block);
            targets.push(target);
        }

        if targets.is_empty() {
            return Err(ConfigError::NoNetworks);
        }
        Ok(targets)
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn trimmed<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    trimmed(lookup, key)
        .map(|raw| {
            raw.parse().map_err(|source| ConfigError::InvalidNumber {
                key: key.to_string(),
                source,
            })
        })
        .transpose()
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("CHAIN_WATCH_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("`{key}` must be greater than zero")]
    ZeroValue { key: String },
    #[error("invalid network target: {0}")]
    Target(#[from] TargetError),
    #[error("no networks configured: set `<PREFIX>_NODE_URL` and a contract address for at least one chain")]
    NoNetworks,
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

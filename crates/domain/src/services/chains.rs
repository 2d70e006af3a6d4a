//! Chain metadata registry and contract address book.
//!
//! Both are loaded once at startup and shared as immutable values; nothing in
//! the workspace reaches for them through globals.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use serde::Deserialize;
use thiserror::Error;

use crate::model::Address;

/// Emoji used for chains the registry does not know about.
pub const DEFAULT_CHAIN_EMOJI: &str = "⚡";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub name: String,
    pub chain_id: u64,
    #[serde(default)]
    pub emoji: String,
    pub env_prefix: String,
    #[serde(default)]
    pub default_batch_size: u64,
    #[serde(default)]
    pub block_time: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChainsFile {
    chains: Vec<ChainInfo>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read `{path}`: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse `{path}`: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("chain id {0} is listed more than once")]
    DuplicateChainId(u64),
    #[error("chain name `{0}` is listed more than once")]
    DuplicateName(String),
}

/// Immutable lookup table of supported chains, keyed by chain id.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: Vec<ChainInfo>,
    by_id: HashMap<u64, usize>,
}

impl ChainRegistry {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|err| match err {
            RegistryError::Parse { source, .. } => RegistryError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, RegistryError> {
        let file: ChainsFile = serde_json::from_str(raw).map_err(|source| RegistryError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        Self::from_chains(file.chains)
    }

    pub fn from_chains(chains: Vec<ChainInfo>) -> Result<Self, RegistryError> {
        let mut by_id = HashMap::with_capacity(chains.len());
        let mut names = HashMap::with_capacity(chains.len());
        for (index, chain) in chains.iter().enumerate() {
            if by_id.insert(chain.chain_id, index).is_some() {
                return Err(RegistryError::DuplicateChainId(chain.chain_id));
            }
            if names.insert(chain.name.as_str(), index).is_some() {
                return Err(RegistryError::DuplicateName(chain.name.clone()));
            }
        }
        Ok(Self { chains, by_id })
    }

    pub fn get(&self, chain_id: u64) -> Option<&ChainInfo> {
        self.by_id.get(&chain_id).map(|index| &self.chains[*index])
    }

    pub fn chains(&self) -> &[ChainInfo] {
        &self.chains
    }

    pub fn emoji(&self, chain_id: u64) -> &str {
        self.get(chain_id)
            .map(|chain| chain.emoji.as_str())
            .filter(|emoji| !emoji.is_empty())
            .unwrap_or(DEFAULT_CHAIN_EMOJI)
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ContractsFile {
    contracts: BTreeMap<String, String>,
}

/// Deployed contract address per chain name.
#[derive(Debug, Clone, Default)]
pub struct ContractBook {
    contracts: BTreeMap<String, String>,
}

impl ContractBook {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: ContractsFile =
            serde_json::from_str(&raw).map_err(|source| RegistryError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self {
            contracts: file.contracts,
        })
    }

    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            contracts: entries
                .into_iter()
                .map(|(name, address)| (name.into(), address.into()))
                .collect(),
        }
    }

    pub fn raw(&self, chain_name: &str) -> Option<&str> {
        self.contracts.get(chain_name).map(String::as_str)
    }

    /// Returns the parsed address, or `None` when missing, malformed or zero
    /// (not deployed yet).
    pub fn deployed_address(&self, chain_name: &str) -> Option<Address> {
        self.raw(chain_name)
            .and_then(|raw| Address::parse(raw).ok())
            .filter(|address| !address.is_zero())
    }
}

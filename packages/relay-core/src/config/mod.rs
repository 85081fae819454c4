use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use crate::{types::ChainId, Error};

const DEFAULT_POLL_INTERVAL: u64 = 5;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_DELAY: u64 = 2;
const DEFAULT_BLOCKSTORE_PATH: &str = "./lvldbdata";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChainConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub chain_type: String,
    pub id: ChainId,
    pub endpoint: String,
    /// Identity reference handed to the key provider.
    #[serde(default)]
    pub from: String,
    /// Family-specific parameters, e.g. `bridge` and `erc20Handler` for EVM chains.
    #[serde(default)]
    pub opts: HashMap<String, String>,
}

impl ChainConfig {
    pub fn opt(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    pub fn required_opt(&self, key: &str) -> Result<&str, Error> {
        self.opt(key).ok_or_else(|| {
            Error::Config(format!("Chain {} ({}) is missing required option: {}", self.name, self.id, key))
        })
    }

    pub fn parse_opt<T: FromStr>(&self, key: &str, default: T) -> Result<T, Error>
    where
        T::Err: std::fmt::Display,
    {
        match self.opt(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| {
                Error::Config(format!("Chain {} has invalid option {}={}: {}", self.name, key, raw, e))
            }),
            None => Ok(default),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RelayerConfig {
    /// Seconds to wait before polling a chain that has no new final block.
    pub poll_interval: u64,
    pub max_retries: u32,
    pub retry_delay: u64,
    pub blockstore_path: PathBuf,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            blockstore_path: PathBuf::from(DEFAULT_BLOCKSTORE_PATH),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub relayer: RelayerConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
            _ => serde_json::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Loads `<name>.json` or `<name>.toml` from `dir`, preferring JSON.
    pub fn load_named<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self, Error> {
        let dir = dir.as_ref();
        for ext in ["json", "toml"] {
            let candidate = dir.join(format!("{}.{}", name, ext));
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }
        Err(Error::Config(format!("No config named {} found in {}", name, dir.display())))
    }

    fn validate(&self) -> Result<(), Error> {
        if self.chains.is_empty() {
            return Err(Error::Config("At least one chain must be configured".to_string()));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.id) {
                return Err(Error::Config(format!("Duplicate chain id: {}", chain.id)));
            }
            if chain.name.is_empty() {
                return Err(Error::Config(format!("Chain {} has no name", chain.id)));
            }
            if chain.endpoint.is_empty() {
                return Err(Error::Config(format!("Chain {} has no endpoint", chain.name)));
            }
        }

        if self.relayer.poll_interval == 0 {
            return Err(Error::Config("Relayer poll interval must be greater than 0".to_string()));
        }
        if self.relayer.max_retries == 0 {
            return Err(Error::Config("Relayer max retries must be greater than 0".to_string()));
        }

        Ok(())
    }
}

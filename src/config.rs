use crate::error::{AppError, AppResult};
use dotenvy::dotenv;
use ethers::{abi::Abi, types::Address};
use serde::Deserialize;
use serde_json::Value;
use std::{env, fs, path::Path};

const DEFAULT_CONFIG_PATH: &str = "Config.toml";
const DEFAULT_NETWORK: &str = "sepolia";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_SENTENCE: &str = "So much empty!";

/// Strongly-typed configuration derived from a `Config.toml` or environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub eth_rpc_url: String,
    pub contract_address: String,
    #[serde(default)]
    pub contract_abi_path: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub keystore_path: Option<String>,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_sentence")]
    pub initial_sentence: String,
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_sentence() -> String {
    DEFAULT_SENTENCE.to_string()
}

impl AppConfig {
    /// Load configuration, preferring a user-provided config file and falling back to env vars.
    pub fn load() -> AppResult<Self> {
        dotenv().ok();

        let configured_path =
            env::var("DAPP_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config_path = Path::new(&configured_path);

        if config_path.exists() {
            let raw = fs::read_to_string(config_path)
                .map_err(|err| AppError::Config(format!("failed to read config file: {err}")))?;
            return Self::from_toml_str(&raw);
        }

        Self::from_env()
    }

    pub fn from_toml_str(raw: &str) -> AppResult<Self> {
        let mut cfg: AppConfig = toml::from_str(raw)
            .map_err(|err| AppError::Config(format!("failed to parse config file: {err}")))?;
        cfg.apply_defaults();
        Ok(cfg)
    }

    /// Helper used when no config file is present.
    fn from_env() -> AppResult<Self> {
        let eth_rpc_url = env::var("ETH_RPC_URL")
            .map_err(|_| AppError::Config("ETH_RPC_URL missing (config file not found)".into()))?;
        let contract_address = env::var("CONTRACT_ADDRESS").map_err(|_| {
            AppError::Config("CONTRACT_ADDRESS missing (config file not found)".into())
        })?;

        let poll_interval_ms = env::var("POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let mut cfg = Self {
            eth_rpc_url,
            contract_address,
            contract_abi_path: env::var("CONTRACT_ABI_PATH").ok(),
            private_key: env::var("PRIVATE_KEY").ok(),
            keystore_path: env::var("KEYSTORE_PATH").ok(),
            network: env::var("NETWORK_NAME").unwrap_or_else(|_| default_network()),
            poll_interval_ms,
            initial_sentence: env::var("INITIAL_SENTENCE").unwrap_or_else(|_| default_sentence()),
        };
        cfg.apply_defaults();
        Ok(cfg)
    }

    /// Never surface a zero poll interval or a blank network name from user input.
    fn apply_defaults(&mut self) {
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.network.trim().is_empty() {
            self.network = default_network();
        }
    }

    pub fn contract_address(&self) -> AppResult<Address> {
        self.contract_address.parse::<Address>().map_err(|err| {
            AppError::Config(format!(
                "invalid contract address {}: {err}",
                self.contract_address
            ))
        })
    }

    /// Read the contract interface from `contract_abi_path`, if one is configured.
    ///
    /// Accepts either a bare ABI array or a compiler artifact carrying an `abi` field.
    pub fn load_abi(&self) -> AppResult<Option<Abi>> {
        let Some(path) = self.contract_abi_path.as_deref() else {
            return Ok(None);
        };

        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read ABI file {path}: {err}")))?;
        parse_abi_document(&raw).map(Some)
    }
}

pub(crate) fn parse_abi_document(raw: &str) -> AppResult<Abi> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|err| AppError::Config(format!("ABI is not valid JSON: {err}")))?;

    let abi_value = match document {
        Value::Object(mut artifact) => artifact
            .remove("abi")
            .ok_or_else(|| AppError::Config("ABI artifact has no `abi` field".into()))?,
        other => other,
    };

    serde_json::from_value(abi_value)
        .map_err(|err| AppError::Config(format!("failed to decode ABI: {err}")))
}

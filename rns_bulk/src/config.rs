//! Network selection, contract addresses and workflow tunables, read from the environment

use ethers::types::Address;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::commit_reveal::PollSettings;
use crate::error::BulkError;

/// Rootstock networks the bulk manager is deployed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    RskTestnet,
    RskMainnet,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::RskTestnet => 31,
            Network::RskMainnet => 30,
        }
    }

    /// Public node endpoint
    pub fn rpc_url(&self) -> &'static str {
        match self {
            Network::RskTestnet => "https://public-node.testnet.rsk.co",
            Network::RskMainnet => "https://public-node.rsk.co",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::RskTestnet => "Rootstock Testnet",
            Network::RskMainnet => "Rootstock",
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(self, Network::RskTestnet)
    }

    /// Parse from user input (case-insensitive)
    pub fn from_input(input: &str) -> Option<Network> {
        match input.trim().to_lowercase().as_str() {
            "testnet" | "rsk-testnet" | "31" => Some(Network::RskTestnet),
            "mainnet" | "rsk" | "rsk-mainnet" | "30" => Some(Network::RskMainnet),
            _ => None,
        }
    }

    /// Known deployment; mainnet addresses must come from the environment
    pub fn default_contracts(&self) -> Option<ContractAddresses> {
        match self {
            Network::RskTestnet => Some(ContractAddresses {
                registry: parse_address("0x7d284aaac6e925aad802a53c0c69efe3764597b8").ok()?,
                fifs_registrar: parse_address("0x90734bd6bf96250a7b262e2bc34284b0d47c1e8d").ok()?,
                rif_token: parse_address("0x19f64674d8a5b4e652319f5e239efd3bc969a1fe").ok()?,
                bulk_manager: parse_address("0x6621e4f2fc0761ab31d1b89babef2be0a83901ab").ok()?,
            }),
            Network::RskMainnet => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub registry: Address,
    pub fifs_registrar: Address,
    pub rif_token: Address,
    pub bulk_manager: Address,
}

/// Where to connect and which contracts to talk to
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub rpc_url: String,
    pub contracts: ContractAddresses,
    /// Hex private key of the signing wallet
    pub private_key: Option<String>,
}

impl NetworkConfig {
    pub fn from_env() -> Result<Self, BulkError> {
        let network = match env::var("RNS_NETWORK") {
            Ok(value) => Network::from_input(&value)
                .ok_or_else(|| BulkError::Config(format!("unknown RNS_NETWORK '{value}'")))?,
            Err(_) => Network::RskTestnet,
        };

        let rpc_url = env::var("RPC_URL").unwrap_or_else(|_| network.rpc_url().to_string());
        let defaults = network.default_contracts();
        let address = |key: &str, fallback: Option<Address>| -> Result<Address, BulkError> {
            match env::var(key) {
                Ok(value) => parse_address(&value),
                Err(_) => fallback.ok_or_else(|| {
                    BulkError::Config(format!("{key} must be set on {}", network.name()))
                }),
            }
        };

        let contracts = ContractAddresses {
            registry: address("RNS_REGISTRY_ADDRESS", defaults.map(|d| d.registry))?,
            fifs_registrar: address("FIFS_REGISTRAR_ADDRESS", defaults.map(|d| d.fifs_registrar))?,
            rif_token: address("RIF_TOKEN_ADDRESS", defaults.map(|d| d.rif_token))?,
            bulk_manager: address("RNS_BULK_MANAGER_ADDRESS", defaults.map(|d| d.bulk_manager))?,
        };

        Ok(Self {
            network,
            rpc_url,
            contracts,
            private_key: env::var("PRIVATE_KEY").ok().filter(|k| !k.trim().is_empty()),
        })
    }
}

/// Timeouts and knobs of the batching workflow
#[derive(Debug, Clone, Copy)]
pub struct WorkflowConfig {
    /// Bound on any single read call
    pub call_timeout: Duration,
    /// Bound on signing plus mining of one transaction
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub maturity_timeout: Duration,
    /// Approvals cover this many times the required amount
    pub approval_multiplier: u64,
    pub history_lookback_blocks: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(45),
            confirmation_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_millis(2000),
            maturity_timeout: Duration::from_secs(600),
            approval_multiplier: 10,
            history_lookback_blocks: 2000,
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> Result<Self, BulkError> {
        let defaults = Self::default();
        let config = Self {
            call_timeout: Duration::from_secs(env_or(
                "CALL_TIMEOUT_SECS",
                defaults.call_timeout.as_secs(),
            )?),
            confirmation_timeout: Duration::from_secs(env_or(
                "CONFIRMATION_TIMEOUT_SECS",
                defaults.confirmation_timeout.as_secs(),
            )?),
            poll_interval: Duration::from_millis(env_or(
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            maturity_timeout: Duration::from_secs(env_or(
                "MATURITY_TIMEOUT_SECS",
                defaults.maturity_timeout.as_secs(),
            )?),
            approval_multiplier: env_or("APPROVAL_MULTIPLIER", defaults.approval_multiplier)?,
            history_lookback_blocks: env_or(
                "HISTORY_LOOKBACK_BLOCKS",
                defaults.history_lookback_blocks,
            )?,
        };

        if config.approval_multiplier == 0 {
            return Err(BulkError::Config("APPROVAL_MULTIPLIER must be at least 1".into()));
        }
        if config.poll_interval.is_zero() {
            return Err(BulkError::Config("POLL_INTERVAL_MS must be positive".into()));
        }
        Ok(config)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.poll_interval,
            timeout: self.maturity_timeout,
            call_timeout: self.call_timeout,
        }
    }
}

pub fn parse_address(value: &str) -> Result<Address, BulkError> {
    Address::from_str(value.trim())
        .map_err(|e| BulkError::Config(format!("invalid address '{value}': {e}")))
}

fn env_or<T>(key: &str, default: T) -> Result<T, BulkError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| BulkError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::hash::MessageIdScheme;
use crate::types::ChainId;

/// Main configuration for the bridge service
#[derive(Debug, Clone)]
pub struct Config {
    pub chain_a: ChainConfig,
    pub chain_b: ChainConfig,
    pub relay: RelayConfig,
    pub attestation: AttestationConfig,
    /// Postgres replay guard; in-memory when unset
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    /// Message id layout shared by relay and attestation
    pub message_id_scheme: MessageIdScheme,
}

/// One side of the bridge
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub rpc_url: String,
    pub ferry_address: String,
}

/// Relay configuration
#[derive(Clone)]
pub struct RelayConfig {
    pub enabled: bool,
    /// Observe-only when unset
    pub private_key: Option<String>,
    pub poll_interval_ms: u64,
    pub lookback_blocks: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("enabled", &self.enabled)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("lookback_blocks", &self.lookback_blocks)
            .finish()
    }
}

impl RelayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Attestation configuration. The endpoint answers 503 unless both the
/// signing key and the NFT contract address are set.
#[derive(Clone)]
pub struct AttestationConfig {
    pub private_key: Option<String>,
    pub nft_contract_address: Option<String>,
    /// EIP-712 domain chain id
    pub nft_chain_id: u64,
    pub timestamp_tolerance_secs: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for AttestationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("nft_contract_address", &self.nft_contract_address)
            .field("nft_chain_id", &self.nft_chain_id)
            .field("timestamp_tolerance_secs", &self.timestamp_tolerance_secs)
            .finish()
    }
}

impl AttestationConfig {
    pub fn is_configured(&self) -> bool {
        self.private_key.is_some() && self.nft_contract_address.is_some()
    }
}

/// Database configuration
#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Default functions
fn default_poll_interval() -> u64 {
    15_000
}

fn default_lookback_blocks() -> u64 {
    100
}

fn default_timestamp_tolerance() -> u64 {
    60
}

fn default_api_port() -> u16 {
    8080
}

/// Unset and empty variables are treated alike
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| eyre!("{} environment variable is required", name))
}

fn chain_from_env(prefix: &str) -> Result<ChainConfig> {
    let id_var = format!("{}_ID", prefix);
    let raw_id: u64 = required(&id_var)?
        .parse()
        .wrap_err_with(|| format!("{} must be a valid integer", id_var))?;
    let chain_id = ChainId::try_from(raw_id)
        .map_err(|_| eyre!("{} must fit in 16 bits, got {}", id_var, raw_id))?;

    Ok(ChainConfig {
        chain_id,
        rpc_url: required(&format!("{}_RPC_URL", prefix))?,
        ferry_address: required(&format!("{}_FERRY_ADDRESS", prefix))?,
    })
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let chain_a = chain_from_env("CHAIN_A")?;
        let chain_b = chain_from_env("CHAIN_B")?;

        let relay = RelayConfig {
            enabled: optional("RELAY_ENABLED")
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            private_key: optional("RELAYER_PRIVATE_KEY"),
            poll_interval_ms: optional("POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_poll_interval()),
            lookback_blocks: optional("LOOKBACK_BLOCKS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_lookback_blocks()),
        };

        let attestation = AttestationConfig {
            private_key: optional("ATTESTATION_PRIVATE_KEY"),
            nft_contract_address: optional("NFT_CONTRACT_ADDRESS"),
            nft_chain_id: optional("NFT_CHAIN_ID")
                .and_then(|v| v.parse().ok())
                .unwrap_or(u64::from(chain_b.chain_id)),
            timestamp_tolerance_secs: optional("TIMESTAMP_TOLERANCE_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_timestamp_tolerance()),
        };

        let message_id_scheme = match optional("MESSAGE_ID_SCHEME") {
            Some(raw) => raw
                .parse()
                .map_err(|e| eyre!("MESSAGE_ID_SCHEME: {}", e))?,
            None => MessageIdScheme::default(),
        };

        let config = Config {
            chain_a,
            chain_b,
            relay,
            attestation,
            database: optional("DATABASE_URL").map(|url| DatabaseConfig { url }),
            api: ApiConfig {
                bind_address: optional("API_BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: optional("API_PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default_api_port()),
            },
            message_id_scheme,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// RPC URLs and the relayer key are not checked here: either one being
    /// unusable stops the relay at startup but must not take the attestation
    /// endpoint down with it.
    pub fn validate(&self) -> Result<()> {
        if self.chain_a.chain_id == self.chain_b.chain_id {
            return Err(eyre!(
                "CHAIN_A_ID and CHAIN_B_ID must differ (both {})",
                self.chain_a.chain_id
            ));
        }

        for (name, chain) in [("CHAIN_A", &self.chain_a), ("CHAIN_B", &self.chain_b)] {
            if !is_hex_address(&chain.ferry_address) {
                return Err(eyre!(
                    "{}_FERRY_ADDRESS must be a valid hex address (42 chars with 0x prefix)",
                    name
                ));
            }
        }

        if let Some(key) = &self.attestation.private_key {
            if !is_private_key(key) {
                return Err(eyre!(
                    "ATTESTATION_PRIVATE_KEY must be 66 chars (0x + 64 hex chars)"
                ));
            }
        }

        if let Some(addr) = &self.attestation.nft_contract_address {
            if !is_hex_address(addr) {
                return Err(eyre!(
                    "NFT_CONTRACT_ADDRESS must be a valid hex address (42 chars with 0x prefix)"
                ));
            }
        }

        if self.relay.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than 0"));
        }

        Ok(())
    }
}

fn is_hex_address(value: &str) -> bool {
    value.len() == 42
        && value.starts_with("0x")
        && value[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

fn is_private_key(value: &str) -> bool {
    value.len() == 66
        && value.starts_with("0x")
        && value[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

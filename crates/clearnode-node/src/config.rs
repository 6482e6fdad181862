//! Node configuration loading and management.

use anyhow::Context;
use clearnode_core::{Address, Asset};
use clearnode_crypto::KeyPair;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// Full configuration for the clearing node.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClearnodeConfig {
    /// HTTP RPC server settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Broker signing key.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Asset registry rows seeded at startup.
    #[serde(default)]
    pub assets: Vec<AssetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API listen address.
    #[serde(default = "default_api_addr")]
    pub listen_addr: String,
    /// API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the RocksDB data directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// How long a transaction waits for a row lock before failing, in milliseconds.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json).
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct BrokerConfig {
    /// Hex-encoded secp256k1 secret key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    /// File containing the hex-encoded secret key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    pub token: Address,
    pub chain_id: u64,
    pub symbol: String,
    pub decimals: u32,
}

fn default_api_addr() -> String {
    "127.0.0.1".into()
}
fn default_api_port() -> u16 {
    8000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_lock_timeout_ms() -> i64 {
    2000
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_api_addr(),
            port: default_api_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl BrokerConfig {
    /// Load the configured key. `None` when neither a key nor a key file is set.
    pub fn load_keypair(&self) -> anyhow::Result<Option<KeyPair>> {
        if let Some(key) = &self.private_key {
            return Ok(Some(KeyPair::from_hex(key)?));
        }
        if let Some(path) = &self.private_key_path {
            let mut contents = std::fs::read_to_string(path)
                .with_context(|| format!("reading broker key {}", path.display()))?;
            let keypair = KeyPair::from_hex(&contents);
            contents.zeroize();
            return Ok(Some(keypair?));
        }
        Ok(None)
    }
}

impl AssetConfig {
    pub fn to_asset(&self) -> anyhow::Result<Asset> {
        Ok(Asset::new(self.token, self.chain_id, &self.symbol, self.decimals)?)
    }
}

impl ClearnodeConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ClearnodeConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save the current config to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// `host:port` the HTTP API binds to.
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.listen_addr, self.api.port)
    }
}

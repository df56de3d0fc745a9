//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `whatsapi` binary)

use std::path::PathBuf;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaError};

/// Placeholder replaced by a random shard index in `server.host`
pub const SHARD_PLACEHOLDER: &str = "{0}";

/// Shard indices the host template is filled with
pub const SHARD_RANGE: std::ops::RangeInclusive<u32> = 1..=16;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Account identity
    #[serde(default)]
    pub account: AccountConfig,

    /// Server endpoint and address domains
    #[serde(default)]
    pub server: ServerConfig,

    /// Protocol behaviour switches
    #[serde(default)]
    pub features: FeatureConfig,

    /// Client identification strings and local state
    #[serde(default)]
    pub client: ClientConfig,
}

impl Config {
    /// Create a configuration for the given account
    pub fn new(msisdn: impl Into<String>, password: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.account.msisdn = msisdn.into();
        config.account.password = password.into();
        config
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| WaError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| WaError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(msisdn) = std::env::var("WHATSAPI_MSISDN") {
            config.account.msisdn = msisdn;
        }
        if let Ok(password) = std::env::var("WHATSAPI_PASSWORD") {
            config.account.password = password;
        }
        if let Ok(ccode) = std::env::var("WHATSAPI_CCODE") {
            config.account.ccode = ccode;
        }

        if let Ok(host) = std::env::var("WHATSAPI_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("WHATSAPI_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("WHATSAPI_RECONNECT") {
            if let Ok(val) = val.parse() {
                config.server.reconnect = val;
            }
        }

        if let Ok(val) = std::env::var("WHATSAPI_SEND_RECEIPTS") {
            if let Ok(val) = val.parse::<u8>() {
                config.features.send_receipts = ReceiptPolicy::from_level(val);
            }
        }

        if let Ok(path) = std::env::var("WHATSAPI_CHALLENGE_FILE") {
            config.client.challenge_file = PathBuf::from(path);
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs from defaults)
    pub fn merge(self, other: Self) -> Self {
        let account_default = AccountConfig::default();
        let server_default = ServerConfig::default();

        Self {
            account: AccountConfig {
                msisdn: pick(other.account.msisdn, self.account.msisdn, &account_default.msisdn),
                password: pick(
                    other.account.password,
                    self.account.password,
                    &account_default.password,
                ),
                ccode: pick(other.account.ccode, self.account.ccode, &account_default.ccode),
            },
            server: ServerConfig {
                host: pick(other.server.host, self.server.host, &server_default.host),
                port: if other.server.port != server_default.port {
                    other.server.port
                } else {
                    self.server.port
                },
                ..other.server
            },
            features: other.features,
            client: other.client,
        }
    }

    /// Check that the account section is usable for login
    pub fn validate(&self) -> Result<()> {
        if self.account.msisdn.is_empty() {
            return Err(WaError::Config("account.msisdn is required".to_string()));
        }
        if self.account.msisdn.contains('+') {
            return Err(WaError::Config(
                "account.msisdn must not contain a leading '+'".to_string(),
            ));
        }
        Ok(())
    }
}

fn pick(preferred: String, fallback: String, default: &str) -> String {
    if preferred != default {
        preferred
    } else {
        fallback
    }
}

/// Account identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    /// Phone number in international format, without leading '+'
    pub msisdn: String,

    /// Password issued at registration (base64)
    pub password: String,

    /// Mobile country code, sent in the auth payload
    pub ccode: String,
}

/// Server endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host template; `{0}` is replaced with a random shard index
    pub host: String,

    /// Port to connect to
    pub port: u16,

    /// Domain suffix for user addresses
    pub domain: String,

    /// Domain suffix for group addresses
    pub group_domain: String,

    /// Reconnect automatically when the transport ends
    pub reconnect: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "e{0}.whatsapp.net".to_string(),
            port: 443,
            domain: "s.whatsapp.net".to_string(),
            group_domain: "g.us".to_string(),
            reconnect: true,
        }
    }
}

impl ServerConfig {
    /// Resolve the host template to a concrete host name
    pub fn resolve_host(&self) -> String {
        if self.host.contains(SHARD_PLACEHOLDER) {
            let shard = rand::thread_rng().gen_range(SHARD_RANGE);
            self.host.replace(SHARD_PLACEHOLDER, &shard.to_string())
        } else {
            self.host.clone()
        }
    }
}

/// Which receipts are sent back for reply-worthy nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ReceiptPolicy {
    /// Never acknowledge
    None,
    /// Delivery receipt only
    Delivery,
    /// Delivery receipt followed by a read receipt
    #[default]
    Read,
}

impl ReceiptPolicy {
    /// Map the numeric level (0, 1, 2) used in config files
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::None,
            1 => Self::Delivery,
            _ => Self::Read,
        }
    }

    /// Numeric level of this policy
    pub fn level(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Delivery => 1,
            Self::Read => 2,
        }
    }

    /// Whether a standard delivery receipt is sent
    pub fn sends_delivery(self) -> bool {
        self >= Self::Delivery
    }

    /// Whether a read receipt is sent as well
    pub fn sends_read(self) -> bool {
        self == Self::Read
    }
}

impl From<u8> for ReceiptPolicy {
    fn from(level: u8) -> Self {
        Self::from_level(level)
    }
}

impl From<ReceiptPolicy> for u8 {
    fn from(policy: ReceiptPolicy) -> Self {
        policy.level()
    }
}

/// Protocol behaviour switches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Receipt policy for incoming messages
    pub send_receipts: ReceiptPolicy,
}

/// Client identification strings and local state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Device name used in the stream resource
    pub device_type: String,

    /// App version used in the stream resource
    pub app_version: String,

    /// User agent sent in the auth payload and media uploads
    pub user_agent: String,

    /// File holding the challenge token of the last successful login
    pub challenge_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_type: "iPhone".to_string(),
            app_version: "2.11.16".to_string(),
            user_agent: "WhatsApp/2.11.16 iPhone_OS/8.3 Device/iPhone_6".to_string(),
            challenge_file: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("whatsapi")
                .join("challenge"),
        }
    }
}

impl ClientConfig {
    /// Stream resource string: `device-version-port`
    pub fn resource(&self, port: u16) -> String {
        format!("{}-{}-{}", self.device_type, self.app_version, port)
    }
}
